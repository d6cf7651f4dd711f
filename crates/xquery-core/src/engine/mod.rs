pub mod evaluator;
pub mod runtime;
