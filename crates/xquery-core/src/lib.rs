//! Compilation and typed evaluation core of an XQuery-style expression engine.
//!
//! Expression trees are built with the constructors on [`Expr`], compiled
//! against a [`StaticContext`] (static typing, predicate rewriting, type-check
//! elimination) and evaluated lazily against a [`DynamicContext`].

pub mod compiler;
pub mod consts;
pub mod engine;
pub mod model;
pub mod simple_node;
pub mod types;
pub mod xdm;

pub use compiler::compile;
pub use compiler::ir::{Axis, CmpOp, CompiledQuery, Expr, ExprKind, Function, FunctionItem, NodeTest, Span};
pub use compiler::positional::PosRange;
pub use compiler::preds::Preds;
pub use compiler::type_check::TypeCheck;
pub use engine::evaluator::{TypeCheckCursor, evaluate, evaluate_scored, evaluate_stream};
pub use engine::runtime::{
    DynamicContext, DynamicContextBuilder, Error, ErrorCode, FtMatch, FullTextMatcher, StaticContext,
    StaticContextBuilder, TokenMatcher, Var,
};
pub use model::{NodeKind, QName, XdmNode};
pub use simple_node::{SimpleNode, SimpleNodeBuilder, attr, comment, doc as simple_doc, elem, text};
pub use types::{AtomicType, ExprType, FunctionType, ItemType, Occurrence, SeqType};
pub use xdm::{ExpandedName, SequenceCursor, XdmAtomicValue, XdmItem, XdmSequence, XdmSequenceStream};
