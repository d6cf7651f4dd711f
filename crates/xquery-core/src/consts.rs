/// Namespace of the W3C error codes (xqt-errors).
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";

/// Caps for collected compile notes.
pub const MAX_INFO_TOTAL: usize = 1 << 20;
pub const MAX_INFO_LINE: usize = 1 << 14;

/// Prefix of notes logged for rewrites performed during evaluation.
pub const RUNTIME_PREFIX: &str = "RUNTIME: ";
