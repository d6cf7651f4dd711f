use crate::compiler::ir::Span;
use crate::consts::ERR_NS;
use crate::types::{ItemType, SeqType};
use crate::xdm::{ExpandedName, XdmItem, XdmSequence};
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

/// Error codes emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FOER0000, // generic error, unorderable nodes
    FORG0001, // invalid lexical form in a cast
    FORG0006, // invalid argument type, e.g. EBV of a multi-item sequence
    FOFT9999, // no full-text matcher available
    XPTY0004, // type error
    XPDY0002, // context item undefined
    XPST0008, // undeclared variable
    XPST0017, // unknown function or wrong arity
    Unknown,
}

impl ErrorCode {
    pub const fn local(self) -> &'static str {
        match self {
            ErrorCode::FOER0000 => "FOER0000",
            ErrorCode::FORG0001 => "FORG0001",
            ErrorCode::FORG0006 => "FORG0006",
            ErrorCode::FOFT9999 => "FOFT9999",
            ErrorCode::XPTY0004 => "XPTY0004",
            ErrorCode::XPDY0002 => "XPDY0002",
            ErrorCode::XPST0008 => "XPST0008",
            ErrorCode::XPST0017 => "XPST0017",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// QName in the xqt-errors namespace.
    pub fn qname(self) -> ExpandedName {
        ExpandedName::new(Some(ERR_NS.to_string()), self.local())
    }

    pub fn from_code(s: &str) -> Self {
        use ErrorCode::*;
        match s.strip_prefix("err:").unwrap_or(s) {
            "FOER0000" => FOER0000,
            "FORG0001" => FORG0001,
            "FORG0006" => FORG0006,
            "FOFT9999" => FOFT9999,
            "XPTY0004" => XPTY0004,
            "XPDY0002" => XPDY0002,
            "XPST0008" => XPST0008,
            "XPST0017" => XPST0017,
            _ => Unknown,
        }
    }

    /// Default phase in which the code is raised.
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorCode::XPST0008 | ErrorCode::XPST0017 => ErrorKind::Static,
            _ => ErrorKind::Dynamic,
        }
    }
}

/// Phase in which an error was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ExpandedName,
    pub kind: ErrorKind,
    pub message: String,
    pub span: Option<Span>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new_qname(code: ExpandedName, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self { code, kind, message: msg.into(), span: None, source: None }
    }

    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new_qname(code.qname(), code.kind(), msg)
    }

    /// Type error detected during compilation.
    pub fn static_type(found: impl fmt::Display, expected: &SeqType, span: Option<Span>) -> Self {
        let mut err = Self::from_code(ErrorCode::XPTY0004, format!("{expected} expected, {found} found"));
        err.kind = ErrorKind::Static;
        err.span = span;
        err
    }

    /// Type error detected during evaluation.
    pub fn dynamic_type(found: impl fmt::Display, expected: &SeqType, span: Option<Span>) -> Self {
        let mut err = Self::from_code(ErrorCode::XPTY0004, format!("{expected} expected, {found} found"));
        err.span = span;
        err
    }

    /// Attaches a source location unless one is already present.
    pub fn with_span(mut self, span: Option<Span>) -> Self {
        if self.span.is_none() {
            self.span = span;
        }
        self
    }

    pub fn with_source(mut self, source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>) -> Self {
        self.source = source.into();
        self
    }

    pub fn code_enum(&self) -> ErrorCode {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            ErrorCode::from_code(&self.code.local)
        } else {
            ErrorCode::Unknown
        }
    }

    pub fn is_static(&self) -> bool {
        self.kind == ErrorKind::Static
    }

    pub fn format_code(&self) -> String {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            format!("err:{}", self.code.local)
        } else {
            self.code.to_string()
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.kind == other.kind && self.message == other.message && self.span == other.span
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.format_code())?;
        if let Some(span) = self.span {
            write!(f, " at {span}")?;
        }
        Ok(())
    }
}

/// Variable reference target: name, optional declared type and promotion flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: ExpandedName,
    pub declared: Option<SeqType>,
    pub promote: bool,
}

impl Var {
    pub fn new(name: ExpandedName) -> Self {
        Self { name, declared: None, promote: false }
    }

    pub fn typed(name: ExpandedName, declared: SeqType, promote: bool) -> Self {
        Self { name, declared: Some(declared), promote }
    }

    pub fn declared_type(&self) -> SeqType {
        self.declared.clone().unwrap_or_else(SeqType::item_star)
    }

    /// Whether values bound to this variable are checked and promoted.
    pub fn promotes(&self) -> bool {
        self.declared.is_some() && self.promote
    }
}

/// Outcome of matching one item against a full-text query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FtMatch {
    pub matched: bool,
    /// Relevance in `[0, 1]`.
    pub score: Option<f64>,
}

impl FtMatch {
    pub fn hit(score: f64) -> Self {
        Self { matched: true, score: Some(score.clamp(0.0, 1.0)) }
    }

    pub fn miss() -> Self {
        Self { matched: false, score: None }
    }
}

/// Full-text pipeline consumed by `contains text` tests.
pub trait FullTextMatcher: Send + Sync {
    fn matches(&self, text: &str, query: &[String]) -> Result<FtMatch, Error>;
}

/// Case-insensitive whitespace-token matcher: every query word must occur as a
/// token; the score is the share of text tokens that are hits.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenMatcher;

impl FullTextMatcher for TokenMatcher {
    fn matches(&self, text: &str, query: &[String]) -> Result<FtMatch, Error> {
        let tokens: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
        if tokens.is_empty() || query.is_empty() {
            return Ok(FtMatch::miss());
        }
        let words: Vec<String> = query.iter().map(|w| w.to_lowercase()).collect();
        if !words.iter().all(|w| tokens.contains(w)) {
            return Ok(FtMatch::miss());
        }
        let hits = tokens.iter().filter(|t| words.contains(t)).count();
        Ok(FtMatch::hit(hits as f64 / tokens.len() as f64))
    }
}

#[derive(Debug, Clone)]
pub struct StaticContext {
    /// Static type of the initial context item; `None` if there is none.
    pub context_item_type: Option<ItemType>,
    pub variables: HashMap<ExpandedName, Var>,
    pub query_info: bool,
    pub optimize: bool,
}

impl Default for StaticContext {
    fn default() -> Self {
        Self {
            context_item_type: Some(ItemType::AnyItem),
            variables: HashMap::new(),
            query_info: false,
            optimize: true,
        }
    }
}

/// Builder for `StaticContext`.
///
/// The static context is captured by `compile`; the compiled query carries
/// its own copy, so later changes to a builder do not affect it.
pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl Default for StaticContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContextBuilder {
    pub fn new() -> Self {
        Self { ctx: StaticContext::default() }
    }

    pub fn with_context_item_type(mut self, ty: Option<ItemType>) -> Self {
        self.ctx.context_item_type = ty;
        self
    }

    /// Declares an external variable.
    pub fn with_variable(mut self, var: Var) -> Self {
        self.ctx.variables.insert(var.name.clone(), var);
        self
    }

    /// Collects optimization notes into the compiled query.
    pub fn with_query_info(mut self, on: bool) -> Self {
        self.ctx.query_info = on;
        self
    }

    pub fn with_optimize(mut self, on: bool) -> Self {
        self.ctx.optimize = on;
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

#[derive(Clone)]
pub struct DynamicContext<N> {
    pub context_item: Option<XdmItem<N>>,
    pub variables: HashMap<ExpandedName, XdmSequence<N>>,
    pub full_text: Option<Arc<dyn FullTextMatcher>>,
    pub scoring: bool,
}

impl<N> Default for DynamicContext<N> {
    fn default() -> Self {
        Self { context_item: None, variables: HashMap::new(), full_text: None, scoring: false }
    }
}

impl<N: fmt::Debug> fmt::Debug for DynamicContext<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicContext")
            .field("context_item", &self.context_item)
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("full_text", &self.full_text.is_some())
            .field("scoring", &self.scoring)
            .finish()
    }
}

pub struct DynamicContextBuilder<N> {
    ctx: DynamicContext<N>,
}

impl<N> Default for DynamicContextBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> DynamicContextBuilder<N> {
    pub fn new() -> Self {
        Self { ctx: DynamicContext::default() }
    }

    pub fn with_context_item(mut self, item: impl Into<XdmItem<N>>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: impl Into<XdmSequence<N>>) -> Self {
        self.ctx.variables.insert(name, value.into());
        self
    }

    pub fn with_full_text(mut self, matcher: Arc<dyn FullTextMatcher>) -> Self {
        self.ctx.full_text = Some(matcher);
        self
    }

    /// Computes relevance scores while filtering.
    pub fn with_scoring(mut self, on: bool) -> Self {
        self.ctx.scoring = on;
        self
    }

    pub fn build(self) -> DynamicContext<N> {
        self.ctx
    }
}
