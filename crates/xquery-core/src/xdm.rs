use crate::compiler::ir::FunctionItem;
use crate::engine::runtime::Error;
use crate::types::AtomicType;
use compact_str::CompactString;
use core::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: CompactString,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<String>, local: impl Into<CompactString>) -> Self {
        Self { ns_uri, local: local.into() }
    }

    pub fn local(local: impl Into<CompactString>) -> Self {
        Self::new(None, local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns_uri {
            Some(ns) => write!(f, "Q{{{}}}{}", ns, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Atomic values understood by the core.
///
/// Decimals are stored as `f64`; the core only needs their ordering and
/// numeric identity, not arbitrary precision.
#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Decimal(f64),
    Double(f64),
    Float(f32),
    AnyUri(String),
    UntypedAtomic(String),
}

impl XdmAtomicValue {
    pub fn atomic_type(&self) -> AtomicType {
        match self {
            Self::Boolean(_) => AtomicType::Boolean,
            Self::String(_) => AtomicType::String,
            Self::Integer(_) => AtomicType::Integer,
            Self::Decimal(_) => AtomicType::Decimal,
            Self::Double(_) => AtomicType::Double,
            Self::Float(_) => AtomicType::Float,
            Self::AnyUri(_) => AtomicType::AnyUri,
            Self::UntypedAtomic(_) => AtomicType::UntypedAtomic,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Decimal(_) | Self::Double(_) | Self::Float(_))
    }

    /// Numeric value as `f64`, or `None` for non-numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Decimal(d) | Self::Double(d) => Some(*d),
            Self::Float(f) => Some(f64::from(*f)),
            _ => None,
        }
    }

    /// Lexical (string) form of the value.
    pub fn lexical(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::String(s) | Self::AnyUri(s) | Self::UntypedAtomic(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Decimal(d) | Self::Double(d) => format_double(*d),
            Self::Float(f) => format_double(f64::from(*f)),
        }
    }
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else if d.fract() == 0.0 && d.abs() < 1e15 {
        format!("{}", d as i64)
    } else {
        d.to_string()
    }
}

impl fmt::Display for XdmAtomicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Self::AnyUri(s) => write!(f, "xs:anyURI(\"{s}\")"),
            Self::UntypedAtomic(s) => write!(f, "xs:untypedAtomic(\"{s}\")"),
            Self::Boolean(b) => write!(f, "{b}()"),
            Self::Float(_) => write!(f, "xs:float(\"{}\")", self.lexical()),
            _ => f.write_str(&self.lexical()),
        }
    }
}

pub type XdmSequence<N> = Vec<XdmItem<N>>;

#[derive(Debug, Clone, PartialEq)]
pub enum XdmItem<N> {
    Node(N),
    Atomic(XdmAtomicValue),
    Function(Arc<FunctionItem>),
}

impl<N> From<XdmAtomicValue> for XdmItem<N> {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}

impl<N> fmt::Display for XdmItem<N>
where
    N: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XdmItem::Node(_) => write!(f, "<node>"),
            XdmItem::Atomic(a) => write!(f, "{a}"),
            XdmItem::Function(func) => write!(f, "{func}"),
        }
    }
}

pub type XdmItemResult<N> = Result<XdmItem<N>, Error>;

/// Pull-based lazy sequence.
pub trait SequenceCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>>;

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }

    /// Score attached to the item returned by the last `next_item` call, if any.
    fn score(&self) -> Option<f64> {
        None
    }
}

/// Cursor over an already materialized sequence.
pub struct VecCursor<N> {
    items: std::vec::IntoIter<XdmItem<N>>,
}

impl<N> VecCursor<N> {
    pub fn new(items: XdmSequence<N>) -> Self {
        Self { items: items.into_iter() }
    }
}

impl<N> SequenceCursor<N> for VecCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        self.items.next().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.items.len();
        (len, Some(len))
    }
}

/// Boxed cursor borrowing from the expression tree it evaluates.
pub type Cursor<'a, N> = Box<dyn SequenceCursor<N> + 'a>;

/// Lazy result of an evaluation.
pub struct XdmSequenceStream<'a, N> {
    cursor: Cursor<'a, N>,
}

impl<'a, N: 'a> XdmSequenceStream<'a, N> {
    pub fn new(cursor: Cursor<'a, N>) -> Self {
        Self { cursor }
    }

    pub fn cursor(self) -> Cursor<'a, N> {
        self.cursor
    }

    /// Collects all remaining items; the first error aborts.
    pub fn materialize(mut self) -> Result<XdmSequence<N>, Error> {
        let mut out = Vec::with_capacity(self.cursor.size_hint().0);
        while let Some(item) = self.cursor.next_item() {
            out.push(item?);
        }
        Ok(out)
    }

    /// Collects all remaining items together with their scores.
    pub fn materialize_scored(mut self) -> Result<Vec<(XdmItem<N>, f64)>, Error> {
        let mut out = Vec::new();
        while let Some(item) = self.cursor.next_item() {
            let item = item?;
            out.push((item, self.cursor.score().unwrap_or(0.0)));
        }
        Ok(out)
    }
}

impl<N> Iterator for XdmSequenceStream<'_, N> {
    type Item = XdmItemResult<N>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_item()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cursor.size_hint()
    }
}
