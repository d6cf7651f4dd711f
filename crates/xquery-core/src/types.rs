//! Static type model: item type, occurrence indicator and optional exact size.
//!
//! Occurrence indicators form a small lattice over `[min, max]` bounds where
//! `min ∈ {0, 1}` and `max ∈ {0, 1, ∞}`. `union` widens both bounds,
//! `intersect` narrows them and fails when the result would be empty.

use crate::model::NodeKind;
use crate::xdm::XdmAtomicValue;
use core::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occurrence {
    /// `empty-sequence()`
    Zero,
    /// `?`
    ZeroOrOne,
    ExactlyOne,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

impl Occurrence {
    pub const fn min(self) -> u64 {
        match self {
            Self::Zero | Self::ZeroOrOne | Self::ZeroOrMore => 0,
            Self::ExactlyOne | Self::OneOrMore => 1,
        }
    }

    /// Upper bound; `None` is unbounded.
    pub const fn max(self) -> Option<u64> {
        match self {
            Self::Zero => Some(0),
            Self::ZeroOrOne | Self::ExactlyOne => Some(1),
            Self::ZeroOrMore | Self::OneOrMore => None,
        }
    }

    /// Builds the tightest indicator covering `[min, max]`; `None` if `min > max`.
    pub fn from_bounds(min: u64, max: Option<u64>) -> Option<Self> {
        if let Some(max) = max
            && min > max
        {
            return None;
        }
        let max = match max {
            Some(m @ (0 | 1)) => Some(m),
            _ => None,
        };
        Some(match (min.min(1), max) {
            (0, Some(0)) => Self::Zero,
            (0, Some(1)) => Self::ZeroOrOne,
            (1, Some(_)) => Self::ExactlyOne,
            (0, None) => Self::ZeroOrMore,
            _ => Self::OneOrMore,
        })
    }

    pub fn from_size(n: u64) -> Self {
        match n {
            0 => Self::Zero,
            1 => Self::ExactlyOne,
            _ => Self::OneOrMore,
        }
    }

    /// Whether a sequence of `n` items satisfies the indicator.
    pub fn check(self, n: u64) -> bool {
        n >= self.min() && self.max().is_none_or(|max| n <= max)
    }

    pub fn instance_of(self, other: Self) -> bool {
        other.min() <= self.min()
            && match (self.max(), other.max()) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(a), Some(b)) => a <= b,
            }
    }

    pub fn union(self, other: Self) -> Self {
        let max = match (self.max(), other.max()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Self::from_bounds(self.min().min(other.min()), max).unwrap_or(Self::ZeroOrMore)
    }

    /// Narrows both bounds; `None` when no sequence length satisfies both.
    pub fn intersect(self, other: Self) -> Option<Self> {
        let max = match (self.max(), other.max()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        Self::from_bounds(self.min().max(other.min()), max)
    }

    /// Occurrence of `for $a in A return B`-like compositions.
    pub fn multiply(self, other: Self) -> Self {
        let max = match (self.max(), other.max()) {
            (Some(0), _) | (_, Some(0)) => Some(0),
            (Some(a), Some(b)) => Some(a * b),
            _ => None,
        };
        Self::from_bounds(self.min() * other.min(), max).unwrap_or(Self::ZeroOrMore)
    }

    pub fn zero_or_one(self) -> bool {
        self.max().is_some_and(|m| m <= 1)
    }

    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Zero | Self::ExactlyOne => "",
            Self::ZeroOrOne => "?",
            Self::ZeroOrMore => "*",
            Self::OneOrMore => "+",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicType {
    AnyAtomic,
    UntypedAtomic,
    String,
    Boolean,
    Decimal,
    Integer,
    Double,
    Float,
    AnyUri,
}

impl AtomicType {
    pub fn instance_of(self, other: AtomicType) -> bool {
        self == other
            || other == AtomicType::AnyAtomic
            || (self == AtomicType::Integer && other == AtomicType::Decimal)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Decimal | Self::Integer | Self::Double | Self::Float)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::AnyAtomic => "xs:anyAtomicType",
            Self::UntypedAtomic => "xs:untypedAtomic",
            Self::String => "xs:string",
            Self::Boolean => "xs:boolean",
            Self::Decimal => "xs:decimal",
            Self::Integer => "xs:integer",
            Self::Double => "xs:double",
            Self::Float => "xs:float",
            Self::AnyUri => "xs:anyURI",
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signature of a function item type.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub params: Vec<SeqType>,
    pub result: SeqType,
}

impl FunctionType {
    pub fn new(params: Vec<SeqType>, result: SeqType) -> Self {
        Self { params, result }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Function subtyping: contravariant parameters, covariant result.
    pub fn instance_of(&self, other: &FunctionType) -> bool {
        self.arity() == other.arity()
            && self.params.iter().zip(&other.params).all(|(mine, theirs)| theirs.instance_of(mine))
            && self.result.instance_of(&other.result)
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("function(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") as {}", self.result)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemType {
    AnyItem,
    AnyNode,
    Node(NodeKind),
    Atomic(AtomicType),
    /// `None` is `function(*)`.
    Function(Option<Arc<FunctionType>>),
}

impl ItemType {
    pub fn instance_of(&self, other: &ItemType) -> bool {
        use ItemType::*;
        match (self, other) {
            (_, AnyItem) => true,
            (AnyNode | Node(_), AnyNode) => true,
            (Node(a), Node(b)) => a == b,
            (Atomic(a), Atomic(b)) => a.instance_of(*b),
            (Function(_), Function(None)) => true,
            (Function(Some(a)), Function(Some(b))) => a.instance_of(b),
            _ => false,
        }
    }

    /// Least common supertype.
    pub fn union(&self, other: &ItemType) -> ItemType {
        use ItemType::*;
        if self.instance_of(other) {
            return other.clone();
        }
        if other.instance_of(self) {
            return self.clone();
        }
        match (self, other) {
            (AnyNode | Node(_), AnyNode | Node(_)) => AnyNode,
            (Atomic(_), Atomic(_)) => Atomic(AtomicType::AnyAtomic),
            (Function(_), Function(_)) => Function(None),
            _ => AnyItem,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, ItemType::AnyNode | ItemType::Node(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, ItemType::Atomic(a) if a.is_numeric())
    }

    /// Whether instances of this type can be numeric.
    pub fn may_be_number(&self) -> bool {
        matches!(self, ItemType::AnyItem | ItemType::Atomic(AtomicType::AnyAtomic)) || self.is_number()
    }

    pub fn is_function(&self) -> bool {
        matches!(self, ItemType::Function(_))
    }

    pub fn matches_atomic(&self, value: &XdmAtomicValue) -> bool {
        match self {
            ItemType::AnyItem => true,
            ItemType::Atomic(t) => value.atomic_type().instance_of(*t),
            _ => false,
        }
    }

    pub fn matches_node_kind(&self, kind: NodeKind) -> bool {
        match self {
            ItemType::AnyItem | ItemType::AnyNode => true,
            ItemType::Node(k) => *k == kind,
            _ => false,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::AnyItem => f.write_str("item()"),
            ItemType::AnyNode => f.write_str("node()"),
            ItemType::Node(k) => write!(f, "{k}()"),
            ItemType::Atomic(a) => write!(f, "{a}"),
            ItemType::Function(None) => f.write_str("function(*)"),
            ItemType::Function(Some(ft)) => write!(f, "({ft})"),
        }
    }
}

/// Declared sequence type: item type plus occurrence indicator.
#[derive(Debug, Clone, PartialEq)]
pub struct SeqType {
    pub item: ItemType,
    pub occ: Occurrence,
}

impl SeqType {
    pub fn new(item: ItemType, occ: Occurrence) -> Self {
        Self { item, occ }
    }

    pub fn one(item: ItemType) -> Self {
        Self::new(item, Occurrence::ExactlyOne)
    }

    pub fn opt(item: ItemType) -> Self {
        Self::new(item, Occurrence::ZeroOrOne)
    }

    pub fn star(item: ItemType) -> Self {
        Self::new(item, Occurrence::ZeroOrMore)
    }

    pub fn plus(item: ItemType) -> Self {
        Self::new(item, Occurrence::OneOrMore)
    }

    pub fn atomic(t: AtomicType, occ: Occurrence) -> Self {
        Self::new(ItemType::Atomic(t), occ)
    }

    pub fn empty() -> Self {
        Self::new(ItemType::AnyItem, Occurrence::Zero)
    }

    pub fn item_star() -> Self {
        Self::star(ItemType::AnyItem)
    }

    pub fn instance_of(&self, other: &SeqType) -> bool {
        self.occ.instance_of(other.occ) && (self.occ == Occurrence::Zero || self.item.instance_of(&other.item))
    }

    pub fn zero_or_one(&self) -> bool {
        self.occ.zero_or_one()
    }
}

impl fmt::Display for SeqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.occ == Occurrence::Zero {
            return f.write_str("empty-sequence()");
        }
        write!(f, "{}{}", self.item, self.occ.suffix())
    }
}

/// Static type computed for an expression: a sequence type refined by an
/// optional exact result size.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprType {
    pub item: ItemType,
    pub occ: Occurrence,
    pub size: Option<u64>,
}

impl ExprType {
    pub fn new(item: ItemType, occ: Occurrence) -> Self {
        let size = match occ {
            Occurrence::Zero => Some(0),
            Occurrence::ExactlyOne => Some(1),
            _ => None,
        };
        Self { item, occ, size }
    }

    /// Type with a known exact size; the occurrence indicator follows from it.
    pub fn sized(item: ItemType, size: u64) -> Self {
        Self { item, occ: Occurrence::from_size(size), size: Some(size) }
    }

    pub fn item_star() -> Self {
        Self::new(ItemType::AnyItem, Occurrence::ZeroOrMore)
    }

    pub fn empty() -> Self {
        Self::new(ItemType::AnyItem, Occurrence::Zero)
    }

    pub fn boolean() -> Self {
        Self::new(ItemType::Atomic(AtomicType::Boolean), Occurrence::ExactlyOne)
    }

    /// Assigns item type, occurrence and size, keeping them consistent: a known
    /// size overrides the occurrence indicator.
    pub fn assign(&mut self, item: ItemType, occ: Occurrence, size: Option<u64>) {
        self.item = item;
        match size {
            Some(n) => {
                self.occ = Occurrence::from_size(n);
                self.size = Some(n);
            }
            None => {
                *self = ExprType::new(self.item.clone(), occ);
            }
        }
    }

    pub fn seq_type(&self) -> SeqType {
        SeqType::new(self.item.clone(), self.occ)
    }

    pub fn one(&self) -> bool {
        self.occ == Occurrence::ExactlyOne
    }

    pub fn zero(&self) -> bool {
        self.occ == Occurrence::Zero
    }

    pub fn zero_or_one(&self) -> bool {
        self.occ.zero_or_one()
    }

    pub fn is_node(&self) -> bool {
        self.item.is_node()
    }

    pub fn may_be_number(&self) -> bool {
        self.occ != Occurrence::Zero && self.item.may_be_number()
    }

    pub fn instance_of(&self, other: &SeqType) -> bool {
        self.seq_type().instance_of(other)
    }
}

impl From<SeqType> for ExprType {
    fn from(st: SeqType) -> Self {
        ExprType::new(st.item, st.occ)
    }
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.seq_type())
    }
}
