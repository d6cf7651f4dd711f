use crate::compiler::positional::PosRange;
use crate::compiler::preds::Preds;
use crate::compiler::type_check::TypeCheck;
use crate::engine::runtime::{Error, ErrorCode, StaticContext, Var};
use crate::model::{NodeKind, XdmNode};
use crate::types::{AtomicType, ExprType, FunctionType, ItemType, Occurrence, SeqType};
use crate::xdm::{ExpandedName, XdmAtomicValue};
use core::fmt;
use std::sync::Arc;

/// Source location of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Child,
    Attribute,
    SelfAxis,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    /// Reverse axes number positions from the context node outwards.
    pub fn is_reverse(self) -> bool {
        matches!(self, Axis::Parent | Axis::Ancestor | Axis::AncestorOrSelf | Axis::PrecedingSibling)
    }

    /// Axes that yield at most the single item at position 1.
    pub fn is_singleton(self) -> bool {
        matches!(self, Axis::SelfAxis | Axis::Parent)
    }

    pub fn principal_kind(self) -> NodeKind {
        if self == Axis::Attribute { NodeKind::Attribute } else { NodeKind::Element }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Axis::Child => "child",
            Axis::Attribute => "attribute",
            Axis::SelfAxis => "self",
            Axis::Descendant => "descendant",
            Axis::DescendantOrSelf => "descendant-or-self",
            Axis::Parent => "parent",
            Axis::Ancestor => "ancestor",
            Axis::AncestorOrSelf => "ancestor-or-self",
            Axis::FollowingSibling => "following-sibling",
            Axis::PrecedingSibling => "preceding-sibling",
        }
    }
}

/// Node test: optional node kind plus optional name.
///
/// `node()` has neither, `text()` only a kind, `foo` an element kind and a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeTest {
    pub kind: Option<NodeKind>,
    pub name: Option<ExpandedName>,
}

impl NodeTest {
    pub fn any() -> Self {
        Self { kind: None, name: None }
    }

    pub fn kind(kind: NodeKind) -> Self {
        Self { kind: Some(kind), name: None }
    }

    /// Name test against the principal node kind of `axis`.
    pub fn name(axis: Axis, name: ExpandedName) -> Self {
        Self { kind: Some(axis.principal_kind()), name: Some(name) }
    }

    /// Tightest test accepted by both; `None` if no node passes both.
    pub fn intersect(&self, other: &NodeTest) -> Option<NodeTest> {
        let kind = match (self.kind, other.kind) {
            (Some(a), Some(b)) if a != b => return None,
            (a, b) => a.or(b),
        };
        let name = match (&self.name, &other.name) {
            (Some(a), Some(b)) if a != b => return None,
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        Some(NodeTest { kind, name })
    }

    pub fn is_kind_test(&self) -> bool {
        self.name.is_none()
    }

    pub fn item_type(&self) -> ItemType {
        match self.kind {
            Some(k) => ItemType::Node(k),
            None => ItemType::AnyNode,
        }
    }

    pub fn matches<N: XdmNode>(&self, node: &N) -> bool {
        if let Some(kind) = self.kind
            && node.kind() != kind
        {
            return false;
        }
        match &self.name {
            None => true,
            Some(expected) => node.name().is_some_and(|q| {
                q.local == expected.local.as_str() && q.ns_uri.as_deref() == expected.ns_uri.as_deref()
            }),
        }
    }
}

impl fmt::Display for NodeTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.name) {
            (_, Some(name)) => write!(f, "{name}"),
            (Some(NodeKind::Element), None) => f.write_str("*"),
            (Some(kind), None) => write!(f, "{kind}()"),
            (None, None) => f.write_str("node()"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Operator to use when the operands are swapped.
    pub fn swap(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            op => op,
        }
    }

    pub const fn symbol(self, kind: CmpKind) -> &'static str {
        match (kind, self) {
            (CmpKind::General, CmpOp::Eq) => "=",
            (CmpKind::General, CmpOp::Ne) => "!=",
            (CmpKind::General, CmpOp::Lt) => "<",
            (CmpKind::General, CmpOp::Le) => "<=",
            (CmpKind::General, CmpOp::Gt) => ">",
            (CmpKind::General, CmpOp::Ge) => ">=",
            (CmpKind::Value, CmpOp::Eq) => "eq",
            (CmpKind::Value, CmpOp::Ne) => "ne",
            (CmpKind::Value, CmpOp::Lt) => "lt",
            (CmpKind::Value, CmpOp::Le) => "le",
            (CmpKind::Value, CmpOp::Gt) => "gt",
            (CmpKind::Value, CmpOp::Ge) => "ge",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpKind {
    /// Existential comparison over sequences (`=`).
    General,
    /// Singleton comparison (`eq`).
    Value,
}

/// Built-in functions known to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Boolean,
    Not,
    Exists,
    Empty,
    Count,
    Position,
    Last,
    Trace,
}

impl Function {
    pub const fn name(self) -> &'static str {
        match self {
            Function::Boolean => "boolean",
            Function::Not => "not",
            Function::Exists => "exists",
            Function::Empty => "empty",
            Function::Count => "count",
            Function::Position => "position",
            Function::Last => "last",
            Function::Trace => "trace",
        }
    }

    pub const fn arity(self) -> (usize, usize) {
        match self {
            Function::Position | Function::Last => (0, 0),
            Function::Trace => (1, 2),
            _ => (1, 1),
        }
    }

    pub fn resolve(name: &str, arity: usize) -> Result<Function, Error> {
        let func = match name {
            "boolean" => Function::Boolean,
            "not" => Function::Not,
            "exists" => Function::Exists,
            "empty" => Function::Empty,
            "count" => Function::Count,
            "position" => Function::Position,
            "last" => Function::Last,
            "trace" => Function::Trace,
            _ => return Err(Error::from_code(ErrorCode::XPST0017, format!("unknown function {name}#{arity}"))),
        };
        let (min, max) = func.arity();
        if arity < min || arity > max {
            return Err(Error::from_code(ErrorCode::XPST0017, format!("wrong arity for {name}#{arity}")));
        }
        Ok(func)
    }

    pub fn result_type(self, args: &[Expr]) -> ExprType {
        match self {
            Function::Boolean | Function::Not | Function::Exists | Function::Empty => ExprType::boolean(),
            Function::Count | Function::Position | Function::Last => {
                ExprType::new(ItemType::Atomic(AtomicType::Integer), Occurrence::ExactlyOne)
            }
            Function::Trace => args.first().map_or_else(ExprType::item_star, |a| a.ty.clone()),
        }
    }
}

/// Function item: inline function or a coercion of another function item
/// to a new signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionItem {
    pub name: Option<ExpandedName>,
    pub ty: Arc<FunctionType>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Inline { params: Vec<Var>, body: Box<Expr> },
    /// Arguments and result are checked against `ty` and forwarded to `inner`.
    Coerced { inner: Arc<FunctionItem> },
}

impl FunctionItem {
    pub fn inline(params: Vec<Var>, result: Option<SeqType>, body: Expr) -> Self {
        let ty = FunctionType::new(
            params.iter().map(Var::declared_type).collect(),
            result.unwrap_or_else(SeqType::item_star),
        );
        Self { name: None, ty: Arc::new(ty), body: FunctionBody::Inline { params, body: Box::new(body) } }
    }

    pub fn named(mut self, name: ExpandedName) -> Self {
        self.name = Some(name);
        self
    }

    pub fn arity(&self) -> usize {
        self.ty.arity()
    }
}

impl fmt::Display for FunctionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}#{}", self.arity()),
            None => write!(f, "function#{}", self.arity()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub preds: Preds,
}

/// Expression properties consulted by rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Depends on the context position or size.
    Pos,
    /// Depends on the context item.
    Ctx,
    /// Non-deterministic or side-effecting.
    Ndt,
}

impl Flag {
    fn is_focus(self) -> bool {
        matches!(self, Flag::Pos | Flag::Ctx)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Vec<XdmAtomicValue>),
    FunctionItem(Arc<FunctionItem>),
    ContextItem,
    PosRange(PosRange),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Comparison { kind: CmpKind, op: CmpOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Function { func: Function, args: Vec<Expr> },
    Step(Step),
    /// `root/step1/step2`; a missing root starts at the context item.
    Path { root: Option<Box<Expr>>, steps: Vec<Expr> },
    /// `a ! b ! c`
    Map(Vec<Expr>),
    Filter { root: Box<Expr>, preds: Preds },
    /// `input contains text query`
    FtContains { input: Box<Expr>, query: Box<Expr> },
    If { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    VarRef(Var),
    DynamicCall { func: Box<Expr>, args: Vec<Expr> },
    TypeCheck(TypeCheck),
    /// Deferred failure: raises the error when evaluated.
    Error(Error),
}

/// Expression node with its static type and source location.
///
/// Equality compares the expression structure only.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: ExprType,
    pub span: Option<Span>,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

pub(crate) fn literal_type(values: &[XdmAtomicValue]) -> ExprType {
    let mut item: Option<ItemType> = None;
    for v in values {
        let t = ItemType::Atomic(v.atomic_type());
        item = Some(match item {
            Some(prev) => prev.union(&t),
            None => t,
        });
    }
    ExprType::sized(item.unwrap_or(ItemType::AnyItem), values.len() as u64)
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        let ty = match &kind {
            ExprKind::Literal(values) => literal_type(values),
            ExprKind::FunctionItem(fi) => {
                ExprType::new(ItemType::Function(Some(fi.ty.clone())), Occurrence::ExactlyOne)
            }
            ExprKind::PosRange(_)
            | ExprKind::And(_)
            | ExprKind::Or(_)
            | ExprKind::FtContains { .. }
            | ExprKind::Comparison { kind: CmpKind::General, .. } => ExprType::boolean(),
            ExprKind::Function { func, args } => func.result_type(args),
            ExprKind::VarRef(var) => var.declared_type().into(),
            ExprKind::TypeCheck(tc) => tc.target.clone().into(),
            _ => ExprType::item_star(),
        };
        Self { kind, ty, span: None }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.span = Some(Span::new(line, column));
        self
    }

    pub fn with_span(mut self, span: Option<Span>) -> Self {
        self.span = span;
        self
    }

    pub fn literal(values: Vec<XdmAtomicValue>) -> Self {
        Self::new(ExprKind::Literal(values))
    }

    pub fn empty() -> Self {
        Self::literal(Vec::new())
    }

    pub fn int(i: i64) -> Self {
        Self::literal(vec![XdmAtomicValue::Integer(i)])
    }

    pub fn double(d: f64) -> Self {
        Self::literal(vec![XdmAtomicValue::Double(d)])
    }

    pub fn string(s: &str) -> Self {
        Self::literal(vec![XdmAtomicValue::String(s.to_string())])
    }

    pub fn boolean(b: bool) -> Self {
        Self::literal(vec![XdmAtomicValue::Boolean(b)])
    }

    pub fn context() -> Self {
        Self::new(ExprKind::ContextItem)
    }

    pub fn pos(range: PosRange) -> Self {
        Self::new(ExprKind::PosRange(range))
    }

    pub fn and(ops: Vec<Expr>) -> Self {
        Self::new(ExprKind::And(ops))
    }

    pub fn or(ops: Vec<Expr>) -> Self {
        Self::new(ExprKind::Or(ops))
    }

    pub fn general(op: CmpOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Comparison { kind: CmpKind::General, op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    pub fn value_cmp(op: CmpOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Comparison { kind: CmpKind::Value, op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    pub fn call(func: Function, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Function { func, args })
    }

    /// Resolves a built-in function by name and arity.
    pub fn call_named(name: &str, args: Vec<Expr>) -> Result<Self, Error> {
        Ok(Self::call(Function::resolve(name, args.len())?, args))
    }

    pub fn step(axis: Axis, test: NodeTest, preds: Vec<Expr>) -> Self {
        Self::new(ExprKind::Step(Step { axis, test, preds: Preds::new(preds) }))
    }

    /// `child::name`
    pub fn child(name: &str) -> Self {
        Self::step(Axis::Child, NodeTest::name(Axis::Child, ExpandedName::local(name)), Vec::new())
    }

    pub fn path(root: Option<Expr>, steps: Vec<Expr>) -> Self {
        Self::new(ExprKind::Path { root: root.map(Box::new), steps })
    }

    pub fn map(ops: Vec<Expr>) -> Self {
        Self::new(ExprKind::Map(ops))
    }

    pub fn filter(root: Expr, preds: Vec<Expr>) -> Self {
        Self::new(ExprKind::Filter { root: Box::new(root), preds: Preds::new(preds) })
    }

    pub fn ft_contains(input: Expr, query: Expr) -> Self {
        Self::new(ExprKind::FtContains { input: Box::new(input), query: Box::new(query) })
    }

    pub fn iff(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::new(ExprKind::If { cond: Box::new(cond), then: Box::new(then), otherwise: Box::new(otherwise) })
    }

    pub fn var(var: Var) -> Self {
        Self::new(ExprKind::VarRef(var))
    }

    pub fn function_item(item: FunctionItem) -> Self {
        Self::new(ExprKind::FunctionItem(Arc::new(item)))
    }

    pub fn dynamic_call(func: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::DynamicCall { func: Box::new(func), args })
    }

    pub fn type_check(expr: Expr, target: SeqType, promote: bool) -> Self {
        let span = expr.span;
        Self::new(ExprKind::TypeCheck(TypeCheck::new(expr, target, promote))).with_span(span)
    }

    /// Node that fails with `err` when evaluated; keeps the type of the replaced expression.
    pub fn error(err: Error, ty: ExprType, span: Option<Span>) -> Self {
        Self { kind: ExprKind::Error(err), ty, span }
    }

    /// Compile-time constant value.
    pub fn is_value(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(_) | ExprKind::FunctionItem(_))
    }

    pub fn is_bool(&self, b: bool) -> bool {
        matches!(&self.kind, ExprKind::Literal(v) if v.as_slice() == [XdmAtomicValue::Boolean(b)])
    }

    /// Value of a literal holding exactly one number.
    pub fn as_number(&self) -> Option<f64> {
        match &self.kind {
            ExprKind::Literal(v) if v.len() == 1 && v[0].is_numeric() => v[0].as_f64(),
            _ => None,
        }
    }

    pub fn is_function(&self, func: Function) -> bool {
        matches!(&self.kind, ExprKind::Function { func: f, .. } if *f == func)
    }

    /// Deterministic and independent of the focus.
    pub fn is_simple(&self) -> bool {
        !self.has(Flag::Ctx) && !self.has(Flag::Pos) && !self.has(Flag::Ndt)
    }

    pub fn has(&self, flag: Flag) -> bool {
        use ExprKind as E;
        let focused = |e: &Expr| !flag.is_focus() && e.has(flag);
        match &self.kind {
            E::Literal(_) | E::FunctionItem(_) | E::VarRef(_) | E::Error(_) => false,
            E::ContextItem => flag == Flag::Ctx,
            E::PosRange(_) => flag == Flag::Pos,
            E::And(ops) | E::Or(ops) => ops.iter().any(|e| e.has(flag)),
            E::Comparison { lhs, rhs, .. } => lhs.has(flag) || rhs.has(flag),
            E::Function { func, args } => {
                let own = match func {
                    Function::Position | Function::Last => {
                        flag == Flag::Pos
                    }
                    Function::Trace => flag == Flag::Ndt,
                    _ => false,
                };
                own || args.iter().any(|e| e.has(flag))
            }
            E::Step(step) => flag == Flag::Ctx || step.preds.exprs.iter().any(focused),
            E::Path { root, steps } => {
                let head = match root {
                    Some(r) => r.has(flag),
                    // the first step runs with the context item as a singleton focus
                    None => flag == Flag::Ctx,
                };
                head || steps.iter().any(focused)
            }
            E::Map(ops) => {
                ops.first().is_some_and(|e| e.has(flag)) || ops.iter().skip(1).any(focused)
            }
            E::Filter { root, preds } => root.has(flag) || preds.exprs.iter().any(focused),
            E::FtContains { input, query } => input.has(flag) || query.has(flag),
            E::If { cond, then, otherwise } => cond.has(flag) || then.has(flag) || otherwise.has(flag),
            E::DynamicCall { func, args } => {
                flag == Flag::Ndt || func.has(flag) || args.iter().any(|e| e.has(flag))
            }
            E::TypeCheck(tc) => tc.expr.has(flag),
        }
    }

    /// Replaces context item references in the current focus with `value`.
    /// Returns `None` if nothing was replaced.
    pub fn inline_context(&self, value: &Expr) -> Option<Expr> {
        let mut copy = self.clone();
        copy.replace_context(value).then_some(copy)
    }

    fn replace_context(&mut self, value: &Expr) -> bool {
        use ExprKind as E;
        fn all(exprs: &mut [Expr], value: &Expr) -> bool {
            exprs.iter_mut().fold(false, |acc, e| e.replace_context(value) | acc)
        }
        if self.kind == E::ContextItem {
            *self = value.clone().with_span(self.span);
            return true;
        }
        match &mut self.kind {
            E::ContextItem => false,
            E::Literal(_) | E::FunctionItem(_) | E::PosRange(_) | E::VarRef(_) | E::Error(_) | E::Step(_) => false,
            E::And(ops) | E::Or(ops) => all(ops, value),
            E::Comparison { lhs, rhs, .. } => lhs.replace_context(value) | rhs.replace_context(value),
            E::Function { args, .. } => all(args, value),
            E::Path { root: Some(root), .. } => root.replace_context(value),
            E::Path { root: None, .. } => false,
            E::Map(ops) => ops.first_mut().is_some_and(|e| e.replace_context(value)),
            E::Filter { root, .. } => root.replace_context(value),
            E::FtContains { input, query } => input.replace_context(value) | query.replace_context(value),
            E::If { cond, then, otherwise } => {
                cond.replace_context(value) | then.replace_context(value) | otherwise.replace_context(value)
            }
            E::DynamicCall { func, args } => func.replace_context(value) | all(args, value),
            E::TypeCheck(tc) => tc.expr.replace_context(value),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (i, e) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{e}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ExprKind as E;
        match &self.kind {
            E::Literal(values) => match values.as_slice() {
                [single] => write!(f, "{single}"),
                _ => {
                    f.write_str("(")?;
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{v}")?;
                    }
                    f.write_str(")")
                }
            },
            E::FunctionItem(fi) => write!(f, "{fi}"),
            E::ContextItem => f.write_str("."),
            E::PosRange(range) => write!(f, "{range}"),
            E::And(ops) => write_list(f, ops, " and "),
            E::Or(ops) => write_list(f, ops, " or "),
            E::Comparison { kind, op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol(*kind)),
            E::Function { func, args } => {
                write!(f, "{}(", func.name())?;
                write_list(f, args, ", ")?;
                f.write_str(")")
            }
            E::Step(step) => write!(f, "{}::{}{}", step.axis.name(), step.test, step.preds),
            E::Path { root, steps } => {
                if let Some(root) = root {
                    write!(f, "{root}/")?;
                }
                write_list(f, steps, "/")
            }
            E::Map(ops) => write_list(f, ops, " ! "),
            E::Filter { root, preds } => write!(f, "{root}{preds}"),
            E::FtContains { input, query } => write!(f, "{input} contains text {query}"),
            E::If { cond, then, otherwise } => write!(f, "if ({cond}) then {then} else {otherwise}"),
            E::VarRef(var) => write!(f, "${}", var.name),
            E::DynamicCall { func, args } => {
                write!(f, "{func}(")?;
                write_list(f, args, ", ")?;
                f.write_str(")")
            }
            E::TypeCheck(tc) => write!(f, "{tc}"),
            E::Error(err) => write!(f, "error({})", err.format_code()),
        }
    }
}

/// Result of `compile`: the optimized expression tree plus the notes
/// collected while compiling.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub expr: Expr,
    pub static_ctx: Arc<StaticContext>,
    pub notes: Vec<String>,
}

impl CompiledQuery {
    pub fn compile_info(&self) -> &[String] {
        &self.notes
    }

    pub fn static_type(&self) -> &ExprType {
        &self.expr.ty
    }
}
