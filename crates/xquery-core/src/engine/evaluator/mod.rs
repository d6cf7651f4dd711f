//! Cursor-based evaluation of compiled expression trees.
//!
//! Expressions are evaluated lazily where they can be: steps, filters, maps
//! and type checks return cursors that pull their input on demand. A cursor
//! reads the focus only while it is created or inside its own focus frame, so
//! results can be consumed after the creating frame is gone.

use crate::compiler::ir::{CmpKind, CmpOp, CompiledQuery, Expr, ExprKind, Flag, Function, FunctionBody, FunctionItem, Span, Step};
use crate::engine::runtime::{DynamicContext, Error, ErrorCode, FtMatch};
use crate::model::XdmNode;
use crate::xdm::{Cursor, ExpandedName, VecCursor, XdmAtomicValue, XdmItem, XdmSequence, XdmSequenceStream};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub mod comparison;
mod cursors;
mod node_ops;
mod predicates;
pub mod promotion;

pub use cursors::TypeCheckCursor;

use comparison::{compare_general, compare_value};
use cursors::{MapCursor, ScoredCursor};
use node_ops::{axis_nodes, document_order};
use promotion::{atomize, atomize_all, check_sequence};

/// Evaluates a compiled query and materializes the result.
pub fn evaluate<N: XdmNode>(query: &CompiledQuery, ctx: &DynamicContext<N>) -> Result<XdmSequence<N>, Error> {
    evaluate_stream(query, ctx)?.materialize()
}

/// Evaluates a compiled query lazily. Errors raised while pulling items are
/// returned by the stream.
#[must_use = "streams are lazy and do nothing unless consumed"]
pub fn evaluate_stream<'e, N: XdmNode>(
    query: &'e CompiledQuery,
    ctx: &DynamicContext<N>,
) -> Result<XdmSequenceStream<'e, N>, Error> {
    let vm = Vm::new(ctx);
    Ok(XdmSequenceStream::new(vm.iter(&query.expr)?))
}

/// Evaluates with scoring switched on and pairs every result item with its
/// relevance score (`0.0` if none is attached).
pub fn evaluate_scored<N: XdmNode>(
    query: &CompiledQuery,
    ctx: &DynamicContext<N>,
) -> Result<Vec<(XdmItem<N>, f64)>, Error> {
    let vm = Vm::new(ctx);
    vm.with_scoring(true, || XdmSequenceStream::new(vm.iter(&query.expr)?).materialize_scored())
}

/// Effective boolean value of a single atomic value.
pub(crate) fn ebv_atomic(value: &XdmAtomicValue) -> bool {
    match value {
        XdmAtomicValue::Boolean(b) => *b,
        XdmAtomicValue::String(s) | XdmAtomicValue::AnyUri(s) | XdmAtomicValue::UntypedAtomic(s) => !s.is_empty(),
        XdmAtomicValue::Integer(i) => *i != 0,
        XdmAtomicValue::Decimal(d) | XdmAtomicValue::Double(d) => *d != 0.0 && !d.is_nan(),
        XdmAtomicValue::Float(f) => *f != 0.0 && !f.is_nan(),
    }
}

fn ebv_undefined(what: impl core::fmt::Display) -> Error {
    Error::from_code(ErrorCode::FORG0006, format!("effective boolean value is undefined for {what}"))
}

/// Fails if the cursor yields another item.
fn expect_end<N>(cursor: &mut Cursor<'_, N>) -> Result<(), Error> {
    match cursor.next_item() {
        None => Ok(()),
        Some(Err(err)) => Err(err),
        Some(Ok(_)) => Err(ebv_undefined("a sequence of two or more items starting with an atomic value")),
    }
}

fn once<'e, N: 'e>(item: XdmItem<N>) -> Cursor<'e, N> {
    Box::new(VecCursor::new(vec![item]))
}

fn boolean<'e, N: 'e>(b: bool) -> Cursor<'e, N> {
    once(XdmItem::Atomic(XdmAtomicValue::Boolean(b)))
}

fn integer<'e, N: 'e>(n: u64) -> Cursor<'e, N> {
    once(XdmItem::Atomic(XdmAtomicValue::Integer(i64::try_from(n).unwrap_or(i64::MAX))))
}

/// Context item, position and size.
#[derive(Debug, Clone)]
pub(crate) struct Focus<N> {
    pub(crate) item: Option<XdmItem<N>>,
    pub(crate) pos: u64,
    /// Unknown while streaming.
    pub(crate) size: Option<u64>,
}

impl<N> Focus<N> {
    fn none() -> Self {
        Self { item: None, pos: 0, size: None }
    }
}

/// Puts the saved value back into the cell when dropped.
struct Restore<'a, T> {
    cell: &'a RefCell<T>,
    saved: Option<T>,
}

impl<T> Drop for Restore<'_, T> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            *self.cell.borrow_mut() = saved;
        }
    }
}

struct RestoreFlag<'a> {
    cell: &'a Cell<bool>,
    saved: bool,
}

impl Drop for RestoreFlag<'_> {
    fn drop(&mut self) {
        self.cell.set(self.saved);
    }
}

type Frame<N> = Vec<(ExpandedName, XdmSequence<N>)>;

/// Evaluation state shared by the cursors of one evaluation.
pub struct Vm<N> {
    ctx: DynamicContext<N>,
    focus: RefCell<Focus<N>>,
    scoring: Cell<bool>,
    /// Parameters of the innermost function call.
    locals: RefCell<Frame<N>>,
}

impl<N: XdmNode> Vm<N> {
    pub fn new(ctx: &DynamicContext<N>) -> Rc<Self> {
        let focus = match &ctx.context_item {
            Some(item) => Focus { item: Some(item.clone()), pos: 1, size: Some(1) },
            None => Focus::none(),
        };
        Rc::new(Self {
            ctx: ctx.clone(),
            focus: RefCell::new(focus),
            scoring: Cell::new(ctx.scoring),
            locals: RefCell::new(Vec::new()),
        })
    }

    pub fn scoring(&self) -> bool {
        self.scoring.get()
    }

    /// Runs `f` with a different focus; the previous focus is restored on
    /// every exit path.
    pub(crate) fn with_focus<T>(&self, focus: Focus<N>, f: impl FnOnce() -> T) -> T {
        let saved = self.focus.replace(focus);
        let _restore = Restore { cell: &self.focus, saved: Some(saved) };
        f()
    }

    pub fn with_scoring<T>(&self, on: bool, f: impl FnOnce() -> T) -> T {
        let saved = self.scoring.replace(on);
        let _restore = RestoreFlag { cell: &self.scoring, saved };
        f()
    }

    fn with_locals<T>(&self, frame: Frame<N>, f: impl FnOnce() -> T) -> T {
        let saved = self.locals.replace(frame);
        let _restore = Restore { cell: &self.locals, saved: Some(saved) };
        f()
    }

    fn context_item(&self, span: Option<Span>) -> Result<XdmItem<N>, Error> {
        self.focus
            .borrow()
            .item
            .clone()
            .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "context item is undefined").with_span(span))
    }

    /// Lazily evaluates `expr`.
    pub fn iter<'e>(self: &Rc<Self>, expr: &'e Expr) -> Result<Cursor<'e, N>, Error> {
        self.iter_kind(expr).map_err(|err| err.with_span(expr.span))
    }

    fn iter_kind<'e>(self: &Rc<Self>, expr: &'e Expr) -> Result<Cursor<'e, N>, Error> {
        use ExprKind as E;
        let cursor: Cursor<'e, N> = match &expr.kind {
            E::Literal(values) => Box::new(VecCursor::new(values.iter().cloned().map(XdmItem::Atomic).collect())),
            E::FunctionItem(fi) => once(XdmItem::Function(fi.clone())),
            E::ContextItem => once(self.context_item(expr.span)?),
            E::PosRange(range) => boolean(range.contains(self.focus.borrow().pos)),
            E::And(ops) => {
                for op in ops {
                    if !self.ebv(op)? {
                        return Ok(boolean(false));
                    }
                }
                boolean(true)
            }
            E::Or(ops) => {
                for op in ops {
                    if self.ebv(op)? {
                        return Ok(boolean(true));
                    }
                }
                boolean(false)
            }
            E::Comparison { kind, op, lhs, rhs } => self.comparison(*kind, *op, lhs, rhs)?,
            E::Function { func, args } => self.function(*func, args, expr.span)?,
            E::Step(step) => self.step(step, expr.span)?,
            E::Path { root, steps } => self.path(root.as_deref(), steps, expr.span)?,
            E::Map(ops) => self.map(ops, expr.span)?,
            E::Filter { root, preds } => {
                let input = self.iter(root)?;
                self.apply_preds(input, preds)?
            }
            E::FtContains { input, query } => boolean(self.ft_contains(input, query)?.matched),
            E::If { cond, then, otherwise } => {
                if self.ebv(cond)? {
                    self.iter(then)?
                } else {
                    self.iter(otherwise)?
                }
            }
            E::VarRef(var) => {
                let local = self.locals.borrow().iter().rev().find(|(name, _)| *name == var.name).map(|(_, v)| v.clone());
                let value = match local {
                    Some(value) => value,
                    None => {
                        let Some(value) = self.ctx.variables.get(&var.name) else {
                            return Err(Error::from_code(
                                ErrorCode::XPDY0002,
                                format!("no value bound to ${}", var.name),
                            ));
                        };
                        match &var.declared {
                            Some(declared) => check_sequence(value.clone(), declared, var.promote, expr.span)?,
                            None => value.clone(),
                        }
                    }
                };
                Box::new(VecCursor::new(value))
            }
            E::DynamicCall { func, args } => {
                let callee = self.value(func)?;
                let fi = match callee.as_slice() {
                    [XdmItem::Function(fi)] => fi.clone(),
                    _ => {
                        return Err(Error::from_code(
                            ErrorCode::XPTY0004,
                            format!("dynamic call requires a single function item, {} item(s) found", callee.len()),
                        ));
                    }
                };
                let args = args.iter().map(|a| self.value(a)).collect::<Result<Vec<_>, _>>()?;
                Box::new(VecCursor::new(self.call_function(&fi, args, expr.span)?))
            }
            E::TypeCheck(tc) => Box::new(TypeCheckCursor::new(self.iter(&tc.expr)?, &tc.target, tc.promote, expr.span)),
            E::Error(err) => return Err(err.clone()),
        };
        Ok(cursor)
    }

    /// Evaluates `expr` completely. Type checks run eagerly on the whole value.
    pub fn value(self: &Rc<Self>, expr: &Expr) -> Result<XdmSequence<N>, Error> {
        if let ExprKind::TypeCheck(tc) = &expr.kind {
            let value = self.value(&tc.expr)?;
            return check_sequence(value, &tc.target, tc.promote, expr.span);
        }
        XdmSequenceStream::new(self.iter(expr)?).materialize()
    }

    /// Effective boolean value.
    pub fn ebv(self: &Rc<Self>, expr: &Expr) -> Result<bool, Error> {
        let mut cursor = self.iter(expr)?;
        let first = match cursor.next_item() {
            None => return Ok(false),
            Some(item) => item?,
        };
        match first {
            XdmItem::Node(_) => Ok(true),
            XdmItem::Atomic(value) => {
                expect_end(&mut cursor).map_err(|err| err.with_span(expr.span))?;
                Ok(ebv_atomic(&value))
            }
            XdmItem::Function(fi) => Err(ebv_undefined(format!("function item {fi}")).with_span(expr.span)),
        }
    }

    /// Predicate truth at context position `pos`: a single numeric value is
    /// compared with the position, anything else uses its effective boolean
    /// value. Returns the relevance score if the predicate holds.
    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    pub(crate) fn test(self: &Rc<Self>, expr: &Expr, pos: u64) -> Result<Option<f64>, Error> {
        match &expr.kind {
            ExprKind::PosRange(range) => return Ok(range.contains(pos).then_some(0.0)),
            ExprKind::FtContains { input, query } => {
                let m = self.ft_contains(input, query).map_err(|err| err.with_span(expr.span))?;
                return Ok(m.matched.then(|| m.score.unwrap_or(0.0)));
            }
            _ => {}
        }
        let mut cursor = self.iter(expr)?;
        let first = match cursor.next_item() {
            None => return Ok(None),
            Some(item) => item?,
        };
        let holds = match first {
            XdmItem::Node(_) => true,
            XdmItem::Atomic(value) => {
                expect_end(&mut cursor).map_err(|err| err.with_span(expr.span))?;
                match value.as_f64() {
                    Some(n) => n == pos as f64,
                    None => ebv_atomic(&value),
                }
            }
            XdmItem::Function(fi) => return Err(ebv_undefined(format!("function item {fi}")).with_span(expr.span)),
        };
        Ok(holds.then_some(0.0))
    }

    fn comparison<'e>(self: &Rc<Self>, kind: CmpKind, op: CmpOp, lhs: &Expr, rhs: &Expr) -> Result<Cursor<'e, N>, Error> {
        let l = atomize_all(&self.value(lhs)?)?;
        let r = atomize_all(&self.value(rhs)?)?;
        match kind {
            CmpKind::General => Ok(boolean(compare_general(&l, &r, op)?)),
            CmpKind::Value => match (l.as_slice(), r.as_slice()) {
                ([], _) | (_, []) => Ok(Box::new(VecCursor::new(Vec::new()))),
                ([a], [b]) => {
                    // untyped operands of value comparisons compare as strings
                    let as_string = |v: &XdmAtomicValue| match v {
                        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s.clone()),
                        other => other.clone(),
                    };
                    Ok(boolean(compare_value(&as_string(a), &as_string(b), op)?))
                }
                _ => Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("value comparison {} requires single items", op.symbol(kind)),
                )),
            },
        }
    }

    fn function<'e>(self: &Rc<Self>, func: Function, args: &'e [Expr], span: Option<Span>) -> Result<Cursor<'e, N>, Error> {
        let arg = |i: usize| {
            args.get(i)
                .ok_or_else(|| Error::from_code(ErrorCode::XPST0017, format!("missing argument {} of {}()", i + 1, func.name())))
        };
        let cursor: Cursor<'e, N> = match func {
            Function::Boolean => boolean(self.ebv(arg(0)?)?),
            Function::Not => boolean(!self.ebv(arg(0)?)?),
            Function::Exists | Function::Empty => {
                let mut cursor = self.iter(arg(0)?)?;
                let exists = match cursor.next_item() {
                    None => false,
                    Some(item) => item.map(|_| true)?,
                };
                boolean(exists == (func == Function::Exists))
            }
            Function::Count => {
                let mut cursor = self.iter(arg(0)?)?;
                let mut n = 0u64;
                while let Some(item) = cursor.next_item() {
                    item?;
                    n += 1;
                }
                integer(n)
            }
            Function::Position => {
                let focus = self.focus.borrow();
                if focus.item.is_none() {
                    return Err(Error::from_code(ErrorCode::XPDY0002, "context item is undefined"));
                }
                integer(focus.pos)
            }
            Function::Last => {
                let focus = self.focus.borrow();
                if focus.item.is_none() {
                    return Err(Error::from_code(ErrorCode::XPDY0002, "context item is undefined"));
                }
                match focus.size {
                    Some(size) => integer(size),
                    None => return Err(Error::from_code(ErrorCode::FOER0000, "context size is not available")),
                }
            }
            Function::Trace => {
                let value = self.value(arg(0)?)?;
                let label = match args.get(1) {
                    Some(label) => atomize_all(&self.value(label)?)?.iter().map(XdmAtomicValue::lexical).collect::<Vec<_>>().join(" "),
                    None => String::new(),
                };
                let shown: Vec<String> = value.iter().map(ToString::to_string).collect();
                tracing::info!(target: "xquery_core::trace", label = %label, span = ?span, "{}", shown.join(", "));
                Box::new(VecCursor::new(value))
            }
        };
        Ok(cursor)
    }

    fn step<'e>(self: &Rc<Self>, step: &'e Step, span: Option<Span>) -> Result<Cursor<'e, N>, Error> {
        let node = match self.context_item(span)? {
            XdmItem::Node(n) => n,
            other => {
                return Err(Error::from_code(ErrorCode::XPTY0004, format!("axis step on non-node context item {other}")));
            }
        };
        let items: XdmSequence<N> =
            axis_nodes(&node, step.axis).into_iter().filter(|n| step.test.matches(n)).map(XdmItem::Node).collect();
        let filtered = self.apply_preds(Box::new(VecCursor::new(items)), &step.preds)?;
        if !step.axis.is_reverse() {
            return Ok(filtered);
        }
        let mut scored: Vec<(XdmItem<N>, Option<f64>)> = XdmSequenceStream::new(filtered)
            .materialize_scored()?
            .into_iter()
            .map(|(item, score)| (item, self.scoring().then_some(score)))
            .collect();
        scored.reverse();
        Ok(Box::new(ScoredCursor::new(scored)))
    }

    fn path<'e>(self: &Rc<Self>, root: Option<&'e Expr>, steps: &'e [Expr], span: Option<Span>) -> Result<Cursor<'e, N>, Error> {
        let (mut cursor, mut single) = match root {
            Some(root) => (self.iter(root)?, root.ty.zero_or_one()),
            None => (once(self.context_item(span)?), true),
        };
        for step in steps {
            cursor = self.chain(cursor, step, true)?;
            if !single {
                let items = XdmSequenceStream::new(cursor).materialize()?;
                cursor = Box::new(VecCursor::new(document_order(items)?));
            }
            single = single && step.ty.zero_or_one();
        }
        Ok(cursor)
    }

    fn map<'e>(self: &Rc<Self>, ops: &'e [Expr], span: Option<Span>) -> Result<Cursor<'e, N>, Error> {
        let Some((first, rest)) = ops.split_first() else {
            return Err(Error::from_code(ErrorCode::FOER0000, "empty map expression").with_span(span));
        };
        let mut cursor = self.iter(first)?;
        for op in rest {
            cursor = self.chain(cursor, op, false)?;
        }
        Ok(cursor)
    }

    /// `input ! op` or `input / op`. Operands depending on the context size
    /// see a materialized input.
    fn chain<'e>(self: &Rc<Self>, input: Cursor<'e, N>, op: &'e Expr, nodes_only: bool) -> Result<Cursor<'e, N>, Error> {
        if op.has(Flag::Pos) {
            let items = XdmSequenceStream::new(input).materialize()?;
            let size = Some(items.len() as u64);
            return Ok(Box::new(MapCursor::new(self.clone(), op, Box::new(VecCursor::new(items)), size, nodes_only)));
        }
        Ok(Box::new(MapCursor::new(self.clone(), op, input, None, nodes_only)))
    }

    /// `input contains text query`: matches if any input item matches; the
    /// score is the best score among the matching items.
    fn ft_contains(self: &Rc<Self>, input: &Expr, query: &Expr) -> Result<FtMatch, Error> {
        let Some(matcher) = self.ctx.full_text.clone() else {
            return Err(Error::from_code(ErrorCode::FOFT9999, "no full-text matcher is available"));
        };
        let words: Vec<String> = atomize_all(&self.value(query)?)?.iter().map(XdmAtomicValue::lexical).collect();
        let mut result = FtMatch::miss();
        let mut cursor = self.iter(input)?;
        while let Some(item) = cursor.next_item() {
            let text = atomize(&item?)?.lexical();
            let m = matcher.matches(&text, &words)?;
            if m.matched {
                let score = match (result.score, m.score) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    (a, b) => a.or(b),
                };
                result = FtMatch { matched: true, score };
            }
        }
        Ok(result)
    }

    /// Calls a function item. Inline bodies see their parameters and no focus.
    fn call_function(
        self: &Rc<Self>,
        fi: &FunctionItem,
        args: Vec<XdmSequence<N>>,
        span: Option<Span>,
    ) -> Result<XdmSequence<N>, Error> {
        if args.len() != fi.arity() {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{fi} called with {} argument(s)", args.len()),
            )
            .with_span(span));
        }
        match &fi.body {
            FunctionBody::Inline { params, body } => {
                let mut frame = Vec::with_capacity(params.len());
                for (param, arg) in params.iter().zip(args) {
                    let value = match &param.declared {
                        Some(declared) => check_sequence(arg, declared, param.promote, span)?,
                        None => arg,
                    };
                    frame.push((param.name.clone(), value));
                }
                self.with_locals(frame, || self.with_focus(Focus::none(), || self.value(body)))
            }
            FunctionBody::Coerced { inner } => {
                let args = args
                    .into_iter()
                    .zip(&fi.ty.params)
                    .map(|(arg, ty)| check_sequence(arg, ty, true, span))
                    .collect::<Result<Vec<_>, _>>()?;
                let out = self.call_function(inner, args, span)?;
                check_sequence(out, &fi.ty.result, true, span)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::DynamicContextBuilder;
    use crate::simple_node::SimpleNode;

    #[test]
    fn ebv_of_atomic_values() {
        assert!(ebv_atomic(&XdmAtomicValue::String("x".into())));
        assert!(!ebv_atomic(&XdmAtomicValue::Double(f64::NAN)));
        assert!(!ebv_atomic(&XdmAtomicValue::Integer(0)));
        assert!(ebv_atomic(&XdmAtomicValue::Boolean(true)));
    }

    #[test]
    fn focus_is_restored_after_failure() {
        let ctx = DynamicContextBuilder::<SimpleNode>::new().with_context_item(XdmAtomicValue::Integer(7)).build();
        let vm = Vm::new(&ctx);
        let focus = Focus { item: Some(XdmItem::Atomic(XdmAtomicValue::Integer(1))), pos: 3, size: Some(4) };
        let failed: Result<(), Error> =
            vm.with_focus(focus, || Err(Error::from_code(ErrorCode::FOER0000, "boom")));
        assert!(failed.is_err());
        let restored = vm.focus.borrow().clone();
        assert_eq!(restored.pos, 1);
        assert_eq!(restored.item, Some(XdmItem::Atomic(XdmAtomicValue::Integer(7))));
    }

    #[test]
    fn scoring_flag_is_restored() {
        let vm = Vm::<SimpleNode>::new(&DynamicContext::default());
        let inner = vm.with_scoring(true, || vm.scoring());
        assert!(inner);
        assert!(!vm.scoring());
    }
}
