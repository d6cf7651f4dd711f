use crate::engine::evaluator::comparison::{compare_general, compare_value};
use crate::engine::evaluator::ebv_atomic;
use crate::engine::runtime::{Error, ErrorCode, StaticContext};
use crate::types::{ExprType, ItemType, Occurrence, SeqType};
use crate::xdm::XdmAtomicValue;
use std::sync::Arc;

pub mod context;
pub mod ir;
pub mod positional;
pub mod preds;
pub mod type_check;

use context::CompileContext;
use ir::{CmpKind, CmpOp, CompiledQuery, Expr, ExprKind as E, Flag, Function, FunctionBody, FunctionItem, Span, Step};
use preds::{Host, Preds};
use type_check::TypeCheck;

type CResult<T> = Result<T, Error>;

/// Context in which a boolean-reducible expression is simplified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Simplify {
    /// Only the effective boolean value is observed.
    Ebv,
    /// Predicate context: numbers are positional tests and must stay numbers.
    Predicate,
}

/// Compiles and optimizes an expression tree against a static context.
pub fn compile(expr: Expr, static_ctx: &StaticContext) -> CResult<CompiledQuery> {
    let mut cc = CompileContext::new(static_ctx);
    let expr = expr.compile(&mut cc)?;
    tracing::debug!(target: "xquery_core::compile", ty = %expr.ty, "compiled {expr}");
    Ok(CompiledQuery { expr, static_ctx: Arc::new(static_ctx.clone()), notes: cc.into_notes() })
}

fn no_context(span: Option<Span>) -> Error {
    Error::from_code(ErrorCode::XPDY0002, "context item is undefined").with_span(span)
}

/// Axis steps need a node (or a not yet known item) as context.
fn require_node_focus(cc: &CompileContext<'_>, span: Option<Span>) -> CResult<()> {
    match cc.focus() {
        None => Err(no_context(span)),
        Some(item) if !item.is_node() && *item != ItemType::AnyItem => {
            Err(Error::static_type(item, &SeqType::one(ItemType::AnyNode), span))
        }
        Some(_) => Ok(()),
    }
}

fn compile_all(exprs: Vec<Expr>, cc: &mut CompileContext<'_>) -> CResult<Vec<Expr>> {
    exprs.into_iter().map(|e| e.compile(cc)).collect()
}

/// Compiles `a / b / c` or `a ! b ! c`: every operand after the first is
/// compiled with the previous operand's items as focus.
fn compile_chain(exprs: Vec<Expr>, mut focus: Option<ItemType>, cc: &mut CompileContext<'_>) -> CResult<Vec<Expr>> {
    let mut out = Vec::with_capacity(exprs.len());
    for expr in exprs {
        let expr = match focus.take() {
            Some(item) => cc.with_focus(Some(item), |cc| expr.compile(cc))?,
            None => expr.compile(cc)?,
        };
        focus = Some(expr.ty.item.clone());
        out.push(expr);
    }
    Ok(out)
}

fn literal_values(expr: &Expr) -> Option<&[XdmAtomicValue]> {
    match &expr.kind {
        E::Literal(values) => Some(values),
        _ => None,
    }
}

fn compile_function_item(fi: Arc<FunctionItem>, cc: &mut CompileContext<'_>) -> CResult<Arc<FunctionItem>> {
    let FunctionBody::Inline { params, body } = &fi.body else {
        return Ok(fi);
    };
    let result = fi.ty.result.clone();
    let body = cc.with_focus(None, |cc| {
        cc.with_scope(params, |cc| {
            let body = (**body).clone().compile(cc)?;
            Expr::type_check(body, result, true).optimize(cc)
        })
    })?;
    Ok(Arc::new(FunctionItem {
        name: fi.name.clone(),
        ty: fi.ty.clone(),
        body: FunctionBody::Inline { params: params.clone(), body: Box::new(body) },
    }))
}

fn finish_step(step: Step, ty: Option<ExprType>, span: Option<Span>, cc: &mut CompileContext<'_>) -> Expr {
    match ty {
        Some(ty) => Expr { kind: E::Step(step), ty, span },
        None => {
            let orig = Expr { kind: E::Step(step), ty: ExprType::empty(), span };
            cc.replace_with(&orig, Expr::empty())
        }
    }
}

fn finish_filter(root: Expr, preds: Preds, ty: Option<ExprType>, span: Option<Span>, cc: &mut CompileContext<'_>) -> Expr {
    match ty {
        Some(_) if preds.is_empty() => root,
        Some(ty) => Expr { kind: E::Filter { root: Box::new(root), preds }, ty, span },
        None => {
            let orig = Expr { kind: E::Filter { root: Box::new(root), preds }, ty: ExprType::empty(), span };
            cc.replace_with(&orig, Expr::empty())
        }
    }
}

/// Type of `if` branches or other alternatives.
fn union_type(a: &ExprType, b: &ExprType) -> ExprType {
    let item = if a.zero() {
        b.item.clone()
    } else if b.zero() {
        a.item.clone()
    } else {
        a.item.union(&b.item)
    };
    let size = if a.size == b.size { a.size } else { None };
    let mut ty = ExprType::item_star();
    ty.assign(item, a.occ.union(b.occ), size);
    ty
}

impl Expr {
    /// Compiles the children, assigns static types and applies the rewrites
    /// of this node.
    pub fn compile(self, cc: &mut CompileContext<'_>) -> CResult<Expr> {
        let Expr { kind, ty, span } = self;
        match kind {
            E::Literal(_) | E::PosRange(_) | E::Error(_) => Ok(Expr { kind, ty, span }),
            E::ContextItem => match cc.focus() {
                Some(item) => Ok(Expr { kind, ty: ExprType::new(item.clone(), Occurrence::ExactlyOne), span }),
                None => Err(no_context(span)),
            },
            E::FunctionItem(fi) => Ok(Expr::new(E::FunctionItem(compile_function_item(fi, cc)?)).with_span(span)),
            E::And(ops) => Expr::and(compile_all(ops, cc)?).with_span(span).optimize(cc),
            E::Or(ops) => Expr::or(compile_all(ops, cc)?).with_span(span).optimize(cc),
            E::Comparison { kind, op, lhs, rhs } => {
                let lhs = Box::new(lhs.compile(cc)?);
                let rhs = Box::new(rhs.compile(cc)?);
                Expr::new(E::Comparison { kind, op, lhs, rhs }).with_span(span).optimize(cc)
            }
            E::Function { func, args } => {
                if matches!(func, Function::Position | Function::Last) && cc.focus().is_none() {
                    return Err(no_context(span));
                }
                Expr::call(func, compile_all(args, cc)?).with_span(span).optimize(cc)
            }
            E::Step(mut step) => {
                require_node_focus(cc, span)?;
                let mut host = Host::Step { axis: step.axis, test: &mut step.test };
                let ty = step.preds.compile(cc, &mut host)?;
                Ok(finish_step(step, ty, span, cc))
            }
            E::Path { root, steps } => {
                let root = root.map(|r| r.compile(cc)).transpose()?;
                let focus = root.as_ref().map(|r| r.ty.item.clone());
                let steps = compile_chain(steps, focus, cc)?;
                Expr::path(root, steps).with_span(span).optimize(cc)
            }
            E::Map(ops) => Expr::map(compile_chain(ops, None, cc)?).with_span(span).optimize(cc),
            E::Filter { root, mut preds } => {
                let root = root.compile(cc)?;
                let ty = preds.compile(cc, &mut Host::Filter { root: &root })?;
                Ok(finish_filter(root, preds, ty, span, cc))
            }
            E::FtContains { input, query } => {
                let input = input.compile(cc)?;
                let query = query.compile(cc)?;
                Expr::ft_contains(input, query).with_span(span).optimize(cc)
            }
            E::If { cond, then, otherwise } => {
                let cond = cond.compile(cc)?;
                let then = then.compile(cc)?;
                let otherwise = otherwise.compile(cc)?;
                Expr::iff(cond, then, otherwise).with_span(span).optimize(cc)
            }
            E::VarRef(var) => match cc.lookup(&var.name) {
                Some(found) => Ok(Expr::var(found.clone()).with_span(span)),
                None => Err(Error::from_code(ErrorCode::XPST0008, format!("undeclared variable ${}", var.name))
                    .with_span(span)),
            },
            E::DynamicCall { func, args } => {
                let func = func.compile(cc)?;
                let args = compile_all(args, cc)?;
                Expr::dynamic_call(func, args).with_span(span).optimize(cc)
            }
            E::TypeCheck(tc) => {
                let TypeCheck { expr, target, promote } = tc;
                let expr = expr.compile(cc)?;
                TypeCheck::new(expr, target, promote).optimize(span, cc)
            }
        }
    }

    /// Re-derives the static type of a node whose children are compiled and
    /// applies the rewrites of this node.
    pub fn optimize(self, cc: &mut CompileContext<'_>) -> CResult<Expr> {
        let Expr { kind, ty, span } = self;
        match kind {
            E::And(ops) => optimize_logic(true, ops, span, cc),
            E::Or(ops) => optimize_logic(false, ops, span, cc),
            E::Comparison { kind, op, lhs, rhs } => optimize_comparison(kind, op, *lhs, *rhs, span, cc),
            E::Function { func, args } => optimize_function(func, args, span, cc),
            E::Step(mut step) => {
                let mut host = Host::Step { axis: step.axis, test: &mut step.test };
                let ty = step.preds.optimize(cc, &mut host)?;
                Ok(finish_step(step, ty, span, cc))
            }
            E::Path { root, steps } => optimize_path(root.map(|r| *r), steps, span, cc),
            E::Map(ops) => optimize_map(ops, span, cc),
            E::Filter { root, mut preds } => {
                let ty = preds.optimize(cc, &mut Host::Filter { root: &root })?;
                Ok(finish_filter(*root, preds, ty, span, cc))
            }
            E::FtContains { input, query } => {
                if cc.optimizing() && input.ty.zero() {
                    cc.info(format!("{input} contains text {query} has no input"));
                    return Ok(Expr::boolean(false).with_span(span));
                }
                Ok(Expr { kind: E::FtContains { input, query }, ty: ExprType::boolean(), span })
            }
            E::If { cond, then, otherwise } => optimize_if(*cond, *then, *otherwise, span, cc),
            E::DynamicCall { func, args } => optimize_dynamic_call(*func, args, span, cc),
            E::TypeCheck(tc) => tc.optimize(span, cc),
            kind => Ok(Expr { kind, ty, span }),
        }
    }

    /// Rewrites the expression into a cheaper one with the same effective
    /// boolean value (or, in predicate mode, the same predicate truth).
    pub fn simplify_for(self, mode: Simplify, cc: &mut CompileContext<'_>) -> CResult<Expr> {
        if !cc.optimizing() {
            return Ok(self);
        }
        let replacement = match &self.kind {
            E::Function { func, args } => match (func, args.as_slice()) {
                // boolean(E) -> E
                (Function::Boolean, [arg]) if !arg.ty.may_be_number() => Some(arg.clone()),
                // exists($nodes) -> $nodes
                (Function::Exists, [arg]) if arg.ty.is_node() => Some(arg.clone()),
                // count(E) -> exists(E), count($nodes) -> $nodes
                (Function::Count, [arg]) if mode == Simplify::Ebv => Some(if arg.ty.is_node() {
                    arg.clone()
                } else {
                    Expr::call(Function::Exists, vec![arg.clone()]).with_span(self.span).optimize(cc)?
                }),
                _ => None,
            },
            E::Filter { root, preds } => preds.simplify_ebv(root, cc)?,
            _ => None,
        };
        match replacement {
            Some(new) => cc.replace_with(&self, new).simplify_for(mode, cc),
            None => Ok(self),
        }
    }

    /// Effective boolean value of a compile-time constant.
    pub fn literal_ebv(&self) -> CResult<bool> {
        match &self.kind {
            E::Literal(values) => match values.as_slice() {
                [] => Ok(false),
                [value] => Ok(ebv_atomic(value)),
                _ => Err(Error::from_code(
                    ErrorCode::FORG0006,
                    format!("effective boolean value is undefined for {self}"),
                )
                .with_span(self.span)),
            },
            E::FunctionItem(fi) => Err(Error::from_code(
                ErrorCode::FORG0006,
                format!("effective boolean value is undefined for function item {fi}"),
            )
            .with_span(self.span)),
            _ => Err(Error::from_code(ErrorCode::FOER0000, format!("{self} is not a constant")).with_span(self.span)),
        }
    }
}

/// `and` / `or`: flattens nested operators and removes constant operands.
fn optimize_logic(and: bool, ops: Vec<Expr>, span: Option<Span>, cc: &mut CompileContext<'_>) -> CResult<Expr> {
    let mut out = Vec::with_capacity(ops.len());
    for op in ops {
        let op = op.simplify_for(Simplify::Ebv, cc)?;
        match op.kind {
            E::And(inner) if and => out.extend(inner),
            E::Or(inner) if !and => out.extend(inner),
            kind => out.push(Expr { kind, ty: op.ty, span: op.span }),
        }
    }
    if cc.optimizing() {
        let mut kept = Vec::with_capacity(out.len());
        for op in out {
            if !op.is_value() {
                kept.push(op);
            } else if op.literal_ebv()? != and {
                // false() in `and`, true() in `or`
                cc.info(format!("pre-evaluate {} operand {op}", if and { "and" } else { "or" }));
                return Ok(Expr::boolean(!and).with_span(span));
            } else {
                cc.info(format!("remove operand {op}"));
            }
        }
        out = kept;
        match out.len() {
            0 => return Ok(Expr::boolean(and).with_span(span)),
            1 => {
                let op = out.remove(0);
                return Expr::call(Function::Boolean, vec![op]).with_span(span).optimize(cc);
            }
            _ => {}
        }
    }
    let kind = if and { E::And(out) } else { E::Or(out) };
    Ok(Expr { kind, ty: ExprType::boolean(), span })
}

fn optimize_comparison(
    kind: CmpKind,
    mut op: CmpOp,
    mut lhs: Expr,
    mut rhs: Expr,
    span: Option<Span>,
    cc: &mut CompileContext<'_>,
) -> CResult<Expr> {
    if cc.optimizing() {
        if let (Some(l), Some(r)) = (literal_values(&lhs), literal_values(&rhs)) {
            let folded = match kind {
                CmpKind::General => Expr::boolean(compare_general(l, r, op)?),
                CmpKind::Value => match (l, r) {
                    ([], _) | (_, []) => Expr::empty(),
                    ([a], [b]) => Expr::boolean(compare_value(a, b, op)?),
                    _ => {
                        let found = if l.len() > 1 { &lhs } else { &rhs };
                        let expected = SeqType::opt(ItemType::Atomic(crate::types::AtomicType::AnyAtomic));
                        return Err(Error::static_type(found, &expected, span));
                    }
                },
            };
            let orig = Expr::new(E::Comparison { kind, op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
            return Ok(cc.replace_with(&orig, folded.with_span(span)));
        }
        // 1 = $x -> $x = 1
        if lhs.is_value() && !rhs.is_value() {
            cc.info(format!("swap operands of {lhs} {} {rhs}", op.symbol(kind)));
            std::mem::swap(&mut lhs, &mut rhs);
            op = op.swap();
        }
        if kind == CmpKind::General && (lhs.ty.zero() || rhs.ty.zero()) && !lhs.has(Flag::Ndt) && !rhs.has(Flag::Ndt) {
            cc.info(format!("{lhs} {} {rhs} compares an empty sequence", op.symbol(kind)));
            return Ok(Expr::boolean(false).with_span(span));
        }
    }
    let ty = match kind {
        CmpKind::General => ExprType::boolean(),
        CmpKind::Value => {
            let occ = if lhs.ty.occ.min() == 0 || rhs.ty.occ.min() == 0 {
                Occurrence::ZeroOrOne
            } else {
                Occurrence::ExactlyOne
            };
            ExprType::new(ExprType::boolean().item, occ)
        }
    };
    Ok(Expr { kind: E::Comparison { kind, op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty, span })
}

fn optimize_function(func: Function, mut args: Vec<Expr>, span: Option<Span>, cc: &mut CompileContext<'_>) -> CResult<Expr> {
    if cc.optimizing() {
        if matches!(func, Function::Boolean | Function::Not) && args.len() == 1 {
            let arg = args.remove(0).simplify_for(Simplify::Ebv, cc)?;
            args.push(arg);
        }
        let folded = match (func, args.as_slice()) {
            (Function::Boolean, [arg]) if arg.ty.one() && arg.ty.item == ExprType::boolean().item => Some(arg.clone()),
            (Function::Boolean, [arg]) if arg.is_value() => Some(Expr::boolean(arg.literal_ebv()?)),
            (Function::Not, [arg]) if arg.is_value() => Some(Expr::boolean(!arg.literal_ebv()?)),
            // not(empty(E)) -> exists(E), not(exists(E)) -> empty(E)
            (Function::Not, [arg]) => match &arg.kind {
                E::Function { func: Function::Empty, args } => Some(Expr::call(Function::Exists, args.clone())),
                E::Function { func: Function::Exists, args } => Some(Expr::call(Function::Empty, args.clone())),
                _ => None,
            },
            (Function::Exists | Function::Empty, [arg]) if !arg.has(Flag::Ndt) => {
                let exists = match arg.ty.size {
                    Some(n) => Some(n > 0),
                    None if arg.ty.occ.min() > 0 => Some(true),
                    None => None,
                };
                exists.map(|e| Expr::boolean(if func == Function::Exists { e } else { !e }))
            }
            (Function::Count, [arg]) if !arg.has(Flag::Ndt) => {
                arg.ty.size.and_then(|n| i64::try_from(n).ok()).map(Expr::int)
            }
            _ => None,
        };
        if let Some(new) = folded {
            let orig = Expr::call(func, args);
            return Ok(cc.replace_with(&orig, new.with_span(span)));
        }
    }
    let ty = func.result_type(&args);
    Ok(Expr { kind: E::Function { func, args }, ty, span })
}

fn optimize_path(root: Option<Expr>, steps: Vec<Expr>, span: Option<Span>, cc: &mut CompileContext<'_>) -> CResult<Expr> {
    let mut flat = Vec::with_capacity(steps.len());
    for step in steps {
        match step.kind {
            // a/(b/c) -> a/b/c
            E::Path { root: None, steps: inner } if cc.optimizing() => flat.extend(inner),
            kind => flat.push(Expr { kind, ty: step.ty, span: step.span }),
        }
    }
    if flat.is_empty() {
        return Ok(root.unwrap_or_else(Expr::context).with_span(span));
    }
    // ./child::a -> child::a; other operands keep the focus the path sets
    if cc.optimizing() && root.is_none() && flat.len() == 1 && matches!(flat[0].kind, E::Step(_)) {
        return Ok(flat.remove(0));
    }

    let head = match &root {
        Some(r) => r.ty.clone(),
        None => ExprType::new(cc.focus().cloned().unwrap_or(ItemType::AnyItem), Occurrence::ExactlyOne),
    };
    let mut occ = head.occ;
    let mut empty = head.zero();
    for step in &flat {
        occ = occ.multiply(step.ty.occ);
        empty |= step.ty.zero();
    }
    let path = Expr::path(root, flat).with_span(span);
    if cc.optimizing() && empty && !path.has(Flag::Ndt) {
        return Ok(cc.replace_with(&path, Expr::empty()));
    }
    let item = match &path.kind {
        E::Path { steps, .. } => steps.last().map_or(ItemType::AnyItem, |s| s.ty.item.clone()),
        _ => ItemType::AnyItem,
    };
    Ok(Expr { ty: ExprType::new(item, occ), ..path })
}

fn optimize_map(mut ops: Vec<Expr>, span: Option<Span>, cc: &mut CompileContext<'_>) -> CResult<Expr> {
    if cc.optimizing() {
        // . ! E -> E
        while ops.len() > 1 && ops[0].kind == E::ContextItem && !ops[1].has(Flag::Pos) {
            cc.info(format!("remove context item operand of {}", Expr::map(ops.clone())));
            ops.remove(0);
        }
        if ops.len() == 1 {
            return Ok(ops.remove(0).with_span(span));
        }
    }
    let mut occ = Occurrence::ExactlyOne;
    let mut size = Some(1u64);
    let mut empty = false;
    for op in &ops {
        occ = occ.multiply(op.ty.occ);
        size = size.zip(op.ty.size).and_then(|(a, b)| a.checked_mul(b));
        empty |= op.ty.zero();
    }
    let map = Expr::map(ops).with_span(span);
    if cc.optimizing() && empty && !map.has(Flag::Ndt) {
        return Ok(cc.replace_with(&map, Expr::empty()));
    }
    let item = match &map.kind {
        E::Map(ops) => ops.last().map_or(ItemType::AnyItem, |o| o.ty.item.clone()),
        _ => ItemType::AnyItem,
    };
    let mut ty = ExprType::item_star();
    ty.assign(item, occ, size);
    Ok(Expr { ty, ..map })
}

fn optimize_if(cond: Expr, then: Expr, otherwise: Expr, span: Option<Span>, cc: &mut CompileContext<'_>) -> CResult<Expr> {
    let cond = cond.simplify_for(Simplify::Ebv, cc)?;
    if cc.optimizing() && cond.is_value() {
        let branch = if cond.literal_ebv()? { then } else { otherwise };
        cc.info(format!("pre-evaluate if ({cond}) to {branch}"));
        return Ok(branch);
    }
    let ty = union_type(&then.ty, &otherwise.ty);
    Ok(Expr {
        kind: E::If { cond: Box::new(cond), then: Box::new(then), otherwise: Box::new(otherwise) },
        ty,
        span,
    })
}

fn optimize_dynamic_call(func: Expr, args: Vec<Expr>, span: Option<Span>, cc: &mut CompileContext<'_>) -> CResult<Expr> {
    let ft = match &func.ty.item {
        ItemType::Function(ft) => ft.clone(),
        ItemType::AnyItem => None,
        other => return Err(Error::static_type(other, &SeqType::one(ItemType::Function(None)), span)),
    };
    if let Some(ft) = &ft
        && ft.arity() != args.len()
    {
        return Err(Error::static_type(
            format!("{} argument(s)", args.len()),
            &SeqType::one(ItemType::Function(Some(ft.clone()))),
            span,
        ));
    }
    let mut args = args;
    // (function($a as xs:integer) { .. })($x treat as xs:integer): the binding checks $a
    if cc.optimizing()
        && let E::FunctionItem(fi) = &func.kind
        && let FunctionBody::Inline { params, .. } = &fi.body
    {
        args = args
            .into_iter()
            .zip(params)
            .map(|(arg, param)| match arg.kind {
                E::TypeCheck(tc) if tc.is_redundant(param) => {
                    cc.info(format!("remove redundant {tc}"));
                    *tc.expr
                }
                kind => Expr { kind, ty: arg.ty, span: arg.span },
            })
            .collect();
    }
    let ty = ft.map_or_else(ExprType::item_star, |ft| ft.result.clone().into());
    Ok(Expr { kind: E::DynamicCall { func: Box::new(func), args }, ty, span })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{Axis, NodeTest};
    use crate::engine::runtime::{StaticContextBuilder, Var};
    use crate::types::AtomicType;
    use crate::xdm::ExpandedName;

    fn compile_default(expr: Expr) -> CResult<CompiledQuery> {
        compile(expr, &StaticContextBuilder::new().with_query_info(true).build())
    }

    #[test]
    fn constant_logic_folds() -> CResult<()> {
        let q = compile_default(Expr::and(vec![Expr::boolean(true), Expr::child("a")]))?;
        assert!(q.expr.is_function(Function::Boolean) || matches!(q.expr.kind, E::Step(_)));
        let q = compile_default(Expr::or(vec![Expr::child("a"), Expr::boolean(true)]))?;
        assert!(q.expr.is_bool(true));
        Ok(())
    }

    #[test]
    fn literal_comparison_is_swapped() -> CResult<()> {
        let q = compile_default(Expr::general(CmpOp::Lt, Expr::int(1), Expr::child("a")))?;
        match &q.expr.kind {
            E::Comparison { op, lhs, .. } => {
                assert_eq!(*op, CmpOp::Gt);
                assert!(matches!(lhs.kind, E::Step(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn count_of_sized_literal_folds() -> CResult<()> {
        let values = vec![XdmAtomicValue::Integer(1), XdmAtomicValue::Integer(2)];
        let q = compile_default(Expr::call(Function::Count, vec![Expr::literal(values)]))?;
        assert_eq!(q.expr.as_number(), Some(2.0));
        Ok(())
    }

    #[test]
    fn missing_context_is_reported() {
        let sc = StaticContextBuilder::new().with_context_item_type(None).build();
        let err = compile(Expr::context(), &sc).err().map(|e| e.code_enum());
        assert_eq!(err, Some(ErrorCode::XPDY0002));
    }

    #[test]
    fn step_on_atomic_focus_is_a_type_error() {
        let sc = StaticContextBuilder::new()
            .with_context_item_type(Some(ItemType::Atomic(AtomicType::Integer)))
            .build();
        let step = Expr::step(Axis::Child, NodeTest::any(), Vec::new());
        let err = compile(step, &sc).err();
        assert!(err.is_some_and(|e| e.is_static() && e.code_enum() == ErrorCode::XPTY0004));
    }

    #[test]
    fn undeclared_variable_is_static_error() {
        let err = compile_default(Expr::var(Var::new(ExpandedName::local("x")))).err();
        assert_eq!(err.map(|e| e.code_enum()), Some(ErrorCode::XPST0008));
    }

    #[test]
    fn constant_condition_selects_branch() -> CResult<()> {
        let q = compile_default(Expr::iff(Expr::boolean(false), Expr::int(1), Expr::string("x")))?;
        assert_eq!(q.expr, Expr::string("x"));
        assert!(q.compile_info().iter().any(|n| n.starts_with("pre-evaluate if")));
        Ok(())
    }

    #[test]
    fn map_types_multiply() -> CResult<()> {
        let two = Expr::literal(vec![XdmAtomicValue::Integer(1), XdmAtomicValue::Integer(2)]);
        let q = compile_default(Expr::map(vec![two, Expr::string("x")]))?;
        assert_eq!(q.expr.ty.size, Some(2));
        assert_eq!(q.expr.ty.item, ItemType::Atomic(AtomicType::String));
        Ok(())
    }
}
