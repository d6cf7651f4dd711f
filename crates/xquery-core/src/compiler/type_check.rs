//! Type check node: enforces a declared sequence type on a sub-expression.
//!
//! Checks that can be decided statically are resolved while compiling; the
//! remaining ones run lazily while the result is pulled (see the evaluator's
//! `TypeCheckCursor`).

use crate::compiler::context::CompileContext;
use crate::compiler::ir::{Expr, ExprKind, FunctionBody, FunctionItem, Span};
use crate::engine::evaluator::promotion::promote_atomic;
use crate::engine::runtime::{Error, ErrorCode, Var};
use crate::types::{FunctionType, ItemType, SeqType};
use crate::xdm::XdmAtomicValue;
use core::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct TypeCheck {
    pub expr: Box<Expr>,
    pub target: SeqType,
    /// Values may be promoted (numeric widening, untyped casts, function
    /// coercion) instead of being rejected.
    pub promote: bool,
}

impl TypeCheck {
    pub fn new(expr: Expr, target: SeqType, promote: bool) -> Self {
        Self { expr: Box::new(expr), target, promote }
    }

    /// Resolves the check as far as static types allow. Returns the child if
    /// it already conforms, a coerced or pre-evaluated replacement, or the
    /// check itself for runtime checking.
    pub fn optimize(self, span: Option<Span>, cc: &mut CompileContext<'_>) -> Result<Expr, Error> {
        let TypeCheck { expr, target, promote } = self;
        let expr = *expr;
        if !cc.optimizing() {
            return Ok(wrap(expr, target, promote, span));
        }
        let at = expr.ty.clone();

        if at.instance_of(&target) {
            cc.info(format!("remove redundant check of {expr} as {target}"));
            return Ok(expr);
        }

        if let ExprKind::FunctionItem(fi) = &expr.kind
            && let ItemType::Function(Some(ft)) = &target.item
        {
            if !target.occ.check(1) || !promote {
                return Err(Error::static_type(&expr, &target, span));
            }
            let coerced = coerce_function(fi, ft, cc)?;
            return Ok(Expr::new(ExprKind::FunctionItem(coerced)).with_span(span));
        }

        if expr.is_value() {
            let ExprKind::Literal(values) = &expr.kind else {
                return Err(Error::static_type(&expr, &target, span));
            };
            let checked = check_atomics(values.clone(), &target, promote)
                .map_err(|err| {
                    let source: Arc<dyn std::error::Error + Send + Sync> = Arc::new(err);
                    Error::static_type(&expr, &target, span).with_source(Some(source))
                })?;
            let literal = Expr::literal(checked).with_span(span);
            return Ok(cc.replace_with(&expr, literal));
        }

        if (at.zero() || at.item.instance_of(&target.item)) && at.occ.intersect(target.occ).is_none() {
            return Err(Error::static_type(&expr, &target, span));
        }

        // if (c) then A else B as T -> if (c) then (A as T) else (B as T)
        if let ExprKind::If { cond, then, otherwise } = expr.kind {
            let check = TypeCheck { expr: Box::new(Expr::empty()), target, promote };
            let then = check.check(*then, cc)?;
            let otherwise = check.check(*otherwise, cc)?;
            return Expr::iff(*cond, then, otherwise).with_span(span).optimize(cc);
        }
        Ok(wrap(expr, target, promote, span))
    }

    /// Applies this check to another expression.
    pub fn check(&self, expr: Expr, cc: &mut CompileContext<'_>) -> Result<Expr, Error> {
        let span = expr.span;
        TypeCheck::new(expr, self.target.clone(), self.promote).optimize(span, cc)
    }

    /// Whether binding the checked value to `var` performs this check already.
    pub fn is_redundant(&self, var: &Var) -> bool {
        (!self.promote || var.promotes()) && var.declared_type().instance_of(&self.target)
    }
}

fn wrap(expr: Expr, target: SeqType, promote: bool, span: Option<Span>) -> Expr {
    let mut ty = expr.ty.clone();
    let item = if expr.ty.item.instance_of(&target.item) { expr.ty.item.clone() } else { target.item.clone() };
    let occ = expr.ty.occ.intersect(target.occ).unwrap_or(target.occ);
    let size = expr.ty.size.filter(|n| target.occ.check(*n));
    ty.assign(item, occ, size);
    Expr { kind: ExprKind::TypeCheck(TypeCheck::new(expr, target, promote)), ty, span }
}

/// Wraps a function item so that calls check arguments and result against `ft`.
pub fn coerce_function(
    fi: &Arc<FunctionItem>,
    ft: &Arc<FunctionType>,
    cc: &mut CompileContext<'_>,
) -> Result<Arc<FunctionItem>, Error> {
    let coerced = coerce_function_item(fi, ft)?;
    cc.info(format!("coerce {fi} to {ft}"));
    Ok(coerced)
}

/// Function coercion shared by compile time and runtime promotion.
pub fn coerce_function_item(fi: &Arc<FunctionItem>, ft: &Arc<FunctionType>) -> Result<Arc<FunctionItem>, Error> {
    if fi.arity() != ft.arity() {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{fi} cannot be coerced to {ft}: arity {} expected", ft.arity()),
        ));
    }
    if fi.ty.instance_of(ft) {
        return Ok(fi.clone());
    }
    Ok(Arc::new(FunctionItem { name: fi.name.clone(), ty: ft.clone(), body: FunctionBody::Coerced { inner: fi.clone() } }))
}

/// Checks (and promotes) a sequence of atomic values against `target`.
pub fn check_atomics(values: Vec<XdmAtomicValue>, target: &SeqType, promote: bool) -> Result<Vec<XdmAtomicValue>, Error> {
    if !target.occ.check(values.len() as u64) {
        return Err(Error::dynamic_type(
            format!("{} item(s)", values.len()),
            target,
            None,
        ));
    }
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        if target.item.matches_atomic(&value) {
            out.push(value);
            continue;
        }
        let promoted = match &target.item {
            ItemType::Atomic(t) if promote => promote_atomic(value.clone(), *t)?,
            _ => None,
        };
        match promoted {
            Some(p) => out.push(p),
            None => return Err(Error::dynamic_type(&value, target, None)),
        }
    }
    Ok(out)
}

impl fmt::Display for TypeCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.promote { "coerce" } else { "treat" };
        write!(f, "{verb}({}, {})", self.expr, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::StaticContextBuilder;
    use crate::types::{AtomicType, Occurrence};
    use crate::xdm::ExpandedName;

    #[test]
    fn untyped_values_are_promoted() -> Result<(), Error> {
        let target = SeqType::atomic(AtomicType::Double, Occurrence::ZeroOrMore);
        let out = check_atomics(vec![XdmAtomicValue::UntypedAtomic("1.5".into()), XdmAtomicValue::Integer(2)], &target, true)?;
        assert_eq!(out, vec![XdmAtomicValue::Double(1.5), XdmAtomicValue::Double(2.0)]);
        Ok(())
    }

    #[test]
    fn promotion_disabled_rejects() {
        let target = SeqType::atomic(AtomicType::Double, Occurrence::ExactlyOne);
        let err = check_atomics(vec![XdmAtomicValue::Integer(2)], &target, false).err();
        assert_eq!(err.map(|e| e.code_enum()), Some(ErrorCode::XPTY0004));
    }

    #[test]
    fn redundant_for_declared_binding() {
        let int = SeqType::atomic(AtomicType::Integer, Occurrence::ExactlyOne);
        let check = TypeCheck::new(Expr::context(), SeqType::atomic(AtomicType::Decimal, Occurrence::ExactlyOne), false);
        assert!(check.is_redundant(&Var::typed(ExpandedName::local("a"), int.clone(), false)));
        assert!(!check.is_redundant(&Var::new(ExpandedName::local("b"))));
        let promoting = TypeCheck::new(Expr::context(), int.clone(), true);
        assert!(!promoting.is_redundant(&Var::typed(ExpandedName::local("c"), int.clone(), false)));
        assert!(promoting.is_redundant(&Var::typed(ExpandedName::local("d"), int, true)));
    }

    #[test]
    fn runtime_check_keeps_narrowed_type() -> Result<(), Error> {
        let sc = StaticContextBuilder::new().build();
        let mut cc = CompileContext::new(&sc);
        let step = Expr::child("a").compile(&mut cc)?;
        let target = SeqType::one(ItemType::AnyNode);
        let checked = TypeCheck::new(step, target, false).optimize(None, &mut cc)?;
        assert!(matches!(checked.kind, ExprKind::TypeCheck(_)));
        assert_eq!(checked.ty.occ, Occurrence::ExactlyOne);
        Ok(())
    }
}
