//! Atomic comparisons shared by the evaluator and compile-time folding.

use crate::compiler::ir::CmpOp;
use crate::engine::evaluator::promotion::cast_untyped;
use crate::engine::runtime::{Error, ErrorCode};
use crate::types::AtomicType;
use crate::xdm::XdmAtomicValue as V;
use core::cmp::Ordering;

fn apply(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

fn compare(op: CmpOp, a: &V, b: &V) -> Result<bool, Error> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return Ok(match x.partial_cmp(&y) {
            Some(ord) => apply(op, ord),
            None => op == CmpOp::Ne,
        });
    }
    match (a, b) {
        (V::Boolean(x), V::Boolean(y)) => match op {
            CmpOp::Eq => Ok(x == y),
            CmpOp::Ne => Ok(x != y),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, format!("{} is not defined for booleans", op.symbol(crate::compiler::ir::CmpKind::Value)))),
        },
        (V::String(x) | V::AnyUri(x) | V::UntypedAtomic(x), V::String(y) | V::AnyUri(y) | V::UntypedAtomic(y)) => {
            Ok(apply(op, x.as_str().cmp(y.as_str())))
        }
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("cannot compare {} with {}", a.atomic_type(), b.atomic_type()),
        )),
    }
}

/// Value comparison (`eq`, `lt`, ...): untyped operands compare as strings.
pub fn compare_value(a: &V, b: &V, op: CmpOp) -> Result<bool, Error> {
    compare(op, a, b)
}

/// Untyped operand of a general comparison adopts the type of the other side.
fn general_pair(a: &V, b: &V) -> Result<(V, V), Error> {
    let target = |other: &V| match other {
        V::UntypedAtomic(_) | V::String(_) | V::AnyUri(_) => AtomicType::String,
        other if other.is_numeric() => AtomicType::Double,
        other => other.atomic_type(),
    };
    Ok(match (a, b) {
        (V::UntypedAtomic(s), other) if !matches!(other, V::UntypedAtomic(_)) => (cast_untyped(s, target(other))?, other.clone()),
        (other, V::UntypedAtomic(s)) if !matches!(other, V::UntypedAtomic(_)) => (other.clone(), cast_untyped(s, target(other))?),
        _ => (a.clone(), b.clone()),
    })
}

/// General comparison (`=`, `<`, ...): true if any pair of operands satisfies `op`.
pub fn compare_general(lhs: &[V], rhs: &[V], op: CmpOp) -> Result<bool, Error> {
    for a in lhs {
        for b in rhs {
            let (a, b) = general_pair(a, b)?;
            if compare(op, &a, &b)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untyped_adopts_numeric_type() -> Result<(), Error> {
        assert!(compare_general(&[V::UntypedAtomic("10".into())], &[V::Integer(9)], CmpOp::Gt)?);
        // as strings "10" < "9"
        assert!(compare_value(&V::UntypedAtomic("10".into()), &V::String("9".into()), CmpOp::Lt)?);
        Ok(())
    }

    #[test]
    fn invalid_untyped_number_fails() {
        let err = compare_general(&[V::UntypedAtomic("x".into())], &[V::Integer(1)], CmpOp::Eq).err();
        assert_eq!(err.map(|e| e.code_enum()), Some(ErrorCode::FORG0001));
    }

    #[test]
    fn incomparable_types() {
        let err = compare_value(&V::Integer(1), &V::String("1".into()), CmpOp::Eq).err();
        assert_eq!(err.map(|e| e.code_enum()), Some(ErrorCode::XPTY0004));
        assert!(compare_value(&V::Boolean(true), &V::Boolean(false), CmpOp::Lt).is_err());
    }

    #[test]
    fn nan_is_only_unequal() -> Result<(), Error> {
        assert!(!compare_value(&V::Double(f64::NAN), &V::Double(f64::NAN), CmpOp::Eq)?);
        assert!(compare_value(&V::Double(f64::NAN), &V::Integer(1), CmpOp::Ne)?);
        Ok(())
    }

    #[test]
    fn general_comparison_is_existential() -> Result<(), Error> {
        let lhs = [V::Integer(1), V::Integer(5)];
        assert!(compare_general(&lhs, &[V::Integer(5)], CmpOp::Eq)?);
        assert!(!compare_general(&lhs, &[], CmpOp::Eq)?);
        Ok(())
    }
}
