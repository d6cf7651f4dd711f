//! Value promotion and runtime sequence type checks.

use crate::compiler::ir::Span;
use crate::compiler::type_check::coerce_function_item;
use crate::consts::RUNTIME_PREFIX;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::{AtomicType, ItemType, SeqType};
use crate::xdm::{XdmAtomicValue as V, XdmItem, XdmSequence};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Items produced by promoting one input item.
pub type Promoted<N> = SmallVec<[XdmItem<N>; 1]>;

fn invalid(s: &str, target: AtomicType) -> Error {
    Error::from_code(ErrorCode::FORG0001, format!("cannot cast \"{s}\" to {target}"))
}

fn parse_double(s: &str) -> Option<f64> {
    match s {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("nan") => None,
        _ => s.parse().ok(),
    }
}

/// Casts the lexical form of an untyped value to `target`.
pub fn cast_untyped(s: &str, target: AtomicType) -> Result<V, Error> {
    let t = s.trim();
    Ok(match target {
        AtomicType::AnyAtomic | AtomicType::UntypedAtomic => V::UntypedAtomic(s.to_string()),
        AtomicType::String => V::String(s.to_string()),
        AtomicType::AnyUri => V::AnyUri(t.to_string()),
        AtomicType::Boolean => match t {
            "true" | "1" => V::Boolean(true),
            "false" | "0" => V::Boolean(false),
            _ => return Err(invalid(s, target)),
        },
        AtomicType::Integer => V::Integer(t.parse().map_err(|_| invalid(s, target))?),
        AtomicType::Decimal => {
            if t.contains(['e', 'E']) {
                return Err(invalid(s, target));
            }
            V::Decimal(t.parse().map_err(|_| invalid(s, target))?)
        }
        AtomicType::Double => V::Double(parse_double(t).ok_or_else(|| invalid(s, target))?),
        #[allow(clippy::cast_possible_truncation)]
        AtomicType::Float => V::Float(parse_double(t).ok_or_else(|| invalid(s, target))? as f32),
    })
}

/// Applies atomic type promotion: untyped casts, numeric widening and
/// `xs:anyURI` to `xs:string`. `None` if no rule applies.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn promote_atomic(value: V, target: AtomicType) -> Result<Option<V>, Error> {
    Ok(match (value, target) {
        (V::UntypedAtomic(s), t) => Some(cast_untyped(&s, t)?),
        (V::Integer(i), AtomicType::Double) => Some(V::Double(i as f64)),
        (V::Integer(i), AtomicType::Float) => Some(V::Float(i as f32)),
        (V::Decimal(d), AtomicType::Double) => Some(V::Double(d)),
        (V::Decimal(d), AtomicType::Float) => Some(V::Float(d as f32)),
        (V::Float(f), AtomicType::Double) => Some(V::Double(f64::from(f))),
        (V::AnyUri(s), AtomicType::String) => Some(V::String(s)),
        _ => None,
    })
}

/// Atomizes an item; nodes yield their string value as untyped atomic.
pub fn atomize<N: XdmNode>(item: &XdmItem<N>) -> Result<V, Error> {
    match item {
        XdmItem::Atomic(a) => Ok(a.clone()),
        XdmItem::Node(n) => Ok(V::UntypedAtomic(n.string_value())),
        XdmItem::Function(f) => Err(Error::from_code(ErrorCode::XPTY0004, format!("function item {f} cannot be atomized"))),
    }
}

pub fn atomize_all<N: XdmNode>(items: &[XdmItem<N>]) -> Result<Vec<V>, Error> {
    items.iter().map(atomize).collect()
}

/// Whether `item` is an instance of `ty`.
pub fn item_matches<N: XdmNode>(item: &XdmItem<N>, ty: &ItemType) -> bool {
    match item {
        XdmItem::Atomic(a) => ty.matches_atomic(a),
        XdmItem::Node(n) => ty.matches_node_kind(n.kind()),
        XdmItem::Function(f) => match ty {
            ItemType::AnyItem | ItemType::Function(None) => true,
            ItemType::Function(Some(ft)) => f.ty.instance_of(ft),
            _ => false,
        },
    }
}

/// Promotes an item that does not match `target`. `Ok(None)` if no
/// promotion rule applies.
pub fn promote_item<N: XdmNode>(item: XdmItem<N>, target: &ItemType) -> Result<Option<Promoted<N>>, Error> {
    Ok(match (item, target) {
        (XdmItem::Node(n), ItemType::Atomic(t)) => {
            let value = cast_untyped(&n.string_value(), *t)?;
            Some(smallvec![XdmItem::Atomic(value)])
        }
        (XdmItem::Atomic(a), ItemType::Atomic(t)) => promote_atomic(a, *t)?.map(|v| smallvec![XdmItem::Atomic(v)]),
        (XdmItem::Function(f), ItemType::Function(Some(ft))) => {
            let coerced = coerce_function_item(&f, ft)?;
            if !Arc::ptr_eq(&coerced, &f) {
                tracing::debug!(target: "xquery_core::compile", "{RUNTIME_PREFIX}coerce {f} to {ft}");
            }
            Some(smallvec![XdmItem::Function(coerced)])
        }
        _ => None,
    })
}

/// Eager check of a materialized sequence against `target`.
pub fn check_sequence<N: XdmNode>(
    items: XdmSequence<N>,
    target: &SeqType,
    promote: bool,
    span: Option<Span>,
) -> Result<XdmSequence<N>, Error> {
    if !target.occ.check(items.len() as u64) {
        return Err(Error::dynamic_type(format!("{} item(s)", items.len()), target, span));
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if item_matches(&item, &target.item) {
            out.push(item);
            continue;
        }
        let found = item.to_string();
        match promote.then(|| promote_item(item, &target.item)).transpose()?.flatten() {
            Some(promoted) => out.extend(promoted),
            None => return Err(Error::dynamic_type(found, target, span)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple_node::{SimpleNode, attr};
    use crate::types::Occurrence;

    #[test]
    fn untyped_casts() -> Result<(), Error> {
        assert_eq!(cast_untyped(" 42 ", AtomicType::Integer)?, V::Integer(42));
        assert_eq!(cast_untyped("1", AtomicType::Boolean)?, V::Boolean(true));
        assert_eq!(cast_untyped("-INF", AtomicType::Double)?, V::Double(f64::NEG_INFINITY));
        assert!(cast_untyped("1e3", AtomicType::Decimal).is_err());
        assert_eq!(cast_untyped("abc", AtomicType::Integer).err().map(|e| e.code_enum()), Some(ErrorCode::FORG0001));
        Ok(())
    }

    #[test]
    fn numeric_widening() -> Result<(), Error> {
        assert_eq!(promote_atomic(V::Integer(3), AtomicType::Double)?, Some(V::Double(3.0)));
        assert_eq!(promote_atomic(V::Double(3.0), AtomicType::Integer)?, None);
        assert_eq!(promote_atomic(V::AnyUri("u".into()), AtomicType::String)?, Some(V::String("u".into())));
        Ok(())
    }

    #[test]
    fn attribute_is_atomized_for_atomic_target() -> Result<(), Error> {
        let a: SimpleNode = attr("n", "7");
        let target = SeqType::atomic(AtomicType::Integer, Occurrence::ExactlyOne);
        let out = check_sequence(vec![XdmItem::Node(a)], &target, true, None)?;
        assert_eq!(out, vec![XdmItem::Atomic(V::Integer(7))]);
        Ok(())
    }

    #[test]
    fn eager_check_counts_first() {
        let target = SeqType::atomic(AtomicType::Integer, Occurrence::ZeroOrOne);
        let items: XdmSequence<SimpleNode> = vec![XdmItem::Atomic(V::Integer(1)), XdmItem::Atomic(V::Integer(2))];
        let err = check_sequence(items, &target, true, None).err();
        assert!(err.is_some_and(|e| e.code_enum() == ErrorCode::XPTY0004 && !e.is_static()));
    }
}
