use proptest::prelude::*;
use xquery_core::{
    CmpOp, CompiledQuery, DynamicContext, Expr, PosRange, SimpleNode, StaticContext, StaticContextBuilder,
    XdmAtomicValue, XdmItem, XdmSequence, compile, evaluate,
};

type N = SimpleNode;

fn seq(n: u64) -> Expr {
    Expr::literal((1..=n).map(|i| XdmAtomicValue::Integer(i as i64)).collect())
}

fn ints(values: impl IntoIterator<Item = u64>) -> XdmSequence<N> {
    values.into_iter().map(|i| XdmItem::Atomic(XdmAtomicValue::Integer(i as i64))).collect()
}

fn optimized() -> StaticContext {
    StaticContextBuilder::new().build()
}

fn unoptimized() -> StaticContext {
    StaticContextBuilder::new().with_optimize(false).build()
}

fn eval(q: &CompiledQuery) -> XdmSequence<N> {
    evaluate(q, &DynamicContext::default()).unwrap()
}

prop_compose! {
    fn arb_range()(min in 1u64..12, width in 0u64..8, open in any::<bool>()) -> PosRange {
        let max = if open { PosRange::UNBOUNDED } else { min + width };
        PosRange::window(min, max).unwrap()
    }
}

// Property: E[min to max] over n items has exactly max(0, min(n, max) - min + 1) items,
// known statically.
proptest! {
    #[test]
    fn prop_window_size(n in 0u64..20, range in arb_range()) {
        let expected = if n >= range.min() { n.min(range.max()) - range.min() + 1 } else { 0 };
        let q = compile(Expr::filter(seq(n), vec![Expr::pos(range)]), &optimized()).unwrap();
        if expected == 0 {
            prop_assert_eq!(&q.expr, &Expr::empty());
        } else {
            prop_assert_eq!(q.static_type().size, Some(expected));
        }
        let out = eval(&q);
        prop_assert_eq!(out.len() as u64, expected);
        if expected > 0 {
            prop_assert_eq!(out, ints(range.min()..range.min() + expected));
        }
    }
}

// Property: fusing adjacent windows keeps the sequential meaning of E[a][b].
proptest! {
    #[test]
    fn prop_fused_windows_match_sequential(n in 0u64..20, a in arb_range(), b in arb_range()) {
        let filter = || Expr::filter(seq(n), vec![Expr::pos(a), Expr::pos(b)]);
        let fused = compile(filter(), &optimized()).unwrap();
        let plain = compile(filter(), &unoptimized()).unwrap();
        prop_assert_eq!(eval(&fused), eval(&plain));
    }
}

// Property: numeric predicates select by position exactly like windows do.
proptest! {
    #[test]
    fn prop_numeric_predicates(n in 0u64..12, i in -2i64..15, j in -2i64..15) {
        let filter = || Expr::filter(seq(n), vec![Expr::int(i), Expr::int(j)]);
        let fused = compile(filter(), &optimized()).unwrap();
        let plain = compile(filter(), &unoptimized()).unwrap();
        prop_assert_eq!(eval(&fused), eval(&plain));
    }
}

// Property: true() predicates are dropped and recompiling changes nothing.
proptest! {
    #[test]
    fn prop_true_removal_is_idempotent(n in 1u64..10, trues in 0usize..4, range in arb_range()) {
        let mut preds = vec![Expr::boolean(true); trues];
        preds.push(Expr::pos(range));
        preds.extend(std::iter::repeat_n(Expr::boolean(true), trues));
        let with_trues = compile(Expr::filter(seq(n), preds), &optimized()).unwrap();
        let without = compile(Expr::filter(seq(n), vec![Expr::pos(range)]), &optimized()).unwrap();
        prop_assert_eq!(&with_trues.expr, &without.expr);
        let again = compile(with_trues.expr.clone(), &optimized()).unwrap();
        prop_assert_eq!(&again.expr, &with_trues.expr);
    }
}

// Property: streaming a value filter yields the same items as filtering the values.
proptest! {
    #[test]
    fn prop_value_filter_streams(n in 0u64..20, threshold in 0i64..20) {
        let pred = Expr::general(CmpOp::Gt, Expr::context(), Expr::int(threshold));
        let q = compile(Expr::filter(seq(n), vec![pred]), &optimized()).unwrap();
        let expected = ints((1..=n).filter(|i| (*i as i64) > threshold));
        prop_assert_eq!(eval(&q), expected);
    }
}
