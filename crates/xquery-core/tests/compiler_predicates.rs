use rstest::rstest;
use xquery_core::{
    Axis, CmpOp, CompiledQuery, ExpandedName, Expr, ExprKind, Function, ItemType, NodeKind, NodeTest, PosRange, SeqType,
    StaticContext, StaticContextBuilder, Var, XdmAtomicValue, compile,
};

fn compiled(expr: Expr) -> CompiledQuery {
    compile(expr, &StaticContextBuilder::new().with_query_info(true).build()).expect("compile failed")
}

fn seq(n: i64) -> Expr {
    Expr::literal((1..=n).map(XdmAtomicValue::Integer).collect())
}

fn position() -> Expr {
    Expr::call(Function::Position, vec![])
}

fn preds_of(expr: &Expr) -> &[Expr] {
    match &expr.kind {
        ExprKind::Filter { preds, .. } => &preds.exprs,
        ExprKind::Step(step) => &step.preds.exprs,
        other => panic!("no predicate list on {other:?}"),
    }
}

fn window(min: u64, max: u64) -> PosRange {
    PosRange::window(min, max).expect("non-empty window")
}

/// `$n` declared with `ty`, and a static context that knows it.
fn node_var(ty: SeqType) -> (Expr, StaticContext) {
    let var = Var::typed(ExpandedName::local("n"), ty, false);
    let sc = StaticContextBuilder::new().with_variable(var.clone()).with_query_info(true).build();
    (Expr::var(var), sc)
}

fn compiled_in(expr: Expr, sc: &StaticContext) -> CompiledQuery {
    compile(expr, sc).expect("compile failed")
}

fn has_note(q: &CompiledQuery, prefix: &str) -> bool {
    q.compile_info().iter().any(|n| n.starts_with(prefix))
}

#[rstest]
fn true_predicate_is_removed() {
    let q = compiled(Expr::filter(seq(5), vec![Expr::boolean(true)]));
    assert_eq!(q.expr, seq(5));
    assert!(has_note(&q, "remove predicate"));
}

#[rstest]
fn true_predicates_between_others_are_removed() {
    let q = compiled(Expr::step(
        Axis::Child,
        NodeTest::any(),
        vec![Expr::boolean(true), Expr::child("b"), Expr::boolean(true)],
    ));
    assert_eq!(preds_of(&q.expr), [compiled(Expr::child("b")).expr]);
}

#[rstest]
#[case(Expr::boolean(false))]
#[case(Expr::int(0))]
#[case(Expr::double(1.5))]
#[case(Expr::general(CmpOp::Lt, position(), Expr::int(1)))]
fn unsatisfiable_predicate_yields_empty(#[case] pred: Expr) {
    let q = compiled(Expr::filter(seq(5), vec![pred]));
    assert_eq!(q.expr, Expr::empty());
    assert!(q.static_type().zero());
}

#[rstest]
fn false_predicate_on_step_is_noted() {
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![Expr::boolean(false)]));
    assert_eq!(q.expr, Expr::empty());
    assert!(q.compile_info().iter().any(|n| n.contains("never matches")));
}

#[rstest]
fn window_past_the_input_yields_empty() {
    let q = compiled(Expr::filter(seq(5), vec![Expr::general(CmpOp::Gt, position(), Expr::int(7))]));
    assert_eq!(q.expr, Expr::empty());
}

#[rstest]
fn first_item_has_static_size_one() {
    let q = compiled(Expr::filter(seq(5), vec![Expr::int(1)]));
    assert_eq!(preds_of(&q.expr), [Expr::pos(window(1, 1))]);
    assert_eq!(q.static_type().size, Some(1));
    assert!(q.static_type().one());
}

#[rstest]
#[case(CmpOp::Eq, 3, window(3, 3))]
#[case(CmpOp::Le, 2, window(1, 2))]
#[case(CmpOp::Gt, 2, window(3, PosRange::UNBOUNDED))]
fn position_comparisons_become_windows(#[case] op: CmpOp, #[case] n: i64, #[case] expected: PosRange) {
    let q = compiled(Expr::filter(seq(10), vec![Expr::general(op, position(), Expr::int(n))]));
    assert_eq!(preds_of(&q.expr), [Expr::pos(expected)]);
}

#[rstest]
fn position_equal_last_becomes_last() {
    let last = Expr::call(Function::Last, vec![]);
    let q = compiled(Expr::filter(seq(4), vec![Expr::general(CmpOp::Eq, position(), last)]));
    let preds = preds_of(&q.expr);
    assert_eq!(preds.len(), 1);
    assert!(preds[0].is_function(Function::Last));
    assert_eq!(q.static_type().size, Some(1));
}

#[rstest]
fn adjacent_windows_are_fused() {
    let q = compiled(Expr::filter(
        seq(10),
        vec![
            Expr::general(CmpOp::Ge, position(), Expr::int(3)),
            Expr::general(CmpOp::Le, position(), Expr::int(2)),
        ],
    ));
    assert_eq!(preds_of(&q.expr), [Expr::pos(window(3, 4))]);
    assert_eq!(q.static_type().size, Some(2));
    assert!(has_note(&q, "merge predicates"));
}

#[rstest]
fn fused_windows_can_be_empty() {
    let q = compiled(Expr::filter(seq(10), vec![Expr::int(2), Expr::int(2)]));
    assert_eq!(q.expr, Expr::empty());
}

#[rstest]
fn duplicates_are_removed_without_positional_predicate() {
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![Expr::child("b"), Expr::child("b")]));
    assert_eq!(preds_of(&q.expr).len(), 1);
    assert!(has_note(&q, "remove duplicate predicate"));
}

#[rstest]
fn duplicates_after_positional_predicate_are_kept() {
    let q = compiled(Expr::step(
        Axis::Child,
        NodeTest::any(),
        vec![Expr::int(1), Expr::child("b"), Expr::child("b")],
    ));
    assert_eq!(preds_of(&q.expr).len(), 3);
}

#[rstest]
#[case(Axis::SelfAxis, 1, true)]
#[case(Axis::SelfAxis, 2, false)]
#[case(Axis::Parent, 1, true)]
#[case(Axis::Parent, 2, false)]
fn positions_on_singleton_axes_are_decided(#[case] axis: Axis, #[case] n: i64, #[case] kept: bool) {
    let q = compiled(Expr::step(axis, NodeTest::any(), vec![Expr::int(n)]));
    if kept {
        assert!(matches!(&q.expr.kind, ExprKind::Step(step) if step.axis == axis && step.preds.is_empty()));
    } else {
        assert_eq!(q.expr, Expr::empty());
    }
}

#[rstest]
fn conjunction_is_split_into_predicates() {
    let q = compiled(Expr::step(
        Axis::Child,
        NodeTest::any(),
        vec![Expr::and(vec![Expr::child("b"), Expr::child("c")])],
    ));
    let preds = preds_of(&q.expr);
    assert_eq!(preds.len(), 2);
    assert_eq!(preds[0], compiled(Expr::child("b")).expr);
    assert_eq!(preds[1], compiled(Expr::child("c")).expr);
}

#[rstest]
fn positional_conjunction_is_not_split() {
    let cond = Expr::and(vec![Expr::general(CmpOp::Gt, position(), Expr::int(1)), Expr::child("b")]);
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![cond]));
    let preds = preds_of(&q.expr);
    assert_eq!(preds.len(), 1);
    assert!(matches!(preds[0].kind, ExprKind::And(_)));
}

#[rstest]
fn self_step_is_merged_into_node_test() {
    let self_a = Expr::step(Axis::SelfAxis, NodeTest::name(Axis::SelfAxis, ExpandedName::local("a")), vec![]);
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![self_a]));
    match &q.expr.kind {
        ExprKind::Step(step) => {
            assert_eq!(step.test, NodeTest::name(Axis::Child, ExpandedName::local("a")));
            assert!(step.preds.is_empty());
        }
        other => panic!("expected a step, got {other:?}"),
    }
}

#[rstest]
fn context_item_predicate_on_nodes_is_removed() {
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![Expr::context()]));
    assert!(preds_of(&q.expr).is_empty());
}

#[rstest]
fn relative_path_predicate_drops_context_root() {
    let pred = Expr::path(Some(Expr::context()), vec![Expr::child("b")]);
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![pred]));
    assert_eq!(preds_of(&q.expr), [compiled(Expr::child("b")).expr]);
}

#[rstest]
#[case(1, Expr::int(1))]
#[case(2, Expr::empty())]
fn single_literal_is_inlined_into_predicate(#[case] n: i64, #[case] expected: Expr) {
    let pred = Expr::general(CmpOp::Eq, Expr::context(), Expr::int(n));
    let q = compiled(Expr::filter(Expr::int(1), vec![pred]));
    assert_eq!(q.expr, expected);
}

#[rstest]
fn count_stays_positional_in_predicates() {
    let pred = Expr::call(Function::Count, vec![Expr::child("b")]);
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![pred]));
    let preds = preds_of(&q.expr);
    assert_eq!(preds.len(), 1);
    assert!(preds[0].is_function(Function::Count));
}

#[rstest]
fn exists_of_nodes_is_unwrapped_in_predicates() {
    let pred = Expr::call(Function::Exists, vec![Expr::child("b")]);
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![pred]));
    assert_eq!(preds_of(&q.expr), [compiled(Expr::child("b")).expr]);
}

#[rstest]
fn boolean_filter_becomes_comparison() {
    let filtered = Expr::filter(
        Expr::child("a"),
        vec![Expr::general(CmpOp::Eq, Expr::context(), Expr::string("x"))],
    );
    let q = compiled(Expr::call(Function::Boolean, vec![filtered]));
    let direct = compiled(Expr::general(CmpOp::Eq, Expr::child("a"), Expr::string("x")));
    assert_eq!(q.expr, direct.expr);
}

#[rstest]
fn boolean_filter_with_path_predicate_becomes_path() {
    let filtered = Expr::filter(Expr::child("a"), vec![Expr::child("b")]);
    let q = compiled(Expr::call(Function::Boolean, vec![filtered]));
    let path = Expr::path(Some(Expr::child("a")), vec![Expr::child("b")]);
    assert_eq!(q.expr, compiled(Expr::call(Function::Boolean, vec![path])).expr);
}

#[rstest]
fn positional_filter_is_not_rewritten_for_boolean() {
    let filtered = Expr::filter(Expr::child("a"), vec![Expr::int(2)]);
    let q = compiled(Expr::call(Function::Boolean, vec![filtered]));
    match &q.expr.kind {
        ExprKind::Function { func: Function::Boolean, args } => {
            assert!(matches!(args[0].kind, ExprKind::Filter { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[rstest]
fn unoptimized_compile_keeps_predicates() {
    let sc = StaticContextBuilder::new().with_optimize(false).build();
    let q = compile(Expr::filter(seq(5), vec![Expr::boolean(true)]), &sc).expect("compile failed");
    assert_eq!(preds_of(&q.expr).len(), 1);
    assert_eq!(q.static_type().size, None);
}

#[rstest]
fn recompiling_is_stable() {
    let expr = Expr::step(
        Axis::Child,
        NodeTest::any(),
        vec![Expr::boolean(true), Expr::child("b"), Expr::general(CmpOp::Le, position(), Expr::int(3))],
    );
    let once = compiled(expr);
    let twice = compiled(once.expr.clone());
    assert_eq!(once.expr, twice.expr);
}

#[rstest]
fn window_below_first_position_is_clipped() {
    let q = compiled(Expr::filter(seq(5), vec![Expr::pos(window(0, 2))]));
    assert_eq!(preds_of(&q.expr), [Expr::pos(window(1, 2))]);
    assert_eq!(q.static_type().size, Some(2));
    assert_eq!(PosRange::window(3, 2), None);
}

#[rstest]
fn context_map_predicate_is_unwrapped() {
    let map = Expr::map(vec![Expr::context(), Expr::child("b")]);
    let q = compiled(Expr::step(Axis::Child, NodeTest::any(), vec![map]));
    assert_eq!(preds_of(&q.expr), [compiled(Expr::child("b")).expr]);
}

#[rstest]
fn root_map_predicate_is_unwrapped() {
    let (n, sc) = node_var(SeqType::one(ItemType::Node(NodeKind::Element)));
    let map = Expr::map(vec![n.clone(), Expr::child("b")]);
    let q = compiled_in(Expr::filter(n, vec![map]), &sc);
    assert_eq!(preds_of(&q.expr), [compiled(Expr::child("b")).expr]);
}

#[rstest]
fn implied_kind_test_predicate_is_removed() {
    let (n, sc) = node_var(SeqType::star(ItemType::Node(NodeKind::Element)));
    let self_element = Expr::step(Axis::SelfAxis, NodeTest::kind(NodeKind::Element), vec![]);
    let q = compiled_in(Expr::filter(n.clone(), vec![self_element]), &sc);
    assert_eq!(q.expr, compiled_in(n, &sc).expr);
    assert!(has_note(&q, "remove predicate"));
}

#[rstest]
fn boolean_filter_with_full_text_predicate_becomes_full_text() {
    let contains = |input| Expr::ft_contains(input, Expr::string("A"));
    let filtered = Expr::filter(Expr::child("a"), vec![contains(Expr::context())]);
    let q = compiled(Expr::call(Function::Boolean, vec![filtered]));
    let direct = compiled(Expr::call(Function::Boolean, vec![contains(Expr::child("a"))]));
    assert_eq!(q.expr, direct.expr);
}

#[rstest]
fn boolean_filter_on_single_node_becomes_map() {
    let (n, sc) = node_var(SeqType::opt(ItemType::Node(NodeKind::Element)));
    let pred = Expr::call(Function::Not, vec![Expr::child("b")]);
    let filtered = Expr::filter(n.clone(), vec![pred.clone()]);
    let q = compiled_in(Expr::call(Function::Boolean, vec![filtered]), &sc);
    let map = compiled_in(Expr::call(Function::Boolean, vec![Expr::map(vec![n, pred])]), &sc);
    assert_eq!(q.expr, map.expr);
    assert!(!matches!(q.expr.kind, ExprKind::Filter { .. }));
}
