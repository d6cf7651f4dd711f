use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use xquery_core::{
    AtomicType, Axis, CmpOp, CompiledQuery, DynamicContextBuilder, Error, ExpandedName, Expr, Function, ItemType,
    NodeKind, NodeTest, Occurrence, SeqType, SimpleNode, StaticContextBuilder, XdmItem, XdmNode, attr, compile, elem,
    evaluate, simple_doc, text,
};

fn item_step(preds: Vec<Expr>) -> Expr {
    Expr::step(Axis::Child, NodeTest::name(Axis::Child, ExpandedName::local("item")), preds)
}

fn attribute(name: &str) -> Expr {
    Expr::step(Axis::Attribute, NodeTest::name(Axis::Attribute, ExpandedName::local(name)), vec![])
}

fn type_is(value: &str) -> Expr {
    Expr::general(CmpOp::Eq, attribute("type"), Expr::string(value))
}

fn position() -> Expr {
    Expr::call(Function::Position, vec![])
}

fn sample_queries() -> Vec<(&'static str, Expr)> {
    vec![
        ("item[1]", item_step(vec![Expr::int(1)])),
        ("item[last()]", item_step(vec![Expr::call(Function::Last, vec![])])),
        ("item[@type='a']", item_step(vec![type_is("a")])),
        (
            "item[position() < 5][@type='a']",
            item_step(vec![Expr::general(CmpOp::Lt, position(), Expr::int(5)), type_is("a")]),
        ),
        ("item[@type='a'][2]", item_step(vec![type_is("a"), Expr::int(2)])),
        ("item[true()][@type='b'][@type='b']", item_step(vec![Expr::boolean(true), type_is("b"), type_is("b")])),
        (
            "item treat as element()*",
            Expr::type_check(item_step(vec![]), SeqType::star(ItemType::Node(NodeKind::Element)), false),
        ),
        (
            "item as xs:double*",
            Expr::type_check(item_step(vec![]), SeqType::atomic(AtomicType::Double, Occurrence::ZeroOrMore), true),
        ),
    ]
}

fn build_sample_document(items: usize) -> SimpleNode {
    let root = (0..items).fold(elem("root"), |root, i| {
        let kind = if i % 3 == 0 { "a" } else { "b" };
        root.child(elem("item").attr(attr("id", &format!("item-{i}"))).attr(attr("type", kind)).child(text(&i.to_string())))
    });
    simple_doc().child(root).build()
}

fn prepared_compiled_queries() -> Result<Vec<(&'static str, CompiledQuery)>, Error> {
    let sc = StaticContextBuilder::new().build();
    sample_queries().into_iter().map(|(name, expr)| compile(expr, &sc).map(|q| (name, q))).collect()
}

fn benchmark_compiler(c: &mut Criterion) {
    let sc = StaticContextBuilder::new().build();
    let queries = sample_queries();
    c.bench_function("compiler/compile", |b| {
        b.iter(|| {
            for (_, expr) in &queries {
                let compiled = compile(black_box(expr.clone()), &sc).expect("compile failure");
                black_box(compiled);
            }
        })
    });
}

fn benchmark_evaluator(c: &mut Criterion) {
    let document = build_sample_document(500);
    let root = document.children().into_iter().next().expect("root element");
    let ctx = DynamicContextBuilder::default().with_context_item(XdmItem::Node(root)).build();
    let compiled = prepared_compiled_queries().expect("compile failure");

    let mut group = c.benchmark_group("evaluator/evaluate");
    for (name, query) in &compiled {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, q| {
            b.iter(|| {
                let result = evaluate::<SimpleNode>(q, black_box(&ctx)).expect("eval failure");
                black_box(result.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_compiler, benchmark_evaluator);
criterion_main!(benches);
