//! Predicate lists attached to filters and axis steps.
//!
//! The list is compiled against the focus of the host's items, rewritten into
//! cheaper canonical forms and used to derive the static type and size of
//! `host[p1][p2]...`. Runtime matching lives in the evaluator.

use crate::compiler::Simplify;
use crate::compiler::context::CompileContext;
use crate::compiler::ir::{Axis, CmpKind, Expr, ExprKind, Flag, Function, NodeTest, Span, Step};
use crate::compiler::positional::{PosRange, PosTest, as_range, is_last_test, recognize_comparison};
use crate::engine::runtime::Error;
use crate::model::NodeKind;
use crate::types::{ExprType, ItemType, Occurrence};
use core::fmt;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Preds {
    pub exprs: Vec<Expr>,
}

/// Expression owning a predicate list.
pub enum Host<'a> {
    /// `root[...]`
    Filter { root: &'a Expr },
    /// `axis::test[...]`; the node test may be narrowed by rewrites.
    Step { axis: Axis, test: &'a mut NodeTest },
}

impl Host<'_> {
    /// Static type of the items the predicates filter.
    pub fn input_type(&self) -> ExprType {
        match self {
            Host::Filter { root } => root.ty.clone(),
            Host::Step { axis, test } => step_input_type(*axis, test),
        }
    }

    fn root_equals(&self, expr: &Expr) -> bool {
        matches!(self, Host::Filter { root } if *root == expr)
    }
}

/// Type of the nodes an axis step selects before filtering.
pub fn step_input_type(axis: Axis, test: &NodeTest) -> ExprType {
    let item = match (axis, test.kind) {
        (Axis::Attribute, None) => ItemType::Node(NodeKind::Attribute),
        _ => test.item_type(),
    };
    let occ = if axis.is_singleton() { Occurrence::ZeroOrOne } else { Occurrence::ZeroOrMore };
    ExprType::new(item, occ)
}

/// Whether the truth of a predicate can depend on the context position.
pub fn is_positional(expr: &Expr) -> bool {
    expr.ty.may_be_number() || expr.has(Flag::Pos)
}

impl Preds {
    pub fn new(exprs: Vec<Expr>) -> Self {
        Self { exprs }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    /// Whether at least one predicate is positional.
    pub fn positional(&self) -> bool {
        self.exprs.iter().any(is_positional)
    }

    /// Compiles each predicate against the focus of the host's items, then
    /// optimizes the list. A predicate that fails to compile is replaced by a
    /// node raising the error, so its siblings still compile.
    ///
    /// Returns the type of `host[preds]`, or `None` if it can never yield items.
    pub fn compile(&mut self, cc: &mut CompileContext<'_>, host: &mut Host<'_>) -> Result<Option<ExprType>, Error> {
        if !self.exprs.is_empty() {
            let focus = host.input_type().item;
            let exprs = std::mem::take(&mut self.exprs);
            self.exprs = cc.with_focus(Some(focus), |cc| {
                exprs
                    .into_iter()
                    .map(|expr| {
                        let orig = expr.clone();
                        expr.compile(cc).unwrap_or_else(|err| cc.error(err, &orig))
                    })
                    .collect()
            });
        }
        self.optimize(cc, host)
    }

    /// Rewrites the predicates and derives the resulting type; `None` if the
    /// host can never yield items.
    pub fn optimize(&mut self, cc: &mut CompileContext<'_>, host: &mut Host<'_>) -> Result<Option<ExprType>, Error> {
        if cc.optimizing() && !self.exprs.is_empty() {
            let focus = host.input_type().item;
            let may_match = cc.with_focus(Some(focus), |cc| self.rewrite(cc, host))?;
            if !may_match {
                return Ok(None);
            }
        }
        Ok(self.expr_type(&host.input_type()))
    }

    fn rewrite(&mut self, cc: &mut CompileContext<'_>, host: &mut Host<'_>) -> Result<bool, Error> {
        self.simplify(cc, host)?;

        let exprs = std::mem::take(&mut self.exprs);
        let mut list = Vec::with_capacity(exprs.len());
        let mut pos = false;
        for ex in exprs {
            let mut expr = ex.simplify_for(Simplify::Predicate, cc)?;
            let split = matches!(expr.kind, ExprKind::And(_)) && !expr.has(Flag::Pos);
            if split {
                cc.info(format!("split {expr} into predicates"));
            }
            if split && let ExprKind::And(ops) = expr.kind {
                let span = expr.span;
                let count = ops.len();
                let mut last = Expr::boolean(true).with_span(span);
                for (i, op) in ops.into_iter().enumerate() {
                    let op = if op.ty.may_be_number() {
                        Expr::call(Function::Boolean, vec![op]).with_span(span).optimize(cc)?
                    } else {
                        op
                    };
                    if i + 1 < count {
                        pos = Self::add_unique(op, &mut list, pos, cc);
                    } else {
                        last = op;
                    }
                }
                expr = last;
            } else if let Some(n) = expr.as_number() {
                let span = expr.span;
                expr = match PosRange::at(n) {
                    PosTest::Range(range) => Expr::pos(range),
                    PosTest::Never => Expr::boolean(false),
                }
                .with_span(span);
            } else if expr.is_value() {
                let span = expr.span;
                expr = Expr::boolean(expr.literal_ebv()?).with_span(span);
            }

            // <a/>/self::node()[1] -> [true()], $n/..[2] -> [false()]
            if let Host::Step { axis, .. } = host
                && axis.is_singleton()
                && let Some(range) = as_range(&expr)
            {
                expr = Expr::boolean(range.contains(1)).with_span(expr.span);
            }

            if expr.is_bool(false) {
                cc.info(format!("predicate [{expr}] never matches"));
                return Ok(false);
            }
            pos = Self::add_unique(expr, &mut list, pos, cc);
        }
        self.exprs = list;
        Ok(self.merge_ebv(cc))
    }

    /// Appends a predicate unless it is `true()` or a duplicate that no
    /// positional predicate separates from its twin. Returns the updated
    /// positional flag.
    fn add_unique(expr: Expr, list: &mut Vec<Expr>, pos: bool, cc: &mut CompileContext<'_>) -> bool {
        let pos = pos || is_positional(&expr);
        if expr.is_bool(true) {
            cc.info(format!("remove predicate [{expr}]"));
        } else if pos || expr.has(Flag::Ndt) || !list.contains(&expr) {
            list.push(expr);
        } else {
            cc.info(format!("remove duplicate predicate [{expr}]"));
        }
        pos
    }

    /// Fuses adjacent positional windows. Returns `false` if a fused window is empty.
    fn merge_ebv(&mut self, cc: &mut CompileContext<'_>) -> bool {
        let exprs = std::mem::take(&mut self.exprs);
        let mut out: Vec<Expr> = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let fused = match (out.last().and_then(as_range), as_range(&expr)) {
                (Some(prev), Some(next)) => prev.fuse(next),
                _ => {
                    out.push(expr);
                    continue;
                }
            };
            match fused {
                PosTest::Range(range) => {
                    cc.info(format!("merge predicates to [{range}]"));
                    if let Some(last) = out.last_mut() {
                        *last = Expr::pos(range).with_span(last.span);
                    }
                }
                PosTest::Never => {
                    cc.info("merged positional predicates never match");
                    return false;
                }
            }
        }
        self.exprs = out;
        true
    }

    fn simplify(&mut self, cc: &mut CompileContext<'_>, host: &mut Host<'_>) -> Result<(), Error> {
        let root_ty = host.input_type();
        let positional = self.positional();
        let exprs = std::mem::take(&mut self.exprs);
        let mut list = Vec::with_capacity(exprs.len());
        for expr in exprs {
            // E[.] -> E
            if expr.kind == ExprKind::ContextItem && root_ty.is_node() {
                cc.info(format!("remove predicate [{expr}]"));
                continue;
            }
            let mut ex = expr.clone();

            if matches!(ex.kind, ExprKind::Comparison { .. }) {
                ex = opt_pred(ex, cc);
            }

            // E[. ! X] -> E[X], E[E ! X] -> E[X]
            let unwrap_map = matches!(&ex.kind, ExprKind::Map(ops)
                if ops.len() >= 2
                    && (ops[0].kind == ExprKind::ContextItem
                        || (host.root_equals(&ops[0]) && ops[0].is_simple() && root_ty.one()))
                    && !ops[1].has(Flag::Pos));
            if unwrap_map && let ExprKind::Map(mut ops) = ex.kind {
                let span = ex.span;
                ops.remove(0);
                ex = if ops.len() == 1 { ops.remove(0) } else { Expr::map(ops).with_span(span).optimize(cc)? };
            }

            if let Some(step) = self_step(&ex)
                && !step.preds.positional()
            {
                // child::node()[self::a] -> child::a
                if let Host::Step { test, .. } = host
                    && !positional
                    && let Some(merged) = test.intersect(&step.test)
                {
                    cc.info(format!("merge [{ex}] into step test"));
                    **test = merged;
                    list.extend(step.preds.exprs.iter().cloned());
                    continue;
                }
                // <a/>[self::element()] -> <a/>
                if step.test.is_kind_test()
                    && step.preds.is_empty()
                    && root_ty.item.instance_of(&step.test.item_type())
                {
                    cc.info(format!("remove predicate [{ex}]"));
                    continue;
                }
            }

            // E[./X] -> E[X], E[E/X] -> E[X]
            if let ExprKind::Path { root: Some(first), steps } = &ex.kind
                && root_ty.is_node()
                && (first.kind == ExprKind::ContextItem
                    || (host.root_equals(first) && first.is_simple() && root_ty.one()))
                && steps.iter().all(|s| matches!(s.kind, ExprKind::Step(_)) || !s.has(Flag::Pos))
            {
                let span = ex.span;
                let steps = steps.clone();
                ex = relative(steps, span, cc)?;
            }

            // 1[. = 1] -> 1[1 = 1]
            if let Host::Filter { root } = host
                && matches!(&root.kind, ExprKind::Literal(v) if v.len() == 1)
                && let Some(inlined) = ex.inline_context(root)
            {
                ex = inlined.compile(cc)?;
            }

            list.push(cc.replace_with(&expr, ex));
        }
        self.exprs = list;
        Ok(())
    }

    /// Rewrites `root[preds]` in a boolean context when root yields nodes and
    /// no predicate is positional. Only the last predicate is rewritten; the
    /// others stay as a filter on root. `None` if no rule applies.
    pub fn simplify_ebv(&self, root: &Expr, cc: &mut CompileContext<'_>) -> Result<Option<Expr>, Error> {
        if !root.ty.is_node() || self.exprs.is_empty() || self.positional() {
            return Ok(None);
        }
        let pred = &self.exprs[self.exprs.len() - 1];

        // a[. = 'x'] -> a = 'x', a[text() = 'x'] -> a/text() = 'x'
        if let ExprKind::Comparison { kind: CmpKind::General, op, lhs, rhs } = &pred.kind
            && !rhs.has(Flag::Ctx)
            && let Some(lhs) = self.extend_root(root, lhs, cc)?
        {
            let cmp = Expr::general(*op, lhs, (**rhs).clone()).with_span(pred.span);
            return cmp.optimize(cc).map(Some);
        }

        // a[. contains text 'x'] -> a contains text 'x'
        if let ExprKind::FtContains { input, query } = &pred.kind
            && !query.has(Flag::Ctx)
            && let Some(input) = self.extend_root(root, input, cc)?
        {
            let ft = Expr::ft_contains(input, (**query).clone()).with_span(pred.span);
            return ft.optimize(cc).map(Some);
        }

        // root[path] -> root/path
        if let Some(path) = self.extend_root(root, pred, cc)? {
            return Ok(Some(path));
        }

        // $node[string()] -> $node ! string()
        if root.ty.zero_or_one() {
            let head = self.remaining_root(root, cc)?;
            let map = Expr::map(vec![head, pred.clone()]).with_span(pred.span);
            return map.optimize(cc).map(Some);
        }
        Ok(None)
    }

    /// Root filtered by all predicates but the last.
    fn remaining_root(&self, root: &Expr, cc: &mut CompileContext<'_>) -> Result<Expr, Error> {
        let n = self.exprs.len();
        if n == 1 {
            return Ok(root.clone());
        }
        Expr::filter(root.clone(), self.exprs[..n - 1].to_vec()).with_span(root.span).optimize(cc)
    }

    /// `.` -> root, relative path -> root/path; `None` for other shapes.
    fn extend_root(&self, root: &Expr, expr: &Expr, cc: &mut CompileContext<'_>) -> Result<Option<Expr>, Error> {
        let steps = match &expr.kind {
            ExprKind::ContextItem => return self.remaining_root(root, cc).map(Some),
            ExprKind::Step(_) => vec![expr.clone()],
            ExprKind::Path { root: None, steps } => steps.clone(),
            ExprKind::Path { root: Some(first), steps } if first.kind == ExprKind::ContextItem => steps.clone(),
            _ => return Ok(None),
        };
        let head = self.remaining_root(root, cc)?;
        Expr::path(Some(head), steps).with_span(expr.span).optimize(cc).map(Some)
    }

    /// Static type and size of `input[preds]`; `None` if no item can pass.
    pub fn expr_type(&self, input: &ExprType) -> Option<ExprType> {
        let mut max = input.size;
        let mut exact = input.size.is_some();
        for expr in &self.exprs {
            if expr.is_function(Function::Last) {
                max = Some(max.map_or(1, |m| m.min(1)));
            } else if let Some(range) = as_range(expr) {
                // [2 to 3] on 5 items: skip 1, keep at most 2
                if let Some(m) = max {
                    max = Some(m.saturating_sub(range.min().saturating_sub(1)));
                }
                if !range.is_unbounded() {
                    max = Some(max.map_or(range.width(), |m| m.min(range.width())));
                }
            } else {
                exact = false;
            }
        }

        let size = if exact || max == Some(0) { max } else { None };
        let occ = if max.is_some_and(|m| m <= 1) {
            Occurrence::ZeroOrOne
        } else {
            input.occ.union(Occurrence::Zero)
        };
        let mut ty = input.clone();
        ty.assign(input.item.clone(), occ, size);
        if max == Some(0) { None } else { Some(ty) }
    }
}

/// Single `self::` step used as a predicate.
fn self_step(expr: &Expr) -> Option<&Step> {
    let step = match &expr.kind {
        ExprKind::Step(step) => step,
        ExprKind::Path { root: None, steps } if steps.len() == 1 => match &steps[0].kind {
            ExprKind::Step(step) => step,
            _ => return None,
        },
        _ => return None,
    };
    (step.axis == Axis::SelfAxis).then_some(step)
}

/// Steps evaluated relative to the context item.
fn relative(mut steps: Vec<Expr>, span: Option<Span>, cc: &mut CompileContext<'_>) -> Result<Expr, Error> {
    if steps.len() == 1 && matches!(steps[0].kind, ExprKind::Step(_)) {
        return Ok(steps.remove(0));
    }
    Expr::path(None, steps).with_span(span).optimize(cc)
}

/// Predicate forms of comparisons: `position() op N` becomes a window,
/// `position() = last()` becomes `last()`.
pub fn opt_pred(expr: Expr, cc: &mut CompileContext<'_>) -> Expr {
    let ExprKind::Comparison { op, lhs, rhs, .. } = &expr.kind else {
        return expr;
    };
    let replacement = if let Some(test) = recognize_comparison(*op, lhs, rhs) {
        match test {
            PosTest::Range(range) => Expr::pos(range),
            PosTest::Never => Expr::boolean(false),
        }
    } else if is_last_test(*op, lhs, rhs) {
        Expr::call(Function::Last, Vec::new())
    } else {
        return expr;
    };
    cc.replace_with(&expr, replacement)
}

impl fmt::Display for Preds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for expr in &self.exprs {
            write!(f, "[{expr}]")?;
        }
        Ok(())
    }
}
