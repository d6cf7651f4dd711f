//! Runtime predicate matching and the filtering strategies built on it.

use super::cursors::{PredicateCursor, ScoredCursor, WindowCursor};
use super::{Focus, Vm};
use crate::compiler::positional::as_range;
use crate::compiler::preds::{Preds, is_positional};
use crate::engine::runtime::Error;
use crate::model::XdmNode;
use crate::xdm::{Cursor, XdmItem, XdmSequenceStream};
use std::rc::Rc;

impl Preds {
    /// Tests `item` against every predicate in order with `item` as the
    /// focus. The first failing predicate ends the match.
    ///
    /// Returns the mean relevance score of all predicates on a match (full-text
    /// tests contribute their score, other predicates zero), `None` otherwise.
    /// The previous focus is restored on every exit path.
    pub fn matches<N: XdmNode>(
        &self,
        vm: &Rc<Vm<N>>,
        item: &XdmItem<N>,
        pos: u64,
        size: Option<u64>,
    ) -> Result<Option<f64>, Error> {
        let focus = Focus { item: Some(item.clone()), pos, size };
        vm.with_focus(focus, || {
            let mut total = 0.0;
            for expr in &self.exprs {
                match vm.test(expr, pos)? {
                    Some(score) => total += score,
                    None => return Ok(None),
                }
            }
            #[allow(clippy::cast_precision_loss)]
            let mean = if self.exprs.is_empty() { 0.0 } else { total / self.exprs.len() as f64 };
            Ok(Some(mean))
        })
    }
}

impl<N: XdmNode> Vm<N> {
    /// Filters `input` by `preds`, picking the cheapest strategy the list allows.
    pub(super) fn apply_preds<'e>(self: &Rc<Self>, input: Cursor<'e, N>, preds: &'e Preds) -> Result<Cursor<'e, N>, Error> {
        if preds.is_empty() {
            return Ok(input);
        }
        if !preds.positional() {
            return Ok(Box::new(PredicateCursor::new(self.clone(), preds, input)));
        }
        if let Some((first, rest)) = preds.exprs.split_first()
            && let Some(range) = as_range(first)
            && !rest.iter().any(is_positional)
        {
            return Ok(Box::new(WindowCursor::new(self.clone(), preds, range, input)));
        }
        self.filter_positional(input, preds)
    }

    /// Materializes the input and applies one predicate after the other,
    /// renumbering positions for each with the context size known.
    fn filter_positional<'e>(self: &Rc<Self>, input: Cursor<'e, N>, preds: &'e Preds) -> Result<Cursor<'e, N>, Error> {
        let mut items: Vec<(XdmItem<N>, f64)> =
            XdmSequenceStream::new(input).materialize()?.into_iter().map(|i| (i, 0.0)).collect();
        for expr in &preds.exprs {
            let size = items.len() as u64;
            let mut kept = Vec::with_capacity(items.len());
            for (pos, (item, total)) in (1u64..).zip(items) {
                let focus = Focus { item: Some(item.clone()), pos, size: Some(size) };
                if let Some(score) = self.with_focus(focus, || self.test(expr, pos))? {
                    kept.push((item, total + score));
                }
            }
            items = kept;
            if items.is_empty() {
                break;
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let n = preds.len() as f64;
        let scoring = self.scoring();
        let scored = items.into_iter().map(|(item, total)| (item, scoring.then_some(total / n))).collect();
        Ok(Box::new(ScoredCursor::new(scored)))
    }
}
