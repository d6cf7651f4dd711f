use super::{Focus, Vm};
use crate::compiler::ir::{Expr, Span};
use crate::compiler::positional::PosRange;
use crate::compiler::preds::Preds;
use crate::engine::evaluator::promotion::{item_matches, promote_item};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::SeqType;
use crate::xdm::{Cursor, SequenceCursor, XdmItem, XdmItemResult};
use smallvec::SmallVec;
use std::rc::Rc;

/// Materialized items with the score attached by a filter.
pub(super) struct ScoredCursor<N> {
    items: std::vec::IntoIter<(XdmItem<N>, Option<f64>)>,
    score: Option<f64>,
}

impl<N> ScoredCursor<N> {
    pub(super) fn new(items: Vec<(XdmItem<N>, Option<f64>)>) -> Self {
        Self { items: items.into_iter(), score: None }
    }
}

impl<N> SequenceCursor<N> for ScoredCursor<N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        let (item, score) = self.items.next()?;
        self.score = score;
        Some(Ok(item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.items.len();
        (len, Some(len))
    }

    fn score(&self) -> Option<f64> {
        self.score
    }
}

/// Streams the items of `input` that pass a non-positional predicate list.
pub(super) struct PredicateCursor<'e, N: XdmNode> {
    vm: Rc<Vm<N>>,
    preds: &'e Preds,
    input: Cursor<'e, N>,
    position: u64,
    score: Option<f64>,
}

impl<'e, N: XdmNode> PredicateCursor<'e, N> {
    pub(super) fn new(vm: Rc<Vm<N>>, preds: &'e Preds, input: Cursor<'e, N>) -> Self {
        Self { vm, preds, input, position: 0, score: None }
    }
}

impl<N: XdmNode> SequenceCursor<N> for PredicateCursor<'_, N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        loop {
            let item = match self.input.next_item()? {
                Ok(item) => item,
                Err(err) => return Some(Err(err)),
            };
            self.position += 1;
            match self.preds.matches(&self.vm, &item, self.position, None) {
                Ok(Some(score)) => {
                    self.score = self.vm.scoring().then_some(score);
                    return Some(Ok(item));
                }
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.input.size_hint().1)
    }

    fn score(&self) -> Option<f64> {
        self.score
    }
}

/// `E[min to max][p]...` with non-positional followers: skips items before
/// the window and stops pulling once the window is passed.
pub(super) struct WindowCursor<'e, N: XdmNode> {
    vm: Rc<Vm<N>>,
    preds: &'e Preds,
    range: PosRange,
    input: Cursor<'e, N>,
    position: u64,
    score: Option<f64>,
}

impl<'e, N: XdmNode> WindowCursor<'e, N> {
    pub(super) fn new(vm: Rc<Vm<N>>, preds: &'e Preds, range: PosRange, input: Cursor<'e, N>) -> Self {
        Self { vm, preds, range, input, position: 0, score: None }
    }
}

impl<N: XdmNode> SequenceCursor<N> for WindowCursor<'_, N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        while self.position < self.range.max() {
            let item = match self.input.next_item()? {
                Ok(item) => item,
                Err(err) => return Some(Err(err)),
            };
            self.position += 1;
            if self.position < self.range.min() {
                continue;
            }
            match self.preds.matches(&self.vm, &item, self.position, None) {
                Ok(Some(score)) => {
                    self.score = self.vm.scoring().then_some(score);
                    return Some(Ok(item));
                }
                Ok(None) => {}
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let width = usize::try_from(self.range.width()).ok();
        match (self.input.size_hint().1, width) {
            (Some(a), Some(b)) => (0, Some(a.min(b))),
            (a, b) => (0, a.or(b)),
        }
    }

    fn score(&self) -> Option<f64> {
        self.score
    }
}

/// Evaluates `op` once per input item with that item as focus and
/// concatenates the results (`a ! op`, `a / op`).
pub(super) struct MapCursor<'e, N: XdmNode> {
    vm: Rc<Vm<N>>,
    op: &'e Expr,
    input: Cursor<'e, N>,
    current: Option<Cursor<'e, N>>,
    position: u64,
    size: Option<u64>,
    /// Path steps require node input.
    nodes_only: bool,
}

impl<'e, N: XdmNode> MapCursor<'e, N> {
    pub(super) fn new(vm: Rc<Vm<N>>, op: &'e Expr, input: Cursor<'e, N>, size: Option<u64>, nodes_only: bool) -> Self {
        Self { vm, op, input, current: None, position: 0, size, nodes_only }
    }

    fn open(&mut self, item: XdmItem<N>) -> Result<Cursor<'e, N>, Error> {
        if self.nodes_only && !matches!(item, XdmItem::Node(_)) {
            return Err(Error::from_code(ErrorCode::XPTY0004, format!("path step applied to non-node {item}"))
                .with_span(self.op.span));
        }
        self.position += 1;
        let focus = Focus { item: Some(item), pos: self.position, size: self.size };
        let (vm, op) = (&self.vm, self.op);
        vm.with_focus(focus, || vm.iter(op))
    }
}

impl<N: XdmNode> SequenceCursor<N> for MapCursor<'_, N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        loop {
            if let Some(current) = &mut self.current {
                if let Some(item) = current.next_item() {
                    return Some(item);
                }
                self.current = None;
            }
            let item = match self.input.next_item()? {
                Ok(item) => item,
                Err(err) => return Some(Err(err)),
            };
            match self.open(item) {
                Ok(cursor) => self.current = Some(cursor),
                Err(err) => return Some(Err(err)),
            }
        }
    }

    fn score(&self) -> Option<f64> {
        self.current.as_ref().and_then(|c| c.score())
    }
}

/// Lazy sequence type check: items are checked (and promoted) as they are
/// pulled; cardinality violations are reported as soon as they are visible.
pub struct TypeCheckCursor<'a, N> {
    input: Cursor<'a, N>,
    target: &'a SeqType,
    promote: bool,
    span: Option<Span>,
    pending: SmallVec<[XdmItem<N>; 1]>,
    yielded: u64,
    done: bool,
}

impl<'a, N: XdmNode> TypeCheckCursor<'a, N> {
    pub fn new(input: Cursor<'a, N>, target: &'a SeqType, promote: bool, span: Option<Span>) -> Self {
        Self { input, target, promote, span, pending: SmallVec::new(), yielded: 0, done: false }
    }

    fn fail(&mut self, found: impl core::fmt::Display) -> Option<XdmItemResult<N>> {
        self.done = true;
        Some(Err(Error::dynamic_type(found, self.target, self.span)))
    }

    /// Next checked item, or `None` at the end of the input.
    fn next_checked(&mut self) -> Option<XdmItemResult<N>> {
        if !self.pending.is_empty() {
            return Some(Ok(self.pending.remove(0)));
        }
        loop {
            let item = match self.input.next_item()? {
                Ok(item) => item,
                Err(err) => return Some(Err(err)),
            };
            if item_matches(&item, &self.target.item) {
                return Some(Ok(item));
            }
            if !self.promote {
                let found = item.to_string();
                return Some(Err(Error::dynamic_type(found, self.target, self.span)));
            }
            let found = item.to_string();
            match promote_item(item, &self.target.item) {
                Ok(Some(promoted)) => self.pending = promoted,
                Ok(None) => return Some(Err(Error::dynamic_type(found, self.target, self.span))),
                Err(err) => return Some(Err(err.with_span(self.span))),
            }
            if !self.pending.is_empty() {
                return Some(Ok(self.pending.remove(0)));
            }
        }
    }
}

impl<N: XdmNode> SequenceCursor<N> for TypeCheckCursor<'_, N> {
    fn next_item(&mut self) -> Option<XdmItemResult<N>> {
        if self.done {
            return None;
        }
        match self.next_checked() {
            None => {
                self.done = true;
                let min = self.target.occ.min();
                if self.yielded < min {
                    return self.fail(format!("{} item(s)", self.yielded));
                }
                None
            }
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err))
            }
            Some(Ok(item)) => {
                if self.target.occ.max().is_some_and(|max| self.yielded >= max) {
                    return self.fail(format!("more than {} item(s)", self.yielded));
                }
                self.yielded += 1;
                Some(Ok(item))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (_, upper) = self.input.size_hint();
        let max = self.target.occ.max().and_then(|m| usize::try_from(m).ok());
        match (upper, max) {
            (Some(a), Some(b)) => (0, Some(a.min(b))),
            (a, b) => (0, a.or(b)),
        }
    }

    fn score(&self) -> Option<f64> {
        self.input.score()
    }
}
