use crate::compiler::ir::Expr;
use crate::consts::{MAX_INFO_LINE, MAX_INFO_TOTAL};
use crate::engine::runtime::{Error, StaticContext, Var};
use crate::types::ItemType;
use crate::xdm::ExpandedName;

/// Collected compile notes, capped in total and per line.
#[derive(Debug, Clone, Default)]
pub struct QueryInfo {
    enabled: bool,
    notes: Vec<String>,
    total: usize,
    truncated: bool,
}

impl QueryInfo {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, ..Self::default() }
    }

    pub fn add(&mut self, note: String) {
        if !self.enabled || self.truncated {
            return;
        }
        let mut note = note;
        if note.len() > MAX_INFO_LINE {
            let mut end = MAX_INFO_LINE;
            while !note.is_char_boundary(end) {
                end -= 1;
            }
            note.truncate(end);
            note.push_str("...");
        }
        if self.total + note.len() > MAX_INFO_TOTAL {
            self.notes.push("...".to_string());
            self.truncated = true;
            return;
        }
        self.total += note.len();
        self.notes.push(note);
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn into_notes(self) -> Vec<String> {
        self.notes
    }
}

/// State threaded through compilation: the static focus stack, variables in
/// scope and the note sink.
pub struct CompileContext<'s> {
    sc: &'s StaticContext,
    focus: Vec<Option<ItemType>>,
    scope: Vec<Var>,
    info: QueryInfo,
}

impl<'s> CompileContext<'s> {
    pub fn new(sc: &'s StaticContext) -> Self {
        Self { sc, focus: Vec::new(), scope: Vec::new(), info: QueryInfo::new(sc.query_info) }
    }

    pub fn optimizing(&self) -> bool {
        self.sc.optimize
    }

    /// Static type of the current context item, `None` if there is none.
    pub fn focus(&self) -> Option<&ItemType> {
        match self.focus.last() {
            Some(top) => top.as_ref(),
            None => self.sc.context_item_type.as_ref(),
        }
    }

    /// Runs `f` with a new focus; the frame is removed on every exit path.
    pub fn with_focus<T>(&mut self, item: Option<ItemType>, f: impl FnOnce(&mut Self) -> T) -> T {
        self.focus.push(item);
        let out = f(self);
        self.focus.pop();
        out
    }

    /// Runs `f` with additional variables in scope.
    pub fn with_scope<T>(&mut self, vars: &[Var], f: impl FnOnce(&mut Self) -> T) -> T {
        let depth = self.scope.len();
        self.scope.extend(vars.iter().cloned());
        let out = f(self);
        self.scope.truncate(depth);
        out
    }

    pub fn lookup(&self, name: &ExpandedName) -> Option<&Var> {
        self.scope.iter().rev().find(|v| &v.name == name).or_else(|| self.sc.variables.get(name))
    }

    pub fn info(&mut self, note: impl AsRef<str>) {
        let note = note.as_ref();
        tracing::debug!(target: "xquery_core::compile", "{note}");
        self.info.add(note.to_string());
    }

    /// Logs a rewrite and returns the replacement.
    pub fn replace_with(&mut self, old: &Expr, new: Expr) -> Expr {
        if *old != new {
            self.info(format!("rewrite {old} to {new}"));
        }
        let span = new.span.or(old.span);
        new.with_span(span)
    }

    /// Replaces `expr` with a node that raises `err` when evaluated.
    pub fn error(&mut self, err: Error, expr: &Expr) -> Expr {
        let err = err.with_span(expr.span);
        self.info(format!("defer {} in {expr}", err.format_code()));
        Expr::error(err, expr.ty.clone(), expr.span)
    }

    pub fn notes(&self) -> &[String] {
        self.info.notes()
    }

    pub(crate) fn into_notes(self) -> Vec<String> {
        self.info.into_notes()
    }
}
