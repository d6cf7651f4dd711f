//! Positional predicates: inclusive windows `[min, max]` over the 1-based
//! context position.

use crate::compiler::ir::{CmpOp, Expr, ExprKind, Function};
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PosRange {
    min: u64,
    /// `UNBOUNDED` means no upper limit.
    max: u64,
}

/// Result of recognizing a positional test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosTest {
    Range(PosRange),
    /// No position can satisfy the test.
    Never,
}

impl PosRange {
    pub const UNBOUNDED: u64 = u64::MAX;

    /// Builds a window; positions below 1 are clipped.
    pub fn new(min: u64, max: u64) -> PosTest {
        Self::window(min, max).map_or(PosTest::Never, PosTest::Range)
    }

    /// Like [`PosRange::new`]; `None` for a window no position can fall in.
    pub fn window(min: u64, max: u64) -> Option<PosRange> {
        let min = min.max(1);
        (max >= min).then_some(PosRange { min, max })
    }

    pub fn min(self) -> u64 {
        self.min
    }

    pub fn max(self) -> u64 {
        self.max
    }

    /// `[n]` for a numeric predicate value; non-integral or non-positive values never match.
    pub fn at(n: f64) -> PosTest {
        if n.fract() != 0.0 || n < 1.0 || n.is_nan() {
            return PosTest::Never;
        }
        let n = if n >= u64::MAX as f64 { u64::MAX - 1 } else { n as u64 };
        PosTest::Range(PosRange { min: n, max: n })
    }

    /// `position() op n`; `None` for operators that do not describe a window.
    pub fn compare(op: CmpOp, n: f64) -> Option<PosTest> {
        if n.is_nan() {
            return Some(PosTest::Never);
        }
        let ceil = |v: f64| if v <= 0.0 { 0 } else if v >= u64::MAX as f64 { u64::MAX - 1 } else { v.ceil() as u64 };
        let floor = |v: f64| if v <= 0.0 { 0 } else if v >= u64::MAX as f64 { u64::MAX - 1 } else { v.floor() as u64 };
        Some(match op {
            CmpOp::Eq => PosRange::at(n),
            CmpOp::Ne => return None,
            CmpOp::Lt => {
                let c = ceil(n);
                if c == 0 { PosTest::Never } else { PosRange::new(1, c - 1) }
            }
            CmpOp::Le => PosRange::new(1, floor(n)),
            CmpOp::Gt => PosRange::new(floor(n).saturating_add(1), Self::UNBOUNDED),
            CmpOp::Ge => PosRange::new(ceil(n), Self::UNBOUNDED),
        })
    }

    pub fn contains(self, pos: u64) -> bool {
        pos >= self.min && pos <= self.max
    }

    /// Number of positions in the window (saturating for unbounded windows).
    pub fn width(self) -> u64 {
        if self.max == Self::UNBOUNDED { Self::UNBOUNDED } else { self.max - self.min + 1 }
    }

    pub fn is_unbounded(self) -> bool {
        self.max == Self::UNBOUNDED
    }

    /// Combines `E[self][next]` into a single window: the second window is
    /// relative to the items kept by the first one.
    pub fn fuse(self, next: PosRange) -> PosTest {
        let min = self.min.saturating_add(next.min.saturating_sub(1));
        let shifted = if next.is_unbounded() {
            Self::UNBOUNDED
        } else {
            self.min.saturating_add(next.max.saturating_sub(1))
        };
        PosRange::new(min, self.max.min(shifted))
    }
}

impl fmt::Display for PosRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "position() = {}", self.min)
        } else if self.is_unbounded() {
            write!(f, "position() >= {}", self.min)
        } else {
            write!(f, "position() = {} to {}", self.min, self.max)
        }
    }
}

/// Recognizes `position() op N` (in either operand order) as a window.
pub fn recognize_comparison(op: CmpOp, lhs: &Expr, rhs: &Expr) -> Option<PosTest> {
    let (op, n) = if lhs.is_function(Function::Position) {
        (op, rhs.as_number()?)
    } else if rhs.is_function(Function::Position) {
        (op.swap(), lhs.as_number()?)
    } else {
        return None;
    };
    PosRange::compare(op, n)
}

/// Whether a predicate is `position() = last()`.
pub fn is_last_test(op: CmpOp, lhs: &Expr, rhs: &Expr) -> bool {
    op == CmpOp::Eq
        && ((lhs.is_function(Function::Position) && rhs.is_function(Function::Last))
            || (lhs.is_function(Function::Last) && rhs.is_function(Function::Position)))
}

/// Window of an already recognized predicate.
pub fn as_range(expr: &Expr) -> Option<PosRange> {
    match expr.kind {
        ExprKind::PosRange(range) => Some(range),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: u64, max: u64) -> PosRange {
        PosRange { min, max }
    }

    #[test]
    fn numeric_positions() {
        assert_eq!(PosRange::at(3.0), PosTest::Range(range(3, 3)));
        assert_eq!(PosRange::at(2.5), PosTest::Never);
        assert_eq!(PosRange::at(0.0), PosTest::Never);
        assert_eq!(PosRange::at(-1.0), PosTest::Never);
    }

    #[test]
    fn comparison_windows() {
        assert_eq!(PosRange::compare(CmpOp::Lt, 3.0), Some(PosTest::Range(range(1, 2))));
        assert_eq!(PosRange::compare(CmpOp::Le, 2.5), Some(PosTest::Range(range(1, 2))));
        assert_eq!(PosRange::compare(CmpOp::Gt, 2.5), Some(PosTest::Range(range(3, PosRange::UNBOUNDED))));
        assert_eq!(PosRange::compare(CmpOp::Ge, 2.5), Some(PosTest::Range(range(3, PosRange::UNBOUNDED))));
        assert_eq!(PosRange::compare(CmpOp::Lt, 1.0), Some(PosTest::Never));
        assert_eq!(PosRange::compare(CmpOp::Ne, 1.0), None);
    }

    #[test]
    fn fusion_is_relative_to_first_window() {
        // [2 to 5][2] selects the third item
        assert_eq!(range(2, 5).fuse(range(2, 2)), PosTest::Range(range(3, 3)));
        // [2 to 3][3] selects nothing
        assert_eq!(range(2, 3).fuse(range(3, 3)), PosTest::Never);
        // [3 to unbounded][1 to 2]
        assert_eq!(range(3, PosRange::UNBOUNDED).fuse(range(1, 2)), PosTest::Range(range(3, 4)));
        assert_eq!(range(1, PosRange::UNBOUNDED).fuse(range(2, PosRange::UNBOUNDED)),
            PosTest::Range(range(2, PosRange::UNBOUNDED)));
    }

    #[test]
    fn windows_start_at_one() {
        assert_eq!(PosRange::window(0, 2), Some(range(1, 2)));
        assert_eq!(PosRange::window(0, 0), None);
        assert_eq!(PosRange::window(4, 3), None);
        assert_eq!(range(1, 3).width(), 3);
    }
}
