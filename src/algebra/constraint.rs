//! Constraints and iterator ranges over symbolic expressions.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::expr::Expr;

/// Relational operators for constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl RelOp {
    /// Source text of the operator. Equality renders as a single `=`,
    /// matching the set notation consumed downstream.
    pub fn text(&self) -> &'static str {
        match self {
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Eq => "=",
            RelOp::Ne => "!=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
        }
    }

    /// C source text (`==` for equality).
    pub fn c_text(&self) -> &'static str {
        match self {
            RelOp::Eq => "==",
            other => other.text(),
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// A single relational constraint, e.g. `i < N` or `j = col(n)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constr {
    pub lhs: Expr,
    pub op: RelOp,
    pub rhs: Expr,
    /// Existentially quantified (introduced by `tile`, not part of the
    /// visible tuple).
    pub exists: bool,
}

impl Constr {
    pub fn new(lhs: Expr, op: RelOp, rhs: Expr) -> Self {
        Self { lhs, op, rhs, exists: false }
    }

    /// Mark this constraint as existentially quantified.
    pub fn existential(mut self) -> Self {
        self.exists = true;
        self
    }

    /// If this is an equality that defines the given iterator in terms of
    /// other expressions (`j = col(n)` or `col(n) = j`), return the defining
    /// side.
    pub fn defines(&self, iter: &str) -> Option<&Expr> {
        if self.op != RelOp::Eq {
            return None;
        }
        match (&self.lhs, &self.rhs) {
            (Expr::Iter(n), rhs) if n == iter && !rhs.contains_iter(iter) => Some(rhs),
            (lhs, Expr::Iter(n)) if n == iter && !lhs.contains_iter(iter) => Some(lhs),
            _ => None,
        }
    }

    /// Iterator names referenced, in first-occurrence order.
    pub fn iters(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.lhs.collect_iters(&mut out);
        self.rhs.collect_iters(&mut out);
        out
    }
}

impl fmt::Display for Constr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists {
            write!(f, "exists({} {} {})", self.lhs, self.op, self.rhs)
        } else {
            write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
        }
    }
}

/// A bounded iterator range, e.g. `0 <= n < NNZ`.
///
/// A range expands to three constraints: the lower bound, the upper bound,
/// and the transitive closure relating the two bound expressions directly
/// (`crp(m) <= n < crp(m+1)` also implies `crp(m) < crp(m+1)` on any
/// non-empty iteration). The closure is what lets the loop generator prove
/// a sparse segment non-empty without seeing the iterator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub lower: Constr,
    pub upper: Constr,
}

impl Range {
    /// Half-open range `lower <= iter < upper`.
    pub fn half_open(lower: impl Into<Expr>, iter: Expr, upper: impl Into<Expr>) -> Self {
        Self {
            lower: Constr::new(lower.into(), RelOp::Le, iter.clone()),
            upper: Constr::new(iter, RelOp::Lt, upper.into()),
        }
    }

    /// Closed range `lower <= iter <= upper`.
    pub fn closed(lower: impl Into<Expr>, iter: Expr, upper: impl Into<Expr>) -> Self {
        Self {
            lower: Constr::new(lower.into(), RelOp::Le, iter.clone()),
            upper: Constr::new(iter, RelOp::Le, upper.into()),
        }
    }

    /// Range with explicit bound operators.
    pub fn bounds(
        lower: impl Into<Expr>,
        lo: RelOp,
        iter: Expr,
        hi: RelOp,
        upper: impl Into<Expr>,
    ) -> Self {
        Self {
            lower: Constr::new(lower.into(), lo, iter.clone()),
            upper: Constr::new(iter, hi, upper.into()),
        }
    }

    /// The iterator this range bounds.
    pub fn iter_name(&self) -> Option<&str> {
        match &self.lower.rhs {
            Expr::Iter(n) => Some(n),
            _ => None,
        }
    }

    /// The transitive closure constraint `lower (op) upper`.
    pub fn closure(&self) -> Constr {
        Constr::new(self.lower.lhs.clone(), self.upper.op, self.upper.rhs.clone())
    }

    /// Expand to lower bound, upper bound, closure.
    pub fn into_constrs(self) -> Vec<Constr> {
        let closure = self.closure();
        vec![self.lower, self.upper, closure]
    }
}

impl Expr {
    /// Constraint `self < rhs`.
    pub fn lt(self, rhs: impl Into<Expr>) -> Constr {
        Constr::new(self, RelOp::Lt, rhs.into())
    }

    /// Constraint `self <= rhs`.
    pub fn le(self, rhs: impl Into<Expr>) -> Constr {
        Constr::new(self, RelOp::Le, rhs.into())
    }

    /// Constraint `self > rhs`.
    pub fn gt(self, rhs: impl Into<Expr>) -> Constr {
        Constr::new(self, RelOp::Gt, rhs.into())
    }

    /// Constraint `self >= rhs`.
    pub fn ge(self, rhs: impl Into<Expr>) -> Constr {
        Constr::new(self, RelOp::Ge, rhs.into())
    }

    /// Constraint `self = rhs`.
    pub fn equals(self, rhs: impl Into<Expr>) -> Constr {
        Constr::new(self, RelOp::Eq, rhs.into())
    }

    /// Constraint `self != rhs`.
    pub fn neq(self, rhs: impl Into<Expr>) -> Constr {
        Constr::new(self, RelOp::Ne, rhs.into())
    }

    /// Range `lower <= self < upper`.
    pub fn in_range(self, lower: impl Into<Expr>, upper: impl Into<Expr>) -> Range {
        Range::half_open(lower, self, upper)
    }
}
