//! Computations and scheduling functions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algebra::{Constr, Expr, Range};

use super::space::{Rel, Space};

/// One destination dimension of a scheduling function: an iterator carried
/// through, or a literal ordinal fixing lexicographic position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchedDim {
    It(String),
    Lit(i64),
}

impl fmt::Display for SchedDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedDim::It(n) => write!(f, "{}", n),
            SchedDim::Lit(v) => write!(f, "{}", v),
        }
    }
}

/// A scheduling function: source iterator tuple to a mixed tuple of
/// iterators and literal ordinals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sched {
    pub name: String,
    pub iters: Vec<String>,
    pub dest: Vec<SchedDim>,
}

impl Sched {
    pub fn new(name: impl Into<String>, iters: Vec<String>, dest: Vec<SchedDim>) -> Self {
        Self { name: name.into(), iters, dest }
    }

    /// Identity schedule: iterators carried through, trailing ordinal.
    pub fn identity(name: impl Into<String>, iters: Vec<String>, ordinal: i64) -> Self {
        let mut dest: Vec<SchedDim> = iters.iter().cloned().map(SchedDim::It).collect();
        dest.push(SchedDim::Lit(ordinal));
        Self::new(name, iters, dest)
    }

    /// Destination positions that are iterators (not literals).
    pub fn iter_positions(&self) -> Vec<usize> {
        self.dest
            .iter()
            .enumerate()
            .filter(|(_, d)| matches!(d, SchedDim::It(_)))
            .map(|(k, _)| k)
            .collect()
    }

    /// Deepest iterator position, if any.
    pub fn depth(&self) -> usize {
        self.iter_positions().last().map(|p| p + 1).unwrap_or(0)
    }
}

impl fmt::Display for Sched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dest: Vec<String> = self.dest.iter().map(|d| d.to_string()).collect();
        write!(
            f,
            "{} := {{[{}] -> [{}]}}",
            self.name,
            self.iters.join(","),
            dest.join(",")
        )
    }
}

/// A computation: guarded statements over an iteration space, with one
/// scheduling function per statement.
///
/// Statements are added in execution order; each gets an identity schedule
/// named `r<k><name>` whose trailing literal is the statement ordinal, so
/// sibling statements in one nest stay lexicographically ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comp {
    pub name: String,
    pub space: Space,
    pub guards: Vec<Option<Constr>>,
    pub stmts: Vec<Expr>,
    pub scheds: Vec<Sched>,
}

impl Comp {
    pub fn new(name: impl Into<String>, space: Space) -> Self {
        Self {
            name: name.into(),
            space,
            guards: Vec::new(),
            stmts: Vec::new(),
            scheds: Vec::new(),
        }
    }

    /// Append an unguarded statement (builder style).
    pub fn stmt(mut self, stmt: Expr) -> Self {
        self.push(None, stmt);
        self
    }

    /// Append a guarded statement.
    pub fn guarded(mut self, guard: Constr, stmt: Expr) -> Self {
        self.push(Some(guard), stmt);
        self
    }

    /// Append a statement in place.
    pub fn push(&mut self, guard: Option<Constr>, stmt: Expr) {
        let ordinal = self.stmts.len() as i64;
        let sched = Sched::identity(
            format!("r{}{}", ordinal, self.name),
            self.space.iterators(),
            ordinal,
        );
        self.guards.push(guard);
        self.stmts.push(stmt);
        self.scheds.push(sched);
    }

    /// Replace the schedule of statement `idx`.
    pub fn reschedule(&mut self, idx: usize, sched: Sched) {
        if idx < self.scheds.len() {
            self.scheds[idx] = sched;
        }
    }

    /// Tile an iterator of this computation's space.
    pub fn tile(&self, iter: &str, size: i64, outer: &str) -> Rel {
        self.space.tile(iter, size, outer)
    }

    /// Relation to the dense superset of this computation's space.
    pub fn make_dense(&self, ranges: Vec<Range>) -> Rel {
        self.space.make_dense(ranges)
    }
}

impl fmt::Display for Comp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iters = self.space.iterators();
        let constrs: Vec<String> =
            self.space.constraints().iter().map(|c| c.to_string()).collect();
        let stmts: Vec<String> = self
            .stmts
            .iter()
            .zip(&self.guards)
            .map(|(s, g)| match g {
                Some(g) => format!("if({}) {}", g, s),
                None => s.to_string(),
            })
            .collect();
        write!(
            f,
            "{}({}) = {{ {} }} : {{ {} }}",
            self.name,
            iters.join(","),
            constrs.join(" ^ "),
            stmts.join("; ")
        )
    }
}
