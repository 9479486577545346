//! # pdflow - Polyhedral Dataflow Code Generator
//!
//! An intermediate representation and code generator for data-parallel
//! numerical kernels over structured and sparse data, including:
//! - Symbolic expression algebra with canonical text rendering
//! - Iteration spaces and computations with auto-derived schedules
//! - A dataflow graph supporting fusion and cycle decomposition
//! - Schedule, data-reduction, performance-model, and codegen passes
//! - A domain bridge emitting C loop nests with indexing macros and
//!   OpenMP pragmas
//!
//! ## Architecture
//!
//! ```text
//! Algebra → Space/Computation → Graph → Builder → Passes → Bridge → C text
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use pdflow::prelude::*;
//!
//! let i = Expr::iter("i");
//! let n = Expr::iter("n");
//! let j = Expr::iter("j");
//! let rp = |a: Expr| Expr::func("rp", vec![a]);
//! let csr = Space::new("Icsr")
//!     .with(i.clone().in_range(0, Expr::sym("N")))
//!     .with(n.clone().in_range(rp(i.clone()), rp(i.clone() + 1)))
//!     .with(j.clone().equals(Expr::func("col", vec![n.clone()])));
//! let y = Space::data("y", vec![Expr::sym("N")]);
//! let val = Space::data("val", vec![Expr::sym("NNZ")]);
//! let x = Space::data("x", vec![Expr::sym("M")]);
//!
//! let mut b = Builder::new("spmv_csr");
//! b.data(&y).data(&val).data(&x);
//! b.add(Comp::new("spmv", csr)
//!     .stmt(y.at(vec![i]).add_assign(val.at(vec![n]) * x.at(vec![j]))))?;
//! let code = b.codegen()?;
//! ```

#![warn(clippy::all)]

pub mod algebra;
pub mod model;
pub mod graph;
pub mod builder;
pub mod passes;
pub mod bridge;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::algebra::{parse_expr, parse_set, Constr, Expr, Op, Range, RelOp};
    pub use crate::bridge::{Codegen, PolyBridge};
    pub use crate::builder::Builder;
    pub use crate::graph::{
        CompNode, DataNode, FlowGraph, MemAlloc, Node, NodeId, RoutineConfig,
    };
    pub use crate::model::{Comp, Rel, Sched, SchedDim, Space};
    pub use crate::passes::{
        CodegenPass, DataReducePass, GraphVisitor, PerfModelPass, SchedulePass,
    };
    pub use crate::utils::errors::{FlowError, FlowResult};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
