//! The computation model: spaces, relations, schedules, computations.

pub mod comp;
pub mod space;

pub use comp::{Comp, Sched, SchedDim};
pub use space::{IntoConstrs, Rel, Space};
