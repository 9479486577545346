//! Expression algebra: symbolic expressions, constraints, and text parsing.

pub mod constraint;
pub mod expr;
pub mod parse;

pub use constraint::{Constr, Range, RelOp};
pub use expr::{Expr, Op, TRANSCENDENTALS};
pub use parse::{parse_constraints, parse_expr, parse_set, ParsedSet};
