//! Symbolic expressions over iterators, constants, and data accesses.
//!
//! Expressions form a closed union: every node is one of the `Expr` variants,
//! and consumers dispatch by `match` rather than downcasting. Arithmetic is
//! available through the std operator traits, so iteration spaces and
//! statements read close to the math they encode:
//!
//! ```
//! use pdflow::algebra::Expr;
//!
//! let i = Expr::iter("i");
//! let n = Expr::sym("N");
//! assert_eq!((i * 2 + 1).to_string(), "i*2+1");
//! assert_eq!((n - 0).to_string(), "N");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops;

/// Arithmetic and assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
}

impl Op {
    /// Source text of the operator.
    pub fn text(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Assign => "=",
            Op::AddAssign => "+=",
            Op::SubAssign => "-=",
            Op::MulAssign => "*=",
            Op::DivAssign => "/=",
        }
    }

    /// Whether the operator writes its left-hand side.
    pub fn is_assign(&self) -> bool {
        matches!(
            self,
            Op::Assign | Op::AddAssign | Op::SubAssign | Op::MulAssign | Op::DivAssign
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// A symbolic expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// An iterator (tuple variable) by name
    Iter(String),
    /// An integer literal
    Int(i64),
    /// A floating-point literal
    Real(f64),
    /// A named runtime constant, optionally bound to a compile-time value
    Sym { name: String, value: Option<i64> },
    /// An uninterpreted function call, e.g. `row(n)`
    Func { name: String, args: Vec<Expr> },
    /// A data access, e.g. `A(i,j)` or `x[i]`
    Access {
        space: String,
        index: Vec<Expr>,
        /// Bracket notation (`x[i]`) renders verbatim; call notation
        /// (`A(i,j)`) is linearized by the code generator.
        bracket: bool,
    },
    /// A binary operation
    Math {
        op: Op,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Function names treated as transcendental by the performance model.
pub const TRANSCENDENTALS: &[&str] = &["exp", "log", "sqrt", "sin", "cos", "tan"];

impl Expr {
    /// An iterator reference.
    pub fn iter(name: impl Into<String>) -> Self {
        Expr::Iter(name.into())
    }

    /// An integer literal.
    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    /// A floating-point literal.
    pub fn real(value: f64) -> Self {
        Expr::Real(value)
    }

    /// An unbound runtime constant.
    pub fn sym(name: impl Into<String>) -> Self {
        Expr::Sym { name: name.into(), value: None }
    }

    /// A constant bound to a known value; renders as the value.
    pub fn sym_val(name: impl Into<String>, value: i64) -> Self {
        Expr::Sym { name: name.into(), value: Some(value) }
    }

    /// An uninterpreted function call.
    pub fn func(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Func { name: name.into(), args }
    }

    /// A math operation.
    pub fn math(op: Op, lhs: Expr, rhs: Expr) -> Self {
        Expr::Math { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    /// Assignment statement `self = rhs`.
    pub fn assign(self, rhs: impl Into<Expr>) -> Self {
        Expr::math(Op::Assign, self, rhs.into())
    }

    /// Compound assignment `self += rhs`.
    pub fn add_assign(self, rhs: impl Into<Expr>) -> Self {
        Expr::math(Op::AddAssign, self, rhs.into())
    }

    /// Compound assignment `self -= rhs`.
    pub fn sub_assign(self, rhs: impl Into<Expr>) -> Self {
        Expr::math(Op::SubAssign, self, rhs.into())
    }

    /// Compound assignment `self *= rhs`.
    pub fn mul_assign(self, rhs: impl Into<Expr>) -> Self {
        Expr::math(Op::MulAssign, self, rhs.into())
    }

    /// Compound assignment `self /= rhs`.
    pub fn div_assign(self, rhs: impl Into<Expr>) -> Self {
        Expr::math(Op::DivAssign, self, rhs.into())
    }

    /// Whether this is an integer-valued leaf (literal or bound constant).
    pub fn is_int(&self) -> bool {
        matches!(self, Expr::Int(_) | Expr::Sym { value: Some(_), .. })
    }

    /// Whether any sub-expression references the named iterator.
    pub fn contains_iter(&self, name: &str) -> bool {
        match self {
            Expr::Iter(n) => n == name,
            Expr::Int(_) | Expr::Real(_) | Expr::Sym { .. } => false,
            Expr::Func { args, .. } => args.iter().any(|a| a.contains_iter(name)),
            Expr::Access { index, .. } => index.iter().any(|a| a.contains_iter(name)),
            Expr::Math { lhs, rhs, .. } => {
                lhs.contains_iter(name) || rhs.contains_iter(name)
            }
        }
    }

    /// The iterator this expression is anchored on, if it is an iterator or
    /// an iterator plus/minus a constant.
    pub fn base_iter(&self) -> Option<&str> {
        match self {
            Expr::Iter(n) => Some(n),
            Expr::Math { op: Op::Add | Op::Sub, lhs, rhs } if rhs.is_int() => lhs.base_iter(),
            _ => None,
        }
    }

    /// Constant offset from the base iterator (`i+1` -> 1, `i-2` -> -2).
    /// Plain iterators and non-anchored expressions report 0.
    pub fn int_offset(&self) -> i64 {
        match self {
            Expr::Int(v) => *v,
            Expr::Sym { value: Some(v), .. } => *v,
            Expr::Math { op: Op::Add, lhs, rhs } if rhs.is_int() && lhs.base_iter().is_some() => {
                rhs.int_offset()
            }
            Expr::Math { op: Op::Sub, lhs, rhs } if rhs.is_int() && lhs.base_iter().is_some() => {
                -rhs.int_offset()
            }
            _ => 0,
        }
    }

    /// Collect iterator names in first-occurrence order into `out`,
    /// left-to-right, skipping duplicates.
    pub fn collect_iters(&self, out: &mut Vec<String>) {
        match self {
            Expr::Iter(n) => {
                if !out.iter().any(|x| x == n) {
                    out.push(n.clone());
                }
            }
            Expr::Int(_) | Expr::Real(_) | Expr::Sym { .. } => {}
            Expr::Func { args, .. } => {
                for a in args {
                    a.collect_iters(out);
                }
            }
            Expr::Access { index, .. } => {
                for a in index {
                    a.collect_iters(out);
                }
            }
            Expr::Math { lhs, rhs, .. } => {
                lhs.collect_iters(out);
                rhs.collect_iters(out);
            }
        }
    }

    /// Collect uninterpreted function calls, outermost first.
    pub fn collect_funcs<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Expr::Func { args, .. } => {
                out.push(self);
                for a in args {
                    a.collect_funcs(out);
                }
            }
            Expr::Access { index, .. } => {
                for a in index {
                    a.collect_funcs(out);
                }
            }
            Expr::Math { lhs, rhs, .. } => {
                lhs.collect_funcs(out);
                rhs.collect_funcs(out);
            }
            _ => {}
        }
    }

    /// Collect unbound runtime constants by name.
    pub fn collect_syms(&self, out: &mut Vec<String>) {
        match self {
            Expr::Sym { name, value: None } => {
                if !out.iter().any(|x| x == name) {
                    out.push(name.clone());
                }
            }
            Expr::Func { args, .. } => {
                for a in args {
                    a.collect_syms(out);
                }
            }
            Expr::Access { index, .. } => {
                for a in index {
                    a.collect_syms(out);
                }
            }
            Expr::Math { lhs, rhs, .. } => {
                lhs.collect_syms(out);
                rhs.collect_syms(out);
            }
            _ => {}
        }
    }

    /// Collect data accesses, left-to-right.
    pub fn collect_accesses<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Expr::Access { index, .. } => {
                out.push(self);
                for a in index {
                    a.collect_accesses(out);
                }
            }
            Expr::Func { args, .. } => {
                for a in args {
                    a.collect_accesses(out);
                }
            }
            Expr::Math { lhs, rhs, .. } => {
                lhs.collect_accesses(out);
                rhs.collect_accesses(out);
            }
            _ => {}
        }
    }

    fn is_sum(&self) -> bool {
        matches!(self, Expr::Math { op: Op::Add | Op::Sub, .. })
    }

    fn render(&self) -> String {
        match self {
            Expr::Iter(n) => n.clone(),
            Expr::Int(v) => v.to_string(),
            Expr::Real(v) => {
                if v.fract() == 0.0 {
                    format!("{:.1}", v)
                } else {
                    format!("{}", v)
                }
            }
            Expr::Sym { name, value } => match value {
                Some(v) => v.to_string(),
                None => name.clone(),
            },
            Expr::Func { name, args } => {
                let args: Vec<String> = args.iter().map(|a| a.render()).collect();
                format!("{}({})", name, args.join(","))
            }
            Expr::Access { space, index, bracket } => {
                if index.is_empty() {
                    space.clone()
                } else {
                    let idx: Vec<String> = index.iter().map(|a| a.render()).collect();
                    if *bracket {
                        format!("{}[{}]", space, idx.join(","))
                    } else {
                        format!("{}({})", space, idx.join(","))
                    }
                }
            }
            Expr::Math { op, lhs, rhs } => {
                if op.is_assign() {
                    return format!("{}{}{}", lhs.render(), op.text(), rhs.render());
                }
                let mut l = lhs.render();
                let mut r = rhs.render();
                // Identity elision keeps text canonical: x+0, x-0, x*1,
                // x/1 and x%1 all collapse to x.
                match op {
                    Op::Add | Op::Sub if r == "0" => return l,
                    Op::Add if l == "0" => return r,
                    Op::Sub if l == "0" => return format!("-{}", r),
                    Op::Mul | Op::Div | Op::Mod if r == "1" => return l,
                    _ => {}
                }
                // Sum operands nested under a product bind looser than the
                // product itself; same for the right side of a difference.
                let needs = |e: &Expr, text: &str| e.is_sum() && text.len() > 1;
                match op {
                    Op::Mul | Op::Div | Op::Mod => {
                        if needs(lhs, &l) {
                            l = format!("({})", l);
                        }
                        if needs(rhs, &r) {
                            r = format!("({})", r);
                        }
                    }
                    Op::Sub => {
                        if needs(rhs, &r) {
                            r = format!("({})", r);
                        }
                    }
                    _ => {}
                }
                // Subtracting a negative reads as addition.
                if *op == Op::Sub && r.starts_with('-') {
                    return format!("{}+{}", l, &r[1..]);
                }
                format!("{}{}{}", l, op.text(), r)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Int(v)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Int(v as i64)
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Expr::Real(v)
    }
}

impl From<&Expr> for Expr {
    fn from(e: &Expr) -> Self {
        e.clone()
    }
}

macro_rules! impl_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::math($op, self, rhs)
            }
        }

        impl ops::$trait<i64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                Expr::math($op, self, Expr::Int(rhs))
            }
        }

        impl ops::$trait<Expr> for i64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::math($op, Expr::Int(self), rhs)
            }
        }

        impl ops::$trait<&Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: &Expr) -> Expr {
                Expr::math($op, self, rhs.clone())
            }
        }

        impl ops::$trait<Expr> for &Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::math($op, self.clone(), rhs)
            }
        }
    };
}

impl_binop!(Add, add, Op::Add);
impl_binop!(Sub, sub, Op::Sub);
impl_binop!(Mul, mul, Op::Mul);
impl_binop!(Div, div, Op::Div);
impl_binop!(Rem, rem, Op::Mod);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::math(Op::Sub, Expr::Int(0), self)
    }
}
