//! Iteration and data spaces.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algebra::{Constr, Expr, Range, RelOp};

/// Source of constraints for a space: single constraints and ranges both
/// contribute, with ranges expanding to lower/upper/closure.
pub trait IntoConstrs {
    fn into_constrs(self) -> Vec<Constr>;
}

impl IntoConstrs for Constr {
    fn into_constrs(self) -> Vec<Constr> {
        vec![self]
    }
}

impl IntoConstrs for Range {
    fn into_constrs(self) -> Vec<Constr> {
        Range::into_constrs(self)
    }
}

impl IntoConstrs for Vec<Constr> {
    fn into_constrs(self) -> Vec<Constr> {
        self
    }
}

/// A named space: either an iteration domain described by constraints, or a
/// data domain described by per-dimension extents.
///
/// The iterator tuple is not declared separately; it is the sequence of
/// iterator first occurrences across the visible (non-existential)
/// constraints, left side before right side. This keeps the tuple and the
/// constraints impossible to desynchronize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub name: String,
    constraints: Vec<Constr>,
    extents: Vec<Expr>,
}

impl Space {
    /// An empty iteration space; add constraints with [`Space::with`].
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), constraints: Vec::new(), extents: Vec::new() }
    }

    /// A data space with the given per-dimension extents.
    pub fn data(name: impl Into<String>, extents: Vec<Expr>) -> Self {
        Self { name: name.into(), constraints: Vec::new(), extents }
    }

    /// A zero-dimensional (scalar) data space.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::data(name, Vec::new())
    }

    /// Add a constraint or range (builder style).
    pub fn with(mut self, c: impl IntoConstrs) -> Self {
        self.constraints.extend(c.into_constrs());
        self
    }

    /// Add a constraint or range in place.
    pub fn add(&mut self, c: impl IntoConstrs) {
        self.constraints.extend(c.into_constrs());
    }

    /// The constraints of an iteration space.
    pub fn constraints(&self) -> &[Constr] {
        &self.constraints
    }

    /// Whether this is a data space (extent-described).
    pub fn is_data(&self) -> bool {
        !self.extents.is_empty() || self.constraints.is_empty()
    }

    /// The iterator tuple: first occurrences across visible constraints.
    pub fn iterators(&self) -> Vec<String> {
        let mut out = Vec::new();
        for c in &self.constraints {
            if c.exists {
                continue;
            }
            c.lhs.collect_iters(&mut out);
            c.rhs.collect_iters(&mut out);
        }
        out
    }

    /// Per-dimension extents. Data spaces report their declared extents;
    /// iteration spaces derive `upper - lower` (plus one for a closed bound)
    /// per iterator from its range constraints.
    pub fn dims(&self) -> Vec<Expr> {
        if !self.extents.is_empty() {
            return self.extents.clone();
        }
        let mut dims = Vec::new();
        for it in self.iterators() {
            let lower = self.constraints.iter().find(|c| {
                matches!(&c.rhs, Expr::Iter(n) if *n == it)
                    && matches!(c.op, RelOp::Le | RelOp::Lt)
            });
            let upper = self.constraints.iter().find(|c| {
                matches!(&c.lhs, Expr::Iter(n) if *n == it)
                    && matches!(c.op, RelOp::Le | RelOp::Lt)
            });
            if let (Some(lo), Some(hi)) = (lower, upper) {
                let mut dim = hi.rhs.clone() - lo.lhs.clone();
                if hi.op == RelOp::Le {
                    dim = dim + 1;
                }
                dims.push(dim);
            }
        }
        dims
    }

    /// Total element count: the product of the extents, `1` for scalars.
    pub fn size(&self) -> Expr {
        let dims = self.dims();
        match dims.len() {
            0 => Expr::Int(1),
            _ => {
                let mut it = dims.into_iter();
                let first = it.next().unwrap();
                it.fold(first, |acc, d| acc * d)
            }
        }
    }

    /// Canonical set text, e.g. `Icsr := {[i,n,j] : 0 <= i && i < N && ...}`.
    pub fn to_set_text(&self) -> String {
        let iters = self.iterators();
        let cs: Vec<String> = self.constraints.iter().map(|c| c.to_string()).collect();
        if cs.is_empty() {
            format!("{} := {{[{}]}}", self.name, iters.join(","))
        } else {
            format!("{} := {{[{}] : {}}}", self.name, iters.join(","), cs.join(" && "))
        }
    }

    /// A call-notation access, linearized by the code generator.
    pub fn at(&self, index: Vec<Expr>) -> Expr {
        Expr::Access { space: self.name.clone(), index, bracket: false }
    }

    /// A bracket-notation access, emitted verbatim.
    pub fn idx(&self, index: Vec<Expr>) -> Expr {
        Expr::Access { space: self.name.clone(), index, bracket: true }
    }

    /// A scalar reference to this space.
    pub fn sref(&self) -> Expr {
        Expr::Access { space: self.name.clone(), index: Vec::new(), bracket: false }
    }

    /// Tile `iter` by `size`, introducing `outer` ahead of it. The outer
    /// loop spans the tile indices of the iterator's range, the inner loop
    /// covers one tile clamped to the original bounds through the `floord`
    /// and `min`/`max` helpers, and an existential residual records the
    /// decomposition. Returns the relation from this space to the tiled
    /// one.
    pub fn tile(&self, iter: &str, size: i64, outer: &str) -> Rel {
        let lower = self.constraints.iter().position(|c| {
            !c.exists
                && matches!(&c.rhs, Expr::Iter(n) if n.as_str() == iter)
                && matches!(c.op, RelOp::Le | RelOp::Lt)
        });
        let upper = self.constraints.iter().position(|c| {
            !c.exists
                && matches!(&c.lhs, Expr::Iter(n) if n.as_str() == iter)
                && matches!(c.op, RelOp::Le | RelOp::Lt)
        });
        let (Some(li), Some(ui)) = (lower, upper) else {
            log::warn!("iterator '{}' has no range to tile in '{}'", iter, self.name);
            let dest = Space {
                name: format!("{}tile", self.name),
                constraints: self.constraints.clone(),
                extents: Vec::new(),
            };
            return Rel::new(format!("T{}tile", self.name), self.clone(), dest);
        };
        let lc = &self.constraints[li];
        let uc = &self.constraints[ui];
        let lb = if lc.op == RelOp::Lt { lc.lhs.clone() + 1 } else { lc.lhs.clone() };
        // Exclusive upper bound of the tiled iterator.
        let ub = if uc.op == RelOp::Le { uc.rhs.clone() + 1 } else { uc.rhs.clone() };

        let residual = self.fresh_residual();
        let r = Expr::iter(&residual);
        let o = Expr::iter(outer);
        let outer_lb = if lb == Expr::Int(0) {
            Expr::int(0)
        } else {
            Expr::func("floord", vec![lb.clone(), Expr::int(size)])
        };
        let inner_lb = if lb == Expr::Int(0) {
            o.clone() * size
        } else {
            Expr::func("max", vec![lb, o.clone() * size])
        };
        let inserted = vec![
            outer_lb.le(o.clone()),
            o.clone()
                .le(Expr::func("floord", vec![ub.clone() - 1, Expr::int(size)])),
            Expr::int(0).le(r.clone()).existential(),
            r.clone().lt(size).existential(),
            Expr::iter(iter)
                .equals(o.clone() * size + r)
                .existential(),
            inner_lb.le(Expr::iter(iter)),
            Expr::iter(iter).lt(Expr::func("min", vec![ub, (o + 1) * size])),
        ];
        let mut constraints = Vec::new();
        let mut done = false;
        for (k, c) in self.constraints.iter().enumerate() {
            if !done && (c.lhs.contains_iter(iter) || c.rhs.contains_iter(iter)) {
                constraints.extend(inserted.iter().cloned());
                done = true;
            }
            // The original range constraints are superseded by the clamped
            // per-tile bounds.
            if k == li || k == ui {
                continue;
            }
            constraints.push(c.clone());
        }
        if !done {
            constraints.extend(inserted);
        }
        let dest = Space {
            name: format!("{}tile", self.name),
            constraints,
            extents: Vec::new(),
        };
        Rel::new(format!("T{}tile", self.name), self.clone(), dest)
    }

    /// Relation from this (sparse) space to its dense superset: keeps the
    /// affine constraints and replaces uninterpreted-function bounds with
    /// the given dense ranges.
    pub fn make_dense(&self, ranges: Vec<Range>) -> Rel {
        let mut constraints: Vec<Constr> = self
            .constraints
            .iter()
            .filter(|c| {
                let mut funcs = Vec::new();
                c.lhs.collect_funcs(&mut funcs);
                c.rhs.collect_funcs(&mut funcs);
                funcs.is_empty()
            })
            .cloned()
            .collect();
        for r in ranges {
            constraints.extend(r.into_constrs());
        }
        let dest = Space {
            name: format!("{}dense", self.name),
            constraints,
            extents: Vec::new(),
        };
        Rel::new(format!("T{}dense", self.name), self.clone(), dest)
    }

    fn fresh_residual(&self) -> String {
        let mut names = Vec::new();
        for c in &self.constraints {
            c.lhs.collect_iters(&mut names);
            c.rhs.collect_iters(&mut names);
        }
        let mut k = 0;
        loop {
            let cand = format!("r{}", k);
            if !names.iter().any(|n| *n == cand) {
                return cand;
            }
            k += 1;
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_set_text())
    }
}

/// A relation between two spaces (a space transform such as tiling or
/// densification). Scheduling functions are the separate [`super::Sched`]
/// type; both are relations in the data-model sense but carry different
/// payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rel {
    pub name: String,
    pub src: Space,
    pub dest: Space,
}

impl Rel {
    pub fn new(name: impl Into<String>, src: Space, dest: Space) -> Self {
        Self { name: name.into(), src, dest }
    }
}

impl fmt::Display for Rel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} := {{[{}] -> [{}]}}",
            self.name,
            self.src.iterators().join(","),
            self.dest.iterators().join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csr_space() -> Space {
        let i = Expr::iter("i");
        let n = Expr::iter("n");
        let j = Expr::iter("j");
        let rp = |a: Expr| Expr::func("rp", vec![a]);
        Space::new("Icsr")
            .with(i.clone().in_range(0, Expr::sym("N")))
            .with(n.clone().in_range(rp(i.clone()), rp(i + 1)))
            .with(j.equals(Expr::func("col", vec![n])))
    }

    #[test]
    fn test_iterator_order() {
        assert_eq!(csr_space().iterators(), vec!["i", "n", "j"]);
    }

    #[test]
    fn test_set_text_round_trip() {
        let space = csr_space();
        let text = space.to_set_text();
        let parsed = crate::algebra::parse_set(&text).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("Icsr"));
        assert_eq!(parsed.iters, space.iterators());
        let rendered: Vec<String> = parsed.constraints.iter().map(|c| c.to_string()).collect();
        let original: Vec<String> = space.constraints().iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, original);
    }

    #[test]
    fn test_data_space_size() {
        let a = Space::data("A", vec![Expr::sym("I"), Expr::sym("J")]);
        assert_eq!(a.size().to_string(), "I*J");
        let s = Space::scalar("alpha");
        assert_eq!(s.size().to_string(), "1");
        assert!(s.is_data());
    }

    #[test]
    fn test_dense_space_size() {
        let i = Expr::iter("i");
        let j = Expr::iter("j");
        let dense = Space::new("I")
            .with(i.in_range(0, Expr::sym("N")))
            .with(j.in_range(0, Expr::sym("M")));
        assert_eq!(dense.dims().iter().map(|d| d.to_string()).collect::<Vec<_>>(), vec!["N", "M"]);
        assert_eq!(dense.size().to_string(), "N*M");
    }

    #[test]
    fn test_tile_tuple_order_and_bounds() {
        let i = Expr::iter("i");
        let dense = Space::new("I").with(i.in_range(0, Expr::sym("N")));
        let rel = dense.tile("i", 8, "t0");
        assert_eq!(rel.dest.iterators(), vec!["t0", "i"]);
        assert!(rel.dest.constraints().iter().any(|c| c.exists));
        assert_eq!(rel.dest.name, "Itile");
        let texts: Vec<String> =
            rel.dest.constraints().iter().map(|c| c.to_string()).collect();
        assert!(texts.iter().any(|t| t == "t0 <= floord(N-1,8)"));
        assert!(texts.iter().any(|t| t == "t0*8 <= i"));
        assert!(texts.iter().any(|t| t == "i < min(N,(t0+1)*8)"));
    }

    #[test]
    fn test_make_dense_drops_function_bounds() {
        let rel = csr_space().make_dense(vec![Expr::iter("j").in_range(0, Expr::sym("M"))]);
        let has_func = rel.dest.constraints().iter().any(|c| {
            let mut fs = Vec::new();
            c.lhs.collect_funcs(&mut fs);
            c.rhs.collect_funcs(&mut fs);
            !fs.is_empty()
        });
        assert!(!has_func);
        assert_eq!(rel.dest.iterators(), vec!["i", "j"]);
    }
}
