//! Deterministic loop-nest synthesis from iteration domains and schedules.
//!
//! Given one or more statements, each with a constraint-described domain and
//! a mixed iterator/literal schedule tuple, this module emits the C loop
//! text. Iterators are renamed `t1..tN` by schedule position; an iterator
//! bound by an equality becomes an assignment, one bounded below and above
//! becomes a `for` loop, and leftover constraints that still mention
//! iterators become `if` guards around the statement slot. Constraints with
//! no iterators (including range closures) are assumed by the caller and
//! dropped.

use std::collections::HashMap;

use crate::algebra::{Constr, Expr, RelOp};
use crate::model::{Sched, SchedDim};
use crate::utils::pretty::CodeFormatter;

/// One statement to place in the nest.
#[derive(Debug, Clone)]
pub struct NestStmt {
    /// Statement ordinal, the `N` of its `sN` slot
    pub ordinal: usize,
    /// Source iterator tuple, original names
    pub iters: Vec<String>,
    /// Schedule destination tuple
    pub tuple: Vec<SchedDim>,
    /// Domain constraints, original names
    pub constraints: Vec<Constr>,
}

impl NestStmt {
    pub fn new(ordinal: usize, iters: Vec<String>, sched: &Sched, constraints: Vec<Constr>) -> Self {
        Self { ordinal, iters, tuple: sched.dest.clone(), constraints }
    }
}

const BUILTIN_FUNCS: &[&str] = &["min", "max", "abs", "absmin", "absmax", "floord", "sgn"];

/// One uninterpreted-function variant: a base name at a fixed argument
/// shift, e.g. `crp(m)` and `crp(m+1)` are two variants of `crp`.
#[derive(Debug, Clone)]
pub struct UfVariant {
    pub base: String,
    pub shift: i64,
    pub macro_name: String,
    /// Extended formals: the source iterators up to the deepest referenced
    pub formals: Vec<String>,
    /// Original call arguments, for the macro body
    pub args: Vec<Expr>,
}

/// Registry of uninterpreted-function variants seen in domain constraints.
///
/// Every variant gets a macro whose formals are the iterator prefix up to
/// the deepest iterator its arguments reference, so calls carry enough
/// context for a data mapping; the body indexes the backing array with the
/// original arguments. A shifted variant coexisting with the unshifted one
/// is suffixed (`crp1`, `pos0_1`); a lone shifted variant keeps the base
/// name with the shift in its body.
#[derive(Debug, Clone, Default)]
pub struct UfTable {
    variants: Vec<UfVariant>,
}

impl UfTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The argument shift a call is keyed by.
    pub fn shift_of(args: &[Expr]) -> i64 {
        match args {
            [only] if only.base_iter().is_some() => only.int_offset(),
            _ => 0,
        }
    }

    /// Register every function occurrence in the given constraints.
    pub fn register_constraints(&mut self, iters: &[String], constraints: &[Constr]) {
        for c in constraints {
            let mut funcs = Vec::new();
            c.lhs.collect_funcs(&mut funcs);
            c.rhs.collect_funcs(&mut funcs);
            for f in funcs {
                self.register(iters, f);
            }
        }
        self.assign_names();
    }

    fn register(&mut self, iters: &[String], func: &Expr) {
        let Expr::Func { name, args } = func else {
            return;
        };
        // Fixed helper macros from the program header, never data mappings.
        if BUILTIN_FUNCS.contains(&name.as_str()) {
            return;
        }
        let shift = Self::shift_of(args);
        if self.variants.iter().any(|v| v.base == *name && v.shift == shift) {
            return;
        }
        let mut referenced = Vec::new();
        for a in args {
            a.collect_iters(&mut referenced);
        }
        let deepest = referenced
            .iter()
            .filter_map(|r| iters.iter().position(|i| i == r))
            .max();
        let Some(deepest) = deepest else {
            // No iterator arguments: stays a plain call, no macro.
            return;
        };
        self.variants.push(UfVariant {
            base: name.clone(),
            shift,
            macro_name: name.clone(),
            formals: iters[..=deepest].to_vec(),
            args: args.clone(),
        });
    }

    fn assign_names(&mut self) {
        let bases: Vec<String> = {
            let mut seen = Vec::new();
            for v in &self.variants {
                if !seen.contains(&v.base) {
                    seen.push(v.base.clone());
                }
            }
            seen
        };
        for base in bases {
            let count = self.variants.iter().filter(|v| v.base == base).count();
            for v in self.variants.iter_mut().filter(|v| v.base == base) {
                v.macro_name = if count == 1 || v.shift == 0 {
                    v.base.clone()
                } else if v.shift < 0 {
                    format!("{}_m{}", v.base, -v.shift)
                } else if v.base.ends_with(|c: char| c.is_ascii_digit()) {
                    format!("{}_{}", v.base, v.shift)
                } else {
                    format!("{}{}", v.base, v.shift)
                };
            }
        }
    }

    pub fn find(&self, name: &str, shift: i64) -> Option<&UfVariant> {
        self.variants.iter().find(|v| v.base == name && v.shift == shift)
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Macro definitions as (lhs, rhs) pairs, sorted by macro name.
    pub fn macros(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .variants
            .iter()
            .map(|v| {
                let lhs = format!("{}({})", v.macro_name, v.formals.join(","));
                let args: Vec<String> = v.args.iter().map(|a| format!("({})", a)).collect();
                let rhs = format!("{}[{}]", v.base, args.join(","));
                (lhs, rhs)
            })
            .collect();
        out.sort();
        out
    }
}

/// Rename iterators and rewrite function calls to their macro variants.
pub fn rewrite(e: &Expr, rename: &HashMap<String, String>, ufs: &UfTable) -> Expr {
    match e {
        Expr::Iter(n) => {
            Expr::Iter(rename.get(n).cloned().unwrap_or_else(|| n.clone()))
        }
        Expr::Func { name, args } => {
            let shift = UfTable::shift_of(args);
            if let Some(v) = ufs.find(name, shift) {
                Expr::Func {
                    name: v.macro_name.clone(),
                    args: v
                        .formals
                        .iter()
                        .map(|f| {
                            Expr::Iter(rename.get(f).cloned().unwrap_or_else(|| f.clone()))
                        })
                        .collect(),
                }
            } else {
                Expr::Func {
                    name: name.clone(),
                    args: args.iter().map(|a| rewrite(a, rename, ufs)).collect(),
                }
            }
        }
        Expr::Math { op, lhs, rhs } => Expr::Math {
            op: *op,
            lhs: Box::new(rewrite(lhs, rename, ufs)),
            rhs: Box::new(rewrite(rhs, rename, ufs)),
        },
        Expr::Access { space, index, bracket } => Expr::Access {
            space: space.clone(),
            index: index.iter().map(|a| rewrite(a, rename, ufs)).collect(),
            bracket: *bracket,
        },
        other => other.clone(),
    }
}

enum IterClass {
    Loop { lb: Expr, ub: Expr },
    Assign(Expr),
}

struct EntryCtx<'a> {
    stmt: &'a NestStmt,
    rename: HashMap<String, String>,
    classes: HashMap<String, IterClass>,
    guards: Vec<Constr>,
}

fn lower_bound<'a>(c: &'a Constr, it: &str) -> Option<(&'a Expr, bool)> {
    match (&c.lhs, c.op, &c.rhs) {
        (lhs, RelOp::Le, Expr::Iter(n)) if n == it && !lhs.contains_iter(it) => Some((lhs, false)),
        (lhs, RelOp::Lt, Expr::Iter(n)) if n == it && !lhs.contains_iter(it) => Some((lhs, true)),
        (Expr::Iter(n), RelOp::Ge, rhs) if n == it && !rhs.contains_iter(it) => Some((rhs, false)),
        (Expr::Iter(n), RelOp::Gt, rhs) if n == it && !rhs.contains_iter(it) => Some((rhs, true)),
        _ => None,
    }
}

fn upper_bound<'a>(c: &'a Constr, it: &str) -> Option<(&'a Expr, bool)> {
    match (&c.lhs, c.op, &c.rhs) {
        (Expr::Iter(n), RelOp::Le, rhs) if n == it && !rhs.contains_iter(it) => Some((rhs, false)),
        (Expr::Iter(n), RelOp::Lt, rhs) if n == it && !rhs.contains_iter(it) => Some((rhs, true)),
        (lhs, RelOp::Ge, Expr::Iter(n)) if n == it && !lhs.contains_iter(it) => Some((lhs, false)),
        (lhs, RelOp::Gt, Expr::Iter(n)) if n == it && !lhs.contains_iter(it) => Some((lhs, true)),
        _ => None,
    }
}

fn analyze(stmt: &NestStmt) -> EntryCtx<'_> {
    let mut rename = HashMap::new();
    for (k, dim) in stmt.tuple.iter().enumerate() {
        if let SchedDim::It(n) = dim {
            rename.insert(n.clone(), format!("t{}", k + 1));
        }
    }

    let mut classes = HashMap::new();
    let mut consumed = vec![false; stmt.constraints.len()];
    let mut raw_bounds: Vec<(Expr, Expr)> = Vec::new();

    for (pos, it) in stmt.iters.iter().enumerate() {
        // An equality in terms of earlier iterators makes this an
        // assignment, not a loop.
        let def = stmt.constraints.iter().enumerate().find(|(_, c)| {
            !c.exists
                && c.defines(it).is_some_and(|e| {
                    let mut used = Vec::new();
                    e.collect_iters(&mut used);
                    used.iter().all(|u| {
                        stmt.iters.iter().position(|x| x == u).is_some_and(|p| p < pos)
                    })
                })
        });
        if let Some((ci, c)) = def {
            let expr = c.defines(it).cloned();
            if let Some(expr) = expr {
                consumed[ci] = true;
                classes.insert(it.clone(), IterClass::Assign(expr));
                continue;
            }
        }

        let lower = stmt
            .constraints
            .iter()
            .enumerate()
            .find(|(ci, c)| !consumed[*ci] && !c.exists && lower_bound(c, it).is_some());
        let upper = stmt
            .constraints
            .iter()
            .enumerate()
            .find(|(ci, c)| !consumed[*ci] && !c.exists && upper_bound(c, it).is_some());
        if let (Some((li, lc)), Some((ui, uc))) = (lower, upper) {
            consumed[li] = true;
            consumed[ui] = true;
            let (lb_raw, lb_strict) = lower_bound(lc, it).unwrap_or((&lc.lhs, false));
            let (ub_raw, ub_strict) = upper_bound(uc, it).unwrap_or((&uc.rhs, false));
            raw_bounds.push((lb_raw.clone(), ub_raw.clone()));
            let lb = if lb_strict { lb_raw.clone() + 1 } else { lb_raw.clone() };
            let ub = if ub_strict { ub_raw.clone() - 1 } else { ub_raw.clone() };
            classes.insert(it.clone(), IterClass::Loop { lb, ub });
        } else {
            log::warn!("iterator '{}' has no usable bounds or definition", it);
        }
    }

    let guards: Vec<Constr> = stmt
        .constraints
        .iter()
        .enumerate()
        .filter(|(ci, c)| {
            if consumed[*ci] || c.exists || c.iters().is_empty() {
                return false;
            }
            // Range closures relate a loop's two bound expressions and are
            // implied by any non-empty iteration.
            !raw_bounds.iter().any(|(lb, ub)| c.lhs == *lb && c.rhs == *ub)
        })
        .map(|(_, c)| c.clone())
        .collect();

    EntryCtx { stmt, rename, classes, guards }
}

fn emit_slot(ctx: &EntryCtx<'_>, ufs: &UfTable, f: &mut CodeFormatter) {
    let guarded = !ctx.guards.is_empty();
    if guarded {
        let conds: Vec<String> = ctx
            .guards
            .iter()
            .map(|c| {
                format!(
                    "{} {} {}",
                    rewrite(&c.lhs, &ctx.rename, ufs),
                    c.op.c_text(),
                    rewrite(&c.rhs, &ctx.rename, ufs)
                )
            })
            .collect();
        f.writeln(&format!("if ({}) {{", conds.join(" && ")));
        f.indent();
    }
    let args: Vec<String> = ctx
        .stmt
        .tuple
        .iter()
        .enumerate()
        .filter_map(|(k, d)| match d {
            SchedDim::It(_) => Some(format!("t{}", k + 1)),
            SchedDim::Lit(_) => None,
        })
        .collect();
    f.writeln(&format!("s{}({});", ctx.stmt.ordinal, args.join(",")));
    if guarded {
        f.dedent();
        f.writeln("}");
    }
}

fn emit(ctxs: &[EntryCtx<'_>], level: usize, ufs: &UfTable, f: &mut CodeFormatter) {
    let mut k = 0;
    while k < ctxs.len() {
        let ctx = &ctxs[k];
        let Some(dim) = ctx.stmt.tuple.get(level) else {
            emit_slot(ctx, ufs, f);
            k += 1;
            continue;
        };
        let mut end = k + 1;
        while end < ctxs.len() && ctxs[end].stmt.tuple.get(level) == Some(dim) {
            end += 1;
        }
        let run = &ctxs[k..end];
        match dim {
            SchedDim::Lit(_) => emit(run, level + 1, ufs, f),
            SchedDim::It(name) => match run.iter().find_map(|c| c.classes.get(name)) {
                Some(IterClass::Assign(e)) => {
                    let t = format!("t{}", level + 1);
                    f.writeln(&format!("{}={};", t, rewrite(e, &ctx.rename, ufs)));
                    emit(run, level + 1, ufs, f);
                }
                Some(IterClass::Loop { lb, ub }) => {
                    let t = format!("t{}", level + 1);
                    let lb = rewrite(lb, &ctx.rename, ufs);
                    let ub = rewrite(ub, &ctx.rename, ufs);
                    f.writeln(&format!("for({} = {}; {} <= {}; {}++) {{", t, lb, t, ub, t));
                    f.indent();
                    emit(run, level + 1, ufs, f);
                    f.dedent();
                    f.writeln("}");
                }
                None => emit(run, level + 1, ufs, f),
            },
        }
        k = end;
    }
}

/// Number of induction variables a nest needs: the deepest iterator
/// position in any schedule tuple.
pub fn max_iter_depth(stmts: &[NestStmt]) -> usize {
    stmts
        .iter()
        .flat_map(|s| {
            s.tuple
                .iter()
                .enumerate()
                .filter(|(_, d)| matches!(d, SchedDim::It(_)))
                .map(|(k, _)| k + 1)
        })
        .max()
        .unwrap_or(0)
}

/// Generate the loop-nest text for the given statements.
pub fn generate(stmts: &[NestStmt], ufs: &UfTable) -> String {
    let ctxs: Vec<EntryCtx<'_>> = stmts.iter().map(analyze).collect();
    let mut f = CodeFormatter::new("  ");
    emit(&ctxs, 0, ufs, &mut f);
    f.finish()
}
