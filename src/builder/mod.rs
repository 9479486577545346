//! Incremental construction of a routine's dataflow graph.
//!
//! The builder is the explicit per-routine context: declared data spaces
//! and the growing graph live here, never in process-global state, so two
//! routines built side by side cannot interfere. Each added computation is
//! folded in immediately: constraint-level index functions and symbolic
//! constants become integer data nodes, statement targets become write
//! edges, and everything read becomes a read edge, creating data nodes on
//! demand with sizes inferred from the domain bounds.

use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use std::io::Write;
use std::path::Path;
use std::process::Command;

use crate::algebra::{Constr, Expr, RelOp};
use crate::graph::{CompNode, DataNode, FlowGraph, NodeId, RelNode, RoutineConfig};
use crate::model::{Comp, Sched, Space};
use crate::passes::{CodegenPass, DataReducePass, GraphVisitor, PerfModelPass, SchedulePass};
use crate::utils::errors::{BuilderError, CodegenError, CodegenErrorKind, FlowResult};

/// Data traffic of a computation's statements: (label, access) pairs for
/// writes and reads, in statement order. The target of an assignment is a
/// write; a compound assignment's accumulation read of its own target is
/// part of the write, but the target's index expressions still contribute
/// reads.
pub(crate) fn stmt_io(comp: &Comp) -> (Vec<(String, Expr)>, Vec<(String, Expr)>) {
    let mut writes: Vec<(String, Expr)> = Vec::new();
    let mut reads: Vec<(String, Expr)> = Vec::new();
    for (k, stmt) in comp.stmts.iter().enumerate() {
        match stmt {
            Expr::Math { op, lhs, rhs } if op.is_assign() => {
                if let Some(label) = target_label(lhs) {
                    writes.push((label, (**lhs).clone()));
                }
                collect_reads(rhs, &mut reads);
                match &**lhs {
                    Expr::Access { index, .. } => {
                        for x in index {
                            collect_reads(x, &mut reads);
                        }
                    }
                    Expr::Func { args, .. } => {
                        for x in args {
                            collect_reads(x, &mut reads);
                        }
                    }
                    _ => {}
                }
            }
            other => collect_reads(other, &mut reads),
        }
        if let Some(g) = comp.guards.get(k).and_then(|g| g.as_ref()) {
            collect_reads(&g.lhs, &mut reads);
            collect_reads(&g.rhs, &mut reads);
        }
    }
    (writes, reads)
}

fn target_label(e: &Expr) -> Option<String> {
    match e {
        Expr::Access { space, .. } => Some(space.clone()),
        Expr::Func { name, .. } => Some(name.clone()),
        Expr::Sym { name, .. } => Some(name.clone()),
        _ => None,
    }
}

fn collect_reads(e: &Expr, out: &mut Vec<(String, Expr)>) {
    let mut accesses = Vec::new();
    e.collect_accesses(&mut accesses);
    for a in accesses {
        if let Expr::Access { space, .. } = a {
            out.push((space.clone(), a.clone()));
        }
    }
    let mut funcs = Vec::new();
    e.collect_funcs(&mut funcs);
    for f in funcs {
        if let Expr::Func { name, .. } = f {
            out.push((name.clone(), f.clone()));
        }
    }
    let mut syms = Vec::new();
    e.collect_syms(&mut syms);
    for s in syms {
        let sym = Expr::sym(&s);
        out.push((s, sym));
    }
}

/// Extent of an index-translation array, from the upper bound of the
/// iterator anchoring its first argument (an argument offset widens it).
fn uf_extent(domain: &Space, args: &[Expr]) -> Option<Expr> {
    let first = args.first()?;
    let it = first.base_iter()?;
    let upper = domain.constraints().iter().find(|c| {
        matches!(&c.lhs, Expr::Iter(n) if n == it) && matches!(c.op, RelOp::Lt | RelOp::Le)
    })?;
    let mut size = upper.rhs.clone();
    if upper.op == RelOp::Le {
        size = size + 1;
    }
    let off = first.int_offset();
    if off > 0 {
        size = size + off;
    }
    Some(size)
}

fn iter_bounds(domain: &Space, iter: &str) -> Option<(Expr, Expr)> {
    let lower = domain.constraints().iter().find(|c| {
        !c.exists
            && matches!(&c.rhs, Expr::Iter(n) if n == iter)
            && matches!(c.op, RelOp::Le | RelOp::Lt)
    })?;
    let upper = domain.constraints().iter().find(|c| {
        !c.exists
            && matches!(&c.lhs, Expr::Iter(n) if n == iter)
            && matches!(c.op, RelOp::Lt | RelOp::Le)
    })?;
    let mut lb = lower.lhs.clone();
    if lower.op == RelOp::Lt {
        lb = lb + 1;
    }
    let mut ub = upper.rhs.clone();
    if upper.op == RelOp::Le {
        ub = ub + 1;
    }
    Some((lb, ub))
}

fn rename_space(e: &Expr, from: &str, to: &str) -> Expr {
    match e {
        Expr::Access { space, index, bracket } => Expr::Access {
            space: if space == from { to.to_string() } else { space.clone() },
            index: index.iter().map(|x| rename_space(x, from, to)).collect(),
            bracket: *bracket,
        },
        Expr::Math { op, lhs, rhs } => Expr::Math {
            op: *op,
            lhs: Box::new(rename_space(lhs, from, to)),
            rhs: Box::new(rename_space(rhs, from, to)),
        },
        Expr::Func { name, args } => Expr::Func {
            name: name.clone(),
            args: args.iter().map(|x| rename_space(x, from, to)).collect(),
        },
        other => other.clone(),
    }
}

/// Replace an iterator's range with the peeled `[lo, hi)` sub-range.
fn peel_space(space: &Space, iter: &str, lo: &Expr, hi: &Expr, k: usize) -> Space {
    let mut out = Space::new(format!("{}{}", space.name, k));
    for c in space.constraints() {
        if !c.exists
            && matches!(&c.rhs, Expr::Iter(n) if n == iter)
            && matches!(c.op, RelOp::Le | RelOp::Lt)
        {
            out.add(lo.clone().le(Expr::iter(iter)));
        } else if !c.exists
            && matches!(&c.lhs, Expr::Iter(n) if n == iter)
            && matches!(c.op, RelOp::Le | RelOp::Lt)
        {
            out.add(Expr::iter(iter).lt(hi.clone()));
        } else {
            out.add(c.clone());
        }
    }
    out
}

/// Per-routine graph builder.
#[derive(Debug, Clone)]
pub struct Builder {
    graph: FlowGraph,
    spaces: LinkedHashMap<String, (Space, String)>,
}

impl Builder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(RoutineConfig::new(name))
    }

    pub fn with_config(config: RoutineConfig) -> Self {
        Self { graph: FlowGraph::new(config), spaces: LinkedHashMap::new() }
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut FlowGraph {
        &mut self.graph
    }

    /// Declare a floating-point data space.
    pub fn data(&mut self, space: &Space) -> &mut Self {
        let ty = self.graph.config.data_type.clone();
        self.data_typed(space, ty)
    }

    /// Declare a data space with an explicit element type.
    pub fn data_typed(&mut self, space: &Space, ty: impl Into<String>) -> &mut Self {
        let ty = ty.into();
        self.spaces.insert(space.name.clone(), (space.clone(), ty.clone()));
        self.graph.add_data(DataNode::new(space.name.clone(), space.clone(), ty));
        self
    }

    /// Fold a computation into the graph.
    pub fn add(&mut self, comp: Comp) -> FlowResult<NodeId> {
        let (writes, reads) = stmt_io(&comp);
        let cyclic: Vec<String> = writes
            .iter()
            .map(|(l, _)| l.clone())
            .filter(|l| reads.iter().any(|(r, _)| r == l))
            .unique()
            .collect();
        if let Some(label) = cyclic.first() {
            if self.graph.config.accept_cycles {
                log::warn!(
                    "circular reference to '{}' in computation '{}'",
                    label,
                    comp.name
                );
            } else {
                return self.decompose(comp, label);
            }
        }
        self.insert_comp(comp)
    }

    fn insert_comp(&mut self, comp: Comp) -> FlowResult<NodeId> {
        let (writes, reads) = stmt_io(&comp);
        let mut node = CompNode::new(comp);
        for (label, a) in &reads {
            node.add_read(label, a.clone());
        }
        for (label, a) in &writes {
            node.add_write(label, a.clone());
        }

        // Index functions and symbolic constants from the domain; for a
        // function seen at several argument shifts, keep the widest.
        let mut extra: LinkedHashMap<String, Expr> = LinkedHashMap::new();
        for c in node.comp.space.constraints() {
            let mut funcs = Vec::new();
            c.lhs.collect_funcs(&mut funcs);
            c.rhs.collect_funcs(&mut funcs);
            for f in funcs {
                if let Expr::Func { name, args } = f {
                    let wider = match extra.get(name) {
                        Some(Expr::Func { args: prev, .. }) => {
                            args.first().map(|a| a.int_offset()).unwrap_or(0)
                                > prev.first().map(|a| a.int_offset()).unwrap_or(0)
                        }
                        _ => true,
                    };
                    if wider {
                        extra.insert(name.clone(), f.clone());
                    }
                }
            }
            let mut syms = Vec::new();
            c.lhs.collect_syms(&mut syms);
            c.rhs.collect_syms(&mut syms);
            for s in syms {
                let sym = Expr::sym(&s);
                extra.entry(s).or_insert(sym);
            }
        }

        let domain = node.comp.space.clone();
        let cid = self.graph.add_comp(node);
        for (label, a) in &reads {
            let did = self.ensure_data(label, a, &domain);
            self.graph.add_edge(did, cid, a.to_string());
        }
        for (label, a) in extra.iter() {
            let did = self.ensure_data(label, a, &domain);
            self.graph.add_edge(did, cid, a.to_string());
        }
        for (label, a) in &writes {
            let did = self.ensure_data(label, a, &domain);
            self.graph.add_edge(cid, did, a.to_string());
        }
        Ok(cid)
    }

    fn ensure_data(&mut self, label: &str, hint: &Expr, domain: &Space) -> NodeId {
        if let Some(id) = self.graph.lookup(label) {
            return id;
        }
        let index_ty = self.graph.config.index_type.clone();
        let data_ty = self.graph.config.data_type.clone();
        let node = if let Some((space, ty)) = self.spaces.get(label) {
            DataNode::new(label, space.clone(), ty.clone())
        } else {
            match hint {
                Expr::Func { args, .. } => {
                    let size =
                        uf_extent(domain, args).unwrap_or_else(|| domain.size());
                    DataNode::new(label, Space::data(label, vec![size]), index_ty)
                }
                Expr::Sym { .. } => DataNode::new(label, Space::scalar(label), index_ty),
                _ => {
                    log::warn!("no declared space for '{}', assuming scalar", label);
                    DataNode::new(label, Space::scalar(label), data_ty)
                }
            }
        };
        self.graph.add_data(node)
    }

    /// Break a producer/consumer cycle by peeling the domain along the
    /// smallest dimension with a nonzero reuse distance into first element,
    /// steady-state range, and last element, each writing a suffixed copy
    /// of the data space; the steady state reads the previous copy.
    fn decompose(&mut self, comp: Comp, label: &str) -> FlowResult<NodeId> {
        let (writes, reads) = stmt_io(&comp);
        let mut peel: Option<(usize, i64, String)> = None;
        for (wl, w) in &writes {
            if wl != label {
                continue;
            }
            let Expr::Access { index: wi, .. } = w else { continue };
            for (rl, r) in &reads {
                if rl != label {
                    continue;
                }
                let Expr::Access { index: ri, .. } = r else { continue };
                for d in 0..wi.len().min(ri.len()) {
                    let dist = (wi[d].int_offset() - ri[d].int_offset()).abs();
                    if dist == 0 || peel.as_ref().map(|(pd, _, _)| d >= *pd).unwrap_or(false) {
                        continue;
                    }
                    if let Some(it) = wi[d].base_iter() {
                        peel = Some((d, dist, it.to_string()));
                    }
                }
            }
        }
        let Some((_, dist, iter)) = peel else {
            return Err(BuilderError::cycle(format!(
                "circular reference to '{}' in '{}' has no nonzero reuse distance",
                label, comp.name
            ))
            .into());
        };
        let Some((lb, ub)) = iter_bounds(&comp.space, &iter) else {
            return Err(BuilderError::cycle(format!(
                "no bounds for iterator '{}' of '{}'",
                iter, comp.name
            ))
            .into());
        };

        let ranges = [
            (lb.clone(), lb.clone() + dist),
            (lb + dist, ub.clone() - dist),
            (ub.clone() - dist, ub),
        ];
        let mut last = None;
        for (k, (lo, hi)) in ranges.iter().enumerate() {
            let write_name = format!("{}{}", label, k);
            let read_name = if k == 0 {
                label.to_string()
            } else {
                format!("{}{}", label, k - 1)
            };
            if let Some((orig, ty)) = self.spaces.get(label).cloned() {
                let mut copy = orig;
                copy.name = write_name.clone();
                self.spaces.insert(write_name.clone(), (copy, ty));
            }
            let mut sub = Comp::new(
                format!("{}{}", comp.name, k),
                peel_space(&comp.space, &iter, lo, hi, k),
            );
            for (s, g) in comp.stmts.iter().zip(&comp.guards) {
                let stmt = match s {
                    Expr::Math { op, lhs, rhs } if op.is_assign() => Expr::Math {
                        op: *op,
                        lhs: Box::new(rename_space(lhs, label, &write_name)),
                        rhs: Box::new(rename_space(rhs, label, &read_name)),
                    },
                    other => rename_space(other, label, &read_name),
                };
                let guard = g.as_ref().map(|c| Constr {
                    lhs: rename_space(&c.lhs, label, &read_name),
                    op: c.op,
                    rhs: rename_space(&c.rhs, label, &read_name),
                    exists: c.exists,
                });
                sub.push(guard, stmt);
            }
            last = Some(self.insert_comp(sub)?);
        }
        Ok(last.unwrap_or(NodeId(0)))
    }

    /// Fuse the named computations left to right.
    pub fn fuse(&mut self, names: &[&str]) -> FlowResult<()> {
        let mut current = match names.first() {
            Some(n) => n.to_string(),
            None => return Ok(()),
        };
        for next in &names[1..] {
            self.graph.fuse(&current, next)?;
            current = format!("{}+{}", current, next);
        }
        Ok(())
    }

    /// Tile an iterator of a registered computation. The computation runs
    /// over the tiled space, its schedules are rebuilt over the new tuple,
    /// and the space relation is recorded as a graph node.
    pub fn tile(&mut self, label: &str, iter: &str, size: i64, outer: &str) -> FlowResult<NodeId> {
        let id = self
            .graph
            .lookup(label)
            .ok_or_else(|| BuilderError::unknown(format!("no computation '{}'", label)))?;
        let node = self
            .graph
            .comp_mut(id)
            .ok_or_else(|| BuilderError::unknown(format!("'{}' is not a computation", label)))?;
        let rel = node.comp.space.tile(iter, size, outer);
        node.comp.space = rel.dest.clone();
        let name = node.comp.name.clone();
        let iters = node.comp.space.iterators();
        for (k, sched) in node.comp.scheds.iter_mut().enumerate() {
            *sched = Sched::identity(format!("r{}{}", k, name), iters.clone(), k as i64);
        }
        Ok(self.graph.add_rel(RelNode::new(rel)))
    }

    /// Annotate computation nodes with traffic and operation estimates.
    pub fn perfmodel(&mut self) -> FlowResult<()> {
        PerfModelPass::new().walk(&mut self.graph)
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.graph.to_json()
    }

    /// Write the graph summary as pretty-printed JSON.
    pub fn print<W: Write>(&self, w: &mut W) -> FlowResult<()> {
        let text = serde_json::to_string_pretty(&self.graph.to_json())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        writeln!(w, "{}", text)?;
        Ok(())
    }

    /// Harmonize schedules, shrink footprints, and render the routine.
    pub fn codegen(&mut self) -> FlowResult<String> {
        SchedulePass::new().walk(&mut self.graph)?;
        DataReducePass::new().walk(&mut self.graph)?;
        CodegenPass::new().run(&mut self.graph)
    }

    /// Render to a file; an `.o` path additionally invokes the system
    /// compiler on the emitted source.
    pub fn codegen_to<P: AsRef<Path>>(&mut self, path: P) -> FlowResult<()> {
        let code = self.codegen()?;
        let path = path.as_ref();
        if path.extension().map(|e| e == "o").unwrap_or(false) {
            let src = path.with_extension("c");
            std::fs::write(&src, &code)?;
            let status = Command::new("cc")
                .arg("-c")
                .arg("-O3")
                .arg("-fopenmp")
                .arg(&src)
                .arg("-o")
                .arg(path)
                .status()?;
            if !status.success() {
                return Err(CodegenError {
                    message: format!("cc failed on '{}'", src.display()),
                    kind: CodegenErrorKind::CompilerFailed,
                }
                .into());
            }
        } else {
            std::fs::write(path, &code)?;
        }
        Ok(())
    }
}
