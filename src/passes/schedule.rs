//! Schedule pass: harmonizes the per-statement scheduling functions of a
//! fused computation node so that all constituents share one lexicographic
//! ordering.
//!
//! The pass gathers every constituent's schedule tuple (trailing literal
//! ordinals stripped) and finds the deepest common loop prefix. Tuples with
//! no common prefix get their leading dimension interchanged: each tuple's
//! leading iterator is aligned with its position in the deepest tuple, so a
//! dense traversal rides along inside a sparse one. The pass then inserts
//! one synthetic per-group ordinal at the common level when the tuples
//! differ, inserts a monotonic counter dimension below any loop level
//! carrying a nonzero write/read offset, pads all tuples to a common
//! length, and appends a trailing per-statement tiebreak. Statements that
//! differed only in their trailing ordinal keep their relative order.

use std::collections::BTreeSet;

use crate::builder::stmt_io;
use crate::graph::{CompNode, FlowGraph, NodeId};
use crate::model::SchedDim;
use crate::utils::errors::FlowResult;

use super::GraphVisitor;

#[derive(Debug, Default)]
pub struct SchedulePass;

impl SchedulePass {
    pub fn new() -> Self {
        Self
    }
}

impl GraphVisitor for SchedulePass {
    fn visit_comp(&mut self, graph: &mut FlowGraph, id: NodeId) -> FlowResult<()> {
        let Some(node) = graph.comp_mut(id) else {
            return Ok(());
        };
        if node.children.is_empty() || node.attrs.contains_key("fusion") {
            return Ok(());
        }
        harmonize(node)
    }
}

/// Per-dimension integer offsets of an access.
fn access_offsets(e: &crate::algebra::Expr) -> Vec<i64> {
    use crate::algebra::Expr;
    match e {
        Expr::Access { index, .. } => index.iter().map(|x| x.int_offset()).collect(),
        Expr::Func { args, .. } => args.iter().map(|x| x.int_offset()).collect(),
        _ => Vec::new(),
    }
}

/// Depth of the loop prefix shared by every tuple.
fn common_level(tuples: &[Vec<SchedDim>]) -> usize {
    let mut level = 0;
    loop {
        let Some(SchedDim::It(name)) = tuples[0].get(level) else {
            return level;
        };
        for t in &tuples[1..] {
            match t.get(level) {
                Some(SchedDim::It(n)) if n == name => {}
                _ => return level,
            }
        }
        level += 1;
    }
}

fn harmonize(node: &mut CompNode) -> FlowResult<()> {
    let groups: Vec<crate::model::Comp> =
        node.all_comps().into_iter().cloned().collect();

    // Flattened schedule tuples in declaration order, trailing ordinals
    // stripped.
    let mut tuples: Vec<Vec<SchedDim>> = Vec::new();
    let mut owner: Vec<usize> = Vec::new();
    for (g, comp) in groups.iter().enumerate() {
        for sched in &comp.scheds {
            let mut t = sched.dest.clone();
            while matches!(t.last(), Some(SchedDim::Lit(_))) {
                t.pop();
            }
            tuples.push(t);
            owner.push(g);
        }
    }

    // Per-group data traffic, for classification and carried-dependency
    // detection.
    let io: Vec<_> = groups.iter().map(stmt_io).collect();
    let write_labels: Vec<BTreeSet<&str>> = io
        .iter()
        .map(|(w, _)| w.iter().map(|(l, _)| l.as_str()).collect())
        .collect();
    let read_labels: Vec<BTreeSet<&str>> = io
        .iter()
        .map(|(_, r)| r.iter().map(|(l, _)| l.as_str()).collect())
        .collect();

    let identical = tuples.windows(2).all(|w| w[0] == w[1]);
    if !identical {
        let mut level = common_level(&tuples);
        if level == 0 {
            // No shared leading loop: interchange by aligning each tuple's
            // leading iterator with its position in the deepest tuple.
            let base = tuples.iter().max_by_key(|t| t.len()).cloned().unwrap_or_default();
            for t in tuples.iter_mut() {
                if let Some(SchedDim::It(lead)) = t.first() {
                    let pos = base
                        .iter()
                        .position(|d| matches!(d, SchedDim::It(n) if n == lead));
                    if let Some(p) = pos.filter(|p| *p > 0) {
                        let mut aligned = base[..p].to_vec();
                        aligned.append(t);
                        *t = aligned;
                    }
                }
            }
            level = common_level(&tuples);
        }
        for (t, &g) in tuples.iter_mut().zip(&owner) {
            t.insert(level.min(t.len()), SchedDim::Lit(g as i64));
        }
    }

    // A write in one group read by another group at a different offset is a
    // loop-carried dependency: the reader gets a counter dimension below
    // the carrying loop, incrementing per affected statement.
    let mut carried: Vec<Option<String>> = vec![None; groups.len()];
    for gw in 0..groups.len() {
        for gr in 0..groups.len() {
            if gw == gr {
                continue;
            }
            for label in write_labels[gw].intersection(&read_labels[gr]) {
                for (wl, wa) in &io[gw].0 {
                    if wl != label {
                        continue;
                    }
                    for (rl, ra) in &io[gr].1 {
                        if rl != label {
                            continue;
                        }
                        let wo = access_offsets(wa);
                        let ro = access_offsets(ra);
                        for d in 0..wo.len().min(ro.len()) {
                            if wo[d] != ro[d] && carried[gr].is_none() {
                                if let crate::algebra::Expr::Access { index, .. } = ra {
                                    carried[gr] =
                                        index[d].base_iter().map(|s| s.to_string());
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    let mut counter = 0i64;
    for (k, t) in tuples.iter_mut().enumerate() {
        if let Some(iter) = &carried[owner[k]] {
            let pos = t
                .iter()
                .position(|d| matches!(d, SchedDim::It(n) if n == iter))
                .map(|p| p + 1)
                .unwrap_or(t.len());
            counter += 1;
            t.insert(pos, SchedDim::Lit(counter));
        }
    }

    // Pad to a common length, then break remaining ties with the global
    // declaration ordinal.
    let maxlen = tuples.iter().map(|t| t.len()).max().unwrap_or(0);
    for (k, t) in tuples.iter_mut().enumerate() {
        while t.len() < maxlen {
            t.push(SchedDim::Lit(0));
        }
        t.push(SchedDim::Lit(k as i64));
    }

    // Write the harmonized tuples back in the same flattened order.
    let mut it = tuples.into_iter();
    for comp in
        std::iter::once(&mut node.comp).chain(node.children.iter_mut().map(|c| &mut c.comp))
    {
        for sched in &mut comp.scheds {
            if let Some(t) = it.next() {
                sched.dest = t;
            }
        }
    }

    let mut kinds: Vec<&str> = Vec::new();
    let pairs = |a: &[BTreeSet<&str>], b: &[BTreeSet<&str>]| {
        (0..a.len()).any(|g| {
            (0..b.len()).any(|h| g != h && a[g].intersection(&b[h]).next().is_some())
        })
    };
    if pairs(&write_labels, &read_labels) {
        kinds.push("producer-consumer");
    }
    if pairs(&read_labels, &read_labels) {
        kinds.push("reduction");
    }
    if pairs(&write_labels, &write_labels) {
        kinds.push("hazard");
    }
    if kinds.is_empty() {
        kinds.push("independent");
    }
    node.attrs.insert("fusion".to_string(), kinds.join(","));
    Ok(())
}

/// Strict lexicographic comparison of schedule tuples. Iterator dimensions
/// at the same position denote the same loop and compare equal; a literal
/// sorts before any iterator at the same position.
pub fn lex_lt(a: &[SchedDim], b: &[SchedDim]) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        match (x, y) {
            (SchedDim::Lit(u), SchedDim::Lit(v)) if u != v => return u < v,
            (SchedDim::Lit(_), SchedDim::It(_)) => return true,
            (SchedDim::It(_), SchedDim::Lit(_)) => return false,
            _ => {}
        }
    }
    a.len() < b.len()
}
