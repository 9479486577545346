//! Performance-model pass: annotates each computation node with estimated
//! data traffic and operation counts.
//!
//! Traffic is the symbolic sum of non-scalar incoming/outgoing data sizes,
//! split by element type (index vs floating-point). Work is a flat count of
//! arithmetic operators in the statement text, with transcendental calls
//! weighted at ten, split into float and index operations by the type of
//! the statement's target; fused children contribute through the merged
//! node.

use crate::algebra::{Expr, TRANSCENDENTALS};
use crate::graph::{FlowGraph, NodeId};
use crate::utils::errors::FlowResult;

use super::GraphVisitor;

#[derive(Debug, Default)]
pub struct PerfModelPass;

impl PerfModelPass {
    pub fn new() -> Self {
        Self
    }
}

const TRANSCENDENTAL_WEIGHT: usize = 10;

fn is_ident_byte(b: u8) -> bool {
    b == b'_' || b.is_ascii_alphanumeric()
}

/// Occurrences of `name` as a whole identifier; `logs` is not a `log` call.
fn count_calls(text: &str, name: &str) -> usize {
    let bytes = text.as_bytes();
    let mut count = 0;
    let mut from = 0;
    while let Some(pos) = text[from..].find(name) {
        let at = from + pos;
        let end = at + name.len();
        if (at == 0 || !is_ident_byte(bytes[at - 1]))
            && (end == bytes.len() || !is_ident_byte(bytes[end]))
        {
            count += 1;
        }
        from = end;
    }
    count
}

/// Operator count of one statement's rendered text.
fn flop_count(stmt: &Expr) -> usize {
    let text = stmt.to_string();
    let mut count = text.chars().filter(|c| "+-*/%".contains(*c)).count();
    for name in TRANSCENDENTALS {
        count += count_calls(&text, name) * TRANSCENDENTAL_WEIGHT;
    }
    count
}

/// Label of the datum a statement assigns into, if any.
fn target_of(stmt: &Expr) -> Option<&str> {
    match stmt {
        Expr::Math { op, lhs, .. } if op.is_assign() => match &**lhs {
            Expr::Access { space, .. } => Some(space),
            Expr::Func { name, .. } => Some(name),
            Expr::Sym { name, .. } => Some(name),
            _ => None,
        },
        _ => None,
    }
}

fn sum_sizes(sizes: Vec<Expr>) -> String {
    let mut it = sizes.into_iter();
    match it.next() {
        None => "0".to_string(),
        Some(first) => it.fold(first, |acc, s| acc + s).to_string(),
    }
}

impl GraphVisitor for PerfModelPass {
    fn visit_comp(&mut self, graph: &mut FlowGraph, id: NodeId) -> FlowResult<()> {
        let mut isize_in = Vec::new();
        let mut fsize_in = Vec::new();
        let mut isize_out = Vec::new();
        let mut fsize_out = Vec::new();
        let mut streams_in = 0usize;
        let mut streams_out = 0usize;

        for (src, _) in graph.in_edges(id) {
            if let Some(d) = graph.data(src) {
                if d.is_scalar() {
                    continue;
                }
                streams_in += 1;
                if d.is_int() {
                    isize_in.push(d.size.clone());
                } else {
                    fsize_in.push(d.size.clone());
                }
            }
        }
        for (dest, _) in graph.out_edges(id) {
            if let Some(d) = graph.data(dest) {
                if d.is_scalar() {
                    continue;
                }
                streams_out += 1;
                if d.is_int() {
                    isize_out.push(d.size.clone());
                } else {
                    fsize_out.push(d.size.clone());
                }
            }
        }

        // Operations writing an index-typed datum count as index work.
        let int_labels: Vec<String> = graph
            .data_ids()
            .into_iter()
            .filter_map(|d| graph.data(d))
            .filter(|d| d.is_int())
            .map(|d| d.label.clone())
            .collect();

        let Some(node) = graph.comp_mut(id) else {
            return Ok(());
        };
        let mut flops = 0usize;
        let mut iops = 0usize;
        for stmt in node.all_comps().iter().flat_map(|c| c.stmts.iter()) {
            let count = flop_count(stmt);
            match target_of(stmt) {
                Some(label) if int_labels.iter().any(|l| l == label) => iops += count,
                _ => flops += count,
            }
        }

        node.attrs.insert("isize_in".to_string(), sum_sizes(isize_in));
        node.attrs.insert("fsize_in".to_string(), sum_sizes(fsize_in));
        node.attrs.insert("isize_out".to_string(), sum_sizes(isize_out));
        node.attrs.insert("fsize_out".to_string(), sum_sizes(fsize_out));
        node.attrs.insert("streams_in".to_string(), streams_in.to_string());
        node.attrs.insert("streams_out".to_string(), streams_out.to_string());
        node.attrs.insert("flops".to_string(), flops.to_string());
        node.attrs.insert("iops".to_string(), iops.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CompNode, DataNode, RoutineConfig};
    use crate::model::{Comp, Space};

    #[test]
    fn test_spmv_traffic_and_flops() {
        let mut g = FlowGraph::new(RoutineConfig::new("t"));
        let i = Expr::iter("i");
        let n = Expr::iter("n");
        let j = Expr::iter("j");
        let space = Space::new("Icsr")
            .with(i.clone().in_range(0, Expr::sym("N")))
            .with(n.clone().in_range(
                Expr::func("rp", vec![i.clone()]),
                Expr::func("rp", vec![i.clone() + 1]),
            ))
            .with(j.clone().equals(Expr::func("col", vec![n.clone()])));
        let y = Space::data("y", vec![Expr::sym("N")]);
        let val = Space::data("val", vec![Expr::sym("NNZ")]);
        let x = Space::data("x", vec![Expr::sym("M")]);
        let comp = Comp::new("spmv", space)
            .stmt(y.idx(vec![i]).add_assign(val.idx(vec![n.clone()]) * x.idx(vec![j])));
        let rp = g.add_data(DataNode::new(
            "rp",
            Space::data("rp", vec![Expr::sym("N") + 1]),
            "unsigned",
        ));
        let vid = g.add_data(DataNode::new("val", val, "float"));
        let xid = g.add_data(DataNode::new("x", x, "float"));
        let yid = g.add_data(DataNode::new("y", y, "float"));
        let cid = g.add_comp(CompNode::new(comp));
        g.add_edge(rp, cid, "rp(i)");
        g.add_edge(vid, cid, "val[n]");
        g.add_edge(xid, cid, "x[j]");
        g.add_edge(cid, yid, "y[i]");
        PerfModelPass::new().walk(&mut g).unwrap();
        let attrs = g.comp(cid).unwrap().attrs.clone();
        assert_eq!(attrs.get("isize_in").unwrap(), "N+1");
        assert_eq!(attrs.get("fsize_in").unwrap(), "NNZ+M");
        assert_eq!(attrs.get("fsize_out").unwrap(), "N");
        assert_eq!(attrs.get("isize_out").unwrap(), "0");
        assert_eq!(attrs.get("streams_in").unwrap(), "3");
        assert_eq!(attrs.get("streams_out").unwrap(), "1");
        // y[i]+=val[n]*x[j] counts one += and one *.
        assert_eq!(attrs.get("flops").unwrap(), "2");
        assert_eq!(attrs.get("iops").unwrap(), "0");
    }

    #[test]
    fn test_transcendental_weight_matches_whole_names() {
        let mut g = FlowGraph::new(RoutineConfig::new("t"));
        let i = Expr::iter("i");
        let space = Space::new("I").with(i.clone().in_range(0, Expr::sym("N")));
        let y = Space::data("y", vec![Expr::sym("N")]);
        let logs = Space::data("logs", vec![Expr::sym("N")]);
        let comp = Comp::new("expv", space)
            .stmt(y.idx(vec![i.clone()]).assign(Expr::func("exp", vec![logs.idx(vec![i])])));
        let lid = g.add_data(DataNode::new("logs", logs, "float"));
        let yid = g.add_data(DataNode::new("y", y, "float"));
        let cid = g.add_comp(CompNode::new(comp));
        g.add_edge(lid, cid, "logs[i]");
        g.add_edge(cid, yid, "y[i]");
        PerfModelPass::new().walk(&mut g).unwrap();
        let attrs = g.comp(cid).unwrap().attrs.clone();
        // One exp call; the "logs" identifier is not a log call.
        assert_eq!(attrs.get("flops").unwrap(), "10");
    }

    #[test]
    fn test_index_work_counts_as_iops() {
        let mut g = FlowGraph::new(RoutineConfig::new("t"));
        let n = Expr::iter("n");
        let i = Expr::iter("i");
        let space = Space::new("Icoo")
            .with(n.clone().in_range(0, Expr::sym("NNZ")))
            .with(i.clone().equals(Expr::func("row", vec![n.clone()])));
        let comp = Comp::new("count", space)
            .stmt(Expr::func("rp", vec![i + 1]).assign(n + 1));
        let rp = g.add_data(DataNode::new(
            "rp",
            Space::data("rp", vec![Expr::sym("N") + 1]),
            "unsigned",
        ));
        let cid = g.add_comp(CompNode::new(comp));
        g.add_edge(cid, rp, "rp(i+1)");
        PerfModelPass::new().walk(&mut g).unwrap();
        let attrs = g.comp(cid).unwrap().attrs.clone();
        // rp(i+1)=n+1 writes an index array: two + operators, no flops.
        assert_eq!(attrs.get("iops").unwrap(), "2");
        assert_eq!(attrs.get("flops").unwrap(), "0");
    }
}
