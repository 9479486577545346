//! Data-reduction pass: shrinks the footprint of intermediate data.
//!
//! A data node whose sole producer is also its sole consumer is private to
//! that (usually fused) computation. Any index dimension touched only at
//! offset zero carries no value across iterations and is dropped from the
//! declared rank, the statements, and the recorded accesses; a per-iteration
//! scratch vector collapses to a scalar this way.

use crate::algebra::Expr;
use crate::graph::{FlowGraph, NodeId};
use crate::model::Space;
use crate::utils::errors::FlowResult;

use super::GraphVisitor;

#[derive(Debug, Default)]
pub struct DataReducePass;

impl DataReducePass {
    pub fn new() -> Self {
        Self
    }
}

impl GraphVisitor for DataReducePass {
    fn visit_data(&mut self, graph: &mut FlowGraph, id: NodeId) -> FlowResult<()> {
        if graph.is_output(id) {
            return Ok(());
        }
        let ins = graph.in_edges(id);
        let outs = graph.out_edges(id);
        if ins.len() != 1 || outs.len() != 1 || ins[0].0 != outs[0].0 {
            return Ok(());
        }
        let owner = ins[0].0;
        let label = graph.node(id).label().to_string();

        let accesses = {
            let Some(node) = graph.comp(owner) else {
                return Ok(());
            };
            let mut v = node.accesses_of(&label, false);
            v.extend(node.accesses_of(&label, true));
            v
        };
        let Some(rank) = accesses
            .iter()
            .map(|a| match a {
                Expr::Access { index, .. } => index.len(),
                _ => 0,
            })
            .max()
        else {
            return Ok(());
        };
        if rank == 0 {
            return Ok(());
        }

        let mut dropped = Vec::new();
        for d in 0..rank {
            let max_off = accesses
                .iter()
                .filter_map(|a| match a {
                    Expr::Access { index, .. } => index.get(d).map(|x| x.int_offset().abs()),
                    _ => None,
                })
                .max()
                .unwrap_or(0);
            if max_off == 0 {
                dropped.push(d);
            }
        }
        if dropped.is_empty() {
            return Ok(());
        }

        {
            let Some(data) = graph.data_mut(id) else {
                return Ok(());
            };
            let dims = data.space.dims();
            if dims.len() != rank {
                return Ok(());
            }
            let kept: Vec<Expr> = dims
                .into_iter()
                .enumerate()
                .filter(|(d, _)| !dropped.contains(d))
                .map(|(_, e)| e)
                .collect();
            data.attrs.insert("reduced".to_string(), data.size.to_string());
            data.space = Space::data(label.clone(), kept);
            data.size = data.space.size();
        }

        // Rewrite the owning computation's statements and recorded accesses
        // to the reduced rank.
        if let Some(node) = graph.comp_mut(owner) {
            for comp in std::iter::once(&mut node.comp)
                .chain(node.children.iter_mut().map(|c| &mut c.comp))
            {
                for stmt in &mut comp.stmts {
                    *stmt = strip_dims(stmt, &label, &dropped);
                }
            }
            for map in [&mut node.reads, &mut node.writes] {
                if let Some(list) = map.get_mut(&label) {
                    for a in list.iter_mut() {
                        *a = strip_dims(a, &label, &dropped);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Remove the given index positions from every access to `label`.
fn strip_dims(e: &Expr, label: &str, dropped: &[usize]) -> Expr {
    match e {
        Expr::Access { space, index, bracket } if space == label => {
            let kept: Vec<Expr> = index
                .iter()
                .enumerate()
                .filter(|(d, _)| !dropped.contains(d))
                .map(|(_, x)| strip_dims(x, label, dropped))
                .collect();
            // A fully collapsed access renders as the bare name.
            let bracket = *bracket && !kept.is_empty();
            Expr::Access { space: space.clone(), index: kept, bracket }
        }
        Expr::Access { space, index, bracket } => Expr::Access {
            space: space.clone(),
            index: index.iter().map(|x| strip_dims(x, label, dropped)).collect(),
            bracket: *bracket,
        },
        Expr::Math { op, lhs, rhs } => Expr::Math {
            op: *op,
            lhs: Box::new(strip_dims(lhs, label, dropped)),
            rhs: Box::new(strip_dims(rhs, label, dropped)),
        },
        Expr::Func { name, args } => Expr::Func {
            name: name.clone(),
            args: args.iter().map(|x| strip_dims(x, label, dropped)).collect(),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CompNode, DataNode, RoutineConfig};
    use crate::model::{Comp, Space};

    #[test]
    fn test_private_vector_collapses_to_scalar() {
        let mut g = FlowGraph::new(RoutineConfig::new("t"));
        let i = Expr::iter("i");
        let space = Space::new("I").with(i.clone().in_range(0, Expr::sym("N")));
        let s = Space::data("s", vec![Expr::sym("N")]);
        let y = Space::data("y", vec![Expr::sym("N")]);
        let produce = Comp::new("p", space.clone()).stmt(s.at(vec![i.clone()]).assign(2));
        let consume =
            Comp::new("q", space).stmt(y.at(vec![i.clone()]).assign(s.at(vec![i.clone()])));
        let mut node = CompNode::new(produce);
        node.add_write("s", s.at(vec![i.clone()]));
        let mut other = CompNode::new(consume);
        other.add_read("s", s.at(vec![i.clone()]));
        other.add_write("y", y.at(vec![i.clone()]));
        node.absorb(other);
        let sid = g.add_data(DataNode::new("s", s.clone(), "float"));
        let yid = g.add_data(DataNode::new("y", y, "float"));
        let cid = g.add_comp(node);
        g.add_edge(cid, sid, "s(i)");
        g.add_edge(sid, cid, "s(i)");
        g.add_edge(cid, yid, "y(i)");
        DataReducePass::new().walk(&mut g).unwrap();
        let d = g.data(sid).unwrap();
        assert!(d.is_scalar());
        assert_eq!(d.attrs.get("reduced").unwrap(), "N");
        // Statements now reference the bare scalar.
        let texts: Vec<String> = g
            .comp(cid)
            .unwrap()
            .all_comps()
            .iter()
            .flat_map(|c| c.stmts.iter().map(|s| s.to_string()))
            .collect();
        assert_eq!(texts, vec!["s=2", "y(i)=s"]);
        // The output keeps its rank.
        assert!(!g.data(yid).unwrap().is_scalar());
    }

    #[test]
    fn test_carried_dimension_survives() {
        let mut g = FlowGraph::new(RoutineConfig::new("t"));
        let i = Expr::iter("i");
        let space = Space::new("I").with(i.clone().in_range(0, Expr::sym("N")));
        let a = Space::data("a", vec![Expr::sym("N")]);
        let b = Space::data("b", vec![Expr::sym("N")]);
        let produce = Comp::new("p", space.clone()).stmt(a.at(vec![i.clone()]).assign(1));
        let consume =
            Comp::new("q", space).stmt(b.at(vec![i.clone()]).assign(a.at(vec![i.clone() - 1])));
        let mut node = CompNode::new(produce);
        node.add_write("a", a.at(vec![i.clone()]));
        let mut other = CompNode::new(consume);
        other.add_read("a", a.at(vec![i.clone() - 1]));
        other.add_write("b", b.at(vec![i.clone()]));
        node.absorb(other);
        let aid = g.add_data(DataNode::new("a", a, "float"));
        let bid = g.add_data(DataNode::new("b", b, "float"));
        let cid = g.add_comp(node);
        g.add_edge(cid, aid, "a(i)");
        g.add_edge(aid, cid, "a(i-1)");
        g.add_edge(cid, bid, "b(i)");
        DataReducePass::new().walk(&mut g).unwrap();
        // Offset -1 means cross-iteration reuse; the dimension stays.
        assert!(!g.data(aid).unwrap().is_scalar());
    }
}
