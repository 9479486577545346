//! Graph passes: schedule harmonization, footprint reduction, cost
//! annotation, and final code rendering.

pub mod codegen;
pub mod datareduce;
pub mod perfmodel;
pub mod schedule;

pub use codegen::CodegenPass;
pub use datareduce::DataReducePass;
pub use perfmodel::PerfModelPass;
pub use schedule::SchedulePass;

use crate::graph::{FlowGraph, NodeId};
use crate::utils::errors::FlowResult;

/// A pass over the graph. Every live node is visited exactly once, data
/// nodes before computation nodes, each group in insertion order. Ordering
/// of generated code comes from the schedules, never from traversal order.
pub trait GraphVisitor {
    fn setup(&mut self, _graph: &mut FlowGraph) -> FlowResult<()> {
        Ok(())
    }

    fn visit_data(&mut self, _graph: &mut FlowGraph, _id: NodeId) -> FlowResult<()> {
        Ok(())
    }

    fn visit_comp(&mut self, _graph: &mut FlowGraph, _id: NodeId) -> FlowResult<()> {
        Ok(())
    }

    fn finish(&mut self, _graph: &mut FlowGraph) -> FlowResult<()> {
        Ok(())
    }

    fn walk(&mut self, graph: &mut FlowGraph) -> FlowResult<()> {
        self.setup(graph)?;
        for id in graph.data_ids() {
            self.visit_data(graph, id)?;
        }
        for id in graph.comp_ids() {
            self.visit_comp(graph, id)?;
        }
        self.finish(graph)
    }
}
