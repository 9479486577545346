//! Dataflow graph: nodes, edges, and graph surgery.

pub mod flow;
pub mod node;

pub use flow::{FlowGraph, RoutineConfig};
pub use node::{CompNode, DataNode, EdgeId, MemAlloc, Node, NodeId, RelNode};
