//! The dataflow graph: an arena of data/computation/relation nodes with
//! labeled read/write edges.

use linked_hash_map::LinkedHashMap;
use serde_json::json;

use crate::utils::errors::{BuilderError, FlowResult};

use super::node::{CompNode, DataNode, EdgeId, Node, NodeId, RelNode};

/// Per-routine configuration carried by the graph. Replaces any notion of
/// process-global state: two routines built side by side never share
/// registries.
#[derive(Debug, Clone)]
pub struct RoutineConfig {
    /// Routine (and graph) name
    pub name: String,
    /// Name of the datum returned by the routine; empty for `void`
    pub return_name: String,
    /// C type for floating-point data
    pub data_type: String,
    /// C type for index data and induction variables
    pub index_type: String,
    /// Default initializer for allocated temporaries
    pub default_val: String,
    /// Labels forced to output status
    pub outputs: Vec<String>,
    /// Tile size hint recorded in the graph summary
    pub tile_size: u32,
    /// OpenMP schedule clause; empty disables pragma injection
    pub omp_sched: String,
    /// Accept producer/consumer cycles with a warning instead of
    /// decomposing them
    pub accept_cycles: bool,
    /// Emit timing scaffolding
    pub profile: bool,
}

impl RoutineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_name: String::new(),
            data_type: "float".to_string(),
            index_type: "unsigned".to_string(),
            default_val: String::new(),
            outputs: Vec::new(),
            tile_size: 0,
            omp_sched: String::new(),
            accept_cycles: true,
            profile: false,
        }
    }

    /// Datum the routine returns.
    pub fn returns(mut self, name: impl Into<String>) -> Self {
        self.return_name = name.into();
        self
    }

    /// Labels that are outputs even if something reads them later.
    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Default initializer for temporaries ("0" zero-fills).
    pub fn default_value(mut self, val: impl Into<String>) -> Self {
        self.default_val = val.into();
        self
    }

    /// Use double-precision data.
    pub fn double_precision(mut self) -> Self {
        self.data_type = "double".to_string();
        self
    }

    /// OpenMP schedule for parallel nests.
    pub fn omp(mut self, sched: impl Into<String>) -> Self {
        self.omp_sched = sched.into();
        self
    }

    /// Decompose producer/consumer cycles instead of accepting them.
    pub fn decompose_cycles(mut self) -> Self {
        self.accept_cycles = false;
        self
    }

    /// C return type of the routine.
    pub fn return_type(&self) -> &str {
        if self.return_name.is_empty() {
            "void"
        } else {
            &self.data_type
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    label: String,
    src: NodeId,
    dest: NodeId,
    alive: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    node: Node,
    alive: bool,
}

/// Arena-backed dataflow graph. Nodes and edges are referenced by integer
/// ids; removal marks slots dead rather than shifting indices, so held ids
/// stay valid across surgery.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub config: RoutineConfig,
    nodes: Vec<Slot>,
    edges: Vec<Edge>,
    symtable: LinkedHashMap<String, NodeId>,
}

impl FlowGraph {
    pub fn new(config: RoutineConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            edges: Vec::new(),
            symtable: LinkedHashMap::new(),
        }
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let label = node.label().to_string();
        // Re-adding a label replaces the node in place, keeping its id and
        // edges; a refined data description does not disturb the topology.
        if let Some(&id) = self.symtable.get(&label) {
            self.nodes[id.0 as usize] = Slot { node, alive: true };
            return id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Slot { node, alive: true });
        self.symtable.insert(label, id);
        id
    }

    pub fn add_data(&mut self, node: DataNode) -> NodeId {
        self.insert(Node::Data(node))
    }

    pub fn add_comp(&mut self, node: CompNode) -> NodeId {
        self.insert(Node::Comp(node))
    }

    pub fn add_rel(&mut self, node: RelNode) -> NodeId {
        self.insert(Node::Rel(node))
    }

    /// Add an edge; an existing live edge between the same pair is reused.
    pub fn add_edge(&mut self, src: NodeId, dest: NodeId, label: impl Into<String>) -> EdgeId {
        if let Some(id) = self.edge_between(src, dest) {
            return id;
        }
        let id = EdgeId(self.edges.len() as u32);
        self.edges.push(Edge { label: label.into(), src, dest, alive: true });
        id
    }

    pub fn edge_between(&self, src: NodeId, dest: NodeId) -> Option<EdgeId> {
        self.edges
            .iter()
            .position(|e| e.alive && e.src == src && e.dest == dest)
            .map(|k| EdgeId(k as u32))
    }

    pub fn lookup(&self, label: &str) -> Option<NodeId> {
        self.symtable.get(label).copied().filter(|id| self.nodes[id.0 as usize].alive)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize].node
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize].node
    }

    pub fn data(&self, id: NodeId) -> Option<&DataNode> {
        match self.node(id) {
            Node::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn data_mut(&mut self, id: NodeId) -> Option<&mut DataNode> {
        match self.node_mut(id) {
            Node::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn comp(&self, id: NodeId) -> Option<&CompNode> {
        match self.node(id) {
            Node::Comp(c) => Some(c),
            _ => None,
        }
    }

    pub fn comp_mut(&mut self, id: NodeId) -> Option<&mut CompNode> {
        match self.node_mut(id) {
            Node::Comp(c) => Some(c),
            _ => None,
        }
    }

    /// Remove a node and its incident edges.
    pub fn remove(&mut self, id: NodeId) {
        let slot = &mut self.nodes[id.0 as usize];
        if !slot.alive {
            return;
        }
        slot.alive = false;
        let label = slot.node.label().to_string();
        self.symtable.remove(&label);
        for e in &mut self.edges {
            if e.alive && (e.src == id || e.dest == id) {
                e.alive = false;
            }
        }
    }

    /// Live data node ids, in insertion order.
    pub fn data_ids(&self) -> Vec<NodeId> {
        self.ordered_ids(|n| matches!(n, Node::Data(_)))
    }

    /// Live computation node ids, in insertion order.
    pub fn comp_ids(&self) -> Vec<NodeId> {
        self.ordered_ids(|n| matches!(n, Node::Comp(_)))
    }

    fn ordered_ids(&self, pred: impl Fn(&Node) -> bool) -> Vec<NodeId> {
        self.symtable
            .values()
            .copied()
            .filter(|id| self.nodes[id.0 as usize].alive && pred(&self.nodes[id.0 as usize].node))
            .collect()
    }

    pub fn in_edges(&self, id: NodeId) -> Vec<(NodeId, String)> {
        self.edges
            .iter()
            .filter(|e| e.alive && e.dest == id)
            .map(|e| (e.src, e.label.clone()))
            .collect()
    }

    pub fn out_edges(&self, id: NodeId) -> Vec<(NodeId, String)> {
        self.edges
            .iter()
            .filter(|e| e.alive && e.src == id)
            .map(|e| (e.dest, e.label.clone()))
            .collect()
    }

    /// No live in-edges: a routine input.
    pub fn is_source(&self, id: NodeId) -> bool {
        self.in_edges(id).is_empty()
    }

    /// No live out-edges: a routine output.
    pub fn is_sink(&self, id: NodeId) -> bool {
        self.out_edges(id).is_empty()
    }

    /// Whether the named datum leaves the routine: a sink, a declared
    /// output, or the return value.
    pub fn is_output(&self, id: NodeId) -> bool {
        let label = self.node(id).label();
        self.is_sink(id)
            || self.config.outputs.iter().any(|o| o == label)
            || self.config.return_name == label
    }

    /// Fuse computation `second` into `first`: edges re-parent onto
    /// `first`, the absorbed node becomes a constituent, and the fused node
    /// is relabeled `first+second`.
    pub fn fuse(&mut self, first: &str, second: &str) -> FlowResult<()> {
        let a = self
            .lookup(first)
            .ok_or_else(|| BuilderError::unknown(format!("no computation '{}'", first)))?;
        let b = self
            .lookup(second)
            .ok_or_else(|| BuilderError::unknown(format!("no computation '{}'", second)))?;
        let b_node = match &self.nodes[b.0 as usize].node {
            Node::Comp(c) => c.clone(),
            _ => {
                return Err(
                    BuilderError::unknown(format!("'{}' is not a computation", second)).into()
                )
            }
        };
        // Re-parent the absorbed node's edges onto the fused node, dropping
        // self-loops and duplicates the merge creates.
        let mut redirected: Vec<(NodeId, NodeId, String)> = Vec::new();
        for e in &self.edges {
            if e.alive && (e.src == b || e.dest == b) {
                let src = if e.src == b { a } else { e.src };
                let dest = if e.dest == b { a } else { e.dest };
                if src != dest {
                    redirected.push((src, dest, e.label.clone()));
                }
            }
        }
        self.remove(b);
        for (src, dest, label) in redirected {
            self.add_edge(src, dest, label);
        }
        match self.node_mut(a) {
            Node::Comp(c) => c.absorb(b_node),
            _ => {
                return Err(
                    BuilderError::unknown(format!("'{}' is not a computation", first)).into()
                )
            }
        }
        // Relabel in place: the fused node keeps its slot in the insertion
        // order, so generated body blocks stay in declaration order.
        let new_label = self.node(a).label().to_string();
        let mut table = LinkedHashMap::with_capacity(self.symtable.len());
        for (label, &id) in self.symtable.iter() {
            if id == a {
                table.insert(new_label.clone(), id);
            } else {
                table.insert(label.clone(), id);
            }
        }
        self.symtable = table;
        Ok(())
    }

    /// Graph summary as JSON: name, tile size, nodes (label/space/attrs),
    /// edges (label/src/dest).
    pub fn to_json(&self) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .symtable
            .values()
            .filter(|id| self.nodes[id.0 as usize].alive)
            .map(|id| {
                let node = &self.nodes[id.0 as usize].node;
                let attrs: serde_json::Map<String, serde_json::Value> = node
                    .attrs()
                    .iter()
                    .map(|(k, v)| (k.clone(), json!(v)))
                    .collect();
                json!({
                    "label": node.label(),
                    "space": node.space_text(),
                    "attrs": attrs,
                })
            })
            .collect();
        let edges: Vec<serde_json::Value> = self
            .edges
            .iter()
            .filter(|e| e.alive)
            .map(|e| {
                json!({
                    "label": e.label,
                    "src": self.node(e.src).label(),
                    "dest": self.node(e.dest).label(),
                })
            })
            .collect();
        json!({
            "name": self.config.name,
            "tilesize": self.config.tile_size,
            "nodes": nodes,
            "edges": edges,
        })
    }
}
