//! Dataflow graph nodes.

use linked_hash_map::LinkedHashMap;
use std::fmt;

use crate::algebra::Expr;
use crate::model::{Comp, Rel, Space};

/// Index of a node in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Index of an edge in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

/// How storage for a data node is obtained in generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAlloc {
    /// Routine parameter; no local storage
    None,
    /// Stack array
    Auto,
    /// Static array
    Static,
    /// Heap allocation with matching free
    Dynamic,
}

/// A data node: one array, vector, or scalar flowing through the graph.
#[derive(Debug, Clone)]
pub struct DataNode {
    pub label: String,
    pub space: Space,
    pub datatype: String,
    pub size: Expr,
    pub defval: String,
    pub alloc: MemAlloc,
    pub attrs: LinkedHashMap<String, String>,
}

impl DataNode {
    pub fn new(label: impl Into<String>, space: Space, datatype: impl Into<String>) -> Self {
        let size = space.size();
        Self {
            label: label.into(),
            space,
            datatype: datatype.into(),
            size,
            defval: String::new(),
            alloc: MemAlloc::None,
            attrs: LinkedHashMap::new(),
        }
    }

    /// A zero-dimensional datum.
    pub fn is_scalar(&self) -> bool {
        matches!(self.size, Expr::Int(1))
    }

    /// Integer-typed (index) data, as opposed to floating-point values.
    pub fn is_int(&self) -> bool {
        !(self.datatype.contains("float") || self.datatype.contains("double"))
    }
}

/// A computation node. Fusion absorbs other computation nodes as ordered
/// children; the node's reads/writes cover the whole constituent list.
#[derive(Debug, Clone)]
pub struct CompNode {
    pub label: String,
    pub comp: Comp,
    /// Data label -> accesses read, in first-reference order
    pub reads: LinkedHashMap<String, Vec<Expr>>,
    /// Data label -> accesses written
    pub writes: LinkedHashMap<String, Vec<Expr>>,
    pub children: Vec<CompNode>,
    pub attrs: LinkedHashMap<String, String>,
}

impl CompNode {
    pub fn new(comp: Comp) -> Self {
        Self {
            label: comp.name.clone(),
            comp,
            reads: LinkedHashMap::new(),
            writes: LinkedHashMap::new(),
            children: Vec::new(),
            attrs: LinkedHashMap::new(),
        }
    }

    pub fn add_read(&mut self, label: &str, access: Expr) {
        self.reads.entry(label.to_string()).or_insert_with(Vec::new).push(access);
    }

    pub fn add_write(&mut self, label: &str, access: Expr) {
        self.writes.entry(label.to_string()).or_insert_with(Vec::new).push(access);
    }

    /// This node's computation followed by its children, in execution order.
    pub fn all_comps(&self) -> Vec<&Comp> {
        let mut out = vec![&self.comp];
        for child in &self.children {
            out.extend(child.all_comps());
        }
        out
    }

    /// Accesses of the named data space across all constituents.
    pub fn accesses_of(&self, label: &str, writes: bool) -> Vec<Expr> {
        let mut out = Vec::new();
        let map = if writes { &self.writes } else { &self.reads };
        if let Some(v) = map.get(label) {
            out.extend(v.iter().cloned());
        }
        for child in &self.children {
            out.extend(child.accesses_of(label, writes));
        }
        out
    }

    /// Absorb another computation node: it becomes the next constituent,
    /// followed by its own constituents, and the labels join with `+`.
    pub fn absorb(&mut self, mut other: CompNode) {
        self.label = format!("{}+{}", self.label, other.label);
        for (label, accesses) in other.reads.iter() {
            for a in accesses {
                self.add_read(label, a.clone());
            }
        }
        for (label, accesses) in other.writes.iter() {
            for a in accesses {
                self.add_write(label, a.clone());
            }
        }
        let grandchildren = std::mem::take(&mut other.children);
        other.reads.clear();
        other.writes.clear();
        self.children.push(other);
        self.children.extend(grandchildren);
    }
}

/// A relation node recording a space transform applied in the graph.
#[derive(Debug, Clone)]
pub struct RelNode {
    pub label: String,
    pub rel: Rel,
    pub attrs: LinkedHashMap<String, String>,
}

impl RelNode {
    pub fn new(rel: Rel) -> Self {
        Self { label: rel.name.clone(), rel, attrs: LinkedHashMap::new() }
    }
}

/// A graph node.
#[derive(Debug, Clone)]
pub enum Node {
    Data(DataNode),
    Comp(CompNode),
    Rel(RelNode),
}

impl Node {
    pub fn label(&self) -> &str {
        match self {
            Node::Data(d) => &d.label,
            Node::Comp(c) => &c.label,
            Node::Rel(r) => &r.label,
        }
    }

    pub fn attrs(&self) -> &LinkedHashMap<String, String> {
        match self {
            Node::Data(d) => &d.attrs,
            Node::Comp(c) => &c.attrs,
            Node::Rel(r) => &r.attrs,
        }
    }

    pub fn attrs_mut(&mut self) -> &mut LinkedHashMap<String, String> {
        match self {
            Node::Data(d) => &mut d.attrs,
            Node::Comp(c) => &mut c.attrs,
            Node::Rel(r) => &mut r.attrs,
        }
    }

    /// Text describing the node's space in the graph summary.
    pub fn space_text(&self) -> String {
        match self {
            Node::Data(d) => d.size.to_string(),
            Node::Comp(c) => c.comp.space.to_set_text(),
            Node::Rel(r) => r.rel.to_string(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Space;

    #[test]
    fn test_data_node_scalar() {
        let d = DataNode::new("alpha", Space::scalar("alpha"), "float");
        assert!(d.is_scalar());
        assert!(!d.is_int());
        let r = DataNode::new("rp", Space::data("rp", vec![Expr::sym("N") + 1]), "unsigned");
        assert!(!r.is_scalar());
        assert!(r.is_int());
        assert_eq!(r.size.to_string(), "N+1");
    }

    #[test]
    fn test_absorb_labels_and_accesses() {
        let i = Expr::iter("i");
        let space = Space::new("I").with(i.clone().in_range(0, Expr::sym("N")));
        let mut a = CompNode::new(Comp::new("a", space.clone()));
        a.add_write("y", Expr::Access { space: "y".into(), index: vec![i.clone()], bracket: false });
        let mut b = CompNode::new(Comp::new("b", space.clone()));
        b.add_read("y", Expr::Access { space: "y".into(), index: vec![i], bracket: false });
        let c = CompNode::new(Comp::new("c", space));
        b.absorb(c);
        a.absorb(b);
        assert_eq!(a.label, "a+b+c");
        assert_eq!(a.all_comps().len(), 3);
        assert!(a.reads.contains_key("y"));
        assert!(a.writes.contains_key("y"));
    }
}
