//! Directed acyclic graph over named variables.
//!
//! Acyclicity is enforced at insertion: `add_edge` refuses any edge whose
//! effect already reaches its cause, so a `CausalGraph` value is acyclic by
//! construction and `topological_order` never fails.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::GraphError;

/// Index of a node in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Macro,
    Asset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
}

/// Estimation attributes of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    /// Change in the effect per unit change in the cause.
    pub coefficient: f64,
    pub std_error: f64,
    /// Cause observed `lag` observations before the effect.
    pub lag: usize,
    /// `None` for configured (not estimated) edges.
    pub p_value: Option<f64>,
    pub observations: usize,
}

impl EdgeSpec {
    /// A configured edge with a known coefficient and no estimation error.
    pub fn fixed(coefficient: f64) -> Self {
        Self {
            coefficient,
            std_error: 0.0,
            lag: 0,
            p_value: None,
            observations: 0,
        }
    }

    pub fn with_std_error(mut self, std_error: f64) -> Self {
        self.std_error = std_error;
        self
    }

    pub fn with_lag(mut self, lag: usize) -> Self {
        self.lag = lag;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub cause: NodeId,
    pub effect: NodeId,
    pub spec: EdgeSpec,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CausalGraph {
    nodes: Vec<Node>,
    index: BTreeMap<String, NodeId>,
    edges: Vec<Edge>,
    /// Outgoing edge indices per node.
    children: Vec<Vec<usize>>,
    /// Incoming edge indices per node.
    parents: Vec<Vec<usize>>,
}

impl CausalGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        kind: NodeKind,
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        let id = NodeId(self.nodes.len());
        self.index.insert(name.clone(), id);
        self.nodes.push(Node { name, kind });
        self.children.push(Vec::new());
        self.parents.push(Vec::new());
        Ok(id)
    }

    /// Insert `cause → effect`, rejecting anything that would break acyclicity.
    pub fn add_edge(
        &mut self,
        cause: &str,
        effect: &str,
        spec: EdgeSpec,
    ) -> Result<(), GraphError> {
        let c = self.require(cause)?;
        let e = self.require(effect)?;
        if c == e {
            return Err(GraphError::SelfLoop(cause.to_string()));
        }
        if self.children[c.0].iter().any(|&i| self.edges[i].effect == e) {
            return Err(GraphError::DuplicateEdge {
                cause: cause.to_string(),
                effect: effect.to_string(),
            });
        }
        if self.reaches(e, c) {
            return Err(GraphError::CycleDetected {
                cause: cause.to_string(),
                effect: effect.to_string(),
            });
        }
        let idx = self.edges.len();
        self.edges.push(Edge {
            cause: c,
            effect: e,
            spec,
        });
        self.children[c.0].push(idx);
        self.parents[e.0].push(idx);
        Ok(())
    }

    fn require(&self, name: &str) -> Result<NodeId, GraphError> {
        self.id(name).ok_or_else(|| GraphError::UnknownNode(name.to_string()))
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn outgoing(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.children[id.0].iter().map(|&i| &self.edges[i])
    }

    pub fn incoming(&self, id: NodeId) -> impl Iterator<Item = &Edge> {
        self.parents[id.0].iter().map(|&i| &self.edges[i])
    }

    /// Edge between two named nodes, if present.
    pub fn edge(&self, cause: &str, effect: &str) -> Option<&Edge> {
        let c = self.id(cause)?;
        let e = self.id(effect)?;
        self.outgoing(c).find(|edge| edge.effect == e)
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if std::mem::replace(&mut seen[n.0], true) {
                continue;
            }
            stack.extend(self.outgoing(n).map(|e| e.effect));
        }
        false
    }

    /// Nodes reachable from `from` along directed edges, `from` included.
    pub fn reachable(&self, from: NodeId) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(n) = stack.pop() {
            if out.insert(n) {
                stack.extend(self.outgoing(n).map(|e| e.effect));
            }
        }
        out
    }

    /// Kahn's algorithm; among ready nodes the lowest id goes first.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut in_degree: Vec<usize> = self.parents.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<NodeId> = (0..self.nodes.len())
            .filter(|&i| in_degree[i] == 0)
            .map(NodeId)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(n) = ready.pop_first() {
            order.push(n);
            for edge in self.outgoing(n) {
                let d = &mut in_degree[edge.effect.0];
                *d -= 1;
                if *d == 0 {
                    ready.insert(edge.effect);
                }
            }
        }
        debug_assert_eq!(order.len(), self.nodes.len());
        order
    }

    /// Serializable view with names in place of ids.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges: self
                .edges
                .iter()
                .map(|e| EdgeSnapshot {
                    cause: self.nodes[e.cause.0].name.clone(),
                    effect: self.nodes[e.effect.0].name.clone(),
                    coefficient: e.spec.coefficient,
                    std_error: e.spec.std_error,
                    p_value: e.spec.p_value,
                    lag: e.spec.lag,
                    observations: e.spec.observations,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    pub cause: String,
    pub effect: String,
    pub coefficient: f64,
    pub std_error: f64,
    pub p_value: Option<f64>,
    pub lag: usize,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<EdgeSnapshot>,
}

impl GraphSnapshot {
    /// Rebuild a graph; fails if the snapshot is inconsistent or cyclic.
    pub fn into_graph(self) -> Result<CausalGraph, GraphError> {
        let mut graph = CausalGraph::new();
        for node in self.nodes {
            graph.add_node(node.name, node.kind)?;
        }
        for e in self.edges {
            graph.add_edge(
                &e.cause,
                &e.effect,
                EdgeSpec {
                    coefficient: e.coefficient,
                    std_error: e.std_error,
                    lag: e.lag,
                    p_value: e.p_value,
                    observations: e.observations,
                },
            )?;
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> CausalGraph {
        let mut g = CausalGraph::new();
        g.add_node("a", NodeKind::Macro).unwrap();
        g.add_node("b", NodeKind::Macro).unwrap();
        g.add_node("c", NodeKind::Asset).unwrap();
        g.add_edge("a", "b", EdgeSpec::fixed(2.0)).unwrap();
        g.add_edge("b", "c", EdgeSpec::fixed(3.0)).unwrap();
        g
    }

    #[test]
    fn rejects_cycle_and_self_loop() {
        let mut g = chain();
        assert!(matches!(
            g.add_edge("c", "a", EdgeSpec::fixed(1.0)),
            Err(GraphError::CycleDetected { .. })
        ));
        assert!(matches!(
            g.add_edge("b", "b", EdgeSpec::fixed(1.0)),
            Err(GraphError::SelfLoop(_))
        ));
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn rejects_unknown_and_duplicate() {
        let mut g = chain();
        assert!(matches!(
            g.add_edge("a", "zz", EdgeSpec::fixed(1.0)),
            Err(GraphError::UnknownNode(n)) if n == "zz"
        ));
        assert!(matches!(
            g.add_edge("a", "b", EdgeSpec::fixed(1.0)),
            Err(GraphError::DuplicateEdge { .. })
        ));
        assert!(matches!(
            g.add_node("a", NodeKind::Macro),
            Err(GraphError::DuplicateNode(_))
        ));
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut g = CausalGraph::new();
        for n in ["x", "y", "z"] {
            g.add_node(n, NodeKind::Macro).unwrap();
        }
        g.add_edge("z", "x", EdgeSpec::fixed(1.0)).unwrap();
        let order = g.topological_order();
        let pos = |name: &str| order.iter().position(|&id| id == g.id(name).unwrap()).unwrap();
        assert!(pos("z") < pos("x"));
        // y and z start ready; the lower id goes first
        assert_eq!(order, vec![NodeId(1), NodeId(2), NodeId(0)]);
    }

    #[test]
    fn reachability() {
        let g = chain();
        let from_b = g.reachable(g.id("b").unwrap());
        assert!(from_b.contains(&g.id("c").unwrap()));
        assert!(!from_b.contains(&g.id("a").unwrap()));
    }

    #[test]
    fn snapshot_rebuilds_same_graph() {
        let g = chain();
        let json = serde_json::to_string(&g.snapshot()).unwrap();
        let back: GraphSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_graph().unwrap(), g);
    }
}
