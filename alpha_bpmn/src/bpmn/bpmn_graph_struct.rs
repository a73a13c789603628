use std::collections::HashSet;

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{Bfs, EdgeRef};
use petgraph::Direction;
use serde::{Deserialize, Serialize};

/// Kind of a [`FlowNode`] in a BPMN process graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowNodeKind {
    /// The start event of the process
    StartEvent,
    /// The end event of the process
    EndEvent,
    /// A task, executing one activity
    Task,
    /// An exclusive (XOR) gateway: exactly one of the paths is taken
    ExclusiveGateway,
    /// A parallel (AND) gateway: all paths are taken
    ParallelGateway,
}

impl FlowNodeKind {
    /// Whether this kind is one of the two gateway kinds
    pub fn is_gateway(self) -> bool {
        matches!(
            self,
            FlowNodeKind::ExclusiveGateway | FlowNodeKind::ParallelGateway
        )
    }

    /// Whether this kind is a task
    pub fn is_task(self) -> bool {
        matches!(self, FlowNodeKind::Task)
    }
}

/// Node in a BPMN process graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    /// Element id (unique within the graph, no whitespace)
    pub id: String,
    /// Display name
    pub name: String,
    /// Node kind
    pub kind: FlowNodeKind,
}

/// Sequence flow in a BPMN process graph
///
/// Source and target are kept by the surrounding [`BpmnGraph`]; the flow itself only carries its
/// id, an optional guard condition and its creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceFlow {
    /// Element id
    pub id: String,
    /// Optional boolean guard expression; `None` marks the default flow
    pub condition: Option<String>,
    /// Creation order within the graph; defines the flow ordering of a node
    order: usize,
}

///
/// A BPMN process graph of [`FlowNode`]s connected by [`SequenceFlow`]s
///
/// Backed by a stable-index node/edge arena: removing nodes or flows never invalidates the
/// indices of unrelated elements, and redirecting a flow end is a cheap edit that keeps the flow
/// payload. The per-node flow order is the order in which flows were created.
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BpmnGraph {
    graph: StableDiGraph<FlowNode, SequenceFlow>,
    next_flow_order: usize,
}

impl BpmnGraph {
    /// Create a new, empty [`BpmnGraph`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with the given kind, id and name
    pub fn add_node(
        &mut self,
        kind: FlowNodeKind,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> NodeIndex {
        self.graph.add_node(FlowNode {
            id: id.into(),
            name: name.into(),
            kind,
        })
    }

    /// Add a flow between two nodes; the flow id is derived from the node ids
    ///
    /// Panics if either node is not part of the graph.
    pub fn add_flow(&mut self, from: NodeIndex, to: NodeIndex) -> EdgeIndex {
        let id = format!("{}-{}", self.node(from).id, self.node(to).id);
        let order = self.next_flow_order;
        self.next_flow_order += 1;
        self.graph.add_edge(
            from,
            to,
            SequenceFlow {
                id,
                condition: None,
                order,
            },
        )
    }

    /// Remove a flow, returning its payload
    pub fn remove_flow(&mut self, flow: EdgeIndex) -> Option<SequenceFlow> {
        self.graph.remove_edge(flow)
    }

    /// Remove a node together with all flows attached to it
    pub fn remove_node(&mut self, node: NodeIndex) -> Option<FlowNode> {
        self.graph.remove_node(node)
    }

    /// Redirect the source of a flow to another node, keeping the flow payload (incl. its order)
    ///
    /// Returns the new index of the flow. Panics if the flow is not part of the graph.
    pub fn redirect_flow_source(&mut self, flow: EdgeIndex, new_source: NodeIndex) -> EdgeIndex {
        let (_, target) = self.graph.edge_endpoints(flow).unwrap();
        let payload = self.graph.remove_edge(flow).unwrap();
        self.graph.add_edge(new_source, target, payload)
    }

    /// Redirect the target of a flow to another node, keeping the flow payload (incl. its order)
    ///
    /// Returns the new index of the flow. Panics if the flow is not part of the graph.
    pub fn redirect_flow_target(&mut self, flow: EdgeIndex, new_target: NodeIndex) -> EdgeIndex {
        let (source, _) = self.graph.edge_endpoints(flow).unwrap();
        let payload = self.graph.remove_edge(flow).unwrap();
        self.graph.add_edge(source, new_target, payload)
    }

    /// The node behind an index
    ///
    /// Panics if the node is not part of the graph.
    pub fn node(&self, node: NodeIndex) -> &FlowNode {
        self.graph.node_weight(node).unwrap()
    }

    /// The flow behind an index
    ///
    /// Panics if the flow is not part of the graph.
    pub fn flow(&self, flow: EdgeIndex) -> &SequenceFlow {
        self.graph.edge_weight(flow).unwrap()
    }

    /// Mutable access to a flow (e.g., for attaching a guard condition)
    ///
    /// Panics if the flow is not part of the graph.
    pub fn flow_mut(&mut self, flow: EdgeIndex) -> &mut SequenceFlow {
        self.graph.edge_weight_mut(flow).unwrap()
    }

    /// Whether the node is (still) part of the graph
    pub fn contains_node(&self, node: NodeIndex) -> bool {
        self.graph.contains_node(node)
    }

    /// Source node of a flow
    ///
    /// Panics if the flow is not part of the graph.
    pub fn flow_source(&self, flow: EdgeIndex) -> NodeIndex {
        self.graph.edge_endpoints(flow).unwrap().0
    }

    /// Target node of a flow
    ///
    /// Panics if the flow is not part of the graph.
    pub fn flow_target(&self, flow: EdgeIndex) -> NodeIndex {
        self.graph.edge_endpoints(flow).unwrap().1
    }

    /// Incoming flows of a node, in creation order
    pub fn incoming(&self, node: NodeIndex) -> Vec<EdgeIndex> {
        self.flows_directed(node, Direction::Incoming)
    }

    /// Outgoing flows of a node, in creation order
    pub fn outgoing(&self, node: NodeIndex) -> Vec<EdgeIndex> {
        self.flows_directed(node, Direction::Outgoing)
    }

    /// Sources of the incoming flows of a node, in flow creation order
    pub fn incoming_sources(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.incoming(node)
            .into_iter()
            .map(|flow| self.flow_source(flow))
            .collect()
    }

    /// Targets of the outgoing flows of a node, in flow creation order
    pub fn outgoing_targets(&self, node: NodeIndex) -> Vec<NodeIndex> {
        self.outgoing(node)
            .into_iter()
            .map(|flow| self.flow_target(flow))
            .collect()
    }

    fn flows_directed(&self, node: NodeIndex, direction: Direction) -> Vec<EdgeIndex> {
        let mut flows: Vec<EdgeIndex> = self
            .graph
            .edges_directed(node, direction)
            .map(|e| e.id())
            .collect();
        flows.sort_by_key(|flow| self.flow(*flow).order);
        flows
    }

    /// All node indices, ascending
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// All flow indices
    pub fn flows(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edge_indices()
    }

    /// All nodes of the given kind, ascending by index
    pub fn nodes_of_kind(&self, kind: FlowNodeKind) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|n| self.node(*n).kind == kind)
            .collect()
    }

    /// All gateway nodes (exclusive and parallel), ascending by index
    pub fn gateways(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|n| self.node(*n).kind.is_gateway())
            .collect()
    }

    /// The start event node, if present
    pub fn start_node(&self) -> Option<NodeIndex> {
        self.nodes_of_kind(FlowNodeKind::StartEvent).into_iter().next()
    }

    /// The end event node, if present
    pub fn end_node(&self) -> Option<NodeIndex> {
        self.nodes_of_kind(FlowNodeKind::EndEvent).into_iter().next()
    }

    /// Find a node by its element id
    pub fn find_node(&self, id: &str) -> Option<NodeIndex> {
        self.graph.node_indices().find(|n| self.node(*n).id == id)
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of flows
    pub fn flow_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// All nodes reachable from `from` by forward traversal (including `from` itself)
    pub fn reachable_from(&self, from: NodeIndex) -> HashSet<NodeIndex> {
        let mut reachable = HashSet::new();
        let mut bfs = Bfs::new(&self.graph, from);
        while let Some(node) = bfs.next(&self.graph) {
            reachable.insert(node);
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_edits_keep_unrelated_indices_stable() {
        let mut graph = BpmnGraph::new();
        let start = graph.add_node(FlowNodeKind::StartEvent, "start", "start");
        let a = graph.add_node(FlowNodeKind::Task, "a", "a");
        let b = graph.add_node(FlowNodeKind::Task, "b", "b");
        let end = graph.add_node(FlowNodeKind::EndEvent, "end", "end");

        let f1 = graph.add_flow(start, a);
        let f2 = graph.add_flow(a, b);
        let f3 = graph.add_flow(b, end);

        graph.remove_flow(f2);
        graph.remove_node(b);

        // untouched elements stay addressable
        assert_eq!(graph.node(a).id, "a");
        assert_eq!(graph.flow(f1).id, "start-a");
        assert!(!graph.contains_node(b));
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.flow_count(), 1);
        assert!(graph.remove_flow(f3).is_none());
    }

    #[test]
    fn redirect_keeps_flow_payload_and_order() {
        let mut graph = BpmnGraph::new();
        let a = graph.add_node(FlowNodeKind::Task, "a", "a");
        let b = graph.add_node(FlowNodeKind::Task, "b", "b");
        let gw = graph.add_node(FlowNodeKind::ParallelGateway, "gw", "gw");

        let f1 = graph.add_flow(a, b);
        let f2 = graph.add_flow(gw, b);
        let f1 = graph.redirect_flow_target(f1, gw);

        assert_eq!(graph.flow(f1).id, "a-b");
        assert_eq!(graph.flow_target(f1), gw);
        // creation order survives the redirect
        assert_eq!(graph.incoming(gw), vec![f1]);
        assert_eq!(graph.incoming(b), vec![f2]);
        assert_eq!(graph.outgoing_targets(a), vec![gw]);
    }

    #[test]
    fn reachability_by_forward_traversal() {
        let mut graph = BpmnGraph::new();
        let start = graph.add_node(FlowNodeKind::StartEvent, "start", "start");
        let a = graph.add_node(FlowNodeKind::Task, "a", "a");
        let island = graph.add_node(FlowNodeKind::Task, "island", "island");
        graph.add_flow(start, a);

        let reachable = graph.reachable_from(start);
        assert!(reachable.contains(&start) && reachable.contains(&a));
        assert!(!reachable.contains(&island));
    }

    #[test]
    fn json_round_trip() {
        let mut graph = BpmnGraph::new();
        let start = graph.add_node(FlowNodeKind::StartEvent, "start", "start");
        let a = graph.add_node(FlowNodeKind::Task, "a", "a");
        graph.add_flow(start, a);

        let restored = crate::json_to_bpmn(&crate::bpmn_to_json(&graph));
        assert_eq!(restored.node_count(), 2);
        assert_eq!(restored.flow_count(), 1);
        assert_eq!(restored.node(a).name, "a");
    }
}
