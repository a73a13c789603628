use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use super::bpmn_graph_struct::{BpmnGraph, FlowNodeKind};

const COLUMN_WIDTH: f64 = 160.0;
const ROW_HEIGHT: f64 = 110.0;
const MARGIN: f64 = 60.0;

const EVENT_SIZE: (f64, f64) = (36.0, 36.0);
const TASK_SIZE: (f64, f64) = (100.0, 80.0);
const GATEWAY_SIZE: (f64, f64) = (50.0, 50.0);

/// Position and size of a diagram element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// X coordinate of the upper-left corner
    pub x: f64,
    /// Y coordinate of the upper-left corner
    pub y: f64,
    /// Element width
    pub width: f64,
    /// Element height
    pub height: f64,
}

impl Bounds {
    /// Center point of the element
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether two bounds overlap
    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }
}

///
/// Diagram geometry for a [`BpmnGraph`]
///
/// Keyed by element id; the graph itself is left untouched. Total over all nodes and flows of
/// the graph it was computed for.
///
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BpmnLayout {
    /// Bounds per node id
    pub node_bounds: HashMap<String, Bounds>,
    /// Waypoints per flow id, from source to target
    pub flow_waypoints: HashMap<String, Vec<(f64, f64)>>,
}

fn size_of(kind: FlowNodeKind) -> (f64, f64) {
    match kind {
        FlowNodeKind::StartEvent | FlowNodeKind::EndEvent => EVENT_SIZE,
        FlowNodeKind::Task => TASK_SIZE,
        FlowNodeKind::ExclusiveGateway | FlowNodeKind::ParallelGateway => GATEWAY_SIZE,
    }
}

///
/// Compute a diagram layout for the given graph
///
/// Nodes are placed in columns by their forward-traversal depth from the start event; nodes
/// sharing a depth are stacked vertically, so no two elements overlap. Nodes unreachable from
/// the start event are appended behind the deepest reachable column in descending
/// outgoing-degree order (and traversal continues from them), keeping the layout total over all
/// nodes. Waypoints connect element centers.
///
pub fn layout_bpmn(graph: &BpmnGraph) -> BpmnLayout {
    let mut depth_of: HashMap<NodeIndex, usize> = HashMap::new();
    let mut placed: HashSet<NodeIndex> = HashSet::new();
    let mut max_depth = 0;

    if let Some(start) = graph.start_node() {
        max_depth = assign_depths(graph, start, 0, &mut depth_of, &mut placed);
    }

    // Remaining nodes (unreachable from the start event, or no start event at all) are placed
    // past the deepest column, most connected first
    loop {
        let mut remaining: Vec<NodeIndex> =
            graph.nodes().filter(|n| !placed.contains(n)).collect();
        if remaining.is_empty() {
            break;
        }
        remaining.sort_by_key(|&n| (std::cmp::Reverse(graph.outgoing(n).len()), n));
        let next_depth = if placed.is_empty() { 0 } else { max_depth + 1 };
        let reached = assign_depths(graph, remaining[0], next_depth, &mut depth_of, &mut placed);
        max_depth = max_depth.max(reached);
    }

    let mut layout = BpmnLayout::default();
    let mut rows_per_depth: HashMap<usize, usize> = HashMap::new();
    let mut nodes: Vec<NodeIndex> = graph.nodes().collect();
    nodes.sort_by_key(|n| (depth_of[n], *n));
    for node in nodes {
        let depth = depth_of[&node];
        let row = rows_per_depth.entry(depth).or_insert(0);
        let (width, height) = size_of(graph.node(node).kind);
        let center_x = MARGIN + depth as f64 * COLUMN_WIDTH;
        let center_y = MARGIN + *row as f64 * ROW_HEIGHT;
        *row += 1;
        layout.node_bounds.insert(
            graph.node(node).id.clone(),
            Bounds {
                x: center_x - width / 2.0,
                y: center_y - height / 2.0,
                width,
                height,
            },
        );
    }

    for flow in graph.flows() {
        let source_id = &graph.node(graph.flow_source(flow)).id;
        let target_id = &graph.node(graph.flow_target(flow)).id;
        let waypoints = vec![
            layout.node_bounds[source_id].center(),
            layout.node_bounds[target_id].center(),
        ];
        layout
            .flow_waypoints
            .insert(graph.flow(flow).id.clone(), waypoints);
    }

    layout
}

/// Breadth-first depth assignment from the given node; returns the deepest assigned depth
fn assign_depths(
    graph: &BpmnGraph,
    from: NodeIndex,
    base_depth: usize,
    depth_of: &mut HashMap<NodeIndex, usize>,
    placed: &mut HashSet<NodeIndex>,
) -> usize {
    let mut max_depth = base_depth;
    let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();
    queue.push_back((from, base_depth));
    placed.insert(from);
    while let Some((node, depth)) = queue.pop_front() {
        depth_of.insert(node, depth);
        max_depth = max_depth.max(depth);
        for flow in graph.outgoing(node) {
            let target = graph.flow_target(flow);
            if placed.insert(target) {
                queue.push_back((target, depth + 1));
            }
        }
    }
    max_depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bpmn::bpmn_graph_struct::FlowNodeKind;
    use crate::discovery::relation_builder::RelationBuilder;
    use crate::event_log::activity::ActivityRegistry;
    use crate::synthesize;
    use crate::utils::test_utils::log_from_strings;

    fn assert_no_overlaps(layout: &BpmnLayout) {
        let all: Vec<(&String, &Bounds)> = layout.node_bounds.iter().collect();
        for (i, (id_a, a)) in all.iter().enumerate() {
            for (id_b, b) in all.iter().skip(i + 1) {
                assert!(
                    !a.overlaps(b),
                    "elements {} and {} overlap",
                    id_a,
                    id_b
                );
            }
        }
    }

    #[test]
    fn layout_is_total_and_overlap_free() {
        let mut registry = ActivityRegistry::new();
        let log = log_from_strings(&mut registry, &["abghjkil", "acdefgjhikl"]);
        let mut builder = RelationBuilder::new();
        builder.evaluate(&log, &registry);
        let graph = synthesize(
            &registry,
            &builder.activities().unwrap(),
            &builder.alternatives().unwrap(),
            &builder.abstractions().unwrap(),
            &builder.remaining_causalities().unwrap(),
            &builder.not_succession().unwrap(),
        )
        .unwrap();

        let layout = layout_bpmn(&graph);
        assert_eq!(layout.node_bounds.len(), graph.node_count());
        assert_eq!(layout.flow_waypoints.len(), graph.flow_count());
        assert_no_overlaps(&layout);
    }

    #[test]
    fn start_event_is_leftmost() {
        let mut graph = BpmnGraph::new();
        let start = graph.add_node(FlowNodeKind::StartEvent, "start", "start");
        let a = graph.add_node(FlowNodeKind::Task, "a", "a");
        let end = graph.add_node(FlowNodeKind::EndEvent, "end", "end");
        graph.add_flow(start, a);
        graph.add_flow(a, end);

        let layout = layout_bpmn(&graph);
        let start_x = layout.node_bounds["start"].center().0;
        assert!(start_x < layout.node_bounds["a"].center().0);
        assert!(layout.node_bounds["a"].center().0 < layout.node_bounds["end"].center().0);
    }

    #[test]
    fn unreachable_nodes_still_get_coordinates() {
        let mut graph = BpmnGraph::new();
        let start = graph.add_node(FlowNodeKind::StartEvent, "start", "start");
        let a = graph.add_node(FlowNodeKind::Task, "a", "a");
        graph.add_flow(start, a);
        // not connected to the rest
        let hub = graph.add_node(FlowNodeKind::Task, "hub", "hub");
        let leaf = graph.add_node(FlowNodeKind::Task, "leaf", "leaf");
        graph.add_flow(hub, leaf);

        let layout = layout_bpmn(&graph);
        assert_eq!(layout.node_bounds.len(), 4);
        assert_no_overlaps(&layout);
        // the disconnected cluster lands behind the reachable part, hub (higher degree) first
        assert!(layout.node_bounds["hub"].x > layout.node_bounds["a"].x);
        assert!(layout.node_bounds["leaf"].x > layout.node_bounds["hub"].x);
    }
}
