use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::{EdgeIndex, NodeIndex};

use crate::bpmn::bpmn_graph_struct::{BpmnGraph, FlowNodeKind};
use crate::event_log::activity::{Activity, ActivityRegistry};

///
/// Error encountered while synthesizing a BPMN graph
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    /// A relation referenced an activity missing from the passed activity list
    UnknownActivity(String),
    /// The synthesized graph violates a connectivity invariant (offending node id included)
    SchemaViolation {
        /// The invariant that does not hold
        invariant: &'static str,
        /// Id of the offending node
        node: String,
    },
}

impl std::fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisError::UnknownActivity(name) => {
                write!(f, "Relation references unknown activity {:?}", name)
            }
            SynthesisError::SchemaViolation { invariant, node } => {
                write!(
                    f,
                    "Synthesized graph violates invariant {:?} at node {:?}",
                    invariant, node
                )
            }
        }
    }
}

impl std::error::Error for SynthesisError {}

///
/// Synthesize a BPMN process graph from the relations discovered by a
/// [`RelationBuilder`](crate::discovery::relation_builder::RelationBuilder)
///
/// Applies, strictly in order: skeleton creation, direct causal flows, exclusive splits
/// (alternatives), exclusive joins (abstractions), task flow bundling, gateway flow bundling,
/// structural gateway merging, redundant gateway elimination and condition annotation. The
/// result is validated against the connectivity invariants before it is returned; a violation
/// surfaces as [`SynthesisError::SchemaViolation`] rather than a partially built graph.
///
/// Deterministic given deterministic input ordering (the accessors of `RelationBuilder` return
/// sorted lists).
///
pub fn synthesize(
    registry: &ActivityRegistry,
    activities: &[Activity],
    alternatives: &[(Activity, Activity, Activity)],
    abstractions: &[(Activity, Activity, Activity)],
    remaining_causalities: &[(Activity, Activity)],
    not_succession: &[(Activity, Activity)],
) -> Result<BpmnGraph, SynthesisError> {
    let mut synthesis = Synthesis {
        registry,
        graph: BpmnGraph::new(),
        node_of: HashMap::new(),
        activity_of: HashMap::new(),
        xor_splits: HashSet::new(),
        not_succession: not_succession.iter().copied().collect(),
    };

    synthesis.create_skeleton(activities);
    synthesis.create_causalities(remaining_causalities)?;
    synthesis.create_alternatives(alternatives)?;
    synthesis.create_abstractions(abstractions)?;
    synthesis.bundle_task_flows();
    synthesis.bundle_gateway_flows();
    synthesis.merge_gateways();
    synthesis.delete_redundant_gateways();
    synthesis.annotate_conditions();
    synthesis.validate()?;

    Ok(synthesis.graph)
}

struct Synthesis<'a> {
    registry: &'a ActivityRegistry,
    graph: BpmnGraph,
    node_of: HashMap<Activity, NodeIndex>,
    activity_of: HashMap<NodeIndex, Activity>,
    /// Exclusive gateways created as splits; gateway shape alone does not indicate direction
    xor_splits: HashSet<NodeIndex>,
    not_succession: HashSet<(Activity, Activity)>,
}

impl Synthesis<'_> {
    /// Start and end events plus one task per non-synthetic activity
    fn create_skeleton(&mut self, activities: &[Activity]) {
        let start = self.graph.add_node(FlowNodeKind::StartEvent, "start", "start");
        self.map_activity(self.registry.start_activity(), start);

        let end = self.graph.add_node(FlowNodeKind::EndEvent, "end", "end");
        self.map_activity(self.registry.end_activity(), end);

        for &activity in activities {
            if !self.node_of.contains_key(&activity) {
                let name = self.registry.name_of(activity);
                let id: String = name.split_whitespace().collect();
                let task = self.graph.add_node(FlowNodeKind::Task, id, name);
                self.map_activity(activity, task);
            }
        }
    }

    /// One direct flow per remaining causality
    fn create_causalities(
        &mut self,
        causalities: &[(Activity, Activity)],
    ) -> Result<(), SynthesisError> {
        for &(left, right) in causalities {
            let from = self.node_for(left)?;
            let to = self.node_for(right)?;
            self.graph.add_flow(from, to);
        }
        Ok(())
    }

    /// One exclusive split gateway per alternative triple
    fn create_alternatives(
        &mut self,
        alternatives: &[(Activity, Activity, Activity)],
    ) -> Result<(), SynthesisError> {
        for (i, &(left, middle, right)) in alternatives.iter().enumerate() {
            let id = format!("xor-alt-{}", i);
            let gateway = self
                .graph
                .add_node(FlowNodeKind::ExclusiveGateway, id.clone(), id);
            let from = self.node_for(left)?;
            let to_middle = self.node_for(middle)?;
            let to_right = self.node_for(right)?;
            self.graph.add_flow(from, gateway);
            self.graph.add_flow(gateway, to_middle);
            self.graph.add_flow(gateway, to_right);
            self.xor_splits.insert(gateway);
        }
        Ok(())
    }

    /// One exclusive join gateway per abstraction triple
    fn create_abstractions(
        &mut self,
        abstractions: &[(Activity, Activity, Activity)],
    ) -> Result<(), SynthesisError> {
        for (i, &(left, middle, right)) in abstractions.iter().enumerate() {
            let id = format!("xor-abstr-{}", i);
            let gateway = self
                .graph
                .add_node(FlowNodeKind::ExclusiveGateway, id.clone(), id);
            let from_left = self.node_for(left)?;
            let from_middle = self.node_for(middle)?;
            let to = self.node_for(right)?;
            self.graph.add_flow(from_left, gateway);
            self.graph.add_flow(from_middle, gateway);
            self.graph.add_flow(gateway, to);
        }
        Ok(())
    }

    ///
    /// Bundle the flows of every task with more than one input and/or output behind parallel
    /// gateways
    ///
    /// Multiple independent predecessors/successors of a single task carry AND semantics. Start
    /// and end events are left untouched.
    ///
    fn bundle_task_flows(&mut self) {
        for task in self.graph.nodes_of_kind(FlowNodeKind::Task) {
            self.bundle_incoming(task, FlowNodeKind::ParallelGateway);
            self.bundle_outgoing(task, FlowNodeKind::ParallelGateway);
        }
    }

    ///
    /// Bundle the inputs of exclusive splits and the outputs of exclusive joins
    ///
    /// A split marker decides which side needs bundling. The bundling gateway is exclusive when
    /// the activities connected by the first two flows are related by not-succession and parallel
    /// otherwise; flows attached to non-task nodes count as not related.
    ///
    fn bundle_gateway_flows(&mut self) {
        for gateway in self.graph.nodes_of_kind(FlowNodeKind::ExclusiveGateway) {
            if self.xor_splits.contains(&gateway) {
                let incoming = self.graph.incoming(gateway);
                if incoming.len() < 2 {
                    continue;
                }
                let kind = self.bundle_kind(
                    self.graph.flow_source(incoming[0]),
                    self.graph.flow_source(incoming[1]),
                );
                self.bundle_incoming(gateway, kind);
            } else {
                let outgoing = self.graph.outgoing(gateway);
                if outgoing.len() < 2 {
                    continue;
                }
                let kind = self.bundle_kind(
                    self.graph.flow_target(outgoing[0]),
                    self.graph.flow_target(outgoing[1]),
                );
                self.bundle_outgoing(gateway, kind);
            }
        }
    }

    /// Gateway kind for bundling the flows connecting the two given nodes
    fn bundle_kind(&self, first: NodeIndex, second: NodeIndex) -> FlowNodeKind {
        let mutually_exclusive = match (self.activity_of.get(&first), self.activity_of.get(&second))
        {
            (Some(&a), Some(&b)) => {
                self.not_succession.contains(&(a, b)) || self.not_succession.contains(&(b, a))
            }
            _ => false,
        };
        if mutually_exclusive {
            FlowNodeKind::ExclusiveGateway
        } else {
            FlowNodeKind::ParallelGateway
        }
    }

    /// Interpose a new gateway absorbing all incoming flows of the node
    fn bundle_incoming(&mut self, node: NodeIndex, kind: FlowNodeKind) {
        let incoming = self.graph.incoming(node);
        if incoming.len() < 2 {
            return;
        }
        let id = format!("{}-bundle-in", self.graph.node(node).id);
        let gateway = self.graph.add_node(kind, id.clone(), id);
        self.graph.add_flow(gateway, node);
        for flow in incoming {
            self.graph.redirect_flow_target(flow, gateway);
        }
    }

    /// Interpose a new gateway absorbing all outgoing flows of the node
    fn bundle_outgoing(&mut self, node: NodeIndex, kind: FlowNodeKind) {
        let outgoing = self.graph.outgoing(node);
        if outgoing.len() < 2 {
            return;
        }
        let id = format!("{}-bundle-out", self.graph.node(node).id);
        let gateway = self.graph.add_node(kind, id.clone(), id);
        self.graph.add_flow(node, gateway);
        for flow in outgoing {
            self.graph.redirect_flow_source(flow, gateway);
        }
    }

    ///
    /// Merge redundant gateways (same ordered inputs or same ordered outputs) until a full scan
    /// finds no further pair
    ///
    /// Merging is pairwise but there may be more than two mergeable gateways, hence the fixpoint
    /// loop. Each merge replaces two gateways by one, so the shrinking gateway count bounds the
    /// iteration.
    ///
    fn merge_gateways(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            let gateways = self.graph.gateways();
            for &gateway in &gateways {
                if !self.graph.contains_node(gateway) {
                    continue;
                }
                let kind = self.graph.node(gateway).kind;
                let is_split = self.graph.outgoing(gateway).len() > 1;
                let partner = gateways.iter().copied().find(|&other| {
                    other != gateway
                        && self.graph.contains_node(other)
                        && self.graph.node(other).kind == kind
                        && if is_split {
                            self.graph.incoming_sources(other)
                                == self.graph.incoming_sources(gateway)
                        } else {
                            self.graph.outgoing_targets(other)
                                == self.graph.outgoing_targets(gateway)
                        }
                });
                if let Some(other) = partner {
                    if is_split {
                        self.merge_incoming(gateway, other);
                    } else {
                        self.merge_outgoing(gateway, other);
                    }
                    changed = true;
                }
            }
        }
    }

    /// Replace both gateways by a new one, bundling the incoming connections
    fn merge_incoming(&mut self, gateway: NodeIndex, other: NodeIndex) {
        let merged = self.create_merge_gateway(gateway, other);

        for flow in self.graph.incoming(gateway) {
            self.graph.redirect_flow_target(flow, merged);
        }
        // the partner has the same sources, so its incoming flows are duplicates
        for flow in self.graph.incoming(other) {
            self.graph.remove_flow(flow);
        }

        let mut seen_targets: Vec<NodeIndex> = Vec::new();
        let outgoing: Vec<EdgeIndex> = self
            .graph
            .outgoing(gateway)
            .into_iter()
            .chain(self.graph.outgoing(other))
            .collect();
        for flow in outgoing {
            let target = self.graph.flow_target(flow);
            if seen_targets.contains(&target) {
                self.graph.remove_flow(flow);
            } else {
                seen_targets.push(target);
                self.graph.redirect_flow_source(flow, merged);
            }
        }

        self.graph.remove_node(gateway);
        self.graph.remove_node(other);
    }

    /// Replace both gateways by a new one, bundling the outgoing connections
    fn merge_outgoing(&mut self, gateway: NodeIndex, other: NodeIndex) {
        let merged = self.create_merge_gateway(gateway, other);

        for flow in self.graph.outgoing(gateway) {
            self.graph.redirect_flow_source(flow, merged);
        }
        // the partner has the same targets, so its outgoing flows are duplicates
        for flow in self.graph.outgoing(other) {
            self.graph.remove_flow(flow);
        }

        let incoming: Vec<EdgeIndex> = self
            .graph
            .incoming(gateway)
            .into_iter()
            .chain(self.graph.incoming(other))
            .collect();
        for flow in incoming {
            self.graph.redirect_flow_target(flow, merged);
        }

        self.graph.remove_node(gateway);
        self.graph.remove_node(other);
    }

    /// New gateway of the same kind, named after the two merged ones
    fn create_merge_gateway(&mut self, gateway: NodeIndex, other: NodeIndex) -> NodeIndex {
        let id = format!(
            "{}_{}-merged",
            self.graph.node(gateway).id,
            self.graph.node(other).id
        );
        let kind = self.graph.node(gateway).kind;
        self.graph.add_node(kind, id.clone(), id)
    }

    ///
    /// Splice out gateways with exactly one input and one output until a full scan finds none
    ///
    /// Such gateways contribute no branching semantics; the predecessor is reconnected directly
    /// to the successor.
    ///
    fn delete_redundant_gateways(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for gateway in self.graph.gateways() {
                if !self.graph.contains_node(gateway) {
                    continue;
                }
                let incoming = self.graph.incoming(gateway);
                let outgoing = self.graph.outgoing(gateway);
                if incoming.len() == 1 && outgoing.len() == 1 {
                    let successor = self.graph.flow_target(outgoing[0]);
                    self.graph.redirect_flow_target(incoming[0], successor);
                    self.graph.remove_flow(outgoing[0]);
                    self.graph.remove_node(gateway);
                    changed = true;
                }
            }
        }
    }

    /// Attach a distinguishing guard to every outgoing flow of an exclusive split except the
    /// first, leaving exactly one default flow
    fn annotate_conditions(&mut self) {
        for gateway in self.graph.nodes_of_kind(FlowNodeKind::ExclusiveGateway) {
            let outgoing = self.graph.outgoing(gateway);
            if outgoing.len() > 1 {
                for (i, flow) in outgoing.into_iter().enumerate().skip(1) {
                    self.graph.flow_mut(flow).condition = Some(format!("${{action == {}}}", i));
                }
            }
        }
    }

    fn validate(&self) -> Result<(), SynthesisError> {
        let start = self
            .graph
            .start_node()
            .ok_or(SynthesisError::SchemaViolation {
                invariant: "graph has a start event",
                node: String::new(),
            })?;

        for node in self.graph.nodes() {
            let flow_node = self.graph.node(node);
            if flow_node.kind != FlowNodeKind::StartEvent && self.graph.incoming(node).is_empty() {
                return Err(SynthesisError::SchemaViolation {
                    invariant: "every non-start node has an incoming flow",
                    node: flow_node.id.clone(),
                });
            }
            if flow_node.kind != FlowNodeKind::EndEvent && self.graph.outgoing(node).is_empty() {
                return Err(SynthesisError::SchemaViolation {
                    invariant: "every non-end node has an outgoing flow",
                    node: flow_node.id.clone(),
                });
            }
        }

        let reachable = self.graph.reachable_from(start);
        for node in self.graph.nodes() {
            if !reachable.contains(&node) {
                return Err(SynthesisError::SchemaViolation {
                    invariant: "every node is reachable from the start event",
                    node: self.graph.node(node).id.clone(),
                });
            }
        }

        self.validate_gateways_acyclic()
    }

    /// Kahn-style elimination over the gateway-to-gateway flows; a leftover gateway sits on a
    /// cycle of gateways with no task in between
    fn validate_gateways_acyclic(&self) -> Result<(), SynthesisError> {
        let gateways: HashSet<NodeIndex> = self.graph.gateways().into_iter().collect();
        let mut in_degree: HashMap<NodeIndex, usize> = gateways.iter().map(|&g| (g, 0)).collect();
        for &gateway in &gateways {
            for target in self.graph.outgoing_targets(gateway) {
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree += 1;
                }
            }
        }

        let mut queue: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&g, _)| g)
            .collect();
        let mut eliminated = 0;
        while let Some(gateway) = queue.pop() {
            eliminated += 1;
            for target in self.graph.outgoing_targets(gateway) {
                if let Some(degree) = in_degree.get_mut(&target) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(target);
                    }
                }
            }
        }

        if eliminated < gateways.len() {
            let on_cycle = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(&g, _)| self.graph.node(g).id.clone())
                .next()
                .unwrap_or_default();
            return Err(SynthesisError::SchemaViolation {
                invariant: "gateways do not form a cycle",
                node: on_cycle,
            });
        }
        Ok(())
    }

    fn map_activity(&mut self, activity: Activity, node: NodeIndex) {
        self.node_of.insert(activity, node);
        self.activity_of.insert(node, activity);
    }

    fn node_for(&self, activity: Activity) -> Result<NodeIndex, SynthesisError> {
        self.node_of.get(&activity).copied().ok_or_else(|| {
            SynthesisError::UnknownActivity(self.registry.name_of(activity).to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::relation_builder::RelationBuilder;
    use crate::utils::test_utils::log_from_strings;

    fn discover(traces: &[&str]) -> BpmnGraph {
        let mut registry = ActivityRegistry::new();
        let log = log_from_strings(&mut registry, traces);
        let mut builder = RelationBuilder::new();
        builder.evaluate(&log, &registry);
        synthesize(
            &registry,
            &builder.activities().unwrap(),
            &builder.alternatives().unwrap(),
            &builder.abstractions().unwrap(),
            &builder.remaining_causalities().unwrap(),
            &builder.not_succession().unwrap(),
        )
        .unwrap()
    }

    fn assert_passes_exhaustive(graph: &BpmnGraph) {
        for gateway in graph.gateways() {
            assert!(
                !(graph.incoming(gateway).len() == 1 && graph.outgoing(gateway).len() == 1),
                "no gateway may have exactly one input and one output"
            );
        }
        let gateways = graph.gateways();
        for &g1 in &gateways {
            for &g2 in &gateways {
                if g1 == g2 || graph.node(g1).kind != graph.node(g2).kind {
                    continue;
                }
                if graph.outgoing(g1).len() > 1 {
                    assert_ne!(
                        graph.incoming_sources(g1),
                        graph.incoming_sources(g2),
                        "splits with identical ordered inputs must have been merged"
                    );
                } else {
                    assert_ne!(
                        graph.outgoing_targets(g1),
                        graph.outgoing_targets(g2),
                        "joins with identical ordered outputs must have been merged"
                    );
                }
            }
        }
    }

    #[test]
    fn single_activity_process() {
        let graph = discover(&["x"]);

        assert_eq!(graph.nodes_of_kind(FlowNodeKind::Task).len(), 1);
        assert_eq!(graph.nodes_of_kind(FlowNodeKind::StartEvent).len(), 1);
        assert_eq!(graph.nodes_of_kind(FlowNodeKind::EndEvent).len(), 1);
        assert_eq!(graph.flow_count(), 2);
        assert!(graph.gateways().is_empty());
    }

    #[test]
    fn two_branch_process() {
        let graph = discover(&["abghjkil", "acdefgjhikl"]);

        assert_eq!(graph.nodes_of_kind(FlowNodeKind::Task).len(), 12);
        assert_eq!(graph.nodes_of_kind(FlowNodeKind::ParallelGateway).len(), 2);
        assert_eq!(graph.nodes_of_kind(FlowNodeKind::ExclusiveGateway).len(), 2);
        assert_eq!(graph.flow_count(), 19);
        assert_eq!(graph.node_count(), 18);
        assert_passes_exhaustive(&graph);

        // the exclusive split of a and the parallel bundles of g and l survive unmerged
        assert!(graph.find_node("xor-alt-0").is_some());
        assert!(graph.find_node("xor-abstr-0").is_some());
        assert!(graph.find_node("g-bundle-out").is_some());
        assert!(graph.find_node("l-bundle-in").is_some());
    }

    #[test]
    fn exclusive_split_gets_conditions_except_default_flow() {
        let graph = discover(&["abghjkil", "acdefgjhikl"]);

        let conditioned: Vec<_> = graph
            .flows()
            .filter(|&f| graph.flow(f).condition.is_some())
            .collect();
        assert_eq!(conditioned.len(), 1);
        assert_eq!(
            graph.flow(conditioned[0]).condition.as_deref(),
            Some("${action == 1}")
        );
        // the conditioned flow leaves the exclusive split
        let split = graph.find_node("xor-alt-0").unwrap();
        assert_eq!(graph.flow_source(conditioned[0]), split);
    }

    #[test]
    fn equivalent_gateways_are_merged() {
        // three alternative splits of a and three abstraction joins into the end event
        let graph = discover(&["ab", "ac", "ad"]);

        let xor_splits: Vec<_> = graph
            .nodes_of_kind(FlowNodeKind::ExclusiveGateway)
            .into_iter()
            .filter(|&g| graph.outgoing(g).len() > 1)
            .collect();
        let xor_joins: Vec<_> = graph
            .nodes_of_kind(FlowNodeKind::ExclusiveGateway)
            .into_iter()
            .filter(|&g| graph.incoming(g).len() > 1)
            .collect();
        assert_eq!(xor_splits.len(), 1);
        assert_eq!(xor_joins.len(), 1);
        assert_passes_exhaustive(&graph);
    }

    #[test]
    fn unreachable_activity_is_a_schema_violation() {
        let mut registry = ActivityRegistry::new();
        let x = registry.intern("x");
        let y = registry.intern("y");
        let start = registry.start_activity();
        let end = registry.end_activity();

        let result = synthesize(
            &registry,
            &[start, end, x, y],
            &[],
            &[],
            &[(start, x), (x, end)],
            &[],
        );
        assert!(matches!(
            result,
            Err(SynthesisError::SchemaViolation { .. })
        ));
    }

    #[test]
    fn relation_over_unlisted_activity_is_an_error() {
        let mut registry = ActivityRegistry::new();
        let a = registry.intern("a");
        let b = registry.intern("b");
        let c = registry.intern("c");
        let start = registry.start_activity();
        let end = registry.end_activity();

        let result = synthesize(
            &registry,
            &[start, end, a],
            &[(a, b, c)],
            &[],
            &[(start, a)],
            &[],
        );
        assert_eq!(
            result.unwrap_err(),
            SynthesisError::UnknownActivity("b".to_string())
        );
    }
}
