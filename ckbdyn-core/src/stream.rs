//! Append-only event log and its finalisation into the two output streams.
//!
//! The engine appends raw operations tagged with the timestep they take
//! effect in; edge operations may carry a smeared timestep that differs from
//! the driver step that produced them. Finalisation buckets operations by
//! timestep, nets out paired add/remove edge operations within a bucket,
//! keeps a cross-community reference count per edge so graph events fire
//! only when an edge first materialises or finally disappears, and inserts
//! one `TimeStep` marker per step boundary.

use std::collections::{HashMap, HashSet};

use crate::engine::CommunityId;

/// Record of the generated graph stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphEvent {
    /// Timestep the event takes effect in.
    pub timestep: usize,
    /// Payload of the event.
    pub kind: GraphEventKind,
}

/// Payload of a [`GraphEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphEventKind {
    /// A node enters the graph.
    AddNode {
        /// Identifier of the node.
        node: usize,
    },
    /// A node leaves the graph together with its incident edges.
    RemoveNode {
        /// Identifier of the node.
        node: usize,
    },
    /// An edge materialises; `source < target`.
    AddEdge {
        /// Smaller endpoint.
        source: usize,
        /// Larger endpoint.
        target: usize,
    },
    /// An edge disappears; `source < target`.
    RemoveEdge {
        /// Smaller endpoint.
        source: usize,
        /// Larger endpoint.
        target: usize,
    },
    /// Marker separating two timesteps.
    TimeStep,
}

/// Record of the ground-truth community stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommunityEvent {
    /// Timestep the event takes effect in.
    pub timestep: usize,
    /// Payload of the event.
    pub kind: CommunityEventKind,
}

/// Payload of a [`CommunityEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommunityEventKind {
    /// A node joins a community.
    Join {
        /// Identifier of the node.
        node: usize,
        /// Identifier of the community.
        community: CommunityId,
    },
    /// A node leaves a community.
    Leave {
        /// Identifier of the node.
        node: usize,
        /// Identifier of the community.
        community: CommunityId,
    },
    /// Marker separating two timesteps.
    TimeStep,
}

#[derive(Clone, Copy, Debug)]
enum GraphOp {
    AddNode(usize),
    RemoveNode(usize),
    AddEdge(usize, usize),
    RemoveEdge(usize, usize),
}

#[derive(Clone, Copy, Debug)]
struct MembershipOp {
    timestep: usize,
    node: usize,
    community: CommunityId,
    join: bool,
}

/// Per-run event log; consumed by [`finalise`](Self::finalise).
#[derive(Debug, Default)]
pub(crate) struct EventStreamBuffer {
    graph_ops: Vec<(usize, GraphOp)>,
    membership_ops: Vec<MembershipOp>,
}

impl EventStreamBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_node(&mut self, timestep: usize, node: usize) {
        self.graph_ops.push((timestep, GraphOp::AddNode(node)));
    }

    pub(crate) fn remove_node(&mut self, timestep: usize, node: usize) {
        self.graph_ops.push((timestep, GraphOp::RemoveNode(node)));
    }

    /// Records an edge materialisation; `source < target` is the caller's
    /// responsibility.
    pub(crate) fn add_edge(&mut self, timestep: usize, source: usize, target: usize) {
        debug_assert!(source < target);
        self.graph_ops
            .push((timestep, GraphOp::AddEdge(source, target)));
    }

    pub(crate) fn remove_edge(&mut self, timestep: usize, source: usize, target: usize) {
        debug_assert!(source < target);
        self.graph_ops
            .push((timestep, GraphOp::RemoveEdge(source, target)));
    }

    pub(crate) fn node_joins(&mut self, timestep: usize, node: usize, community: CommunityId) {
        self.membership_ops.push(MembershipOp {
            timestep,
            node,
            community,
            join: true,
        });
    }

    pub(crate) fn node_leaves(&mut self, timestep: usize, node: usize, community: CommunityId) {
        self.membership_ops.push(MembershipOp {
            timestep,
            node,
            community,
            join: false,
        });
    }

    /// Flattens the log into the two ordered output streams.
    ///
    /// Smeared edge timesteps are clamped into the window in which both
    /// endpoints are alive, so a replay of the graph stream never touches an
    /// edge of an absent node.
    pub(crate) fn finalise(self, num_timesteps: usize) -> (Vec<GraphEvent>, Vec<CommunityEvent>) {
        let mut births: HashMap<usize, usize> = HashMap::new();
        let mut deaths: HashMap<usize, usize> = HashMap::new();
        for &(timestep, op) in &self.graph_ops {
            match op {
                GraphOp::AddNode(node) => {
                    births.insert(node, timestep);
                }
                GraphOp::RemoveNode(node) => {
                    deaths.insert(node, timestep);
                }
                _ => {}
            }
        }

        let mut buckets: Vec<Vec<GraphOp>> = vec![Vec::new(); num_timesteps + 1];
        for (timestep, op) in self.graph_ops {
            let timestep = match op {
                GraphOp::AddEdge(source, target) => {
                    let born = births
                        .get(&source)
                        .copied()
                        .max(births.get(&target).copied())
                        .unwrap_or(0);
                    timestep.max(born)
                }
                GraphOp::RemoveEdge(source, target) => {
                    let gone = match (deaths.get(&source), deaths.get(&target)) {
                        (Some(&a), Some(&b)) => Some(a.min(b)),
                        (Some(&a), None) | (None, Some(&a)) => Some(a),
                        (None, None) => None,
                    };
                    gone.map_or(timestep, |g| timestep.min(g))
                }
                GraphOp::AddNode(_) | GraphOp::RemoveNode(_) => timestep,
            };
            buckets[timestep.min(num_timesteps)].push(op);
        }

        let mut graph_events = Vec::new();
        let mut edge_counts: HashMap<(usize, usize), i64> = HashMap::new();
        for (timestep, bucket) in buckets.iter().enumerate() {
            if timestep > 0 {
                graph_events.push(GraphEvent {
                    timestep,
                    kind: GraphEventKind::TimeStep,
                });
            }

            let mut net: HashMap<(usize, usize), i64> = HashMap::new();
            for op in bucket {
                match *op {
                    GraphOp::AddEdge(source, target) => {
                        *net.entry((source, target)).or_insert(0) += 1;
                    }
                    GraphOp::RemoveEdge(source, target) => {
                        *net.entry((source, target)).or_insert(0) -= 1;
                    }
                    _ => {}
                }
            }

            let mut handled: HashSet<(usize, usize)> = HashSet::new();
            for op in bucket {
                match *op {
                    GraphOp::AddNode(node) => graph_events.push(GraphEvent {
                        timestep,
                        kind: GraphEventKind::AddNode { node },
                    }),
                    GraphOp::RemoveNode(node) => graph_events.push(GraphEvent {
                        timestep,
                        kind: GraphEventKind::RemoveNode { node },
                    }),
                    GraphOp::AddEdge(source, target) | GraphOp::RemoveEdge(source, target) => {
                        let key = (source, target);
                        if !handled.insert(key) {
                            continue;
                        }
                        let before = edge_counts.get(&key).copied().unwrap_or(0);
                        let after = before + net[&key];
                        debug_assert!(after >= 0, "edge {key:?} removed more often than added");
                        if before == 0 && after > 0 {
                            graph_events.push(GraphEvent {
                                timestep,
                                kind: GraphEventKind::AddEdge { source, target },
                            });
                        } else if before > 0 && after == 0 {
                            graph_events.push(GraphEvent {
                                timestep,
                                kind: GraphEventKind::RemoveEdge { source, target },
                            });
                        }
                        if after == 0 {
                            edge_counts.remove(&key);
                        } else {
                            edge_counts.insert(key, after);
                        }
                    }
                }
            }
        }

        let mut membership_buckets: Vec<Vec<MembershipOp>> = vec![Vec::new(); num_timesteps + 1];
        for op in self.membership_ops {
            membership_buckets[op.timestep.min(num_timesteps)].push(op);
        }

        let mut community_events = Vec::new();
        for (timestep, bucket) in membership_buckets.iter().enumerate() {
            if timestep > 0 {
                community_events.push(CommunityEvent {
                    timestep,
                    kind: CommunityEventKind::TimeStep,
                });
            }
            for op in bucket {
                let kind = if op.join {
                    CommunityEventKind::Join {
                        node: op.node,
                        community: op.community,
                    }
                } else {
                    CommunityEventKind::Leave {
                        node: op.node,
                        community: op.community,
                    }
                };
                community_events.push(CommunityEvent { timestep, kind });
            }
        }

        (graph_events, community_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_both_nodes(buffer: &mut EventStreamBuffer) {
        buffer.add_node(0, 0);
        buffer.add_node(0, 1);
    }

    fn edge_kinds(events: &[GraphEvent]) -> Vec<GraphEventKind> {
        events
            .iter()
            .filter(|event| {
                matches!(
                    event.kind,
                    GraphEventKind::AddEdge { .. } | GraphEventKind::RemoveEdge { .. }
                )
            })
            .map(|event| event.kind)
            .collect()
    }

    #[test]
    fn empty_buffer_still_emits_one_marker_per_step() {
        let (graph, community) = EventStreamBuffer::new().finalise(3);
        let marker_steps: Vec<usize> = graph.iter().map(|event| event.timestep).collect();
        assert_eq!(marker_steps, vec![1, 2, 3]);
        assert!(
            graph
                .iter()
                .all(|event| event.kind == GraphEventKind::TimeStep)
        );
        assert_eq!(community.len(), 3);
    }

    #[test]
    fn paired_add_and_remove_in_one_step_annihilate() {
        let mut buffer = EventStreamBuffer::new();
        add_both_nodes(&mut buffer);
        buffer.add_edge(1, 0, 1);
        buffer.remove_edge(1, 0, 1);
        let (graph, _) = buffer.finalise(2);
        assert!(edge_kinds(&graph).is_empty());
    }

    #[test]
    fn shared_edges_emit_only_on_reference_count_transitions() {
        let mut buffer = EventStreamBuffer::new();
        add_both_nodes(&mut buffer);
        // Two communities materialise the same pair.
        buffer.add_edge(0, 0, 1);
        buffer.add_edge(0, 0, 1);
        // One of them drops it; the edge stays alive.
        buffer.remove_edge(1, 0, 1);
        // The second drop makes it disappear.
        buffer.remove_edge(2, 0, 1);
        let (graph, _) = buffer.finalise(2);
        assert_eq!(
            edge_kinds(&graph),
            vec![
                GraphEventKind::AddEdge {
                    source: 0,
                    target: 1
                },
                GraphEventKind::RemoveEdge {
                    source: 0,
                    target: 1
                },
            ]
        );
        let remove = graph
            .iter()
            .find(|event| matches!(event.kind, GraphEventKind::RemoveEdge { .. }))
            .expect("remove event must survive");
        assert_eq!(remove.timestep, 2);
    }

    #[test]
    fn smeared_add_is_clamped_to_the_later_birth() {
        let mut buffer = EventStreamBuffer::new();
        buffer.add_node(0, 0);
        buffer.add_node(2, 1);
        // Smearing proposed timestep 1, but node 1 is only born at step 2.
        buffer.add_edge(1, 0, 1);
        let (graph, _) = buffer.finalise(3);
        let add = graph
            .iter()
            .find(|event| matches!(event.kind, GraphEventKind::AddEdge { .. }))
            .expect("add event must survive");
        assert_eq!(add.timestep, 2);
    }

    #[test]
    fn smeared_remove_is_clamped_to_the_earlier_death() {
        let mut buffer = EventStreamBuffer::new();
        add_both_nodes(&mut buffer);
        buffer.add_edge(0, 0, 1);
        buffer.remove_edge(3, 0, 1);
        buffer.remove_node(1, 1);
        let (graph, _) = buffer.finalise(4);
        let remove = graph
            .iter()
            .find(|event| matches!(event.kind, GraphEventKind::RemoveEdge { .. }))
            .expect("remove event must survive");
        assert_eq!(remove.timestep, 1);
    }

    #[test]
    fn insertion_order_is_preserved_within_a_step() {
        let mut buffer = EventStreamBuffer::new();
        buffer.add_node(0, 3);
        buffer.add_node(0, 1);
        buffer.add_node(0, 2);
        let (graph, _) = buffer.finalise(0);
        let nodes: Vec<usize> = graph
            .iter()
            .filter_map(|event| match event.kind {
                GraphEventKind::AddNode { node } => Some(node),
                _ => None,
            })
            .collect();
        assert_eq!(nodes, vec![3, 1, 2]);
    }

    #[test]
    fn membership_stream_keeps_joins_and_leaves_verbatim() {
        let mut buffer = EventStreamBuffer::new();
        let community = CommunityId::new(5);
        buffer.node_joins(0, 7, community);
        buffer.node_leaves(1, 7, community);
        let (_, community_events) = buffer.finalise(1);
        assert_eq!(
            community_events,
            vec![
                CommunityEvent {
                    timestep: 0,
                    kind: CommunityEventKind::Join {
                        node: 7,
                        community
                    }
                },
                CommunityEvent {
                    timestep: 1,
                    kind: CommunityEventKind::TimeStep
                },
                CommunityEvent {
                    timestep: 1,
                    kind: CommunityEventKind::Leave {
                        node: 7,
                        community
                    }
                },
            ]
        );
    }
}
