//! End-to-end scenarios over the public generator API.
//!
//! Each scenario replays the emitted graph stream from an empty graph and
//! checks it against the community stream, so stream-consistency violations
//! surface as assertion failures with the offending event.

use std::collections::{HashMap, HashSet};

use ckbdyn_core::{
    CkbDynamicBuilder, CommunityEvent, CommunityEventKind, CommunityId, GeneratorError,
    GraphEvent, GraphEventKind, PerturbationMode,
};

/// Shared scenario baseline: fixed seed, single-step events, no smearing,
/// no perturbation, no background noise, deterministic complete
/// intra-community subgraphs.
fn base() -> CkbDynamicBuilder {
    CkbDynamicBuilder::new()
        .with_seed(1)
        .with_event_duration(1)
        .with_edge_sharpness(1.0)
        .with_perturbation_probability(0.0)
        .with_epsilon(0.0)
        .with_intra_community_edge_probability(1.0)
        .with_intra_community_edge_exponent(0.0)
        .with_community_event_probability(0.0)
        .with_node_event_probability(0.0)
}

#[derive(Default)]
struct ReplayState {
    nodes: HashSet<usize>,
    edges: HashSet<(usize, usize)>,
    ever_seen: HashSet<usize>,
    memberships: HashMap<usize, HashSet<CommunityId>>,
}

fn apply_community_segment(
    state: &mut ReplayState,
    community_events: &[CommunityEvent],
    cursor: &mut usize,
) {
    while *cursor < community_events.len() {
        let event = community_events[*cursor];
        *cursor += 1;
        match event.kind {
            CommunityEventKind::Join { node, community } => {
                assert!(
                    state.memberships.entry(node).or_default().insert(community),
                    "node {node} joined community {community:?} twice"
                );
            }
            CommunityEventKind::Leave { node, community } => {
                let removed = state
                    .memberships
                    .get_mut(&node)
                    .is_some_and(|set| set.remove(&community));
                assert!(
                    removed,
                    "node {node} left community {community:?} without joining it"
                );
            }
            CommunityEventKind::TimeStep => return,
        }
    }
}

fn assert_edges_match_memberships(state: &ReplayState) {
    for &(source, target) in &state.edges {
        let shares = match (
            state.memberships.get(&source),
            state.memberships.get(&target),
        ) {
            (Some(first), Some(second)) => !first.is_disjoint(second),
            _ => false,
        };
        assert!(
            shares,
            "edge ({source}, {target}) connects nodes without a shared community"
        );
    }
}

/// Replays the graph stream, validating every event against the running
/// state. With `check_projection` (valid only for sharp, noise-free runs)
/// the edge set is compared against the community memberships at every
/// timestep boundary.
fn replay(
    graph_events: &[GraphEvent],
    community_events: &[CommunityEvent],
    check_projection: bool,
) -> ReplayState {
    let mut state = ReplayState::default();
    let mut cursor = 0;

    for event in graph_events {
        match event.kind {
            GraphEventKind::AddNode { node } => {
                assert!(state.ever_seen.insert(node), "node id {node} was reused");
                state.nodes.insert(node);
            }
            GraphEventKind::RemoveNode { node } => {
                assert!(state.nodes.remove(&node), "node {node} removed twice");
                assert!(
                    !state
                        .edges
                        .iter()
                        .any(|&(source, target)| source == node || target == node),
                    "node {node} removed while incident edges remain"
                );
            }
            GraphEventKind::AddEdge { source, target } => {
                assert!(source < target, "edge ({source}, {target}) is not canonical");
                assert!(
                    state.nodes.contains(&source) && state.nodes.contains(&target),
                    "edge ({source}, {target}) references an absent node"
                );
                assert!(
                    state.edges.insert((source, target)),
                    "edge ({source}, {target}) added twice"
                );
            }
            GraphEventKind::RemoveEdge { source, target } => {
                assert!(
                    state.edges.remove(&(source, target)),
                    "edge ({source}, {target}) removed while absent"
                );
            }
            GraphEventKind::TimeStep => {
                apply_community_segment(&mut state, community_events, &mut cursor);
                if check_projection {
                    assert_edges_match_memberships(&state);
                }
            }
        }
    }

    apply_community_segment(&mut state, community_events, &mut cursor);
    assert_eq!(cursor, community_events.len(), "community stream ran ahead");
    if check_projection {
        assert_edges_match_memberships(&state);
    }
    state
}

fn count_kind(graph_events: &[GraphEvent], probe: fn(&GraphEventKind) -> bool) -> usize {
    graph_events
        .iter()
        .filter(|event| probe(&event.kind))
        .count()
}

fn marker_count(graph_events: &[GraphEvent]) -> usize {
    count_kind(graph_events, |kind| matches!(kind, GraphEventKind::TimeStep))
}

#[test]
fn two_fixed_size_communities_cover_a_four_node_graph() {
    let mut generator = base()
        .with_initial_nodes(4)
        .with_timesteps(0)
        .with_community_size_range(2, 2)
        .with_membership_range(1, 1)
        .build()
        .expect("configuration is valid");
    generator.run().expect("run succeeds");

    let graph_events = generator.graph_events().expect("run has finished");
    let community_events = generator.community_events().expect("run has finished");

    assert_eq!(marker_count(graph_events), 0);
    assert_eq!(
        count_kind(graph_events, |kind| matches!(
            kind,
            GraphEventKind::AddNode { .. }
        )),
        4
    );
    assert_eq!(
        count_kind(graph_events, |kind| matches!(
            kind,
            GraphEventKind::RemoveNode { .. }
        )),
        0
    );
    // Two complete communities of two nodes each contribute one edge apiece.
    assert_eq!(
        count_kind(graph_events, |kind| matches!(
            kind,
            GraphEventKind::AddEdge { .. }
        )),
        2
    );

    let state = replay(graph_events, community_events, true);
    let mut community_sizes: HashMap<CommunityId, usize> = HashMap::new();
    for (node, communities) in &state.memberships {
        assert_eq!(
            communities.len(),
            1,
            "node {node} should hold exactly one membership"
        );
        for &community in communities {
            *community_sizes.entry(community).or_default() += 1;
        }
    }
    assert_eq!(community_sizes.len(), 2);
    assert!(community_sizes.values().all(|&size| size == 2));
}

#[test]
fn quiet_configuration_is_stable_across_timesteps() {
    let mut generator = base()
        .with_initial_nodes(10)
        .with_timesteps(3)
        .with_community_size_range(2, 4)
        .with_membership_range(1, 2)
        .build()
        .expect("configuration is valid");
    generator.run().expect("run succeeds");

    let graph_events = generator.graph_events().expect("run has finished");
    let community_events = generator.community_events().expect("run has finished");

    assert_eq!(marker_count(graph_events), 3);
    assert!(
        graph_events
            .iter()
            .all(|event| event.timestep == 0 || event.kind == GraphEventKind::TimeStep),
        "a quiet run must not emit events after initialisation"
    );
    assert!(
        community_events
            .iter()
            .all(|event| event.timestep == 0 || event.kind == CommunityEventKind::TimeStep)
    );

    replay(graph_events, community_events, true);
}

#[test]
fn community_churn_preserves_the_node_set() {
    let mut generator = base()
        .with_initial_nodes(20)
        .with_timesteps(10)
        .with_community_size_range(3, 5)
        .with_membership_range(1, 2)
        .with_community_event_probability(1.0)
        .build()
        .expect("configuration is valid");
    generator.run().expect("run succeeds");

    let graph_events = generator.graph_events().expect("run has finished");
    let community_events = generator.community_events().expect("run has finished");

    assert_eq!(
        count_kind(graph_events, |kind| matches!(
            kind,
            GraphEventKind::AddNode { .. }
        )),
        20
    );
    assert_eq!(
        count_kind(graph_events, |kind| matches!(
            kind,
            GraphEventKind::RemoveNode { .. }
        )),
        0
    );

    let state = replay(graph_events, community_events, true);
    assert_eq!(state.nodes.len(), 20);

    // The event pressure must actually churn the cover.
    assert!(
        community_events
            .iter()
            .any(|event| event.timestep >= 1
                && !matches!(event.kind, CommunityEventKind::TimeStep)),
        "community events at probability one must reshape the cover"
    );
    let initial_communities: HashSet<CommunityId> = community_ids_at_step_zero(community_events);
    let all_communities: HashSet<CommunityId> = all_community_ids(community_events);
    assert!(all_communities.len() > initial_communities.len());
}

#[test]
fn node_churn_tracks_births_and_deaths() {
    let mut generator = base()
        .with_initial_nodes(20)
        .with_timesteps(10)
        .with_community_size_range(3, 5)
        .with_membership_range(1, 2)
        .with_community_event_probability(1.0)
        .with_node_event_probability(1.0)
        .build()
        .expect("configuration is valid");
    generator.run().expect("run succeeds");

    let graph_events = generator.graph_events().expect("run has finished");
    let community_events = generator.community_events().expect("run has finished");

    let born = count_kind(graph_events, |kind| {
        matches!(kind, GraphEventKind::AddNode { .. })
    });
    let died = count_kind(graph_events, |kind| {
        matches!(kind, GraphEventKind::RemoveNode { .. })
    });
    assert!(born > 20, "births beyond the initial population expected");
    assert!(died > 0, "deaths expected");

    let state = replay(graph_events, community_events, true);
    assert_eq!(state.nodes.len(), born - died);
}

#[test]
fn edge_smearing_shifts_and_annihilates_edge_events() {
    let smeared = || {
        base()
            .with_initial_nodes(100)
            .with_timesteps(50)
            .with_community_size_range(4, 10)
            .with_membership_range(1, 3)
            .with_community_event_probability(0.1)
            .with_node_event_probability(0.1)
    };

    let mut generator = smeared()
        .with_edge_sharpness(0.5)
        .build()
        .expect("configuration is valid");
    generator.run().expect("run succeeds");
    let graph_events = generator.graph_events().expect("run has finished");
    let community_events = generator.community_events().expect("run has finished");

    // Replays stay valid under smearing; the membership projection does
    // not, so it is skipped.
    replay(graph_events, community_events, false);

    // Paired add/remove at the same timestep must have annihilated.
    let mut added: HashMap<usize, HashSet<(usize, usize)>> = HashMap::new();
    let mut removed: HashMap<usize, HashSet<(usize, usize)>> = HashMap::new();
    for event in graph_events {
        match event.kind {
            GraphEventKind::AddEdge { source, target } => {
                added.entry(event.timestep).or_default().insert((source, target));
            }
            GraphEventKind::RemoveEdge { source, target } => {
                removed
                    .entry(event.timestep)
                    .or_default()
                    .insert((source, target));
            }
            _ => {}
        }
    }
    for (timestep, edges) in &added {
        if let Some(dropped) = removed.get(timestep) {
            assert!(
                edges.is_disjoint(dropped),
                "timestep {timestep} still carries an annihilating pair"
            );
        }
    }

    // Smearing must actually move events: a sharp run over the same seed
    // produces a different stream.
    let mut sharp = smeared()
        .with_edge_sharpness(1.0)
        .build()
        .expect("configuration is valid");
    sharp.run().expect("run succeeds");
    assert_ne!(
        sharp.graph_events().expect("run has finished"),
        graph_events
    );
}

#[test]
fn strided_perturbation_keeps_the_stream_consistent() {
    let mut generator = base()
        .with_initial_nodes(30)
        .with_timesteps(5)
        .with_community_size_range(3, 6)
        .with_membership_range(1, 2)
        .with_perturbation_probability(0.5)
        .with_perturbation_mode(PerturbationMode::GeometricStride)
        .build()
        .expect("configuration is valid");
    generator.run().expect("run succeeds");

    let graph_events = generator.graph_events().expect("run has finished");
    let community_events = generator.community_events().expect("run has finished");

    // Perturbation rewires edges but only within communities, so the
    // projection against the community stream still holds.
    replay(graph_events, community_events, true);
    assert!(
        graph_events.iter().any(|event| event.timestep >= 1
            && matches!(
                event.kind,
                GraphEventKind::AddEdge { .. } | GraphEventKind::RemoveEdge { .. }
            )),
        "perturbation at probability one half must rewire some edges"
    );
}

#[test]
fn identical_seeds_yield_identical_streams() {
    let build = || {
        base()
            .with_initial_nodes(40)
            .with_timesteps(8)
            .with_community_size_range(3, 6)
            .with_membership_range(1, 2)
            .with_community_event_probability(0.5)
            .with_node_event_probability(0.5)
            .with_perturbation_probability(0.2)
            .with_seed(9)
            .build()
            .expect("configuration is valid")
    };

    let mut first = build();
    first.run().expect("run succeeds");
    let mut second = build();
    second.run().expect("run succeeds");

    assert_eq!(
        first.graph_events().expect("run has finished"),
        second.graph_events().expect("run has finished")
    );
    assert_eq!(
        first.community_events().expect("run has finished"),
        second.community_events().expect("run has finished")
    );
}

#[test]
fn output_getters_fail_before_the_run() {
    let generator = base()
        .with_initial_nodes(10)
        .with_community_size_range(2, 4)
        .with_membership_range(1, 2)
        .build()
        .expect("configuration is valid");
    assert_eq!(
        generator.graph_events().expect_err("run has not happened"),
        GeneratorError::NotFinished
    );
    assert_eq!(
        generator
            .community_events()
            .expect_err("run has not happened"),
        GeneratorError::NotFinished
    );
}

#[test]
fn run_cannot_be_invoked_twice() {
    let mut generator = base()
        .with_initial_nodes(10)
        .with_timesteps(1)
        .with_community_size_range(2, 4)
        .with_membership_range(1, 2)
        .build()
        .expect("configuration is valid");
    generator.run().expect("first run succeeds");
    assert_eq!(generator.run(), Err(GeneratorError::AlreadyRun));
}

fn community_ids_at_step_zero(community_events: &[CommunityEvent]) -> HashSet<CommunityId> {
    community_events
        .iter()
        .take_while(|event| event.kind != CommunityEventKind::TimeStep)
        .filter_map(|event| match event.kind {
            CommunityEventKind::Join { community, .. } => Some(community),
            _ => None,
        })
        .collect()
}

fn all_community_ids(community_events: &[CommunityEvent]) -> HashSet<CommunityId> {
    community_events
        .iter()
        .filter_map(|event| match event.kind {
            CommunityEventKind::Join { community, .. }
            | CommunityEventKind::Leave { community, .. } => Some(community),
            _ => None,
        })
        .collect()
}
