//! Community state and its Bernoulli edge model.
//!
//! Communities live in an arena owned by the engine and are addressed by
//! [`CommunityId`]; every membership set and sampling set stores ids, never
//! references. Operations that touch engine-wide bookkeeping (membership
//! sets, the event stream, availability) are engine methods so cross-updates
//! have a single home.

use rand::Rng;

use crate::sampling::IndexedSet;

use super::CkbDynamic;

/// Identifier of a community in the generated cover.
///
/// Ids are dense, monotonically assigned and never reused.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CommunityId(usize);

impl CommunityId {
    /// Wraps a raw community index.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw community index.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

/// Lifecycle state of a community.
///
/// Only `Stable` communities are available for new long-running events and
/// for edits by the assignment solver; the other states mark ownership by an
/// active event. A destroyed community vacates its arena slot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CommunityState {
    Stable,
    Growing,
    Shrinking,
    Splitting,
    Merging,
}

#[derive(Clone, Debug)]
pub(crate) struct Community {
    pub(crate) nodes: IndexedSet<usize>,
    pub(crate) edges: IndexedSet<(usize, usize)>,
    pub(crate) desired_size: usize,
    pub(crate) edge_probability: f64,
    pub(crate) state: CommunityState,
}

impl Community {
    pub(crate) fn new(desired_size: usize, edge_probability: f64, state: CommunityState) -> Self {
        Self {
            nodes: IndexedSet::new(),
            edges: IndexedSet::new(),
            desired_size,
            edge_probability,
            state,
        }
    }

    pub(crate) fn has_node(&self, node: usize) -> bool {
        self.nodes.contains(node)
    }

    /// A community is available while no long-running event owns it.
    pub(crate) fn is_available(&self) -> bool {
        self.state == CommunityState::Stable
    }

    /// Whether a member may be taken away without dropping below the
    /// smaller of the minimum and the desired size. Communities being split
    /// or merged refuse outside edits entirely.
    pub(crate) fn can_remove_node(&self, min_size: usize) -> bool {
        self.nodes.len() > min_size.min(self.desired_size)
            && !matches!(
                self.state,
                CommunityState::Splitting | CommunityState::Merging
            )
    }
}

/// Canonical `(min, max)` form used for every edge key and event payload.
pub(crate) fn canonical_edge(u: usize, v: usize) -> (usize, usize) {
    if u < v { (u, v) } else { (v, u) }
}

impl CkbDynamic {
    pub(crate) fn community(&self, id: CommunityId) -> &Community {
        self.communities[id.get()]
            .as_ref()
            .expect("community is alive")
    }

    pub(crate) fn community_mut(&mut self, id: CommunityId) -> &mut Community {
        self.communities[id.get()]
            .as_mut()
            .expect("community is alive")
    }

    /// Allocates a fresh community and registers it with the engine's
    /// sampling sets.
    pub(crate) fn create_community(
        &mut self,
        desired_size: usize,
        edge_probability: f64,
        state: CommunityState,
    ) -> CommunityId {
        let id = CommunityId::new(self.communities.len());
        self.communities
            .push(Some(Community::new(desired_size, edge_probability, state)));
        self.community_ids.insert(id);
        if state == CommunityState::Stable {
            self.available_communities.insert(id);
        }
        id
    }

    /// Removes an emptied community from the arena and every index.
    pub(crate) fn destroy_community(&mut self, id: CommunityId) {
        debug_assert!(self.community(id).nodes.is_empty());
        self.available_communities.remove(id);
        self.community_ids.remove(id);
        self.communities[id.get()] = None;
    }

    /// Changes a community's state and keeps the availability index in sync.
    pub(crate) fn set_community_state(&mut self, id: CommunityId, state: CommunityState) {
        self.community_mut(id).state = state;
        if id == self.global_id {
            return;
        }
        if state == CommunityState::Stable {
            self.available_communities.insert(id);
        } else {
            self.available_communities.remove(id);
        }
    }

    pub(crate) fn set_desired_size(&mut self, id: CommunityId, desired_size: usize) {
        self.community_mut(id).desired_size = desired_size;
    }

    /// Inserts `node` into the community, materialising an edge to each
    /// existing member with the community's edge probability.
    pub(crate) fn add_node_to_community(&mut self, node: usize, id: CommunityId) {
        debug_assert!(self.nodes_alive.contains(node));
        debug_assert!(!self.community(id).has_node(node));

        let probability = self.community(id).edge_probability;
        let member_count = self.community(id).nodes.len();
        let mut fresh_edges = Vec::new();
        for position in 0..member_count {
            let member = self.community(id).nodes.at(position);
            if self.rng.gen::<f64>() < probability {
                fresh_edges.push(canonical_edge(node, member));
            }
        }

        {
            let community = self.community_mut(id);
            community.nodes.insert(node);
            for &edge in &fresh_edges {
                community.edges.insert(edge);
            }
        }
        for (source, target) in fresh_edges {
            self.emit_add_edge(source, target, true);
        }

        if id != self.global_id {
            if self.desired_memberships[node] == self.node_communities[node].len() {
                self.overassigned_nodes.insert(node);
            }
            self.node_communities[node].insert(id);
            self.stream.node_joins(self.current_timestep, node, id);
            self.current_memberships += 1;
        }
    }

    /// Drops `node` from the community together with its materialised
    /// incident edges.
    pub(crate) fn remove_node_from_community(&mut self, node: usize, id: CommunityId) {
        debug_assert!(self.community(id).has_node(node));

        let incident: Vec<(usize, usize)> = self
            .community(id)
            .edges
            .iter()
            .copied()
            .filter(|&(source, target)| source == node || target == node)
            .collect();
        {
            let community = self.community_mut(id);
            for &edge in &incident {
                community.edges.remove(edge);
            }
            community.nodes.remove(node);
        }
        for (source, target) in incident {
            self.emit_remove_edge(source, target, true);
        }

        if id != self.global_id {
            self.node_communities[node].remove(id);
            if self.desired_memberships[node] == self.node_communities[node].len() {
                self.overassigned_nodes.remove(node);
            }
            self.stream.node_leaves(self.current_timestep, node, id);
            self.current_memberships -= 1;
        }
    }

    /// Drops each existing edge with probability `probability` and draws the
    /// same number of replacement pairs, keeping the expected density
    /// stationary. Victims are selected by geometric strides so the pass
    /// costs time proportional to the number of perturbed edges.
    pub(crate) fn perturb_community_edges(&mut self, id: CommunityId, probability: f64) {
        if probability <= 0.0 {
            return;
        }

        let victims: Vec<(usize, usize)> = if probability >= 1.0 {
            self.community(id).edges.as_slice().to_vec()
        } else {
            let step = (1.0 - probability).ln();
            let mut selected = Vec::new();
            let mut position = self.geometric_skip(step);
            while position < self.community(id).edges.len() {
                selected.push(self.community(id).edges.at(position));
                position += 1 + self.geometric_skip(step);
            }
            selected
        };
        if victims.is_empty() {
            return;
        }

        {
            let community = self.community_mut(id);
            for &edge in &victims {
                community.edges.remove(edge);
            }
        }
        for &(source, target) in &victims {
            self.emit_remove_edge(source, target, false);
        }

        let member_count = self.community(id).nodes.len();
        if member_count < 2 {
            return;
        }
        let max_edges = member_count * (member_count - 1) / 2;
        let budget = 10 * victims.len() + 100;
        let mut added = 0;
        let mut attempts = 0;
        while added < victims.len() && attempts < budget {
            if self.community(id).edges.len() >= max_edges {
                break;
            }
            attempts += 1;
            let first = self.rng.gen_range(0..member_count);
            let second = self.rng.gen_range(0..member_count);
            if first == second {
                continue;
            }
            let edge = canonical_edge(
                self.community(id).nodes.at(first),
                self.community(id).nodes.at(second),
            );
            if self.community(id).edges.contains(edge) {
                continue;
            }
            self.community_mut(id).edges.insert(edge);
            self.emit_add_edge(edge.0, edge.1, false);
            added += 1;
        }
    }

    /// Retargets the community to a new edge probability, thinning or
    /// densifying the materialised pairs to match.
    pub(crate) fn change_community_edge_probability(&mut self, id: CommunityId, probability: f64) {
        let old = self.community(id).edge_probability;
        self.community_mut(id).edge_probability = probability;
        if self.community(id).nodes.len() < 2 || (probability - old).abs() < f64::EPSILON {
            return;
        }

        if probability < old {
            let keep = probability / old;
            let existing = self.community(id).edges.as_slice().to_vec();
            let mut dropped = Vec::new();
            for edge in existing {
                if self.rng.gen::<f64>() >= keep {
                    dropped.push(edge);
                }
            }
            {
                let community = self.community_mut(id);
                for &edge in &dropped {
                    community.edges.remove(edge);
                }
            }
            for (source, target) in dropped {
                self.emit_remove_edge(source, target, false);
            }
        } else {
            let extra = if old >= 1.0 {
                1.0
            } else {
                (probability - old) / (1.0 - old)
            };
            let members = self.community(id).nodes.as_slice().to_vec();
            let mut fresh = Vec::new();
            for (offset, &u) in members.iter().enumerate() {
                for &v in &members[offset + 1..] {
                    let edge = canonical_edge(u, v);
                    if self.community(id).edges.contains(edge) {
                        continue;
                    }
                    if self.rng.gen::<f64>() < extra {
                        fresh.push(edge);
                    }
                }
            }
            {
                let community = self.community_mut(id);
                for &edge in &fresh {
                    community.edges.insert(edge);
                }
            }
            for (source, target) in fresh {
                self.emit_add_edge(source, target, false);
            }
        }
    }
}
