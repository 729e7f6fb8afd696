//! Long-running community events.
//!
//! Birth, death, split and merge each span `t_effect` timesteps. They are
//! modelled as a tagged variant with a single `tick` entry point and driven
//! from a flat vector with swap-pop removal; while an event owns a
//! community, that community is unavailable and the assignment solver leaves
//! it alone.

use rand::seq::SliceRandom;

use super::{CkbDynamic, CommunityId, community::CommunityState};

/// Outcome of a single event tick.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum EventState {
    Active,
    Done,
}

/// A long-running event in flight.
#[derive(Debug)]
pub(crate) enum ActiveEvent {
    Birth(BirthEvent),
    Death(DeathEvent),
    Split(SplitEvent),
    Merge(MergeEvent),
}

impl ActiveEvent {
    /// Advances the event by one timestep.
    pub(crate) fn tick(&mut self, engine: &mut CkbDynamic) -> EventState {
        match self {
            Self::Birth(event) => event.tick(engine),
            Self::Death(event) => event.tick(engine),
            Self::Split(event) => event.tick(engine),
            Self::Merge(event) => event.tick(engine),
        }
    }
}

fn share_of(outstanding: usize, steps_remaining: usize) -> usize {
    debug_assert!(steps_remaining > 0);
    outstanding.div_ceil(steps_remaining)
}

/// Grows a fresh community from an empty core towards a drawn target size.
#[derive(Debug)]
pub(crate) struct BirthEvent {
    community: CommunityId,
    target_size: usize,
    steps_remaining: usize,
}

impl BirthEvent {
    pub(crate) fn new(
        engine: &mut CkbDynamic,
        core_size: usize,
        target_size: usize,
        t_effect: usize,
    ) -> Self {
        let probability = engine.size_distribution_density(target_size);
        let community = engine.create_community(core_size, probability, CommunityState::Growing);
        Self {
            community,
            target_size,
            steps_remaining: t_effect,
        }
    }

    fn tick(&mut self, engine: &mut CkbDynamic) -> EventState {
        let community = self.community;
        if self.steps_remaining == 1 {
            engine.set_desired_size(community, self.target_size);
            engine.set_community_state(community, CommunityState::Stable);
            return EventState::Done;
        }

        let current = engine.community(community).nodes.len();
        let outstanding = self.target_size.saturating_sub(current);
        engine.recruit_members(community, share_of(outstanding, self.steps_remaining));
        let size = engine.community(community).nodes.len();
        let floor = engine.min_community_size();
        engine.set_desired_size(community, size.max(floor));
        self.steps_remaining -= 1;
        EventState::Active
    }
}

/// Shrinks a community towards a residual core and then dissolves it.
#[derive(Debug)]
pub(crate) struct DeathEvent {
    community: CommunityId,
    core_size: usize,
    steps_remaining: usize,
}

impl DeathEvent {
    pub(crate) fn new(
        engine: &mut CkbDynamic,
        community: CommunityId,
        core_size: usize,
        t_effect: usize,
    ) -> Self {
        engine.set_community_state(community, CommunityState::Shrinking);
        Self {
            community,
            core_size,
            steps_remaining: t_effect,
        }
    }

    fn tick(&mut self, engine: &mut CkbDynamic) -> EventState {
        let community = self.community;
        if self.steps_remaining == 1 {
            let members = engine.community(community).nodes.as_slice().to_vec();
            for node in members {
                engine.remove_node_from_community(node, community);
            }
            engine.destroy_community(community);
            return EventState::Done;
        }

        let current = engine.community(community).nodes.len();
        let excess = current.saturating_sub(self.core_size);
        let share = share_of(excess, self.steps_remaining);
        if share > 0 {
            // Members holding the fewest other memberships go first.
            let mut members = engine.community(community).nodes.as_slice().to_vec();
            members.sort_unstable_by_key(|&node| (engine.membership_count(node), node));
            for &node in members.iter().take(share) {
                engine.remove_node_from_community(node, community);
            }
        }
        let size = engine.community(community).nodes.len();
        engine.set_desired_size(community, size.max(self.core_size));
        self.steps_remaining -= 1;
        EventState::Active
    }
}

/// Carves a community in two along a random cut proportional to the drawn
/// target sizes.
#[derive(Debug)]
pub(crate) struct SplitEvent {
    original: CommunityId,
    offshoot: CommunityId,
    target_original: usize,
    target_offshoot: usize,
    migrate: Vec<usize>,
    evict: Vec<usize>,
    steps_remaining: usize,
}

impl SplitEvent {
    pub(crate) fn new(
        engine: &mut CkbDynamic,
        original: CommunityId,
        target_original: usize,
        target_offshoot: usize,
        t_effect: usize,
    ) -> Self {
        engine.set_community_state(original, CommunityState::Splitting);
        let probability = engine.size_distribution_density(target_offshoot);
        let offshoot =
            engine.create_community(target_offshoot, probability, CommunityState::Splitting);

        let mut members = engine.community(original).nodes.as_slice().to_vec();
        members.shuffle(&mut engine.rng);
        let total = members.len();
        let weight = target_original + target_offshoot;
        let cut = if weight == 0 {
            total / 2
        } else {
            (total * target_original / weight).min(total)
        };
        let moving = &members[cut..];

        // Shares beyond a side's target leave the graph's cover entirely.
        let mut migrate: Vec<usize> = moving.iter().copied().take(target_offshoot).collect();
        let mut evict: Vec<usize> = moving.iter().copied().skip(target_offshoot).collect();
        if cut > target_original {
            evict.extend_from_slice(&members[target_original..cut]);
        }
        migrate.reverse();
        evict.reverse();

        Self {
            original,
            offshoot,
            target_original,
            target_offshoot,
            migrate,
            evict,
            steps_remaining: t_effect,
        }
    }

    fn migrate_one(&mut self, engine: &mut CkbDynamic) {
        let Some(node) = self.migrate.pop() else {
            return;
        };
        if !engine.node_is_alive(node) || !engine.community(self.original).has_node(node) {
            return;
        }
        engine.remove_node_from_community(node, self.original);
        if !engine.community(self.offshoot).has_node(node) {
            engine.add_node_to_community(node, self.offshoot);
        }
    }

    fn evict_one(&mut self, engine: &mut CkbDynamic) {
        let Some(node) = self.evict.pop() else {
            return;
        };
        if engine.node_is_alive(node) && engine.community(self.original).has_node(node) {
            engine.remove_node_from_community(node, self.original);
        }
    }

    fn tick(&mut self, engine: &mut CkbDynamic) -> EventState {
        if self.steps_remaining == 1 {
            while !self.migrate.is_empty() {
                self.migrate_one(engine);
            }
            while !self.evict.is_empty() {
                self.evict_one(engine);
            }
            engine.set_desired_size(self.original, self.target_original);
            engine.set_desired_size(self.offshoot, self.target_offshoot);
            let density = engine.size_distribution_density(self.target_original);
            engine.change_community_edge_probability(self.original, density);
            engine.set_community_state(self.original, CommunityState::Stable);
            engine.set_community_state(self.offshoot, CommunityState::Stable);
            return EventState::Done;
        }

        for _ in 0..share_of(self.migrate.len(), self.steps_remaining) {
            self.migrate_one(engine);
        }
        for _ in 0..share_of(self.evict.len(), self.steps_remaining) {
            self.evict_one(engine);
        }
        self.steps_remaining -= 1;
        EventState::Active
    }
}

/// Folds one community into another, retiring the absorbed id.
#[derive(Debug)]
pub(crate) struct MergeEvent {
    absorber: CommunityId,
    absorbed: CommunityId,
    target_size: usize,
    plan: Vec<usize>,
    steps_remaining: usize,
}

impl MergeEvent {
    pub(crate) fn new(
        engine: &mut CkbDynamic,
        absorber: CommunityId,
        absorbed: CommunityId,
        target_size: usize,
        t_effect: usize,
    ) -> Self {
        engine.set_community_state(absorber, CommunityState::Merging);
        engine.set_community_state(absorbed, CommunityState::Merging);

        let mut plan = engine.community(absorbed).nodes.as_slice().to_vec();
        plan.shuffle(&mut engine.rng);

        // Arriving members wire up at a size-weighted blend of the two
        // densities until the final retarget.
        let size_a = engine.community(absorber).nodes.len();
        let size_b = engine.community(absorbed).nodes.len();
        if size_a + size_b > 0 {
            let blended = (engine.community(absorber).edge_probability * size_a as f64
                + engine.community(absorbed).edge_probability * size_b as f64)
                / (size_a + size_b) as f64;
            engine.community_mut(absorber).edge_probability = blended;
        }

        Self {
            absorber,
            absorbed,
            target_size,
            plan,
            steps_remaining: t_effect,
        }
    }

    fn absorb_one(&mut self, engine: &mut CkbDynamic) {
        let Some(node) = self.plan.pop() else {
            return;
        };
        if !engine.node_is_alive(node) || !engine.community(self.absorbed).has_node(node) {
            return;
        }
        engine.remove_node_from_community(node, self.absorbed);
        if !engine.community(self.absorber).has_node(node) {
            engine.add_node_to_community(node, self.absorber);
        }
    }

    fn trim_absorber(&mut self, engine: &mut CkbDynamic, count: usize) {
        for _ in 0..count {
            let size = engine.community(self.absorber).nodes.len();
            if size <= self.target_size.max(1) {
                return;
            }
            let position = engine.draw_index(size);
            let node = engine.community(self.absorber).nodes.at(position);
            engine.remove_node_from_community(node, self.absorber);
        }
    }

    fn tick(&mut self, engine: &mut CkbDynamic) -> EventState {
        if self.steps_remaining == 1 {
            while !self.plan.is_empty() {
                self.absorb_one(engine);
            }
            debug_assert!(engine.community(self.absorbed).nodes.is_empty());
            engine.destroy_community(self.absorbed);

            let size = engine.community(self.absorber).nodes.len();
            self.trim_absorber(engine, size.saturating_sub(self.target_size));
            engine.set_desired_size(self.absorber, self.target_size);
            let density = engine.size_distribution_density(self.target_size);
            engine.change_community_edge_probability(self.absorber, density);
            engine.set_community_state(self.absorber, CommunityState::Stable);
            return EventState::Done;
        }

        for _ in 0..share_of(self.plan.len(), self.steps_remaining) {
            self.absorb_one(engine);
        }
        let projected = engine.community(self.absorber).nodes.len() + self.plan.len();
        if projected > self.target_size {
            self.trim_absorber(
                engine,
                share_of(projected - self.target_size, self.steps_remaining),
            );
        }
        self.steps_remaining -= 1;
        EventState::Active
    }
}
