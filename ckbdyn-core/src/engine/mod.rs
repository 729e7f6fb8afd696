//! The per-timestep simulation engine.
//!
//! Owns every arena and sampling set, a single seeded generator, and the
//! event stream buffer. Each timestep draws new long-running community
//! events, applies node births and deaths, advances active events, perturbs
//! edges and finally reconciles community sizes through the assignment
//! solver. Given the same configuration and seed the emitted streams are
//! bit-identical across runs.

mod assignment;
mod community;
mod events;

use rand::{Rng, SeedableRng, rngs::SmallRng};
use rand_distr::{Binomial, Distribution, Geometric};
use tracing::{info, warn};

use crate::{
    builder::{GeneratorOptions, PerturbationMode},
    cancellation::CancellationToken,
    distribution::{MembershipDistribution, SizeDistribution},
    error::{GeneratorError, Result},
    sampling::IndexedSet,
    stream::{CommunityEvent, EventStreamBuffer, GraphEvent},
};

pub use community::CommunityId;
pub(crate) use community::{CommunityState, canonical_edge};

use events::{ActiveEvent, BirthEvent, DeathEvent, EventState, MergeEvent, SplitEvent};

/// Generator of a synthetic dynamic graph with overlapping, time-varying
/// community structure.
///
/// Instances are configured through
/// [`CkbDynamicBuilder`](crate::CkbDynamicBuilder), run exactly once, and
/// then queried for the two event streams.
#[derive(Debug)]
pub struct CkbDynamic {
    // configuration
    initial_nodes: usize,
    num_timesteps: usize,
    community_event_probability: f64,
    node_event_probability: f64,
    perturbation_probability: f64,
    perturbation_mode: PerturbationMode,
    edge_sharpness: f64,
    t_effect: usize,
    size_distribution: Box<dyn SizeDistribution>,
    membership_distribution: Box<dyn MembershipDistribution>,
    token: CancellationToken,

    // randomness
    rng: SmallRng,
    sharpness_offsets: Geometric,

    // node state
    nodes_alive: IndexedSet<usize>,
    desired_memberships: Vec<usize>,
    node_communities: Vec<IndexedSet<CommunityId>>,
    overassigned_nodes: IndexedSet<usize>,
    sum_desired_memberships: usize,
    current_memberships: usize,

    // community state
    communities: Vec<Option<community::Community>>,
    community_ids: IndexedSet<CommunityId>,
    available_communities: IndexedSet<CommunityId>,
    global_id: CommunityId,
    sum_desired_members: usize,
    current_events: Vec<ActiveEvent>,

    // progress
    current_timestep: usize,
    stream: EventStreamBuffer,
    started: bool,
    outputs: Option<(Vec<GraphEvent>, Vec<CommunityEvent>)>,
}

impl CkbDynamic {
    pub(crate) fn new(
        options: GeneratorOptions,
        size_distribution: Box<dyn SizeDistribution>,
        membership_distribution: Box<dyn MembershipDistribution>,
        token: CancellationToken,
    ) -> Self {
        let rng = SmallRng::seed_from_u64(options.seed);
        let sharpness_offsets =
            Geometric::new(options.edge_sharpness).expect("edge sharpness validated by builder");

        let mut engine = Self {
            initial_nodes: options.initial_nodes,
            num_timesteps: options.num_timesteps,
            community_event_probability: options.community_event_probability,
            node_event_probability: options.node_event_probability,
            perturbation_probability: options.perturbation_probability,
            perturbation_mode: options.perturbation_mode,
            edge_sharpness: options.edge_sharpness,
            t_effect: options.t_effect,
            size_distribution,
            membership_distribution,
            token,
            rng,
            sharpness_offsets,
            nodes_alive: IndexedSet::new(),
            desired_memberships: Vec::new(),
            node_communities: Vec::new(),
            overassigned_nodes: IndexedSet::new(),
            sum_desired_memberships: 0,
            current_memberships: 0,
            communities: Vec::new(),
            community_ids: IndexedSet::new(),
            available_communities: IndexedSet::new(),
            global_id: CommunityId::new(0),
            sum_desired_members: 0,
            current_events: Vec::new(),
            current_timestep: 0,
            stream: EventStreamBuffer::new(),
            started: false,
            outputs: None,
        };

        // The global community carries the background noise and is never
        // listed among the regular communities.
        engine.communities.push(Some(community::Community::new(
            0,
            options.epsilon,
            CommunityState::Stable,
        )));
        engine
    }

    /// Number of nodes generated before the first timestep.
    #[must_use]
    pub fn initial_nodes(&self) -> usize {
        self.initial_nodes
    }

    /// Number of advance ticks the run performs.
    #[must_use]
    pub fn num_timesteps(&self) -> usize {
        self.num_timesteps
    }

    /// Whether the run has completed and the streams are available.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.outputs.is_some()
    }

    /// Executes the full simulation.
    ///
    /// # Errors
    /// Returns [`GeneratorError::AlreadyRun`] when invoked a second time and
    /// [`GeneratorError::Cancelled`] when the cancellation token fires; a
    /// cancelled run produces no streams.
    pub fn run(&mut self) -> Result<()> {
        if self.started {
            return Err(GeneratorError::AlreadyRun);
        }
        self.started = true;
        self.ensure_running()?;

        let initial_count = self.initialise()?;

        for timestep in 1..=self.num_timesteps {
            self.current_timestep = timestep;
            self.ensure_running()?;

            let community_events =
                self.draw_binomial(self.community_ids.len(), self.community_event_probability);
            let node_events =
                self.draw_binomial(self.community_ids.len(), self.node_event_probability);
            info!(
                timestep,
                community_events, node_events, "generating timestep events"
            );

            self.generate_community_events(community_events)?;
            self.apply_node_events(node_events, initial_count);
            self.tick_events()?;
            self.apply_perturbation()?;
            self.assign_nodes_to_communities()?;

            info!(
                timestep,
                memberships = self.current_memberships,
                desired_memberships = self.sum_desired_memberships,
                desired_members = self.sum_desired_members,
                communities = self.community_ids.len(),
                available = self.available_communities.len(),
                active_events = self.current_events.len(),
                "timestep complete"
            );
        }

        self.teardown();
        let stream = std::mem::take(&mut self.stream);
        self.outputs = Some(stream.finalise(self.num_timesteps));
        Ok(())
    }

    /// Ordered graph-event stream produced by the run.
    ///
    /// # Errors
    /// Returns [`GeneratorError::NotFinished`] before [`run`](Self::run) has
    /// completed.
    pub fn graph_events(&self) -> Result<&[GraphEvent]> {
        self.outputs
            .as_ref()
            .map(|(graph, _)| graph.as_slice())
            .ok_or(GeneratorError::NotFinished)
    }

    /// Ordered community-event stream produced by the run.
    ///
    /// # Errors
    /// Returns [`GeneratorError::NotFinished`] before [`run`](Self::run) has
    /// completed.
    pub fn community_events(&self) -> Result<&[CommunityEvent]> {
        self.outputs
            .as_ref()
            .map(|(_, community)| community.as_slice())
            .ok_or(GeneratorError::NotFinished)
    }

    fn initialise(&mut self) -> Result<usize> {
        self.current_timestep = 0;
        for _ in 0..self.initial_nodes {
            self.generate_node();
        }
        let initial_count = self.nodes_alive.len();

        while self.sum_desired_members < self.sum_desired_memberships {
            self.ensure_running()?;
            let size = self.size_distribution.draw_size(&mut self.rng);
            let probability = self.size_distribution.density(size);
            self.create_community(size, probability, CommunityState::Stable);
            self.sum_desired_members += size;
        }

        self.assign_nodes_to_communities()?;
        Ok(initial_count)
    }

    fn generate_node(&mut self) {
        let node = self.desired_memberships.len();
        let desired = self.membership_distribution.draw_memberships(&mut self.rng);
        self.desired_memberships.push(desired);
        self.sum_desired_memberships += desired;
        self.nodes_alive.insert(node);
        self.node_communities.push(IndexedSet::new());
        let global = self.global_id;
        self.add_node_to_community(node, global);
        self.stream.add_node(self.current_timestep, node);
    }

    fn erase_node(&mut self) {
        if self.nodes_alive.is_empty() {
            warn!("no node alive for a death event");
            return;
        }
        let position = self.draw_index(self.nodes_alive.len());
        let node = self.nodes_alive.at(position);
        self.sum_desired_memberships -= self.desired_memberships[node];
        self.desired_memberships[node] = 0;

        while !self.node_communities[node].is_empty() {
            let community = self.node_communities[node].at(0);
            self.remove_node_from_community(node, community);
        }

        debug_assert!(self.nodes_alive.contains(node));
        self.nodes_alive.remove(node);
        let global = self.global_id;
        self.remove_node_from_community(node, global);
        self.stream.remove_node(self.current_timestep, node);
    }

    fn generate_community_events(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.ensure_running()?;

            // The schedule leans towards growth while memberships outstrip
            // member slots and towards shrinkage otherwise.
            let birth_probability = if self.sum_desired_members == 0 {
                0.5
            } else {
                let pressure =
                    self.sum_desired_memberships as f64 / self.sum_desired_members as f64;
                0.5 * pressure / (1.0 + pressure)
            };
            let death_probability = 0.5 - birth_probability;
            let split_probability = birth_probability;
            let t_effect = self.t_effect;

            let draw = self.rng.gen::<f64>();
            if draw < birth_probability {
                let core_size = self.size_distribution.min_size();
                let target_size = self.size_distribution.draw_size(&mut self.rng);
                self.sum_desired_members += target_size;
                let event = BirthEvent::new(self, core_size, target_size, t_effect);
                self.current_events.push(ActiveEvent::Birth(event));
            } else if draw < birth_probability + death_probability {
                if self.available_communities.is_empty() {
                    warn!("no community available for a death event");
                    continue;
                }
                let position = self.draw_index(self.available_communities.len());
                let community = self.available_communities.at(position);
                self.sum_desired_members -= self.community(community).desired_size;
                let core_size = self.size_distribution.min_size();
                let event = DeathEvent::new(self, community, core_size, t_effect);
                self.current_events.push(ActiveEvent::Death(event));
                debug_assert!(!self.community(community).is_available());
            } else if draw < birth_probability + death_probability + split_probability {
                if self.available_communities.is_empty() {
                    warn!("no community available for a split event");
                    continue;
                }
                let position = self.draw_index(self.available_communities.len());
                let community = self.available_communities.at(position);
                self.sum_desired_members -= self.community(community).desired_size;
                let target_a = self.size_distribution.draw_size(&mut self.rng);
                self.sum_desired_members += target_a;
                let target_b = self.size_distribution.draw_size(&mut self.rng);
                self.sum_desired_members += target_b;
                let event = SplitEvent::new(self, community, target_a, target_b, t_effect);
                self.current_events.push(ActiveEvent::Split(event));
                debug_assert!(!self.community(community).is_available());
            } else {
                if self.available_communities.len() < 2 {
                    warn!("no two communities available for a merge event");
                    continue;
                }
                let first = self.draw_index(self.available_communities.len());
                let second = self.draw_index_in(1, self.available_communities.len());
                let (first, second) = resolve_merge_partners(first, second);
                let absorber = self.available_communities.at(first);
                let absorbed = self.available_communities.at(second);
                self.sum_desired_members -= self.community(absorber).desired_size;
                self.sum_desired_members -= self.community(absorbed).desired_size;
                let target_size = self.size_distribution.draw_size(&mut self.rng);
                self.sum_desired_members += target_size;
                let event = MergeEvent::new(self, absorber, absorbed, target_size, t_effect);
                self.current_events.push(ActiveEvent::Merge(event));
                debug_assert!(!self.community(absorber).is_available());
                debug_assert!(!self.community(absorbed).is_available());
            }
        }
        Ok(())
    }

    /// All deaths happen before all births, so a node never dies in the
    /// step it was born.
    fn apply_node_events(&mut self, count: usize, initial_count: usize) {
        if count == 0 || self.nodes_alive.is_empty() {
            return;
        }
        let wanted_fraction = initial_count as f64 / self.nodes_alive.len() as f64;
        let birth_probability = wanted_fraction / (1.0 + wanted_fraction);
        let born = self.draw_binomial(count, birth_probability);

        for _ in 0..(count - born) {
            self.erase_node();
        }
        for _ in 0..born {
            self.generate_node();
        }
    }

    fn tick_events(&mut self) -> Result<()> {
        let mut events = std::mem::take(&mut self.current_events);
        let mut index = 0;
        while index < events.len() {
            if let Err(error) = self.ensure_running() {
                self.current_events = events;
                return Err(error);
            }
            match events[index].tick(self) {
                EventState::Done => {
                    events.swap_remove(index);
                }
                EventState::Active => index += 1,
            }
        }
        self.current_events = events;
        Ok(())
    }

    fn apply_perturbation(&mut self) -> Result<()> {
        let probability = self.perturbation_probability;
        if probability <= 0.0 {
            return Ok(());
        }
        let global = self.global_id;
        self.perturb_community_edges(global, probability);

        match self.perturbation_mode {
            PerturbationMode::Dense => {
                let ids = self.community_ids.as_slice().to_vec();
                for community in ids {
                    self.ensure_running()?;
                    self.perturb_community_edges(community, probability);
                }
            }
            PerturbationMode::GeometricStride => {
                // The landed index is inclusive: the community the stride
                // stops on is perturbed before the walk continues.
                let step = (1.0 - probability).ln();
                let mut position = self.geometric_skip(step);
                while position < self.community_ids.len() {
                    self.ensure_running()?;
                    let community = self.community_ids.at(position);
                    self.perturb_community_edges(community, probability);
                    position += 1 + self.geometric_skip(step);
                }
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.communities.clear();
        self.community_ids = IndexedSet::new();
        self.available_communities = IndexedSet::new();
        self.node_communities.clear();
        self.overassigned_nodes = IndexedSet::new();
        self.current_events.clear();
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(GeneratorError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn emit_add_edge(&mut self, source: usize, target: usize, node_joined: bool) {
        debug_assert!(source < target);
        let mut timestep = self.current_timestep;
        if self.edge_sharpness < 1.0 && node_joined && timestep > 0 {
            let offset = self.sharpness_offsets.sample(&mut self.rng) as usize;
            timestep = timestep.saturating_sub(offset);
        }
        self.stream.add_edge(timestep, source, target);
    }

    pub(crate) fn emit_remove_edge(&mut self, source: usize, target: usize, node_left: bool) {
        debug_assert!(source < target);
        let mut timestep = self.current_timestep;
        if self.edge_sharpness < 1.0 && node_left && timestep > 0 {
            let offset = self.sharpness_offsets.sample(&mut self.rng) as usize;
            timestep = (timestep + offset).min(self.num_timesteps);
        }
        self.stream.remove_edge(timestep, source, target);
    }

    /// Draws members for a growing community, preferring nodes that still
    /// want additional memberships.
    pub(crate) fn recruit_members(&mut self, community: CommunityId, count: usize) {
        const CANDIDATE_TRIES: usize = 8;
        for _ in 0..count {
            let mut chosen = None;
            let mut fallback = None;
            for _ in 0..CANDIDATE_TRIES {
                if self.nodes_alive.is_empty() {
                    break;
                }
                let position = self.draw_index(self.nodes_alive.len());
                let node = self.nodes_alive.at(position);
                if self.community(community).has_node(node) {
                    continue;
                }
                if fallback.is_none() {
                    fallback = Some(node);
                }
                if self.node_communities[node].len() < self.desired_memberships[node] {
                    chosen = Some(node);
                    break;
                }
            }
            if let Some(node) = chosen.or(fallback) {
                self.add_node_to_community(node, community);
            }
        }
    }

    fn draw_binomial(&mut self, trials: usize, probability: f64) -> usize {
        if trials == 0 || probability <= 0.0 {
            return 0;
        }
        if probability >= 1.0 {
            return trials;
        }
        let distribution = Binomial::new(trials as u64, probability)
            .expect("event probabilities validated by builder");
        distribution.sample(&mut self.rng) as usize
    }

    pub(crate) fn draw_index(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound)
    }

    fn draw_index_in(&mut self, lower: usize, bound: usize) -> usize {
        self.rng.gen_range(lower..bound)
    }

    /// Number of skipped items before the next hit of a Bernoulli scan with
    /// the given `ln(1 - p)` step.
    pub(crate) fn geometric_skip(&mut self, log_keep: f64) -> usize {
        let draw = 1.0 - self.rng.gen::<f64>();
        (draw.ln() / log_keep) as usize
    }

    pub(crate) fn size_distribution_density(&self, size: usize) -> f64 {
        self.size_distribution.density(size)
    }

    pub(crate) fn min_community_size(&self) -> usize {
        self.size_distribution.min_size()
    }

    pub(crate) fn membership_count(&self, node: usize) -> usize {
        self.node_communities[node].len()
    }

    pub(crate) fn node_is_alive(&self, node: usize) -> bool {
        self.nodes_alive.contains(node)
    }
}

/// Fixes up a merge partner pair drawn as `first ∈ [0, n)`, `second ∈ [1, n)`.
///
/// A collision wraps the second partner to index zero rather than redrawing,
/// which slightly favours the community at the front of the availability
/// order; the behaviour is kept as-is and pinned by a unit test.
pub(crate) fn resolve_merge_partners(first: usize, second: usize) -> (usize, usize) {
    if first == second {
        (first, 0)
    } else {
        (first, second)
    }
}
