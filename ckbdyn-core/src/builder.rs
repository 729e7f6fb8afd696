//! Builder for configuring generator instances.
//!
//! Exposes the full option surface, validates it, and performs the
//! feasibility check before handing a ready engine to the caller.

use crate::{
    cancellation::CancellationToken,
    distribution::{MembershipDistribution, PowerlawMemberships, PowerlawSizes, SizeDistribution},
    engine::CkbDynamic,
    error::{GeneratorError, Result},
};

/// How edge perturbation visits the regular communities each timestep.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PerturbationMode {
    /// Every community is perturbed unconditionally.
    #[default]
    Dense,
    /// Communities are visited with geometric strides driven by the
    /// perturbation probability; the landed community is included.
    GeometricStride,
}

/// Validated scalar options handed to the engine.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GeneratorOptions {
    pub(crate) initial_nodes: usize,
    pub(crate) num_timesteps: usize,
    pub(crate) community_event_probability: f64,
    pub(crate) node_event_probability: f64,
    pub(crate) perturbation_probability: f64,
    pub(crate) perturbation_mode: PerturbationMode,
    pub(crate) epsilon: f64,
    pub(crate) edge_sharpness: f64,
    pub(crate) t_effect: usize,
    pub(crate) seed: u64,
}

/// Configures and constructs [`CkbDynamic`] instances.
///
/// # Examples
/// ```
/// use ckbdyn_core::{CkbDynamicBuilder, PerturbationMode};
///
/// let builder = CkbDynamicBuilder::new()
///     .with_initial_nodes(60)
///     .with_timesteps(5)
///     .with_community_size_range(4, 12)
///     .with_membership_range(1, 2)
///     .with_perturbation_mode(PerturbationMode::GeometricStride)
///     .with_seed(7);
/// assert_eq!(builder.initial_nodes(), 60);
/// assert_eq!(builder.timesteps(), 5);
/// assert_eq!(builder.community_size_range(), (4, 12));
/// assert_eq!(builder.perturbation_mode(), PerturbationMode::GeometricStride);
/// assert_eq!(builder.seed(), 7);
///
/// let generator = builder.build().expect("configuration is valid");
/// assert!(!generator.has_run());
/// ```
#[derive(Debug)]
pub struct CkbDynamicBuilder {
    initial_nodes: usize,
    num_timesteps: usize,
    min_community_size: usize,
    max_community_size: usize,
    community_size_exponent: f64,
    min_memberships: usize,
    max_memberships: usize,
    membership_exponent: f64,
    intra_edge_probability: f64,
    intra_edge_exponent: f64,
    epsilon: f64,
    edge_sharpness: f64,
    community_event_probability: f64,
    node_event_probability: f64,
    perturbation_probability: f64,
    perturbation_mode: PerturbationMode,
    t_effect: usize,
    seed: u64,
    size_distribution: Option<Box<dyn SizeDistribution>>,
    membership_distribution: Option<Box<dyn MembershipDistribution>>,
    token: CancellationToken,
}

impl Default for CkbDynamicBuilder {
    fn default() -> Self {
        Self {
            initial_nodes: 100,
            num_timesteps: 100,
            min_community_size: 8,
            max_community_size: 32,
            community_size_exponent: 2.5,
            min_memberships: 1,
            max_memberships: 4,
            membership_exponent: 2.5,
            intra_edge_probability: 0.5,
            intra_edge_exponent: -0.5,
            epsilon: 1e-4,
            edge_sharpness: 1.0,
            community_event_probability: 0.02,
            node_event_probability: 0.01,
            perturbation_probability: 0.01,
            perturbation_mode: PerturbationMode::Dense,
            t_effect: 4,
            seed: 0x5EED,
            size_distribution: None,
            membership_distribution: None,
            token: CancellationToken::new(),
        }
    }
}

impl CkbDynamicBuilder {
    /// Creates a builder populated with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of nodes generated before the first timestep.
    #[must_use]
    pub fn with_initial_nodes(mut self, count: usize) -> Self {
        self.initial_nodes = count;
        self
    }

    /// Returns the configured initial node count.
    #[must_use]
    pub fn initial_nodes(&self) -> usize {
        self.initial_nodes
    }

    /// Sets the number of advance ticks the run performs.
    #[must_use]
    pub fn with_timesteps(mut self, count: usize) -> Self {
        self.num_timesteps = count;
        self
    }

    /// Returns the configured number of advance ticks.
    #[must_use]
    pub fn timesteps(&self) -> usize {
        self.num_timesteps
    }

    /// Sets the community size bounds for the analytic size distribution.
    #[must_use]
    pub fn with_community_size_range(mut self, min: usize, max: usize) -> Self {
        self.min_community_size = min;
        self.max_community_size = max;
        self
    }

    /// Returns the configured community size bounds.
    #[must_use]
    pub fn community_size_range(&self) -> (usize, usize) {
        (self.min_community_size, self.max_community_size)
    }

    /// Sets the power-law exponent of the community size distribution.
    #[must_use]
    pub fn with_community_size_exponent(mut self, exponent: f64) -> Self {
        self.community_size_exponent = exponent;
        self
    }

    /// Returns the configured community size exponent.
    #[must_use]
    pub fn community_size_exponent(&self) -> f64 {
        self.community_size_exponent
    }

    /// Sets the per-node membership count bounds.
    #[must_use]
    pub fn with_membership_range(mut self, min: usize, max: usize) -> Self {
        self.min_memberships = min;
        self.max_memberships = max;
        self
    }

    /// Returns the configured membership count bounds.
    #[must_use]
    pub fn membership_range(&self) -> (usize, usize) {
        (self.min_memberships, self.max_memberships)
    }

    /// Sets the power-law exponent of the membership distribution.
    #[must_use]
    pub fn with_membership_exponent(mut self, exponent: f64) -> Self {
        self.membership_exponent = exponent;
        self
    }

    /// Returns the configured membership exponent.
    #[must_use]
    pub fn membership_exponent(&self) -> f64 {
        self.membership_exponent
    }

    /// Sets the base intra-community edge probability.
    #[must_use]
    pub fn with_intra_community_edge_probability(mut self, probability: f64) -> Self {
        self.intra_edge_probability = probability;
        self
    }

    /// Returns the configured base intra-community edge probability.
    #[must_use]
    pub fn intra_community_edge_probability(&self) -> f64 {
        self.intra_edge_probability
    }

    /// Sets the exponent scaling edge density with community size.
    #[must_use]
    pub fn with_intra_community_edge_exponent(mut self, exponent: f64) -> Self {
        self.intra_edge_exponent = exponent;
        self
    }

    /// Returns the configured intra-community edge exponent.
    #[must_use]
    pub fn intra_community_edge_exponent(&self) -> f64 {
        self.intra_edge_exponent
    }

    /// Sets the background edge probability of the global community.
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Returns the configured background edge probability.
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Sets the temporal smearing strength; `1` disables smearing.
    #[must_use]
    pub fn with_edge_sharpness(mut self, sharpness: f64) -> Self {
        self.edge_sharpness = sharpness;
        self
    }

    /// Returns the configured temporal smearing strength.
    #[must_use]
    pub fn edge_sharpness(&self) -> f64 {
        self.edge_sharpness
    }

    /// Sets the per-step probability of a community event per community.
    #[must_use]
    pub fn with_community_event_probability(mut self, probability: f64) -> Self {
        self.community_event_probability = probability;
        self
    }

    /// Returns the configured community event probability.
    #[must_use]
    pub fn community_event_probability(&self) -> f64 {
        self.community_event_probability
    }

    /// Sets the per-step probability of a node event per community.
    #[must_use]
    pub fn with_node_event_probability(mut self, probability: f64) -> Self {
        self.node_event_probability = probability;
        self
    }

    /// Returns the configured node event probability.
    #[must_use]
    pub fn node_event_probability(&self) -> f64 {
        self.node_event_probability
    }

    /// Sets the per-step edge perturbation probability.
    #[must_use]
    pub fn with_perturbation_probability(mut self, probability: f64) -> Self {
        self.perturbation_probability = probability;
        self
    }

    /// Returns the configured perturbation probability.
    #[must_use]
    pub fn perturbation_probability(&self) -> f64 {
        self.perturbation_probability
    }

    /// Chooses how perturbation visits the regular communities.
    #[must_use]
    pub fn with_perturbation_mode(mut self, mode: PerturbationMode) -> Self {
        self.perturbation_mode = mode;
        self
    }

    /// Returns the configured perturbation mode.
    #[must_use]
    pub fn perturbation_mode(&self) -> PerturbationMode {
        self.perturbation_mode
    }

    /// Sets the duration of long-running events in timesteps.
    #[must_use]
    pub fn with_event_duration(mut self, t_effect: usize) -> Self {
        self.t_effect = t_effect;
        self
    }

    /// Returns the configured event duration in timesteps.
    #[must_use]
    pub fn event_duration(&self) -> usize {
        self.t_effect
    }

    /// Seeds the generator; equal seeds give bit-identical streams.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Returns the configured seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Replaces the analytic size distribution, e.g. with an
    /// [`EmpiricalSizes`](crate::EmpiricalSizes) sampler built from an
    /// observed cover.
    #[must_use]
    pub fn with_size_distribution(mut self, distribution: impl SizeDistribution + 'static) -> Self {
        self.size_distribution = Some(Box::new(distribution));
        self
    }

    /// Replaces the analytic membership distribution.
    #[must_use]
    pub fn with_membership_distribution(
        mut self,
        distribution: impl MembershipDistribution + 'static,
    ) -> Self {
        self.membership_distribution = Some(Box::new(distribution));
        self
    }

    /// Attaches a cancellation token polled at every loop head of the run.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Validates the configuration, checks feasibility and constructs the
    /// engine.
    ///
    /// # Errors
    /// Returns [`GeneratorError::InvalidParameters`] when an option is
    /// outside its accepted range and
    /// [`GeneratorError::ConfigurationInfeasible`] when the distributions
    /// cannot realise a graph over `initial_nodes` nodes.
    pub fn build(self) -> Result<CkbDynamic> {
        if self.initial_nodes == 0 {
            return Err(GeneratorError::InvalidParameters {
                reason: "initial node count must be at least 1".into(),
            });
        }
        if self.t_effect == 0 {
            return Err(GeneratorError::InvalidParameters {
                reason: "event duration must be at least 1 timestep".into(),
            });
        }
        for (name, value) in [
            ("community event probability", self.community_event_probability),
            ("node event probability", self.node_event_probability),
            ("perturbation probability", self.perturbation_probability),
            ("epsilon", self.epsilon),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(GeneratorError::InvalidParameters {
                    reason: format!("{name} ({value}) must be in [0, 1]"),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.edge_sharpness) || self.edge_sharpness == 0.0 {
            return Err(GeneratorError::InvalidParameters {
                reason: format!("edge sharpness ({}) must be in (0, 1]", self.edge_sharpness),
            });
        }

        let size_distribution: Box<dyn SizeDistribution> = match self.size_distribution {
            Some(distribution) => distribution,
            None => Box::new(PowerlawSizes::new(
                self.min_community_size,
                self.max_community_size,
                self.community_size_exponent,
                self.intra_edge_probability,
                self.intra_edge_exponent,
            )?),
        };
        let membership_distribution: Box<dyn MembershipDistribution> =
            match self.membership_distribution {
                Some(distribution) => distribution,
                None => Box::new(PowerlawMemberships::new(
                    self.min_memberships,
                    self.max_memberships,
                    self.membership_exponent,
                )?),
            };

        let expected_communities = membership_distribution.avg_memberships()
            * self.initial_nodes as f64
            / size_distribution.avg_size();
        let max_memberships = membership_distribution.max_memberships();
        if expected_communities < max_memberships as f64 {
            return Err(GeneratorError::ConfigurationInfeasible {
                expected_communities,
                max_memberships,
            });
        }

        let epsilon = size_distribution
            .epsilon_override()
            .unwrap_or(self.epsilon);
        let options = GeneratorOptions {
            initial_nodes: self.initial_nodes,
            num_timesteps: self.num_timesteps,
            community_event_probability: self.community_event_probability,
            node_event_probability: self.node_event_probability,
            perturbation_probability: self.perturbation_probability,
            perturbation_mode: self.perturbation_mode,
            epsilon,
            edge_sharpness: self.edge_sharpness,
            t_effect: self.t_effect,
            seed: self.seed,
        };
        Ok(CkbDynamic::new(
            options,
            size_distribution,
            membership_distribution,
            self.token,
        ))
    }
}
