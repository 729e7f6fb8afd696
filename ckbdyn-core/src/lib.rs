//! ckbdyn core library.
//!
//! Generates a synthetic dynamic graph with overlapping, time-varying
//! community structure: a ground-truth benchmark input for dynamic
//! community-detection algorithms. A run produces two synchronous streams,
//! one of graph events (node and edge additions and removals) and one of
//! community events (joins and leaves), separated into timesteps by explicit
//! markers. All randomness flows through a single seeded generator, so equal
//! configurations yield bit-identical streams.

mod builder;
mod cancellation;
mod distribution;
mod engine;
mod error;
mod sampling;
mod stream;

pub use crate::{
    builder::{CkbDynamicBuilder, PerturbationMode},
    cancellation::CancellationToken,
    distribution::{
        EmpiricalMemberships, EmpiricalSizes, MembershipDistribution, PowerlawMemberships,
        PowerlawSizes, SizeDistribution,
    },
    engine::{CkbDynamic, CommunityId},
    error::{GeneratorError, GeneratorErrorCode, Result},
    stream::{CommunityEvent, CommunityEventKind, GraphEvent, GraphEventKind},
};
