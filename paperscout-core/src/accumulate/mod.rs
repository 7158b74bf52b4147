//! Candidate accumulation: the round loop and its pieces.
//!
//! - `pool`: url-keyed deduplicating candidate pool
//! - `recency`: optional publication-date cutoff
//! - `state`: run states, stop reasons and the continuation decision
//! - `controller`: the concurrent, cancellable round driver

pub mod controller;
pub mod pool;
pub mod recency;
pub mod state;

pub use controller::{AccumulationController, AccumulationOutcome, ProgressCallback, RoundProgress};
pub use pool::{CandidatePool, MergeReport};
pub use recency::RecencyFilter;
pub use state::{
    Bounds, Continuation, RoundSnapshot, RoundState, RunState, StopReason, decide_continuation,
};
