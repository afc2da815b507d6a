//! Consensus: elections over contested roots, the serialized block ingest
//! worker, the witness committee and the epoch commitment pipeline.

pub mod active;
pub mod block_processor;
pub mod election;
pub mod epoch_pipeline;
pub mod vote_processor;
pub mod witness;

pub use active::{ActiveElections, OnlineReps};
pub use block_processor::{BlockProcessor, ProcessorObserver};
pub use election::ElectionStatus;
pub use epoch_pipeline::EpochPipeline;
pub use vote_processor::VoteProcessor;
pub use witness::{DepositPhase, WitnessCandidate, WitnessSet};
