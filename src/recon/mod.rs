pub mod coordinator;
pub mod matcher;

pub use coordinator::{Coordinator, ReconcileOutcome};
pub use matcher::{find, MatchCandidate};
