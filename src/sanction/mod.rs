//! Timed sanctions
//!
//! Durable records of temporary restrictions (voice mutes, chat mutes,
//! timeouts), their lifecycle, the platform artifacts they maintain, and the
//! sweeper that expires them.

pub mod artifact;
pub mod error;
pub mod record;
pub mod service;
pub mod store;

pub use artifact::{ArtifactContext, ArtifactHandler, ArtifactRegistry};
pub use error::{SanctionError, SanctionResult};
pub use record::{Sanction, SanctionScope, SanctionState, end_reason};
pub use service::{ArtifactContextSource, SanctionService};
pub use store::SanctionStore;

/// Request type for the sweeper task
#[derive(Debug, Clone)]
pub enum SweepRequest {
    /// Sweep all expired sanctions now, regardless of the interval
    CheckAll,
    /// Check a specific sanction by ID
    CheckSanction { sanction_id: String },
    /// Shut down the sweeper task
    Shutdown,
}
