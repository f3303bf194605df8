//! Storage for the challenge marketplace
//!
//! `ChallengeStore` is the persistence seam. `MemoryStore` backs tests and
//! single-process deployments; `PgStore` is the production backend.

pub mod memory;
pub mod pg;
pub mod postgres;
pub mod traits;

pub use memory::MemoryStore;
pub use pg::{PgConfig, PgPool};
pub use postgres::PgStore;
pub use traits::{
    ChallengeFilter, ChallengeStore, ParticipationCounts, ParticipationFilter, Result,
    StorageError,
};
