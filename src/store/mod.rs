//! Persistence of lab requests and provisioning records.

pub mod memory;
pub mod pg;
pub mod traits;

// Re-export key types
pub use memory::MemoryLabStore;
pub use pg::PgLabStore;
pub use traits::LabStore;
