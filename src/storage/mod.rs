//! File storage for run reports.

pub mod jsonl;

// Re-export key types
pub use jsonl::JsonlWriter;
