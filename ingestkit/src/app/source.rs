/// Filesystem backed entry store.
pub mod fs;

/// In-memory entry store.
pub mod memory;
