// Worker functionality for cache management.

pub mod cleaner;

// Re-export main types
pub use cleaner::spawn_cleaner;
