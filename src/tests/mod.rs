//! Integration tests for the off-heap cache.
//!
//! End-to-end cases that exercise the engine through the typed facade and
//! the untyped core: round trips, replacement, eviction, statistics and
//! concurrent access.


pub mod support;
