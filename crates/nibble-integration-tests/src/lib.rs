//! Integration test crate for nibble.
//!
//! This crate has no library code. Its tests run several replicas against
//! one in-process authority and check that they converge.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p nibble-integration-tests
//! ```
