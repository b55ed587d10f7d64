// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the image trust operator
//!
//! This module contains unit tests for:
//! - Image reference parsing and trust configuration
//! - Namespace enrollment and user-managed policy
//! - Pod event filtering and status labels
//! - Result aggregation
//! - Admission handlers through the public webhook API

#[path = "../common/mod.rs"]
mod common;

mod admission;
mod filters;
mod namespace;
mod trust;
mod validation;
