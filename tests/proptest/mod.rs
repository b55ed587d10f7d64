// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for image handling and result aggregation
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Image change detection is invariant under container reordering
//! 2. Image parsing accepts exactly the strings with one `:` and two non-empty sides
//! 3. Aggregation is order independent and reports every untrusted image
//! 4. Allow-list checks never panic and an empty list allows nothing

#[path = "../common/mod.rs"]
mod common;

use std::collections::BTreeSet;

use proptest::prelude::*;

use image_trust_operator::controller::are_images_changed;
use image_trust_operator::trust::{ImageReference, TrustConfig, TrustError, Verification};
use image_trust_operator::validation::{ValidationStatus, aggregate};

use common::PodBuilder;

// =============================================================================
// Strategies
// =============================================================================

fn image_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,8}(/[a-z0-9]{1,8}){0,2}:[a-z0-9.]{1,6}"
}

fn pod_with(images: &[String]) -> k8s_openapi::api::core::v1::Pod {
    images
        .iter()
        .fold(PodBuilder::new("web"), |b, image| b.image(image))
        .build()
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Trusted,
    Untrusted,
    Unknown,
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::Trusted),
        Just(Outcome::Untrusted),
        Just(Outcome::Unknown),
    ]
}

fn to_result(outcome: Outcome) -> Result<Verification, TrustError> {
    match outcome {
        Outcome::Trusted => Ok(Verification::Digest),
        Outcome::Untrusted => Err(TrustError::untrusted("mismatch")),
        Outcome::Unknown => Err(TrustError::unknown("timeout")),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: reordering containers never counts as an image change
    #[test]
    fn prop_image_change_is_permutation_invariant(
        images in proptest::collection::vec(image_name(), 0..6),
        seed in any::<u64>(),
    ) {
        let mut shuffled = images.clone();
        if !shuffled.is_empty() {
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
        }
        prop_assert!(!are_images_changed(&pod_with(&images), &pod_with(&shuffled)));
    }

    /// Property: adding an image always counts as a change
    #[test]
    fn prop_added_image_is_a_change(
        images in proptest::collection::vec(image_name(), 0..5),
        extra in image_name(),
    ) {
        let mut grown = images.clone();
        grown.push(extra);
        prop_assert!(are_images_changed(&pod_with(&images), &pod_with(&grown)));
    }

    /// Property: parsing succeeds exactly for one separator with non-empty sides
    #[test]
    fn prop_parse_requires_exactly_one_colon(raw in "[a-z:/.]{0,16}") {
        let parts: Vec<&str> = raw.split(':').collect();
        let expected = parts.len() == 2 && !parts[0].is_empty() && !parts[1].is_empty();
        let parsed = ImageReference::parse(&raw);
        prop_assert_eq!(parsed.is_ok(), expected);
        if let Ok(image) = parsed {
            prop_assert_eq!(image.to_string(), raw);
        }
    }

    /// Property: aggregation ignores order and reports exactly the untrusted images
    #[test]
    fn prop_aggregate_is_order_independent(
        entries in proptest::collection::btree_map(image_name(), outcome(), 1..8),
    ) {
        let forward: Vec<_> = entries.iter().map(|(i, o)| (i.clone(), to_result(*o))).collect();
        let backward: Vec<_> = forward.iter().rev().cloned().collect();

        let a = aggregate(forward);
        let b = aggregate(backward);
        prop_assert_eq!(&a, &b);

        let untrusted: BTreeSet<String> = entries
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Untrusted))
            .map(|(i, _)| i.clone())
            .collect();
        prop_assert_eq!(a.invalid_images(), &untrusted);

        let expected = if !untrusted.is_empty() {
            ValidationStatus::Invalid
        } else if entries.values().any(|o| matches!(o, Outcome::Unknown)) {
            ValidationStatus::ServiceUnavailable
        } else {
            ValidationStatus::Valid
        };
        prop_assert_eq!(a.status(), expected);
    }

    /// Property: an empty allow-list allows nothing
    #[test]
    fn prop_empty_allow_list_allows_nothing(image in ".{0,32}") {
        prop_assert!(!TrustConfig::default().is_allowed(&image));
    }
}
