// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    dead_code
)]

//! Common test fixtures shared by the unit and property test targets
//!
//! Include this module in your test file:
//! ```rust,ignore
//! #[path = "../common/mod.rs"]
//! mod common;
//! ```

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Namespace, Pod, PodSpec};
use kube::core::ObjectMeta;

use image_trust_operator::validation::{NAMESPACE_VALIDATION_LABEL, POD_STATUS_LABEL};

/// Builder for test pods
#[derive(Default)]
pub struct PodBuilder {
    name: String,
    namespace: String,
    resource_version: Option<String>,
    status_label: Option<String>,
    init_images: Vec<String>,
    images: Vec<String>,
}

impl PodBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: "team-a".to_string(),
            resource_version: Some("1".to_string()),
            ..Default::default()
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn resource_version(mut self, version: &str) -> Self {
        self.resource_version = Some(version.to_string());
        self
    }

    pub fn status(mut self, label: &str) -> Self {
        self.status_label = Some(label.to_string());
        self
    }

    pub fn image(mut self, image: &str) -> Self {
        self.images.push(image.to_string());
        self
    }

    pub fn init_image(mut self, image: &str) -> Self {
        self.init_images.push(image.to_string());
        self
    }

    pub fn build(self) -> Pod {
        let containers = |images: &[String], prefix: &str| -> Vec<Container> {
            images
                .iter()
                .enumerate()
                .map(|(i, image)| Container {
                    name: format!("{prefix}-{i}"),
                    image: Some(image.clone()),
                    ..Default::default()
                })
                .collect()
        };
        Pod {
            metadata: ObjectMeta {
                name: Some(self.name),
                namespace: Some(self.namespace),
                resource_version: self.resource_version,
                labels: self
                    .status_label
                    .map(|v| BTreeMap::from([(POD_STATUS_LABEL.to_string(), v)])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: containers(&self.images, "app"),
                init_containers: if self.init_images.is_empty() {
                    None
                } else {
                    Some(containers(&self.init_images, "init"))
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

/// Namespace with an optional validation label and annotations
pub fn namespace(name: &str, label: Option<&str>, annotations: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: label
                .map(|v| BTreeMap::from([(NAMESPACE_VALIDATION_LABEL.to_string(), v.to_string())])),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            },
            ..Default::default()
        },
        ..Default::default()
    }
}
