//! Provisioning, checkpointing and teardown of a load run's resource tree
//!
//! - [`client`]: the [`ControlPlane`] seam and its kube-rs implementation
//! - [`readiness`]: Ready-condition polling
//! - [`provisioner`]: Organization → Projects → objects
//! - [`checkpoint`]: the durable run record
//! - [`cleanup`]: label-driven teardown

#![deny(missing_docs)]

pub mod checkpoint;
pub mod cleanup;
pub mod client;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod manifests;
pub mod provisioner;
pub mod readiness;

pub use checkpoint::{Checkpointer, ConfigMapStore, RecordStore};
pub use cleanup::{CleanupEngine, CleanupSummary};
pub use client::{ClientFactory, ControlPlane, KubeClientFactory};
pub use provisioner::{ObjectCounts, ProjectsReady, ProvisionSettings, TreeProvisioner};
