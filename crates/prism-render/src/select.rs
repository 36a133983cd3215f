// SPDX-License-Identifier: CEPL-1.0
//! Device selection as a pure function over candidate snapshots.

use std::fmt;

use thiserror::Error;
use tracing::{debug, info};

use crate::candidate::{DeviceCandidate, DeviceKind};
use crate::features::{negotiate, ApiVersion, EnabledFeatures, Feature, FeatureRequest};
use crate::queues::QueueAssignment;

/// Why a single candidate was turned down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("API version {found} is below the required {required}")]
    ApiVersionTooLow {
        required: ApiVersion,
        found: ApiVersion,
    },
    #[error("Hardware acceleration unavailable")]
    NotHardwareAccelerated,
    #[error("{}", describe_unsupported(.features, .extensions))]
    Unsupported {
        features: Vec<Feature>,
        extensions: Vec<String>,
    },
    #[error("No queue family supports graphics and compute")]
    NoRenderQueueFamily,
    #[error("No queue family can present to the surface")]
    NoPresentQueueFamily,
}

fn describe_unsupported(features: &[Feature], extensions: &[String]) -> String {
    let mut parts = Vec::new();
    if !features.is_empty() {
        let names: Vec<String> = features.iter().map(|f| f.to_string()).collect();
        parts.push(format!("missing features [{}]", names.join(", ")));
    }
    if !extensions.is_empty() {
        parts.push(format!("missing extensions [{}]", extensions.join(", ")));
    }
    parts.join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedDevice {
    pub name: String,
    pub kind: DeviceKind,
    pub reason: RejectReason,
}

impl fmt::Display for RejectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Device: {}, Type: {}, Reason: {}",
            self.name, self.kind, self.reason
        )
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("No suitable physical device found{}", list_rejections(.rejected))]
    NoSuitableDevice { rejected: Vec<RejectedDevice> },
}

fn list_rejections(rejected: &[RejectedDevice]) -> String {
    if rejected.is_empty() {
        return " (no devices were enumerated)".to_string();
    }
    rejected
        .iter()
        .map(|r| format!("\n  {r}"))
        .collect::<String>()
}

#[derive(Debug, Clone)]
pub struct SelectedDevice<H> {
    pub candidate: DeviceCandidate<H>,
    pub enabled: EnabledFeatures,
    pub queues: QueueAssignment,
    pub score: u64,
}

/// Type preference plus one point per MiB of device-local memory.
pub fn score<H>(candidate: &DeviceCandidate<H>) -> u64 {
    candidate.kind.weight() + candidate.device_local_mib()
}

/// Negotiates features, then resolves queue roles.
pub fn evaluate<H>(
    candidate: &DeviceCandidate<H>,
    request: &FeatureRequest,
) -> Result<(EnabledFeatures, QueueAssignment), RejectReason> {
    let enabled = negotiate(candidate, request)?;
    let queues = QueueAssignment::resolve(&candidate.queue_families)?;
    Ok((enabled, queues))
}

/// Picks the highest scoring accepted candidate. Ties keep the earliest in
/// enumeration order.
pub fn select_device<H>(
    candidates: impl IntoIterator<Item = DeviceCandidate<H>>,
    request: &FeatureRequest,
) -> Result<SelectedDevice<H>, SelectionError> {
    let mut best: Option<SelectedDevice<H>> = None;
    let mut rejected = Vec::new();

    for candidate in candidates {
        match evaluate(&candidate, request) {
            Ok((enabled, queues)) => {
                let score = score(&candidate);
                debug!(
                    "accepted device {} ({}), score {}",
                    candidate.name, candidate.kind, score
                );
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(SelectedDevice {
                        candidate,
                        enabled,
                        queues,
                        score,
                    });
                }
            }
            Err(reason) => {
                debug!(
                    "rejected device {} ({}): {}",
                    candidate.name, candidate.kind, reason
                );
                rejected.push(RejectedDevice {
                    name: candidate.name,
                    kind: candidate.kind,
                    reason,
                });
            }
        }
    }

    let chosen = best.ok_or(SelectionError::NoSuitableDevice { rejected })?;
    info!(
        "selected device {} ({}, API {}, {} MiB device-local, score {})",
        chosen.candidate.name,
        chosen.candidate.kind,
        chosen.candidate.api_version,
        chosen.candidate.device_local_mib(),
        chosen.score
    );
    Ok(chosen)
}
