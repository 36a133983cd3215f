// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeSet;
use std::fmt;

use bitflags::bitflags;

use crate::features::{ApiVersion, FeatureSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Discrete,
    Integrated,
    Virtual,
    Cpu,
    Other,
}

impl DeviceKind {
    pub fn is_hardware_accelerated(self) -> bool {
        matches!(self, DeviceKind::Discrete | DeviceKind::Integrated)
    }

    /// Fixed preference weight. The gap between kinds is larger than any
    /// realistic memory term, so kind always dominates the score.
    pub fn weight(self) -> u64 {
        match self {
            DeviceKind::Discrete => 2_000_000,
            DeviceKind::Integrated => 1_000_000,
            _ => 0,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceKind::Discrete => "Discrete GPU",
            DeviceKind::Integrated => "Integrated GPU",
            DeviceKind::Virtual => "Virtual GPU",
            DeviceKind::Cpu => "CPU",
            DeviceKind::Other => "Other",
        })
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct QueueCaps: u32 {
        const GRAPHICS = 1 << 0;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub index: u32,
    pub caps: QueueCaps,
    pub queue_count: u32,
    /// Tested against the live surface, not a capability bit.
    pub supports_present: bool,
}

/// Read-only snapshot of a physical device, taken once at selection time.
/// `H` is the backend's device handle.
#[derive(Clone, Debug)]
pub struct DeviceCandidate<H> {
    pub handle: H,
    pub name: String,
    pub kind: DeviceKind,
    pub api_version: ApiVersion,
    /// Sum of device-local heap sizes, in bytes.
    pub device_local_memory: u64,
    pub extensions: BTreeSet<String>,
    pub features: FeatureSet,
    pub queue_families: Vec<QueueFamilyInfo>,
}

impl<H> DeviceCandidate<H> {
    pub fn device_local_mib(&self) -> u64 {
        self.device_local_memory / (1024 * 1024)
    }
}

#[cfg(test)]
pub(crate) fn fixture(name: &str, kind: DeviceKind, memory_mib: u64) -> DeviceCandidate<usize> {
    use crate::features::{FeatureRequest, KHR_SHADER_NON_SEMANTIC_INFO};

    let request = FeatureRequest::default();
    let mut extensions: BTreeSet<String> = request.extensions().clone();
    extensions.insert(KHR_SHADER_NON_SEMANTIC_INFO.to_string());
    extensions.insert("VK_EXT_memory_budget".to_string());

    DeviceCandidate {
        handle: 0,
        name: name.to_string(),
        kind,
        api_version: ApiVersion::V1_3,
        device_local_memory: memory_mib * 1024 * 1024,
        extensions,
        features: request.features().clone(),
        queue_families: vec![QueueFamilyInfo {
            index: 0,
            caps: QueueCaps::all(),
            queue_count: 16,
            supports_present: true,
        }],
    }
}
