// SPDX-License-Identifier: CEPL-1.0
//! Capability negotiation: what the application asks a device for, and
//! whether a given candidate can provide it.

use std::collections::BTreeSet;
use std::fmt;

use crate::candidate::DeviceCandidate;
use crate::select::RejectReason;

/// Which versioned feature structure a flag lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureBlock {
    Core10,
    Vulkan11,
    Vulkan12,
    Vulkan13,
}

impl FeatureBlock {
    pub const ALL: [FeatureBlock; 4] = [
        FeatureBlock::Core10,
        FeatureBlock::Vulkan11,
        FeatureBlock::Vulkan12,
        FeatureBlock::Vulkan13,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FeatureBlock::Core10 => "core",
            FeatureBlock::Vulkan11 => "vulkan11",
            FeatureBlock::Vulkan12 => "vulkan12",
            FeatureBlock::Vulkan13 => "vulkan13",
        }
    }
}

impl fmt::Display for FeatureBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single named boolean capability flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Feature {
    pub block: FeatureBlock,
    pub name: &'static str,
}

impl Feature {
    pub const fn new(block: FeatureBlock, name: &'static str) -> Self {
        Self { block, name }
    }

    pub const ROBUST_BUFFER_ACCESS: Feature = Feature::new(FeatureBlock::Core10, "robustBufferAccess");
    pub const SAMPLER_ANISOTROPY: Feature = Feature::new(FeatureBlock::Core10, "samplerAnisotropy");
    pub const TEXTURE_COMPRESSION_BC: Feature =
        Feature::new(FeatureBlock::Core10, "textureCompressionBC");
    pub const PIPELINE_STATISTICS_QUERY: Feature =
        Feature::new(FeatureBlock::Core10, "pipelineStatisticsQuery");
    pub const FILL_MODE_NON_SOLID: Feature = Feature::new(FeatureBlock::Core10, "fillModeNonSolid");
    pub const SHADER_DRAW_PARAMETERS: Feature =
        Feature::new(FeatureBlock::Vulkan11, "shaderDrawParameters");
    pub const SHADER_FLOAT16: Feature = Feature::new(FeatureBlock::Vulkan12, "shaderFloat16");
    pub const BUFFER_DEVICE_ADDRESS: Feature =
        Feature::new(FeatureBlock::Vulkan12, "bufferDeviceAddress");
    pub const TIMELINE_SEMAPHORE: Feature = Feature::new(FeatureBlock::Vulkan12, "timelineSemaphore");
    pub const SYNCHRONIZATION2: Feature = Feature::new(FeatureBlock::Vulkan13, "synchronization2");
    pub const DYNAMIC_RENDERING: Feature = Feature::new(FeatureBlock::Vulkan13, "dynamicRendering");
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.block, self.name)
    }
}

pub type FeatureSet = BTreeSet<Feature>;

pub const KHR_SWAPCHAIN: &str = "VK_KHR_swapchain";
pub const KHR_SYNCHRONIZATION2: &str = "VK_KHR_synchronization2";
pub const KHR_SHADER_NON_SEMANTIC_INFO: &str = "VK_KHR_shader_non_semantic_info";

/// `major.minor` of the graphics API a device implements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion {
    pub major: u32,
    pub minor: u32,
}

impl ApiVersion {
    pub const V1_0: ApiVersion = ApiVersion::new(1, 0);
    pub const V1_3: ApiVersion = ApiVersion::new(1, 3);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// What the application requires of a device. Built once at startup with the
/// consuming `with_*` methods; read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureRequest {
    min_api_version: ApiVersion,
    features: FeatureSet,
    extensions: BTreeSet<String>,
    validation: bool,
    require_hardware_acceleration: bool,
}

impl FeatureRequest {
    /// A request that any device satisfies.
    pub fn empty() -> Self {
        Self {
            min_api_version: ApiVersion::V1_0,
            features: FeatureSet::new(),
            extensions: BTreeSet::new(),
            validation: false,
            require_hardware_acceleration: false,
        }
    }

    pub fn with_feature(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    pub fn without_feature(mut self, feature: Feature) -> Self {
        self.features.remove(&feature);
        self
    }

    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.insert(name.into());
        self
    }

    pub fn with_min_api_version(mut self, version: ApiVersion) -> Self {
        self.min_api_version = version;
        self
    }

    pub fn with_validation(mut self, on: bool) -> Self {
        self.validation = on;
        self
    }

    pub fn with_hardware_acceleration(mut self, required: bool) -> Self {
        self.require_hardware_acceleration = required;
        self
    }

    pub fn min_api_version(&self) -> ApiVersion {
        self.min_api_version
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    pub fn validation(&self) -> bool {
        self.validation
    }

    pub fn requires_hardware_acceleration(&self) -> bool {
        self.require_hardware_acceleration
    }
}

impl Default for FeatureRequest {
    fn default() -> Self {
        Self::empty()
            .with_min_api_version(ApiVersion::V1_3)
            .with_feature(Feature::ROBUST_BUFFER_ACCESS)
            .with_feature(Feature::SAMPLER_ANISOTROPY)
            .with_feature(Feature::TEXTURE_COMPRESSION_BC)
            .with_feature(Feature::PIPELINE_STATISTICS_QUERY)
            .with_feature(Feature::SHADER_DRAW_PARAMETERS)
            .with_feature(Feature::SHADER_FLOAT16)
            .with_feature(Feature::SYNCHRONIZATION2)
            .with_feature(Feature::DYNAMIC_RENDERING)
            .with_extension(KHR_SWAPCHAIN)
            .with_extension(KHR_SYNCHRONIZATION2)
            .with_extension(KHR_SHADER_NON_SEMANTIC_INFO)
            .with_validation(cfg!(debug_assertions))
            .with_hardware_acceleration(true)
    }
}

/// The concrete set that gets switched on at logical device creation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnabledFeatures {
    pub features: FeatureSet,
    pub extensions: Vec<String>,
}

impl EnabledFeatures {
    pub fn in_block(&self, block: FeatureBlock) -> impl Iterator<Item = &Feature> + '_ {
        self.features.iter().filter(move |f| f.block == block)
    }
}

/// Tests `candidate` against `request` without side effects.
///
/// Version and device type are gate checks. Past those, every feature block
/// and the whole extension list are walked so the rejection names every
/// missing item rather than the first one.
pub fn negotiate<H>(
    candidate: &DeviceCandidate<H>,
    request: &FeatureRequest,
) -> Result<EnabledFeatures, RejectReason> {
    if candidate.api_version < request.min_api_version {
        return Err(RejectReason::ApiVersionTooLow {
            required: request.min_api_version,
            found: candidate.api_version,
        });
    }

    if request.require_hardware_acceleration && !candidate.kind.is_hardware_accelerated() {
        return Err(RejectReason::NotHardwareAccelerated);
    }

    let mut missing_features = Vec::new();
    for block in FeatureBlock::ALL {
        missing_features.extend(
            request
                .features
                .iter()
                .filter(|f| f.block == block && !candidate.features.contains(*f))
                .copied(),
        );
    }

    let missing_extensions: Vec<String> = request
        .extensions
        .iter()
        .filter(|e| !candidate.extensions.contains(*e))
        .cloned()
        .collect();

    if !missing_features.is_empty() || !missing_extensions.is_empty() {
        return Err(RejectReason::Unsupported {
            features: missing_features,
            extensions: missing_extensions,
        });
    }

    Ok(EnabledFeatures {
        features: request.features.clone(),
        extensions: request.extensions.iter().cloned().collect(),
    })
}
