// SPDX-License-Identifier: CEPL-1.0
//! Mapping between named features and the fields of the Vulkan feature
//! structs. One table drives both the support query and the enable chain.

use std::ptr;

use ash::vk;
use prism_render::{Feature, FeatureSet};

#[derive(Default)]
pub(crate) struct FeatureBlocks {
    pub core: vk::PhysicalDeviceFeatures,
    pub v11: vk::PhysicalDeviceVulkan11Features<'static>,
    pub v12: vk::PhysicalDeviceVulkan12Features<'static>,
    pub v13: vk::PhysicalDeviceVulkan13Features<'static>,
}

macro_rules! feature_table {
    ($($feature:ident => $block:ident . $field:ident),* $(,)?) => {
        impl FeatureBlocks {
            /// Every table feature whose field is set.
            pub(crate) fn supported(&self) -> FeatureSet {
                let mut set = FeatureSet::new();
                $(
                    if self.$block.$field == vk::TRUE {
                        set.insert(Feature::$feature);
                    }
                )*
                set
            }

            /// Sets the field for each feature; returns the ones the table
            /// does not know.
            pub(crate) fn enable(&mut self, features: &FeatureSet) -> Vec<Feature> {
                let mut unknown = Vec::new();
                for &feature in features {
                    $(
                        if feature == Feature::$feature {
                            self.$block.$field = vk::TRUE;
                            continue;
                        }
                    )*
                    unknown.push(feature);
                }
                unknown
            }
        }
    };
}

feature_table! {
    ROBUST_BUFFER_ACCESS => core.robust_buffer_access,
    SAMPLER_ANISOTROPY => core.sampler_anisotropy,
    TEXTURE_COMPRESSION_BC => core.texture_compression_bc,
    PIPELINE_STATISTICS_QUERY => core.pipeline_statistics_query,
    FILL_MODE_NON_SOLID => core.fill_mode_non_solid,
    SHADER_DRAW_PARAMETERS => v11.shader_draw_parameters,
    SHADER_FLOAT16 => v12.shader_float16,
    BUFFER_DEVICE_ADDRESS => v12.buffer_device_address,
    TIMELINE_SEMAPHORE => v12.timeline_semaphore,
    SYNCHRONIZATION2 => v13.synchronization2,
    DYNAMIC_RENDERING => v13.dynamic_rendering,
}

impl FeatureBlocks {
    pub(crate) unsafe fn query(instance: &ash::Instance, phys: vk::PhysicalDevice) -> Self {
        let mut blocks = Self::default();
        let core = {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut blocks.v11)
                .push_next(&mut blocks.v12)
                .push_next(&mut blocks.v13);
            instance.get_physical_device_features2(phys, &mut features2);
            features2.features
        };
        blocks.core = core;
        blocks.unlink();
        blocks
    }

    /// Builds the `PhysicalDeviceFeatures2 -> 1.1 -> 1.2 -> 1.3` chain for
    /// device creation. The blocks must outlive the create call.
    pub(crate) fn chain(&mut self) -> vk::PhysicalDeviceFeatures2<'_> {
        self.unlink();
        vk::PhysicalDeviceFeatures2::default()
            .features(self.core)
            .push_next(&mut self.v11)
            .push_next(&mut self.v12)
            .push_next(&mut self.v13)
    }

    fn unlink(&mut self) {
        self.v11.p_next = ptr::null_mut();
        self.v12.p_next = ptr::null_mut();
        self.v13.p_next = ptr::null_mut();
    }
}
