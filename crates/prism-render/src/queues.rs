// SPDX-License-Identifier: CEPL-1.0
use std::collections::BTreeSet;

use crate::candidate::{QueueCaps, QueueFamilyInfo};
use crate::select::RejectReason;

/// Queue family index per logical role. Roles may share a family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAssignment {
    pub graphics: u32,
    pub compute: u32,
    pub present: u32,
}

/// How presentable images are shared between the families that touch them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSharing {
    Exclusive,
    Concurrent(Vec<u32>),
}

impl QueueAssignment {
    /// Prefers one family that does graphics, compute and transfer. Falls
    /// back to the first family for each role. Presentation stays on the
    /// graphics family when it can present, otherwise the lowest-index
    /// family that can.
    pub fn resolve(families: &[QueueFamilyInfo]) -> Result<Self, RejectReason> {
        let usable = || families.iter().filter(|f| f.queue_count > 0);
        let first_with = |caps: QueueCaps| usable().find(|f| f.caps.contains(caps)).map(|f| f.index);

        let (graphics, compute) = match first_with(QueueCaps::all()) {
            Some(render) => (render, render),
            None => (
                first_with(QueueCaps::GRAPHICS).ok_or(RejectReason::NoRenderQueueFamily)?,
                first_with(QueueCaps::COMPUTE).ok_or(RejectReason::NoRenderQueueFamily)?,
            ),
        };

        let graphics_presents = usable().any(|f| f.index == graphics && f.supports_present);
        let present = if graphics_presents {
            graphics
        } else {
            usable()
                .filter(|f| f.supports_present)
                .map(|f| f.index)
                .min()
                .ok_or(RejectReason::NoPresentQueueFamily)?
        };

        Ok(Self {
            graphics,
            compute,
            present,
        })
    }

    /// One entry per distinct family; queue creation iterates this.
    pub fn unique_families(&self) -> BTreeSet<u32> {
        [self.graphics, self.compute, self.present].into_iter().collect()
    }

    pub fn image_sharing(&self) -> ImageSharing {
        if self.graphics == self.present {
            ImageSharing::Exclusive
        } else {
            ImageSharing::Concurrent(vec![self.graphics, self.present])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, caps: QueueCaps, supports_present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            index,
            caps,
            queue_count: 1,
            supports_present,
        }
    }

    #[test]
    fn single_universal_family_collapses_all_roles() {
        let fams = [family(0, QueueCaps::all(), true)];
        let qa = QueueAssignment::resolve(&fams).unwrap();
        assert_eq!(
            qa,
            QueueAssignment {
                graphics: 0,
                compute: 0,
                present: 0
            }
        );
        assert_eq!(qa.unique_families().len(), 1);
        assert_eq!(qa.image_sharing(), ImageSharing::Exclusive);
    }

    #[test]
    fn prefers_combined_family_over_earlier_partial_ones() {
        let fams = [
            family(0, QueueCaps::TRANSFER, false),
            family(1, QueueCaps::COMPUTE | QueueCaps::TRANSFER, false),
            family(2, QueueCaps::all(), true),
        ];
        let qa = QueueAssignment::resolve(&fams).unwrap();
        assert_eq!((qa.graphics, qa.compute, qa.present), (2, 2, 2));
    }

    #[test]
    fn split_roles_when_no_combined_family() {
        let fams = [
            family(0, QueueCaps::GRAPHICS, true),
            family(1, QueueCaps::COMPUTE | QueueCaps::TRANSFER, false),
        ];
        let qa = QueueAssignment::resolve(&fams).unwrap();
        assert_eq!((qa.graphics, qa.compute, qa.present), (0, 1, 0));
        assert_eq!(
            qa.unique_families().into_iter().collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn present_falls_back_to_lowest_presenting_family() {
        let fams = [
            family(0, QueueCaps::all(), false),
            family(1, QueueCaps::TRANSFER, false),
            family(3, QueueCaps::TRANSFER, true),
            family(2, QueueCaps::COMPUTE, true),
        ];
        let qa = QueueAssignment::resolve(&fams).unwrap();
        assert_eq!(qa.graphics, 0);
        assert_eq!(qa.present, 2);
        assert_eq!(qa.image_sharing(), ImageSharing::Concurrent(vec![0, 2]));
    }

    #[test]
    fn empty_families_are_ignored() {
        let mut universal = family(0, QueueCaps::all(), true);
        universal.queue_count = 0;
        let fams = [universal, family(1, QueueCaps::all(), true)];
        assert_eq!(QueueAssignment::resolve(&fams).unwrap().graphics, 1);
    }

    #[test]
    fn unresolved_roles_are_rejections() {
        let no_graphics = [family(0, QueueCaps::COMPUTE, true)];
        assert_eq!(
            QueueAssignment::resolve(&no_graphics),
            Err(RejectReason::NoRenderQueueFamily)
        );

        let no_present = [family(0, QueueCaps::all(), false)];
        assert_eq!(
            QueueAssignment::resolve(&no_present),
            Err(RejectReason::NoPresentQueueFamily)
        );
    }
}
