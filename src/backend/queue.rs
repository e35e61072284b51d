// Queue lookup
//
// The device exposes one queue per family it enabled. Command lists ask for
// a queue by the capabilities they need; the narrowest family that covers
// them wins, so transfer work lands on a dedicated transfer family when the
// GPU has one.

use super::BackendError;
use crate::types::QueueUsage;
use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamily {
    pub index: u32,
    pub queue: vk::Queue,
    pub usage: QueueUsage,
    /// Can present to the window surface
    pub presentable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueueSet {
    families: Vec<QueueFamily>,
}

impl QueueSet {
    pub fn new(families: Vec<QueueFamily>) -> Self {
        Self { families }
    }

    /// Narrowest family supporting `usage` (and presentation if asked)
    pub fn by_usage(&self, usage: QueueUsage, presentable: bool) -> Result<&QueueFamily, BackendError> {
        self.families
            .iter()
            .filter(|f| f.usage.contains(usage) && (f.presentable || !presentable))
            .min_by_key(|f| f.usage.bits().count_ones())
            .ok_or(BackendError::NoQueue(usage))
    }

    pub fn by_family(&self, index: u32) -> Option<&QueueFamily> {
        self.families.iter().find(|f| f.index == index)
    }

    /// The queue frames are presented on
    pub fn present(&self) -> Result<&QueueFamily, BackendError> {
        self.by_usage(QueueUsage::GRAPHICS, true)
    }

    pub fn family_indices(&self) -> Vec<u32> {
        self.families.iter().map(|f| f.index).collect()
    }
}
