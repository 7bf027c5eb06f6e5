//! Structured per-material results. Failures are isolated to the smallest
//! unit of work that can contain them (channel > tile > resolution >
//! material); the report is how the caller finds out what happened.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::Resolution;

use super::analyze::MaterialClassification;
use super::channels::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum FailureKind {
    /// Classification could not settle; the material ran with the
    /// conservative default plan.
    ClassificationAmbiguous,
    /// Every wiring fallback, including the constant-color one, failed.
    ProbeWireFailure,
    /// The graph could not be returned to its pre-probe state.
    RestoreFailure,
    /// The engine call itself failed; the channel's buffer was discarded.
    EvaluationEngineFailure,
    ReconstructionFailure,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ChannelStatus {
    Evaluated,
    /// Uniform buffer produced analytically from an unlinked constant.
    Filled,
    /// Not worth an evaluation pass (default-valued constant).
    Skipped,
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelRecord {
    pub channel: Channel,
    pub resolution: Resolution,
    /// UDIM tile this record belongs to; 1001 outside UDIM mode.
    pub tile: u32,
    pub status: ChannelStatus,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ReconstructionStatus {
    NotRequested,
    Rebuilt { resolution: Resolution },
    /// Restore inconsistencies exclude a material from reconstruction.
    SkippedInconsistent,
    SkippedNoTextures,
    /// Reconstruction failed; the graph was reset to a minimal valid
    /// principled network. Persisted buffers are unaffected.
    FailedMinimalFallback { message: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaterialReport {
    pub material: String,
    pub classification: MaterialClassification,
    pub channels: Vec<ChannelRecord>,
    /// At least one probe restore left the graph inconsistent.
    pub restore_inconsistent: bool,
    pub reconstruction: ReconstructionStatus,
}

impl MaterialReport {
    pub fn new(material: impl Into<String>, classification: MaterialClassification) -> Self {
        Self {
            material: material.into(),
            classification,
            channels: Vec::new(),
            restore_inconsistent: false,
            reconstruction: ReconstructionStatus::NotRequested,
        }
    }

    pub fn evaluated(&self) -> usize {
        self.count(|s| matches!(s, ChannelStatus::Evaluated))
    }

    pub fn filled(&self) -> usize {
        self.count(|s| matches!(s, ChannelStatus::Filled))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, ChannelStatus::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ChannelStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ChannelStatus) -> bool) -> usize {
        self.channels.iter().filter(|c| pred(&c.status)).count()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BakeRunSummary {
    pub materials: Vec<MaterialReport>,
}

impl BakeRunSummary {
    pub fn total_failed(&self) -> usize {
        self.materials.iter().map(MaterialReport::failed).sum()
    }
}
