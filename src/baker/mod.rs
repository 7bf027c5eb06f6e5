//! The bake subsystem: classification, transactional probing, channel
//! planning, and the sweep orchestrator.

pub mod analyze;
pub mod channels;
pub mod orchestrator;
pub mod probe;
pub mod rebuild;
pub mod report;

pub use analyze::{GraphAnalysis, MaterialClassification, classify, diagnose};
pub use channels::{Channel, PlannedAction, PlannedChannel, basic_channels, full_channels, plan};
pub use orchestrator::{
    AtlasLayoutMode, AtlasRun, AtlasSettings, BakeContext, BakeOrchestrator, BakeRun,
    BakeSettings, BakedTexture, BakedTextures, LightingOptions, Material, MaterialOutcome,
    MixedShaderStrategy, UdimMode,
};
pub use probe::{ProbeSpec, ProbeState, ProbeTransaction, RestoreOutcome, RestoreReport};
pub use report::{
    BakeRunSummary, ChannelRecord, ChannelStatus, FailureKind, MaterialReport,
    ReconstructionStatus,
};
