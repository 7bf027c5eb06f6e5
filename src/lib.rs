//! Per-channel texture extraction from procedural shading graphs.
//!
//! The engine classifies a material's shader graph, temporarily rewires its
//! sink so an external evaluation engine outputs exactly one requested
//! quantity, persists the result, and restores the graph. This works across
//! combinations of resolution, UDIM tile, and (in atlas mode) multiple
//! materials sharing one buffer. The host's renderer, UV storage, and image
//! persistence are reached only through the traits in [`engine`].

pub mod atlas;
pub mod baker;
pub mod dsl;
pub mod engine;
pub mod graph;
pub mod schema;
pub mod udim;

pub use baker::{
    BakeContext, BakeOrchestrator, BakeRun, BakeSettings, Channel, Material,
    MaterialClassification, MixedShaderStrategy, UdimMode,
};
pub use engine::{
    BakeSemantic, Colorspace, EvalEngine, EvalRequest, FileStore, MeshUvStore, PixelBuffer,
    Resolution, ShadowMode, TextureStore,
};
