//! The bake sweep: for every material, resolution, UDIM tile, and planned
//! channel, wire a probe (or skip/fill), invoke the engine, persist the
//! result, and finally rebuild the graph from the primary-resolution
//! textures when asked to.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::atlas::{self, AtlasLayout};
use crate::dsl::{ShaderGraph, SocketValue};
use crate::engine::{
    BakeSemantic, EvalEngine, EvalRequest, MeshUvStore, PixelBuffer, Resolution, ShadowMode,
    TextureStore,
};
use crate::schema::{SocketScheme, load_default_scheme};
use crate::udim::{self, UdimTile};

use super::analyze::{GraphAnalysis, MaterialClassification, classify};
use super::channels::{
    Channel, EvalMode, PlannedAction, PlannedChannel, basic_channels, evaluation_mode, plan,
};
use super::probe::{ProbeSpec, ProbeTransaction, RestoreOutcome};
use super::rebuild::{rebuild_from_textures, rebuild_minimal};
use super::report::{
    BakeRunSummary, ChannelRecord, ChannelStatus, FailureKind, MaterialReport,
    ReconstructionStatus,
};

/// Metallic constants above this are lowered for combined-lighting capture
/// so the diffuse response is observable, then restored.
const LIGHTING_METALLIC_CEILING: f32 = 0.8;
const LIGHTING_METALLIC_REPLACEMENT: f32 = 0.2;

/// One material to bake: a name (drives output file names) and its graph.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub graph: ShaderGraph,
}

impl Material {
    pub fn new(name: impl Into<String>, graph: ShaderGraph) -> Self {
        Self {
            name: name.into(),
            graph,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum UdimMode {
    #[default]
    Disabled,
    /// Scan the mesh's loop UVs for referenced tiles.
    AutoDetect,
    /// Bake an explicit tile range, whether or not faces reference it.
    Range { start: u32, end: u32 },
}

/// What to expose when a mixed shader network's custom output is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum MixedShaderStrategy {
    /// Probe the full surface as wired (combiner output).
    #[default]
    SurfaceOutput,
    /// Probe the principled surface alone.
    PrincipledOnly,
    /// Probe the first simple shader in node order alone. Which shader is
    /// "first" when several exist is arbitrary and kept for compatibility.
    CustomOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LightingOptions {
    pub shadow_mode: ShadowMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BakeSettings {
    pub channels: Vec<Channel>,
    pub resolutions: Vec<Resolution>,
    pub margin: u32,
    pub udim: UdimMode,
    /// Rebuild each graph from its baked textures after the sweep.
    pub replace_nodes: bool,
    pub mixed_shader_strategy: MixedShaderStrategy,
    /// When set, base color is captured with scene lighting (combined pass).
    pub lighting: Option<LightingOptions>,
    pub output_dir: PathBuf,
}

impl Default for BakeSettings {
    fn default() -> Self {
        Self {
            channels: basic_channels(),
            resolutions: vec![Resolution::square(2048)],
            margin: 4,
            udim: UdimMode::Disabled,
            replace_nodes: false,
            mixed_shader_strategy: MixedShaderStrategy::default(),
            lighting: None,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Host collaborators, threaded explicitly through every call.
pub struct BakeContext<'a> {
    pub engine: &'a mut dyn EvalEngine,
    pub uv: &'a mut dyn MeshUvStore,
    pub store: &'a mut dyn TextureStore,
}

#[derive(Debug, Clone)]
pub struct BakedTexture {
    pub buffer: PixelBuffer,
    pub path: PathBuf,
}

/// Per-resolution, per-channel handles for one material.
pub type BakedTextures = HashMap<Resolution, HashMap<Channel, BakedTexture>>;

#[derive(Debug, Clone)]
pub struct MaterialOutcome {
    pub report: MaterialReport,
    pub textures: BakedTextures,
}

#[derive(Debug, Clone, Default)]
pub struct BakeRun {
    pub outcomes: Vec<MaterialOutcome>,
}

impl BakeRun {
    pub fn summary(&self) -> BakeRunSummary {
        BakeRunSummary {
            materials: self.outcomes.iter().map(|o| o.report.clone()).collect(),
        }
    }
}

struct ChannelFailure {
    kind: FailureKind,
    message: String,
}

struct EvalSuccess {
    buffer: PixelBuffer,
    restore_inconsistent: bool,
}

pub struct BakeOrchestrator {
    settings: BakeSettings,
    scheme: SocketScheme,
}

impl BakeOrchestrator {
    pub fn new(settings: BakeSettings) -> Result<Self> {
        let scheme = load_default_scheme()?;
        Ok(Self { settings, scheme })
    }

    pub fn with_scheme(settings: BakeSettings, scheme: SocketScheme) -> Self {
        Self { settings, scheme }
    }

    pub fn settings(&self) -> &BakeSettings {
        &self.settings
    }

    /// Runs the full sweep over `materials`. Failures below the material
    /// level never abort sibling units; everything lands in the report.
    pub fn run(&self, materials: &mut [Material], ctx: &mut BakeContext) -> BakeRun {
        let resolutions = normalized_resolutions(&self.settings.resolutions);
        let tiles = self.tiles_for(ctx.uv);
        let multi_res = resolutions.len() > 1;

        eprintln!(
            "[bake] starting sweep: {} material(s), {} resolution(s), {} tile(s)",
            materials.len(),
            resolutions.len(),
            tiles.len()
        );

        let mut run = BakeRun::default();
        for material in materials.iter_mut() {
            let outcome = self.bake_material(material, ctx, &resolutions, &tiles, multi_res);
            run.outcomes.push(outcome);
        }
        run
    }

    fn bake_material(
        &self,
        material: &mut Material,
        ctx: &mut BakeContext,
        resolutions: &[Resolution],
        tiles: &[UdimTile],
        multi_res: bool,
    ) -> MaterialOutcome {
        // Classify once per material; every later decision reads this.
        let analysis = classify(&material.graph, &self.scheme);
        eprintln!(
            "[bake] material '{}' classified as {}",
            material.name, analysis.classification
        );

        let planned = plan(
            analysis.classification,
            &analysis.availability,
            &self.settings.channels,
            &self.scheme,
        );

        let mut report = MaterialReport::new(&material.name, analysis.classification);
        let mut textures: BakedTextures = HashMap::new();

        for &resolution in resolutions {
            for &tile in tiles {
                let udim_active = self.settings.udim != UdimMode::Disabled;
                // Non-default tiles bake against renormalized UVs; the
                // originals are restored after the tile no matter how the
                // channels within it fared.
                let original_uvs = if udim_active && !tile.is_default() {
                    Some(udim::normalize_for_tile(ctx.uv, tile))
                } else {
                    None
                };

                for planned_channel in &planned {
                    let record = self.process_channel(
                        material,
                        ctx,
                        &analysis,
                        planned_channel,
                        resolution,
                        tile,
                        multi_res,
                        udim_active && tiles.len() > 1,
                        &mut report.restore_inconsistent,
                        &mut textures,
                    );
                    report.channels.push(record);
                }

                if let Some(originals) = original_uvs {
                    udim::restore_uvs(ctx.uv, &originals);
                }
            }
        }

        let reconstruction = self.maybe_reconstruct(material, &report, &textures, resolutions);
        report.reconstruction = reconstruction;

        eprintln!(
            "[bake] material '{}': {} evaluated, {} filled, {} skipped, {} failed",
            material.name,
            report.evaluated(),
            report.filled(),
            report.skipped(),
            report.failed()
        );

        MaterialOutcome { report, textures }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_channel(
        &self,
        material: &mut Material,
        ctx: &mut BakeContext,
        analysis: &GraphAnalysis,
        planned: &PlannedChannel,
        resolution: Resolution,
        tile: UdimTile,
        multi_res: bool,
        udim_names: bool,
        restore_inconsistent: &mut bool,
        textures: &mut BakedTextures,
    ) -> ChannelRecord {
        let channel = planned.channel;
        let mut record = ChannelRecord {
            channel,
            resolution,
            tile: tile.0,
            status: ChannelStatus::Skipped,
            path: None,
        };

        match &planned.action {
            PlannedAction::Skip => {
                record.status = ChannelStatus::Skipped;
            }
            PlannedAction::FillConstant(value) => {
                let buffer = PixelBuffer::filled(resolution, value.as_color());
                match self.persist(ctx, &buffer, material, channel, resolution, tile, multi_res, udim_names)
                {
                    Ok(path) => {
                        textures
                            .entry(resolution)
                            .or_default()
                            .insert(channel, BakedTexture { buffer, path: path.clone() });
                        record.status = ChannelStatus::Filled;
                        record.path = Some(path);
                    }
                    Err(e) => {
                        record.status = ChannelStatus::Failed {
                            kind: FailureKind::EvaluationEngineFailure,
                            message: format!("persist failed: {e:#}"),
                        };
                    }
                }
            }
            PlannedAction::Evaluate => {
                match self.evaluate_channel(material, ctx, analysis, channel, resolution) {
                    Ok(success) => {
                        if success.restore_inconsistent {
                            *restore_inconsistent = true;
                        }
                        match self.persist(
                            ctx, &success.buffer, material, channel, resolution, tile, multi_res,
                            udim_names,
                        ) {
                            Ok(path) => {
                                textures.entry(resolution).or_default().insert(
                                    channel,
                                    BakedTexture {
                                        buffer: success.buffer,
                                        path: path.clone(),
                                    },
                                );
                                record.status = if success.restore_inconsistent {
                                    ChannelStatus::Failed {
                                        kind: FailureKind::RestoreFailure,
                                        message: "baked, but graph restore left the sink inconsistent".into(),
                                    }
                                } else {
                                    ChannelStatus::Evaluated
                                };
                                record.path = Some(path);
                            }
                            Err(e) => {
                                record.status = ChannelStatus::Failed {
                                    kind: FailureKind::EvaluationEngineFailure,
                                    message: format!("persist failed: {e:#}"),
                                };
                            }
                        }
                    }
                    Err(failure) => {
                        eprintln!(
                            "[bake] '{}' {} at {resolution}: {}",
                            material.name, channel, failure.message
                        );
                        record.status = ChannelStatus::Failed {
                            kind: failure.kind,
                            message: failure.message,
                        };
                    }
                }
            }
        }
        record
    }

    /// One engine invocation for one channel, through whatever probe the
    /// channel's evaluation mode calls for.
    fn evaluate_channel(
        &self,
        material: &mut Material,
        ctx: &mut BakeContext,
        analysis: &GraphAnalysis,
        channel: Channel,
        resolution: Resolution,
    ) -> std::result::Result<EvalSuccess, ChannelFailure> {
        let mode = evaluation_mode(
            channel,
            analysis.classification,
            analysis.availability.has_image_samples,
            self.settings.lighting.map(|l| l.shadow_mode),
        );

        match mode {
            EvalMode::DirectPass(semantic) => {
                self.direct_pass(material, ctx, analysis, semantic, resolution)
            }
            EvalMode::SingleInputProbe => {
                let key = channel.scheme_key().unwrap_or(channel.suffix());
                let spec = ProbeSpec::SingleInput {
                    channel_key: key.to_string(),
                };
                self.probe_pass(material, ctx, &spec, resolution)
            }
            EvalMode::FullSurfaceProbe => {
                let spec = self.full_surface_spec(analysis);
                match self.probe_pass(material, ctx, &spec, resolution) {
                    Ok(success) => Ok(success),
                    Err(failure)
                        if failure.kind == FailureKind::ProbeWireFailure
                            && spec != ProbeSpec::FullSurface =>
                    {
                        // Restricted strategies fall back to the full
                        // surface output rather than losing the channel.
                        eprintln!(
                            "[probe] restricted probe failed ({}), falling back to surface output",
                            failure.message
                        );
                        self.probe_pass(material, ctx, &ProbeSpec::FullSurface, resolution)
                    }
                    Err(failure) => Err(failure),
                }
            }
        }
    }

    fn full_surface_spec(&self, analysis: &GraphAnalysis) -> ProbeSpec {
        let mixed = matches!(
            analysis.classification,
            MaterialClassification::MixedShaderNetwork
                | MaterialClassification::PrincipledWithSimpleShader
                | MaterialClassification::SimpleShaderWithPrincipled
        );
        if !mixed {
            return ProbeSpec::FullSurface;
        }
        match self.settings.mixed_shader_strategy {
            MixedShaderStrategy::SurfaceOutput => ProbeSpec::FullSurface,
            MixedShaderStrategy::PrincipledOnly => match &analysis.principled_id {
                Some(id) => ProbeSpec::RestrictedSubgraph { node_id: id.clone() },
                None => ProbeSpec::FullSurface,
            },
            MixedShaderStrategy::CustomOnly => match analysis.simple_shader_ids.first() {
                Some(id) => ProbeSpec::RestrictedSubgraph { node_id: id.clone() },
                None => ProbeSpec::FullSurface,
            },
        }
    }

    fn probe_pass(
        &self,
        material: &mut Material,
        ctx: &mut BakeContext,
        spec: &ProbeSpec,
        resolution: Resolution,
    ) -> std::result::Result<EvalSuccess, ChannelFailure> {
        let mut tx = ProbeTransaction::open(&mut material.graph, spec, &self.scheme).map_err(
            |e| ChannelFailure {
                kind: FailureKind::ProbeWireFailure,
                message: format!("{e:#}"),
            },
        )?;

        let request = EvalRequest {
            semantic: BakeSemantic::Emit,
            resolution,
            margin: self.settings.margin,
            material_index: None,
            clear: true,
        };
        let engine = &mut *ctx.engine;
        let evaluated = tx.evaluate(|graph| engine.evaluate(graph, &request));
        let restore = tx.close();

        let buffer = evaluated.map_err(|e| ChannelFailure {
            kind: FailureKind::EvaluationEngineFailure,
            message: format!("{e:#}"),
        })?;

        for err in &restore.errors {
            eprintln!("[probe] restore: {err}");
        }
        Ok(EvalSuccess {
            buffer,
            restore_inconsistent: restore.outcome == RestoreOutcome::Inconsistent,
        })
    }

    fn direct_pass(
        &self,
        material: &mut Material,
        ctx: &mut BakeContext,
        analysis: &GraphAnalysis,
        semantic: BakeSemantic,
        resolution: Resolution,
    ) -> std::result::Result<EvalSuccess, ChannelFailure> {
        // Combined-lighting capture briefly caps metallic so the pass sees a
        // diffuse response; the original value comes back no matter what the
        // engine does.
        let metallic_guard = if matches!(semantic, BakeSemantic::Combined { .. }) {
            self.cap_metallic_for_lighting(&mut material.graph, analysis)
        } else {
            None
        };

        let request = EvalRequest {
            semantic,
            resolution,
            margin: self.settings.margin,
            material_index: None,
            clear: true,
        };
        let result = ctx.engine.evaluate(&material.graph, &request);

        if let Some((node_id, socket, original)) = metallic_guard {
            if let Ok(node) = material.graph.find_node_mut(&node_id) {
                node.inputs.insert(socket, original);
            }
        }

        result
            .map(|buffer| EvalSuccess {
                buffer,
                restore_inconsistent: false,
            })
            .map_err(|e| ChannelFailure {
                kind: FailureKind::EvaluationEngineFailure,
                message: format!("{e:#}"),
            })
    }

    fn cap_metallic_for_lighting(
        &self,
        graph: &mut ShaderGraph,
        analysis: &GraphAnalysis,
    ) -> Option<(String, String, SocketValue)> {
        let principled_id = analysis.principled_id.clone()?;
        let principled = graph.node(&principled_id)?;
        let socket = self
            .scheme
            .resolve_input(graph, principled, "Metallic")?
            .to_string();
        if graph.incoming_link(&principled_id, &socket).is_some() {
            return None;
        }
        let original = graph.node(&principled_id)?.constant(&socket)?;
        let SocketValue::Scalar(v) = original else {
            return None;
        };
        if v <= LIGHTING_METALLIC_CEILING {
            return None;
        }
        eprintln!(
            "[bake] lighting capture: lowering metallic {v:.2} -> {LIGHTING_METALLIC_REPLACEMENT} for the combined pass"
        );
        if let Ok(node) = graph.find_node_mut(&principled_id) {
            node.inputs
                .insert(socket.clone(), SocketValue::Scalar(LIGHTING_METALLIC_REPLACEMENT));
        }
        Some((principled_id, socket, original))
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        ctx: &mut BakeContext,
        buffer: &PixelBuffer,
        material: &Material,
        channel: Channel,
        resolution: Resolution,
        tile: UdimTile,
        multi_res: bool,
        udim_names: bool,
    ) -> Result<PathBuf> {
        let stem = sanitize_file_name(&material.name);
        let file_name = if udim_names {
            let base = if multi_res {
                format!("{stem}_{}", resolution_suffix(resolution))
            } else {
                stem
            };
            udim::udim_file_name(&base, tile, channel.suffix(), "png")
        } else {
            let mut name = format!("{stem}_{}", channel.suffix().to_ascii_lowercase());
            if multi_res {
                name.push('_');
                name.push_str(&resolution_suffix(resolution));
            }
            name.push_str(".png");
            name
        };

        let path = self.settings.output_dir.join(file_name);
        ctx.store
            .save(buffer, &path, channel.colorspace())
            .with_context(|| format!("saving {channel} for '{}'", material.name))?;
        Ok(path)
    }

    fn maybe_reconstruct(
        &self,
        material: &mut Material,
        report: &MaterialReport,
        textures: &BakedTextures,
        resolutions: &[Resolution],
    ) -> ReconstructionStatus {
        if !self.settings.replace_nodes {
            return ReconstructionStatus::NotRequested;
        }
        if report.restore_inconsistent {
            eprintln!(
                "[rebuild] '{}' flagged inconsistent, skipping reconstruction",
                material.name
            );
            return ReconstructionStatus::SkippedInconsistent;
        }
        // Reconstruction reads the primary (largest-area) resolution only.
        let Some(&primary) = resolutions.last() else {
            return ReconstructionStatus::SkippedNoTextures;
        };
        let Some(primary_textures) = textures.get(&primary).filter(|t| !t.is_empty()) else {
            eprintln!(
                "[rebuild] '{}' produced no textures at {primary}, skipping reconstruction",
                material.name
            );
            return ReconstructionStatus::SkippedNoTextures;
        };

        let baked: HashMap<Channel, PathBuf> = primary_textures
            .iter()
            .map(|(channel, tex)| (*channel, tex.path.clone()))
            .collect();

        match rebuild_from_textures(&mut material.graph, &self.scheme, &baked) {
            Ok(()) => {
                eprintln!(
                    "[rebuild] '{}' rebuilt from {} channel(s) at {primary}",
                    material.name,
                    baked.len()
                );
                ReconstructionStatus::Rebuilt { resolution: primary }
            }
            Err(e) => {
                // Never leave the material sink-less; buffers on disk are
                // already safe.
                let message = format!("{e:#}");
                eprintln!("[rebuild] '{}' failed: {message}; restoring minimal graph", material.name);
                if let Err(fallback_err) = rebuild_minimal(&mut material.graph) {
                    eprintln!("[rebuild] minimal fallback also failed: {fallback_err:#}");
                }
                ReconstructionStatus::FailedMinimalFallback { message }
            }
        }
    }

    fn tiles_for(&self, uv: &dyn MeshUvStore) -> Vec<UdimTile> {
        match &self.settings.udim {
            UdimMode::Disabled => vec![UdimTile(udim::FIRST_TILE)],
            UdimMode::AutoDetect => {
                let tiles = udim::detect_tiles(uv);
                if tiles.is_empty() {
                    eprintln!("[udim] no tiles detected, using {}", udim::FIRST_TILE);
                    vec![UdimTile(udim::FIRST_TILE)]
                } else {
                    eprintln!("[udim] detected tiles: {tiles:?}");
                    tiles
                }
            }
            UdimMode::Range { start, end } => {
                let tiles: Vec<UdimTile> =
                    (*start..=*end).filter_map(|n| UdimTile::new(n).ok()).collect();
                if tiles.is_empty() {
                    vec![UdimTile(udim::FIRST_TILE)]
                } else {
                    tiles
                }
            }
        }
    }
}

/// Deduplicates and orders resolutions ascending by area; the last entry is
/// the primary one reconstruction reads.
fn normalized_resolutions(requested: &[Resolution]) -> Vec<Resolution> {
    let mut resolutions: Vec<Resolution> = Vec::new();
    for &r in requested {
        if !resolutions.contains(&r) {
            resolutions.push(r);
        }
    }
    if resolutions.is_empty() {
        resolutions.push(Resolution::square(2048));
    }
    resolutions.sort_by_key(|r| (r.area(), r.width));
    resolutions
}

fn resolution_suffix(r: Resolution) -> String {
    if r.width == r.height {
        format!("{}", r.width)
    } else {
        format!("{}x{}", r.width, r.height)
    }
}

/// Keeps alphanumerics, spaces, dashes, underscores; everything else drops.
/// An empty result falls back to "Material".
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "Material".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Atlas mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum AtlasLayoutMode {
    Auto,
    Manual { columns: u32, rows: u32 },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AtlasSettings {
    /// Output stem; files are named `<name>_Atlas_<channel>.png`.
    pub name: String,
    pub resolution: Resolution,
    pub layout: AtlasLayoutMode,
    /// Fraction of the atlas reserved as padding around each cell.
    pub padding: f32,
    /// Permanently remap loop UVs into the assigned cells before baking.
    pub update_uv: bool,
    pub channels: Vec<Channel>,
    pub margin: u32,
    pub output_dir: PathBuf,
}

impl Default for AtlasSettings {
    fn default() -> Self {
        Self {
            name: "atlas".to_string(),
            resolution: Resolution::square(2048),
            layout: AtlasLayoutMode::Auto,
            padding: 0.02,
            update_uv: true,
            channels: basic_channels(),
            margin: 4,
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AtlasChannelRecord {
    pub channel: Channel,
    pub status: ChannelStatus,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AtlasRun {
    pub layout: AtlasLayout,
    pub channels: Vec<AtlasChannelRecord>,
    /// (material name, failure message) pairs for cells that did not bake.
    pub material_failures: Vec<(String, String)>,
    pub buffers: HashMap<Channel, PixelBuffer>,
}

impl BakeOrchestrator {
    /// Bakes N materials into one shared buffer per channel, each material
    /// restricted to its padded atlas cell. The UV remap (when requested) is
    /// the intended final state and is not undone afterwards; every graph
    /// rewrite still goes through a probe transaction per material.
    pub fn run_atlas(
        &self,
        materials: &mut [Material],
        ctx: &mut BakeContext,
        atlas: &AtlasSettings,
    ) -> Result<AtlasRun> {
        if materials.len() < 2 {
            bail!("atlas baking needs at least 2 materials, got {}", materials.len());
        }

        let layout = match atlas.layout {
            AtlasLayoutMode::Auto => atlas::plan_layout(materials.len()),
            AtlasLayoutMode::Manual { columns, rows } => AtlasLayout { columns, rows },
        };
        if (layout.capacity() as usize) < materials.len() {
            bail!(
                "atlas layout {}x{} cannot accommodate {} materials",
                layout.columns,
                layout.rows,
                materials.len()
            );
        }
        eprintln!(
            "[atlas] baking {} materials into a {}x{} grid",
            materials.len(),
            layout.columns,
            layout.rows
        );

        if atlas.update_uv {
            atlas::remap_uvs_into_cells(ctx.uv, layout, materials.len(), atlas.padding)?;
        }

        let analyses: Vec<GraphAnalysis> = materials
            .iter()
            .map(|m| classify(&m.graph, &self.scheme))
            .collect();

        let mut channels = Vec::new();
        let mut material_failures = Vec::new();
        let mut buffers = HashMap::new();

        for &channel in &atlas.channels {
            let mut shared = PixelBuffer::new(atlas.resolution);
            let mut any_ok = false;

            for (index, material) in materials.iter_mut().enumerate() {
                match self.atlas_cell_pass(material, ctx, &analyses[index], channel, index, atlas) {
                    Ok(part) => {
                        composite_painted(&mut shared, &part);
                        any_ok = true;
                    }
                    Err(failure) => {
                        eprintln!(
                            "[atlas] '{}' {channel}: {}",
                            material.name, failure.message
                        );
                        material_failures.push((material.name.clone(), failure.message));
                    }
                }
            }

            let file_name = format!(
                "{}_Atlas_{}.png",
                sanitize_file_name(&atlas.name),
                channel.suffix()
            );
            let path = atlas.output_dir.join(file_name);
            let status = if !any_ok {
                ChannelStatus::Failed {
                    kind: FailureKind::EvaluationEngineFailure,
                    message: "no material cell baked".to_string(),
                }
            } else {
                match ctx.store.save(&shared, &path, channel.colorspace()) {
                    Ok(()) => ChannelStatus::Evaluated,
                    Err(e) => ChannelStatus::Failed {
                        kind: FailureKind::EvaluationEngineFailure,
                        message: format!("persist failed: {e:#}"),
                    },
                }
            };

            let saved = matches!(status, ChannelStatus::Evaluated);
            channels.push(AtlasChannelRecord {
                channel,
                status,
                path: saved.then(|| path.clone()),
            });
            buffers.insert(channel, shared);
        }

        Ok(AtlasRun {
            layout,
            channels,
            material_failures,
            buffers,
        })
    }

    /// One material's contribution to a shared atlas channel. The engine
    /// restricts the paint region to faces carrying `material_index`; the
    /// shared buffer therefore never clears between cells.
    fn atlas_cell_pass(
        &self,
        material: &mut Material,
        ctx: &mut BakeContext,
        analysis: &GraphAnalysis,
        channel: Channel,
        material_index: usize,
        atlas: &AtlasSettings,
    ) -> std::result::Result<PixelBuffer, ChannelFailure> {
        let mode = evaluation_mode(
            channel,
            analysis.classification,
            analysis.availability.has_image_samples,
            None,
        );
        let request = |semantic| EvalRequest {
            semantic,
            resolution: atlas.resolution,
            margin: atlas.margin,
            material_index: Some(material_index),
            clear: false,
        };

        match mode {
            EvalMode::DirectPass(semantic) => ctx
                .engine
                .evaluate(&material.graph, &request(semantic))
                .map_err(|e| ChannelFailure {
                    kind: FailureKind::EvaluationEngineFailure,
                    message: format!("{e:#}"),
                }),
            EvalMode::SingleInputProbe | EvalMode::FullSurfaceProbe => {
                let spec = if mode == EvalMode::FullSurfaceProbe {
                    self.full_surface_spec(analysis)
                } else {
                    let key = channel.scheme_key().unwrap_or(channel.suffix());
                    ProbeSpec::SingleInput {
                        channel_key: key.to_string(),
                    }
                };
                let mut tx = ProbeTransaction::open(&mut material.graph, &spec, &self.scheme)
                    .map_err(|e| ChannelFailure {
                        kind: FailureKind::ProbeWireFailure,
                        message: format!("{e:#}"),
                    })?;
                let engine = &mut *ctx.engine;
                let evaluated =
                    tx.evaluate(|graph| engine.evaluate(graph, &request(BakeSemantic::Emit)));
                let restore = tx.close();
                for err in &restore.errors {
                    eprintln!("[probe] restore: {err}");
                }
                evaluated.map_err(|e| ChannelFailure {
                    kind: FailureKind::EvaluationEngineFailure,
                    message: format!("{e:#}"),
                })
            }
        }
    }
}

/// Overwrites `shared` wherever `part` painted (alpha > 0). Cells never
/// overlap after padding, so ordering between materials is irrelevant.
fn composite_painted(shared: &mut PixelBuffer, part: &PixelBuffer) {
    if shared.resolution != part.resolution {
        eprintln!(
            "[atlas] dropping cell result with mismatched resolution {} (atlas is {})",
            part.resolution, shared.resolution
        );
        return;
    }
    for (dst, src) in shared.pixels.iter_mut().zip(&part.pixels) {
        if src[3] > 0.0 {
            *dst = *src;
        }
    }
}
