//! External collaborator interfaces: the evaluation engine that turns a wired
//! graph into pixels, per-face loop-UV storage, and texture persistence.
//! The bake core only ever talks to the host through these traits.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::dsl::ShaderGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What physical quantity a single engine invocation computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum BakeSemantic {
    /// Read the sink's upstream node output as direct color. Probes rely on
    /// this: the spliced emission node's value is the channel being extracted.
    Emit,
    /// Tangent-space normal, fixed channel convention R=+X, G=+Y, B=+Z.
    Normal,
    /// Direct + indirect + color lighting.
    Combined { shadows: ShadowMode },
    Roughness,
    AmbientOcclusion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum ShadowMode {
    #[default]
    WithShadows,
    NoShadows,
}

/// One blocking evaluation call. `material_index` restricts the paint region
/// to faces with that material index (atlas mode); `clear` controls whether
/// the engine wipes the target before writing (atlas cells accumulate into a
/// shared buffer, so atlas passes set it to false).
#[derive(Debug, Clone)]
pub struct EvalRequest {
    pub semantic: BakeSemantic,
    pub resolution: Resolution,
    pub margin: u32,
    pub material_index: Option<usize>,
    pub clear: bool,
}

/// RGBA float pixels, row-major, bottom-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub resolution: Resolution,
    pub pixels: Vec<[f32; 4]>,
}

impl PixelBuffer {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            pixels: vec![[0.0, 0.0, 0.0, 0.0]; resolution.area() as usize],
        }
    }

    /// Uniform buffer carrying one color everywhere. Fill-constant actions
    /// produce these analytically instead of invoking the engine.
    pub fn filled(resolution: Resolution, color: [f32; 4]) -> Self {
        Self {
            resolution,
            pixels: vec![color; resolution.area() as usize],
        }
    }

    pub fn approx_eq(&self, other: &PixelBuffer, tolerance: f32) -> bool {
        self.resolution == other.resolution
            && self
                .pixels
                .iter()
                .zip(&other.pixels)
                .all(|(a, b)| a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance))
    }
}

/// The host's rendering/evaluation engine. Must treat the graph exactly as
/// currently wired; the probe machinery depends on that.
pub trait EvalEngine {
    fn evaluate(&mut self, graph: &ShaderGraph, request: &EvalRequest) -> Result<PixelBuffer>;
}

/// The host's per-face loop-UV storage, plus the per-face material index the
/// atlas path keys on.
pub trait MeshUvStore {
    fn face_count(&self) -> usize;
    fn loop_count(&self, face: usize) -> usize;
    fn loop_uv(&self, face: usize, corner: usize) -> [f32; 2];
    fn set_loop_uv(&mut self, face: usize, corner: usize, uv: [f32; 2]);
    fn face_material_index(&self, face: usize) -> usize;
}

/// Colorspace tag handed to persistence alongside each buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Colorspace {
    Srgb,
    NonColor,
}

impl Colorspace {
    pub fn tag(self) -> &'static str {
        match self {
            Colorspace::Srgb => "sRGB",
            Colorspace::NonColor => "Non-Color",
        }
    }
}

/// Texture persistence. The core records where each buffer went; the store
/// decides how bytes hit disk (or memory, in tests).
pub trait TextureStore {
    fn save(&mut self, buffer: &PixelBuffer, path: &Path, colorspace: Colorspace) -> Result<()>;
}

/// Default store: 8-bit PNG via the `image` crate. sRGB-tagged buffers are
/// gamma-encoded on write; data channels are stored linearly.
#[derive(Debug, Default)]
pub struct FileStore;

impl FileStore {
    fn encode_component(v: f32, colorspace: Colorspace) -> u8 {
        let v = v.clamp(0.0, 1.0);
        let v = match colorspace {
            Colorspace::Srgb => {
                if v <= 0.003_130_8 {
                    v * 12.92
                } else {
                    1.055 * v.powf(1.0 / 2.4) - 0.055
                }
            }
            Colorspace::NonColor => v,
        };
        (v * 255.0).round() as u8
    }
}

impl TextureStore for FileStore {
    fn save(&mut self, buffer: &PixelBuffer, path: &Path, colorspace: Colorspace) -> Result<()> {
        if buffer.pixels.len() != buffer.resolution.area() as usize {
            bail!(
                "pixel buffer size mismatch: {} pixels for {}",
                buffer.pixels.len(),
                buffer.resolution
            );
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let Resolution { width, height } = buffer.resolution;
        let mut img = image::RgbaImage::new(width, height);
        for (i, px) in buffer.pixels.iter().enumerate() {
            let x = (i as u32) % width;
            // Buffers are bottom-left origin; image files are top-left.
            let y = height - 1 - (i as u32) / width;
            img.put_pixel(
                x,
                y,
                image::Rgba([
                    Self::encode_component(px[0], colorspace),
                    Self::encode_component(px[1], colorspace),
                    Self::encode_component(px[2], colorspace),
                    (px[3].clamp(0.0, 1.0) * 255.0).round() as u8,
                ]),
            );
        }
        img.save(path)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}
