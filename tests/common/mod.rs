//! Shared fixtures: graph builders and deterministic host collaborators
//! (mock engine, in-memory UV storage, in-memory texture store).

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use node_forge_bake_engine::dsl::{
    Endpoint, Node, NodeKind, SURFACE_INPUT, ShaderGraph, SocketValue,
};
use node_forge_bake_engine::engine::{
    BakeSemantic, Colorspace, EvalEngine, EvalRequest, MeshUvStore, PixelBuffer, Resolution,
    TextureStore,
};

pub const GREY: [f32; 4] = [0.8, 0.8, 0.8, 1.0];
pub const IMAGE_MARKER: [f32; 4] = [0.6, 0.4, 0.2, 1.0];

pub fn sink(id: &str) -> Node {
    Node::new(id, NodeKind::OutputMaterial)
}

pub fn principled(id: &str) -> Node {
    Node::new(id, NodeKind::Principled)
        .with_outputs(&["BSDF"])
        .with_input("Base Color", SocketValue::Color(GREY))
        .with_input("Metallic", SocketValue::Scalar(0.0))
        .with_input("Roughness", SocketValue::Scalar(0.5))
}

pub fn emission(id: &str) -> Node {
    Node::new(id, NodeKind::Emission)
        .with_outputs(&["Emission"])
        .with_input("Color", SocketValue::Color([1.0, 0.5, 0.0, 1.0]))
}

pub fn image_texture(id: &str) -> Node {
    Node::new(id, NodeKind::ImageTexture)
        .with_outputs(&["Color", "Alpha"])
        .with_image(format!("{id}.png"))
}

/// principled -> sink, all inputs at declared defaults.
pub fn default_graph() -> ShaderGraph {
    let mut g = ShaderGraph::new();
    g.add_node(principled("p")).unwrap();
    g.add_node(sink("out")).unwrap();
    g.connect(Endpoint::new("p", "BSDF"), Endpoint::new("out", SURFACE_INPUT))
        .unwrap();
    g
}

/// Image texture driving base color.
pub fn textured_graph() -> ShaderGraph {
    let mut g = default_graph();
    g.add_node(image_texture("tex")).unwrap();
    g.connect(Endpoint::new("tex", "Color"), Endpoint::new("p", "Base Color"))
        .unwrap();
    g
}

/// Constant-driven, non-default metallic.
pub fn procedural_graph() -> ShaderGraph {
    let mut g = default_graph();
    g.find_node_mut("p")
        .unwrap()
        .inputs
        .insert("Metallic".to_string(), SocketValue::Scalar(1.0));
    g
}

/// emission -> sink, no principled anywhere.
pub fn simple_shader_graph() -> ShaderGraph {
    let mut g = ShaderGraph::new();
    g.add_node(emission("glow")).unwrap();
    g.add_node(sink("out")).unwrap();
    g.connect(
        Endpoint::new("glow", "Emission"),
        Endpoint::new("out", SURFACE_INPUT),
    )
    .unwrap();
    g
}

/// sink <- mix <- {principled, emission}, both combiner inputs wired.
pub fn mixed_network_graph() -> ShaderGraph {
    let mut g = ShaderGraph::new();
    g.add_node(principled("p")).unwrap();
    g.add_node(emission("glow")).unwrap();
    g.add_node(
        Node::new("mix", NodeKind::MixShader)
            .with_outputs(&["Shader"])
            .with_input("Fac", SocketValue::Scalar(0.5)),
    )
    .unwrap();
    g.add_node(sink("out")).unwrap();
    g.connect(Endpoint::new("p", "BSDF"), Endpoint::new("mix", "Shader1"))
        .unwrap();
    g.connect(Endpoint::new("glow", "Emission"), Endpoint::new("mix", "Shader2"))
        .unwrap();
    g.connect(Endpoint::new("mix", "Shader"), Endpoint::new("out", SURFACE_INPUT))
        .unwrap();
    g
}

/// Deterministic stand-in for the host renderer: resolves the wired graph to
/// one uniform color per request, so probe wiring differences are observable
/// in the output buffer.
#[derive(Default)]
pub struct MockEngine {
    pub calls: Vec<(BakeSemantic, Resolution)>,
    /// When set, every request with this semantic fails.
    pub fail_on_semantic: Option<BakeSemantic>,
}

impl MockEngine {
    pub fn emit_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|(s, _)| matches!(s, BakeSemantic::Emit))
            .count()
    }

    fn resolve_output(graph: &ShaderGraph, endpoint: &Endpoint, depth: u8) -> [f32; 4] {
        if depth > 16 {
            return GREY;
        }
        let Some(node) = graph.node(&endpoint.node_id) else {
            return GREY;
        };
        match node.kind {
            NodeKind::Rgb => node
                .constant("Color")
                .map(|v| v.as_color())
                .unwrap_or(GREY),
            NodeKind::ImageTexture => IMAGE_MARKER,
            NodeKind::Emission => Self::resolve_input(graph, node, "Color", depth),
            NodeKind::Principled => Self::resolve_input(graph, node, "Base Color", depth),
            NodeKind::MixShader => {
                let a = Self::resolve_linked(graph, node, "Shader1", depth);
                let b = Self::resolve_linked(graph, node, "Shader2", depth);
                [
                    (a[0] + b[0]) * 0.5,
                    (a[1] + b[1]) * 0.5,
                    (a[2] + b[2]) * 0.5,
                    1.0,
                ]
            }
            NodeKind::AddShader => {
                let a = Self::resolve_linked(graph, node, "Shader1", depth);
                let b = Self::resolve_linked(graph, node, "Shader2", depth);
                [
                    (a[0] + b[0]).min(1.0),
                    (a[1] + b[1]).min(1.0),
                    (a[2] + b[2]).min(1.0),
                    1.0,
                ]
            }
            _ => GREY,
        }
    }

    fn resolve_input(graph: &ShaderGraph, node: &Node, socket: &str, depth: u8) -> [f32; 4] {
        if let Some(link) = graph.incoming_link(&node.id, socket) {
            return Self::resolve_output(graph, &link.from, depth + 1);
        }
        node.constant(socket).map(|v| v.as_color()).unwrap_or(GREY)
    }

    fn resolve_linked(graph: &ShaderGraph, node: &Node, socket: &str, depth: u8) -> [f32; 4] {
        match graph.incoming_link(&node.id, socket) {
            Some(link) => Self::resolve_output(graph, &link.from, depth + 1),
            None => [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl EvalEngine for MockEngine {
    fn evaluate(&mut self, graph: &ShaderGraph, request: &EvalRequest) -> Result<PixelBuffer> {
        self.calls.push((request.semantic, request.resolution));
        if Some(request.semantic) == self.fail_on_semantic {
            bail!("mock engine failure for {:?}", request.semantic);
        }

        let color = match request.semantic {
            BakeSemantic::Normal => [0.5, 0.5, 1.0, 1.0],
            BakeSemantic::AmbientOcclusion => [1.0, 1.0, 1.0, 1.0],
            BakeSemantic::Roughness => graph
                .first_of_kind(NodeKind::Principled)
                .and_then(|p| p.constant("Roughness"))
                .map(|v| v.as_color())
                .unwrap_or([0.5, 0.5, 0.5, 1.0]),
            BakeSemantic::Emit | BakeSemantic::Combined { .. } => {
                let sink = graph
                    .sink()
                    .ok_or_else(|| anyhow::anyhow!("mock engine: graph has no sink"))?;
                match graph.incoming_link(&sink.id, SURFACE_INPUT) {
                    Some(link) => Self::resolve_output(graph, &link.from, 0),
                    None => bail!("mock engine: sink is not linked"),
                }
            }
        };
        Ok(PixelBuffer::filled(request.resolution, color))
    }
}

/// Quad-per-face UV storage with per-face material indices.
pub struct MockUv {
    pub faces: Vec<MockFace>,
}

pub struct MockFace {
    pub uvs: Vec<[f32; 2]>,
    pub material_index: usize,
}

impl MockUv {
    /// One unit quad per material index, all inside tile 1001.
    pub fn quads(material_count: usize) -> Self {
        let faces = (0..material_count)
            .map(|i| MockFace {
                uvs: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
                material_index: i,
            })
            .collect();
        Self { faces }
    }

    /// One quad per given UDIM tile offset.
    pub fn tiled(tile_offsets: &[(u32, u32)]) -> Self {
        let faces = tile_offsets
            .iter()
            .map(|&(tu, tv)| {
                let (u, v) = (tu as f32, tv as f32);
                MockFace {
                    uvs: vec![
                        [u + 0.1, v + 0.1],
                        [u + 0.9, v + 0.1],
                        [u + 0.9, v + 0.9],
                        [u + 0.1, v + 0.9],
                    ],
                    material_index: 0,
                }
            })
            .collect();
        Self { faces }
    }
}

impl MeshUvStore for MockUv {
    fn face_count(&self) -> usize {
        self.faces.len()
    }

    fn loop_count(&self, face: usize) -> usize {
        self.faces[face].uvs.len()
    }

    fn loop_uv(&self, face: usize, corner: usize) -> [f32; 2] {
        self.faces[face].uvs[corner]
    }

    fn set_loop_uv(&mut self, face: usize, corner: usize, uv: [f32; 2]) {
        self.faces[face].uvs[corner] = uv;
    }

    fn face_material_index(&self, face: usize) -> usize {
        self.faces[face].material_index
    }
}

/// Records saves instead of touching disk.
#[derive(Default)]
pub struct MemoryStore {
    pub saved: Vec<SavedImage>,
}

pub struct SavedImage {
    pub path: PathBuf,
    pub resolution: Resolution,
    pub colorspace: Colorspace,
    pub pixels: Vec<[f32; 4]>,
}

impl MemoryStore {
    pub fn paths(&self) -> Vec<String> {
        self.saved
            .iter()
            .map(|s| s.path.display().to_string())
            .collect()
    }

    pub fn by_path(&self) -> HashMap<String, &SavedImage> {
        self.saved
            .iter()
            .map(|s| (s.path.display().to_string(), s))
            .collect()
    }
}

impl TextureStore for MemoryStore {
    fn save(&mut self, buffer: &PixelBuffer, path: &Path, colorspace: Colorspace) -> Result<()> {
        self.saved.push(SavedImage {
            path: path.to_path_buf(),
            resolution: buffer.resolution,
            colorspace,
            pixels: buffer.pixels.clone(),
        });
        Ok(())
    }
}
