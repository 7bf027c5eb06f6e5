use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

/// Name of the sink node's primary input. Whatever is linked into this socket
/// is what the evaluation engine renders.
pub const SURFACE_INPUT: &str = "Surface";

/// Secondary sink input driven by a displacement chain after reconstruction.
pub const DISPLACEMENT_INPUT: &str = "Displacement";

/// Closed set of node kinds the engine understands. Host graphs may contain
/// node types outside this set; they map to `Unknown` and are treated as
/// opaque utility nodes (never probed, never classified as shaders).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum NodeKind {
    /// The material output sink. At most one per graph.
    OutputMaterial,
    Principled,
    Diffuse,
    Glossy,
    Transparent,
    Translucent,
    Glass,
    Refraction,
    Anisotropic,
    Velvet,
    Toon,
    SubsurfaceScattering,
    Emission,
    Hair,
    HairPrincipled,
    Sheen,
    MixShader,
    AddShader,
    /// Reference to a nested node group. Output sockets are instance-defined.
    Group,
    ImageTexture,
    Rgb,
    NormalMap,
    MixColor,
    Displacement,
    Unknown,
}

impl NodeKind {
    /// Shader nodes other than the principled surface. Groups count: a group
    /// wired into the surface slot acts as a shader from the outside.
    pub fn is_simple_shader(self) -> bool {
        matches!(
            self,
            NodeKind::Diffuse
                | NodeKind::Glossy
                | NodeKind::Transparent
                | NodeKind::Translucent
                | NodeKind::Glass
                | NodeKind::Refraction
                | NodeKind::Anisotropic
                | NodeKind::Velvet
                | NodeKind::Toon
                | NodeKind::SubsurfaceScattering
                | NodeKind::Emission
                | NodeKind::Hair
                | NodeKind::HairPrincipled
                | NodeKind::Sheen
                | NodeKind::Group
        )
    }

    pub fn is_combiner(self) -> bool {
        matches!(self, NodeKind::MixShader | NodeKind::AddShader)
    }
}

/// Constant value carried by an unlinked input socket (or an `Rgb` output).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SocketValue {
    Scalar(f32),
    Vector([f32; 3]),
    Color([f32; 4]),
}

impl SocketValue {
    /// Per-component comparison against `other` within `epsilon`. Values of
    /// different shapes never compare equal.
    pub fn approx_eq(&self, other: &SocketValue, epsilon: f32) -> bool {
        match (self, other) {
            (SocketValue::Scalar(a), SocketValue::Scalar(b)) => (a - b).abs() <= epsilon,
            (SocketValue::Vector(a), SocketValue::Vector(b)) => {
                a.iter().zip(b).all(|(x, y)| (x - y).abs() <= epsilon)
            }
            (SocketValue::Color(a), SocketValue::Color(b)) => {
                // Alpha is ignored: hosts disagree on whether it is part of
                // the color default.
                a[..3]
                    .iter()
                    .zip(&b[..3])
                    .all(|(x, y)| (x - y).abs() <= epsilon)
            }
            _ => false,
        }
    }

    /// Widen to an RGBA color the way the host widens values pushed into a
    /// color socket: scalars splat across RGB, vectors gain alpha 1.
    pub fn as_color(&self) -> [f32; 4] {
        match *self {
            SocketValue::Scalar(v) => [v, v, v, 1.0],
            SocketValue::Vector([x, y, z]) => [x, y, z, 1.0],
            SocketValue::Color(c) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Endpoint {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub socket: String,
}

impl Endpoint {
    pub fn new(node_id: impl Into<String>, socket: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            socket: socket.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Link {
    pub id: String,
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub label: Option<String>,
    /// Unlinked-input constants, keyed by socket name. A socket may be both
    /// here and the destination of a link; the link wins.
    #[serde(default)]
    pub inputs: BTreeMap<String, SocketValue>,
    /// Output socket names in declaration order. Groups carry their own list;
    /// for known kinds this is filled from the socket scheme.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Image reference for `ImageTexture` nodes (a path or host image name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            label: None,
            inputs: BTreeMap::new(),
            outputs: Vec::new(),
            image: None,
        }
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_input(mut self, socket: impl Into<String>, value: SocketValue) -> Self {
        self.inputs.insert(socket.into(), value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn constant(&self, socket: &str) -> Option<SocketValue> {
        self.inputs.get(socket).copied()
    }

    pub fn has_output(&self, socket: &str) -> bool {
        self.outputs.iter().any(|s| s == socket)
    }
}

/// A material's shading description: nodes plus directed links. Mutated only
/// inside a probe transaction or by reconstruction; classification reads it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShaderGraph {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    next_link_id: u64,
}

impl ShaderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_node(&self, node_id: &str) -> Result<&Node> {
        self.nodes
            .iter()
            .find(|n| n.id == node_id)
            .ok_or_else(|| anyhow!("node not found: {node_id}"))
    }

    pub fn find_node_mut(&mut self, node_id: &str) -> Result<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| anyhow!("node not found: {node_id}"))
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    /// First node of the given kind, in insertion order.
    pub fn first_of_kind(&self, kind: NodeKind) -> Option<&Node> {
        self.nodes.iter().find(|n| n.kind == kind)
    }

    pub fn any_of_kind(&self, kind: NodeKind) -> bool {
        self.nodes.iter().any(|n| n.kind == kind)
    }

    /// The material output sink, if present. Classification and probing are
    /// undefined without one.
    pub fn sink(&self) -> Option<&Node> {
        self.first_of_kind(NodeKind::OutputMaterial)
    }

    pub fn incoming_link(&self, to_node_id: &str, to_socket: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.to.node_id == to_node_id && l.to.socket == to_socket)
    }

    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            bail!("duplicate node id: {}", node.id);
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Removes a node and every link touching it.
    pub fn remove_node(&mut self, node_id: &str) {
        self.nodes.retain(|n| n.id != node_id);
        self.links
            .retain(|l| l.from.node_id != node_id && l.to.node_id != node_id);
    }

    /// Connects `from` to `to`, replacing any existing link into the
    /// destination socket (a socket accepts at most one incoming link).
    /// Both endpoints must name existing nodes; the source socket must exist
    /// on the source node when the node declares its outputs.
    pub fn connect(&mut self, from: Endpoint, to: Endpoint) -> Result<String> {
        let from_node = self.find_node(&from.node_id)?;
        if !from_node.outputs.is_empty() && !from_node.has_output(&from.socket) {
            bail!(
                "no output socket '{}' on node '{}'",
                from.socket,
                from.node_id
            );
        }
        self.find_node(&to.node_id)?;

        self.links
            .retain(|l| !(l.to.node_id == to.node_id && l.to.socket == to.socket));

        self.next_link_id += 1;
        let id = format!("edge.{}", self.next_link_id);
        self.links.push(Link {
            id: id.clone(),
            from,
            to,
        });
        Ok(id)
    }

    /// Removes the link into `to_socket`, returning it if one existed.
    pub fn disconnect(&mut self, to_node_id: &str, to_socket: &str) -> Option<Link> {
        let idx = self
            .links
            .iter()
            .position(|l| l.to.node_id == to_node_id && l.to.socket == to_socket)?;
        Some(self.links.remove(idx))
    }

    /// Drops every node and link. Used by reconstruction before rebuilding
    /// the canonical network.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.links.clear();
    }

    /// Order-independent snapshot of the link set, for restore verification
    /// and the round-trip property. Link ids are excluded: a restored link is
    /// the same link even if it was re-created under a fresh id.
    pub fn link_set_snapshot(&self) -> Vec<(Endpoint, Endpoint)> {
        let mut set: Vec<(Endpoint, Endpoint)> = self
            .links
            .iter()
            .map(|l| (l.from.clone(), l.to.clone()))
            .collect();
        set.sort_by(|a, b| {
            (&a.0.node_id, &a.0.socket, &a.1.node_id, &a.1.socket)
                .cmp(&(&b.0.node_id, &b.0.socket, &b.1.node_id, &b.1.socket))
        });
        set
    }
}

/// On-disk graph document. Kept separate from `ShaderGraph` so the wire shape
/// can evolve without touching the in-memory model.
#[derive(Debug, Deserialize, Serialize)]
pub struct GraphDocument {
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

pub fn load_graph_from_path(path: impl AsRef<std::path::Path>) -> Result<ShaderGraph> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph json at {}", path.display()))?;
    let doc: GraphDocument = serde_json::from_str(&text).context("failed to parse graph json")?;
    graph_from_document(doc)
}

/// Builds the in-memory graph, re-validating every node and link the
/// document carries.
pub fn graph_from_document(doc: GraphDocument) -> Result<ShaderGraph> {
    let mut graph = ShaderGraph {
        name: doc.name,
        ..ShaderGraph::new()
    };
    for node in doc.nodes {
        graph.add_node(node)?;
    }
    for link in doc.links {
        graph.connect(link.from, link.to)?;
    }
    Ok(graph)
}
