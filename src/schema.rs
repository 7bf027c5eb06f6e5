use std::collections::HashMap;

use anyhow::{Result, anyhow};
use serde::Deserialize;

use crate::dsl::{Node, NodeKind, ShaderGraph, SocketValue};

const DEFAULT_SOCKET_SCHEME_JSON: &str = include_str!("../assets/socket-scheme.json");

/// Versioned lookup table for socket names that drift across host-API
/// versions. Built once and consulted everywhere; no scattered string
/// literals for candidate names.
#[derive(Debug, Clone)]
pub struct SocketScheme {
    pub version: u32,
    shader_outputs: HashMap<NodeKind, Vec<String>>,
    channels: HashMap<String, ChannelSockets>,
}

/// Per-channel socket candidates plus the declared default the skip
/// heuristic compares against.
#[derive(Debug, Clone)]
pub struct ChannelSockets {
    pub inputs: Vec<String>,
    pub default: SocketValue,
    pub epsilon: f32,
}

#[derive(Debug, Deserialize)]
struct RawScheme {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "shaderOutputs")]
    shader_outputs: HashMap<NodeKind, Vec<String>>,
    channels: Vec<RawChannel>,
}

#[derive(Debug, Deserialize)]
struct RawChannel {
    channel: String,
    inputs: Vec<String>,
    default: SocketValue,
    epsilon: f32,
}

pub fn load_default_scheme() -> Result<SocketScheme> {
    let raw: RawScheme = serde_json::from_str(DEFAULT_SOCKET_SCHEME_JSON)
        .map_err(|e| anyhow!("failed to parse assets/socket-scheme.json: {e}"))?;

    let channels = raw
        .channels
        .into_iter()
        .map(|c| {
            (
                c.channel,
                ChannelSockets {
                    inputs: c.inputs,
                    default: c.default,
                    epsilon: c.epsilon,
                },
            )
        })
        .collect();

    Ok(SocketScheme {
        version: raw.schema_version,
        shader_outputs: raw.shader_outputs,
        channels,
    })
}

impl SocketScheme {
    /// Output sockets to try, in priority order, when wiring a node of this
    /// kind into a probe. Unknown kinds get an empty list; the probe then
    /// falls through to the node's first declared output.
    pub fn output_candidates(&self, kind: NodeKind) -> &[String] {
        self.shader_outputs
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn channel(&self, key: &str) -> Option<&ChannelSockets> {
        self.channels.get(key)
    }

    /// Resolves the input socket actually present for `channel_key` on
    /// `node`: the first candidate that is either linked in `graph` or
    /// carries a constant on the node. `None` is a missed optimization, not
    /// an error.
    pub fn resolve_input<'a>(
        &'a self,
        graph: &ShaderGraph,
        node: &Node,
        channel_key: &str,
    ) -> Option<&'a str> {
        let sockets = self.channels.get(channel_key)?;
        sockets
            .inputs
            .iter()
            .find(|name| {
                graph.incoming_link(&node.id, name).is_some() || node.inputs.contains_key(*name)
            })
            .map(String::as_str)
    }

    /// Like `resolve_input`, but falls back to the first candidate when no
    /// socket is observable. Reconstruction uses this: a freshly created
    /// principled node has no constants recorded yet.
    pub fn preferred_input<'a>(&'a self, channel_key: &str) -> Option<&'a str> {
        self.channels
            .get(channel_key)
            .and_then(|c| c.inputs.first())
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{Endpoint, Node};

    #[test]
    fn default_scheme_parses() {
        let scheme = load_default_scheme().unwrap();
        assert_eq!(scheme.version, 1);
        assert_eq!(
            scheme.output_candidates(NodeKind::Group),
            ["Shader", "BSDF", "Surface", "Color", "Output"]
        );
        assert!(scheme.channel("Roughness").is_some());
    }

    #[test]
    fn resolve_input_prefers_earlier_candidates() {
        let scheme = load_default_scheme().unwrap();
        let mut graph = ShaderGraph::new();
        graph
            .add_node(
                Node::new("p", NodeKind::Principled)
                    .with_outputs(&["BSDF"])
                    .with_input("Subsurface Weight", SocketValue::Scalar(0.2)),
            )
            .unwrap();

        let node = graph.find_node("p").unwrap().clone();
        assert_eq!(
            scheme.resolve_input(&graph, &node, "Subsurface"),
            Some("Subsurface Weight")
        );

        // A link on the first candidate wins over a constant on a later one.
        graph
            .add_node(Node::new("tex", NodeKind::ImageTexture).with_outputs(&["Color", "Alpha"]))
            .unwrap();
        graph
            .connect(Endpoint::new("tex", "Color"), Endpoint::new("p", "Subsurface"))
            .unwrap();
        let node = graph.find_node("p").unwrap().clone();
        assert_eq!(
            scheme.resolve_input(&graph, &node, "Subsurface"),
            Some("Subsurface")
        );
    }

    #[test]
    fn unknown_kind_has_no_candidates() {
        let scheme = load_default_scheme().unwrap();
        assert!(scheme.output_candidates(NodeKind::Unknown).is_empty());
    }
}
