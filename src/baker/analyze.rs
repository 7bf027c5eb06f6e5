//! Graph classification: how are this material's channels driven, and which
//! of them carry observable, non-default data?

use std::collections::HashMap;

use crate::dsl::{NodeKind, SURFACE_INPUT, ShaderGraph, SocketValue};
use crate::graph::{upstream_any, upstream_reachable};
use crate::schema::SocketScheme;

use super::channels::{CANONICAL_ORDER, Channel};

/// Derived, never stored. Recomputing on the same graph always yields the
/// same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum MaterialClassification {
    /// No sink, no surface link, or nothing the engine understands.
    Unclassified,
    /// Principled surface with every input at its declared default.
    DefaultConstant,
    /// Principled surface driven by image samples.
    Textured,
    /// Principled surface driven by constants (or non-image procedurals).
    Procedural,
    /// Principled surface mixing image samples with non-default constants.
    MixedConstantAndTexture,
    /// Only simple shaders / groups; no principled surface anywhere.
    SimpleShaderOnly,
    /// Principled surface feeds the sink; simple shaders present elsewhere.
    PrincipledWithSimpleShader,
    /// A simple shader feeds the sink; a principled surface exists elsewhere.
    SimpleShaderWithPrincipled,
    /// A combiner feeds the sink with both shader families reachable.
    MixedShaderNetwork,
}

impl std::fmt::Display for MaterialClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MaterialClassification::Unclassified => "unclassified",
            MaterialClassification::DefaultConstant => "default-constant",
            MaterialClassification::Textured => "textured",
            MaterialClassification::Procedural => "procedural",
            MaterialClassification::MixedConstantAndTexture => "mixed-constant-and-texture",
            MaterialClassification::SimpleShaderOnly => "simple-shader-only",
            MaterialClassification::PrincipledWithSimpleShader => "principled-with-simple-shader",
            MaterialClassification::SimpleShaderWithPrincipled => "simple-shader-with-principled",
            MaterialClassification::MixedShaderNetwork => "mixed-shader-network",
        };
        f.write_str(s)
    }
}

/// What classification observed about one channel's principled input.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAvailability {
    /// The socket name that resolved for this channel, if any.
    pub socket: Option<String>,
    pub linked: bool,
    pub constant: Option<SocketValue>,
    /// Constant differs from the declared default by more than epsilon.
    pub non_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelAvailabilityMap {
    pub channels: HashMap<Channel, ChannelAvailability>,
    /// Any image-sample node feeds the principled surface.
    pub has_image_samples: bool,
}

/// Full analysis result. The id fields let the orchestrator build probe
/// specs without re-walking the graph.
#[derive(Debug, Clone)]
pub struct GraphAnalysis {
    pub classification: MaterialClassification,
    pub availability: ChannelAvailabilityMap,
    pub sink_id: Option<String>,
    pub principled_id: Option<String>,
    /// Simple shaders / groups in node order; the custom-only strategy
    /// probes the first.
    pub simple_shader_ids: Vec<String>,
}

/// Classifies `graph` and maps channel availability. Read-only; idempotent.
pub fn classify(graph: &ShaderGraph, scheme: &SocketScheme) -> GraphAnalysis {
    let sinks: Vec<&str> = graph
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::OutputMaterial)
        .map(|n| n.id.as_str())
        .collect();

    let principled_id = graph
        .first_of_kind(NodeKind::Principled)
        .map(|n| n.id.clone());
    let simple_shader_ids: Vec<String> = graph
        .nodes
        .iter()
        .filter(|n| n.kind.is_simple_shader())
        .map(|n| n.id.clone())
        .collect();

    // Invariant: at most one sink. More than one is ambiguous; degrade to
    // Unclassified rather than guessing which output counts.
    if sinks.len() != 1 {
        if sinks.len() > 1 {
            eprintln!(
                "[classify] graph has {} sink nodes, treating as unclassified",
                sinks.len()
            );
        }
        return GraphAnalysis {
            classification: MaterialClassification::Unclassified,
            availability: ChannelAvailabilityMap::default(),
            sink_id: sinks.first().map(|s| s.to_string()),
            principled_id,
            simple_shader_ids,
        };
    }
    let sink_id = sinks[0].to_string();

    let availability = availability_map(graph, scheme, principled_id.as_deref());

    let classification = classify_inner(
        graph,
        &sink_id,
        principled_id.as_deref(),
        &simple_shader_ids,
        &availability,
    );

    GraphAnalysis {
        classification,
        availability,
        sink_id: Some(sink_id),
        principled_id,
        simple_shader_ids,
    }
}

fn classify_inner(
    graph: &ShaderGraph,
    sink_id: &str,
    principled_id: Option<&str>,
    simple_shader_ids: &[String],
    availability: &ChannelAvailabilityMap,
) -> MaterialClassification {
    let Some(surface_link) = graph.incoming_link(sink_id, SURFACE_INPUT) else {
        return MaterialClassification::Unclassified;
    };
    let Some(upstream) = graph.node(&surface_link.from.node_id) else {
        return MaterialClassification::Unclassified;
    };

    let has_simple = !simple_shader_ids.is_empty();

    if upstream.kind.is_combiner() {
        // Which shader families feed the combiner? Walk upstream from each
        // of its direct inputs.
        let mut principled_side = false;
        let mut simple_side = false;
        for link in graph.links.iter().filter(|l| l.to.node_id == upstream.id) {
            principled_side |=
                upstream_any(graph, &link.from.node_id, |k| k == NodeKind::Principled);
            simple_side |= upstream_any(graph, &link.from.node_id, NodeKind::is_simple_shader);
        }
        return match (principled_side, simple_side) {
            (true, true) => MaterialClassification::MixedShaderNetwork,
            (true, false) => MaterialClassification::PrincipledWithSimpleShader,
            (false, true) => MaterialClassification::SimpleShaderWithPrincipled,
            (false, false) => MaterialClassification::Unclassified,
        };
    }

    if upstream.kind.is_simple_shader() {
        return if principled_id.is_some() {
            MaterialClassification::SimpleShaderWithPrincipled
        } else {
            MaterialClassification::SimpleShaderOnly
        };
    }

    if upstream.kind == NodeKind::Principled {
        if has_simple {
            return MaterialClassification::PrincipledWithSimpleShader;
        }

        let any_linked = availability.channels.values().any(|a| a.linked);
        let any_non_default = availability.channels.values().any(|a| a.non_default);

        return match (availability.has_image_samples, any_non_default) {
            (true, true) => MaterialClassification::MixedConstantAndTexture,
            (true, false) => MaterialClassification::Textured,
            (false, true) => MaterialClassification::Procedural,
            (false, false) => {
                if any_linked {
                    // Linked but not to image samples: procedurally driven.
                    MaterialClassification::Procedural
                } else {
                    MaterialClassification::DefaultConstant
                }
            }
        };
    }

    MaterialClassification::Unclassified
}

/// Human-readable wiring report for custom-shader troubleshooting: what
/// drives the sink, which output socket, what shader inventory exists, and
/// how a combiner is fed. Plain lines, ready for host-side message panels.
pub fn diagnose(graph: &ShaderGraph, scheme: &SocketScheme) -> Vec<String> {
    let analysis = classify(graph, scheme);
    let mut lines = Vec::new();
    lines.push(format!("type: {}", analysis.classification));

    match analysis.sink_id.as_deref() {
        Some(sink_id) => match graph.incoming_link(sink_id, SURFACE_INPUT) {
            Some(link) => {
                let producer = graph.node(&link.from.node_id);
                lines.push(format!(
                    "surface driven by {:?} '{}' via output '{}'",
                    producer.map(|n| n.kind).unwrap_or(NodeKind::Unknown),
                    link.from.node_id,
                    link.from.socket
                ));
                if let Some(n) = producer {
                    if n.kind == NodeKind::Group {
                        lines.push(format!("group outputs: {:?}", n.outputs));
                    }
                }
            }
            None => lines.push("surface input of the sink is not connected".to_string()),
        },
        None => lines.push("no sink node found".to_string()),
    }

    if analysis.simple_shader_ids.is_empty() {
        lines.push("no simple shaders detected".to_string());
    } else {
        lines.push(format!(
            "{} simple shader(s): {}",
            analysis.simple_shader_ids.len(),
            analysis.simple_shader_ids.join(", ")
        ));
    }

    if matches!(
        analysis.classification,
        MaterialClassification::MixedShaderNetwork
            | MaterialClassification::PrincipledWithSimpleShader
            | MaterialClassification::SimpleShaderWithPrincipled
    ) {
        lines.push(format!(
            "mixed network: principled={:?}, first simple shader={:?}",
            analysis.principled_id,
            analysis.simple_shader_ids.first()
        ));
    }

    lines
}

fn availability_map(
    graph: &ShaderGraph,
    scheme: &SocketScheme,
    principled_id: Option<&str>,
) -> ChannelAvailabilityMap {
    let Some(principled_id) = principled_id else {
        return ChannelAvailabilityMap::default();
    };
    let Some(principled) = graph.node(principled_id) else {
        return ChannelAvailabilityMap::default();
    };

    // Image samples count when they feed the principled surface, not when
    // they merely sit in the graph.
    let feeding = upstream_reachable(graph, principled_id);
    let has_image_samples = feeding
        .iter()
        .filter(|id| id.as_str() != principled_id)
        .any(|id| graph.node(id).is_some_and(|n| n.kind == NodeKind::ImageTexture));

    let mut channels = HashMap::new();
    for channel in CANONICAL_ORDER {
        let Some(key) = channel.scheme_key() else {
            continue;
        };
        // Missing sockets across host-API versions are a missed
        // optimization, not an error: record them as unavailable.
        let socket = scheme.resolve_input(graph, principled, key);
        let (linked, constant) = match socket {
            Some(name) => (
                graph.incoming_link(principled_id, name).is_some(),
                principled.constant(name),
            ),
            None => (false, None),
        };
        // A constant behind a linked socket is stale data; only unlinked
        // values count as artist-authored solids.
        let non_default = match (linked, &constant, scheme.channel(key)) {
            (false, Some(value), Some(ch)) => !value.approx_eq(&ch.default, ch.epsilon),
            _ => false,
        };
        channels.insert(
            channel,
            ChannelAvailability {
                socket: socket.map(str::to_string),
                linked,
                constant,
                non_default,
            },
        );
    }

    ChannelAvailabilityMap {
        channels,
        has_image_samples,
    }
}
