//! Graph reconstruction: replace a baked material's network with a canonical
//! principled surface wired to the produced textures.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::dsl::{
    DISPLACEMENT_INPUT, Endpoint, Node, NodeKind, SURFACE_INPUT, ShaderGraph, SocketValue,
};
use crate::schema::SocketScheme;

use super::channels::{CANONICAL_ORDER, Channel};

/// Blend factor for multiplying ambient occlusion into base color.
const AO_MIX_FACTOR: f32 = 0.5;

/// Clears the graph and rebuilds a principled network referencing the baked
/// primary-resolution textures. On error the caller falls back to
/// [`rebuild_minimal`]; the persisted textures are unaffected either way.
pub fn rebuild_from_textures(
    graph: &mut ShaderGraph,
    scheme: &SocketScheme,
    baked: &HashMap<Channel, PathBuf>,
) -> Result<()> {
    graph.clear();

    let mut tex_ids: HashMap<Channel, String> = HashMap::new();
    for channel in CANONICAL_ORDER {
        let Some(path) = baked.get(&channel) else {
            continue;
        };
        if channel == Channel::CustomShader {
            // The custom-shader capture is an export artifact, not a
            // principled input; it does not participate in the rebuild.
            continue;
        }
        let id = format!("baked.{}", channel.suffix().to_ascii_lowercase());
        graph.add_node(
            Node::new(id.clone(), NodeKind::ImageTexture)
                .with_outputs(&["Color", "Alpha"])
                .with_label(channel.suffix())
                .with_image(path.display().to_string()),
        )?;
        tex_ids.insert(channel, id);
    }

    let principled_id = "rebuilt.principled".to_string();
    graph.add_node(Node::new(principled_id.clone(), NodeKind::Principled).with_outputs(&["BSDF"]))?;

    let sink_id = "rebuilt.output".to_string();
    graph.add_node(Node::new(sink_id.clone(), NodeKind::OutputMaterial))?;

    // Base color, optionally multiplied by AO.
    if let Some(base_id) = tex_ids.get(&Channel::BaseColor) {
        let base_source: Endpoint = if let Some(ao_id) = tex_ids.get(&Channel::AmbientOcclusion) {
            let mix_id = "rebuilt.ao_mix".to_string();
            graph.add_node(
                Node::new(mix_id.clone(), NodeKind::MixColor)
                    .with_outputs(&["Result"])
                    .with_label("AO Mix")
                    .with_input("Factor", SocketValue::Scalar(AO_MIX_FACTOR)),
            )?;
            graph.connect(
                Endpoint::new(base_id.clone(), "Color"),
                Endpoint::new(mix_id.clone(), "A"),
            )?;
            graph.connect(
                Endpoint::new(ao_id.clone(), "Color"),
                Endpoint::new(mix_id.clone(), "B"),
            )?;
            Endpoint::new(mix_id, "Result")
        } else {
            Endpoint::new(base_id.clone(), "Color")
        };
        safe_connect(graph, scheme, base_source, &principled_id, "BaseColor");
    }

    // Normal goes through a tangent-space normal-map decoder.
    if let Some(normal_id) = tex_ids.get(&Channel::Normal) {
        let map_id = "rebuilt.normal_map".to_string();
        graph.add_node(
            Node::new(map_id.clone(), NodeKind::NormalMap)
                .with_outputs(&["Normal"])
                .with_label("Normal Map"),
        )?;
        graph.connect(
            Endpoint::new(normal_id.clone(), "Color"),
            Endpoint::new(map_id.clone(), "Color"),
        )?;
        safe_connect(
            graph,
            scheme,
            Endpoint::new(map_id, "Normal"),
            &principled_id,
            "Normal",
        );
    }

    for channel in [
        Channel::Roughness,
        Channel::Metallic,
        Channel::Subsurface,
        Channel::Transmission,
        Channel::Emission,
        Channel::Alpha,
        Channel::Specular,
        Channel::Clearcoat,
        Channel::ClearcoatRoughness,
        Channel::Sheen,
    ] {
        if let Some(tex_id) = tex_ids.get(&channel) {
            let key = channel.scheme_key().unwrap_or(channel.suffix());
            safe_connect(
                graph,
                scheme,
                Endpoint::new(tex_id.clone(), "Color"),
                &principled_id,
                key,
            );
        }
    }

    // The surface connection is the one the graph cannot live without.
    graph
        .connect(
            Endpoint::new(principled_id, "BSDF"),
            Endpoint::new(sink_id.clone(), SURFACE_INPUT),
        )
        .context("failed to connect rebuilt surface to sink")?;

    if let Some(disp_tex_id) = tex_ids.get(&Channel::Displacement) {
        let disp_id = "rebuilt.displacement".to_string();
        graph.add_node(
            Node::new(disp_id.clone(), NodeKind::Displacement)
                .with_outputs(&["Displacement"])
                .with_label("Displacement"),
        )?;
        graph.connect(
            Endpoint::new(disp_tex_id.clone(), "Color"),
            Endpoint::new(disp_id.clone(), "Height"),
        )?;
        graph.connect(
            Endpoint::new(disp_id, "Displacement"),
            Endpoint::new(sink_id, DISPLACEMENT_INPUT),
        )?;
    }

    Ok(())
}

/// Minimal valid graph: a default principled surface wired to a fresh sink.
/// Used when reconstruction fails so the material is never left sink-less.
pub fn rebuild_minimal(graph: &mut ShaderGraph) -> Result<()> {
    graph.clear();
    graph.add_node(Node::new("fallback.principled", NodeKind::Principled).with_outputs(&["BSDF"]))?;
    graph.add_node(Node::new("fallback.output", NodeKind::OutputMaterial))?;
    graph.connect(
        Endpoint::new("fallback.principled", "BSDF"),
        Endpoint::new("fallback.output", SURFACE_INPUT),
    )?;
    Ok(())
}

/// Connects a texture output to the principled input that resolves for
/// `channel_key`, falling back through the scheme's candidate names. A
/// missing socket is a logged miss, not an error.
fn safe_connect(
    graph: &mut ShaderGraph,
    scheme: &SocketScheme,
    from: Endpoint,
    principled_id: &str,
    channel_key: &str,
) {
    let Some(socket) = scheme.preferred_input(channel_key) else {
        eprintln!("[rebuild] no socket candidates for channel {channel_key}, not connected");
        return;
    };
    let socket = socket.to_string();
    if let Err(e) = graph.connect(from, Endpoint::new(principled_id, socket)) {
        eprintln!("[rebuild] connection for {channel_key} failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::load_default_scheme;

    fn baked(channels: &[Channel]) -> HashMap<Channel, PathBuf> {
        channels
            .iter()
            .map(|c| (*c, PathBuf::from(format!("{}.png", c.suffix()))))
            .collect()
    }

    #[test]
    fn ao_multiplies_into_base_color() {
        let scheme = load_default_scheme().unwrap();
        let mut graph = ShaderGraph::new();
        rebuild_from_textures(
            &mut graph,
            &scheme,
            &baked(&[Channel::BaseColor, Channel::AmbientOcclusion]),
        )
        .unwrap();

        // base color and AO feed the mix; the mix feeds the surface input.
        let mix = graph.node("rebuilt.ao_mix").expect("mix node");
        assert_eq!(mix.kind, NodeKind::MixColor);
        assert_eq!(mix.constant("Factor"), Some(SocketValue::Scalar(AO_MIX_FACTOR)));
        assert_eq!(
            graph.incoming_link("rebuilt.ao_mix", "A").unwrap().from.node_id,
            "baked.basecolor"
        );
        assert_eq!(
            graph
                .incoming_link("rebuilt.principled", "Base Color")
                .unwrap()
                .from
                .node_id,
            "rebuilt.ao_mix"
        );
        assert!(graph.incoming_link("rebuilt.output", SURFACE_INPUT).is_some());
    }

    #[test]
    fn normal_and_displacement_chains_are_wired() {
        let scheme = load_default_scheme().unwrap();
        let mut graph = ShaderGraph::new();
        rebuild_from_textures(
            &mut graph,
            &scheme,
            &baked(&[Channel::Normal, Channel::Displacement]),
        )
        .unwrap();

        assert_eq!(
            graph
                .incoming_link("rebuilt.normal_map", "Color")
                .unwrap()
                .from
                .node_id,
            "baked.normal"
        );
        assert_eq!(
            graph
                .incoming_link("rebuilt.principled", "Normal")
                .unwrap()
                .from
                .node_id,
            "rebuilt.normal_map"
        );
        assert_eq!(
            graph
                .incoming_link("rebuilt.output", DISPLACEMENT_INPUT)
                .unwrap()
                .from
                .node_id,
            "rebuilt.displacement"
        );
    }

    #[test]
    fn custom_shader_capture_is_not_rewired() {
        let scheme = load_default_scheme().unwrap();
        let mut graph = ShaderGraph::new();
        rebuild_from_textures(
            &mut graph,
            &scheme,
            &baked(&[Channel::BaseColor, Channel::CustomShader]),
        )
        .unwrap();
        assert!(graph.node("baked.customshader").is_none());
    }

    #[test]
    fn minimal_graph_is_sink_connected() {
        let mut graph = ShaderGraph::new();
        rebuild_minimal(&mut graph).unwrap();
        let link = graph
            .incoming_link("fallback.output", SURFACE_INPUT)
            .unwrap();
        assert_eq!(link.from.node_id, "fallback.principled");
    }
}
