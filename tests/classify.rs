//! Classification coverage: every category, idempotence, and the channel
//! availability map the planner consumes.

mod common;

use node_forge_bake_engine::baker::{Channel, MaterialClassification, classify, diagnose};
use node_forge_bake_engine::dsl::{Endpoint, NodeKind, SURFACE_INPUT, ShaderGraph, SocketValue};
use node_forge_bake_engine::schema::load_default_scheme;

#[test]
fn default_constants_classify_as_default() {
    let scheme = load_default_scheme().unwrap();
    let analysis = classify(&common::default_graph(), &scheme);
    assert_eq!(
        analysis.classification,
        MaterialClassification::DefaultConstant
    );
    assert!(!analysis.availability.has_image_samples);
}

#[test]
fn image_samples_classify_as_textured() {
    let scheme = load_default_scheme().unwrap();
    let analysis = classify(&common::textured_graph(), &scheme);
    assert_eq!(analysis.classification, MaterialClassification::Textured);
    assert!(analysis.availability.has_image_samples);

    let base = &analysis.availability.channels[&Channel::BaseColor];
    assert!(base.linked);
}

#[test]
fn non_default_constants_classify_as_procedural() {
    let scheme = load_default_scheme().unwrap();
    let analysis = classify(&common::procedural_graph(), &scheme);
    assert_eq!(analysis.classification, MaterialClassification::Procedural);

    let metallic = &analysis.availability.channels[&Channel::Metallic];
    assert!(!metallic.linked);
    assert!(metallic.non_default);
    assert_eq!(metallic.constant, Some(SocketValue::Scalar(1.0)));

    let roughness = &analysis.availability.channels[&Channel::Roughness];
    assert!(!roughness.non_default);
}

#[test]
fn textures_plus_constants_classify_as_mixed() {
    let scheme = load_default_scheme().unwrap();
    let mut graph = common::textured_graph();
    graph
        .find_node_mut("p")
        .unwrap()
        .inputs
        .insert("Roughness".to_string(), SocketValue::Scalar(0.9));
    let analysis = classify(&graph, &scheme);
    assert_eq!(
        analysis.classification,
        MaterialClassification::MixedConstantAndTexture
    );
}

#[test]
fn simple_shader_without_principled() {
    let scheme = load_default_scheme().unwrap();
    let analysis = classify(&common::simple_shader_graph(), &scheme);
    assert_eq!(
        analysis.classification,
        MaterialClassification::SimpleShaderOnly
    );
    assert_eq!(analysis.simple_shader_ids, vec!["glow".to_string()]);
}

#[test]
fn combiner_with_both_families_is_a_mixed_network() {
    let scheme = load_default_scheme().unwrap();
    let analysis = classify(&common::mixed_network_graph(), &scheme);
    assert_eq!(
        analysis.classification,
        MaterialClassification::MixedShaderNetwork
    );
    assert_eq!(analysis.principled_id.as_deref(), Some("p"));
}

#[test]
fn combiner_fed_from_one_side_only() {
    let scheme = load_default_scheme().unwrap();

    // Mix with only the principled side wired.
    let mut graph = ShaderGraph::new();
    graph.add_node(common::principled("p")).unwrap();
    graph
        .add_node(
            node_forge_bake_engine::dsl::Node::new("mix", NodeKind::MixShader)
                .with_outputs(&["Shader"]),
        )
        .unwrap();
    graph.add_node(common::sink("out")).unwrap();
    graph
        .connect(Endpoint::new("p", "BSDF"), Endpoint::new("mix", "Shader1"))
        .unwrap();
    graph
        .connect(Endpoint::new("mix", "Shader"), Endpoint::new("out", SURFACE_INPUT))
        .unwrap();
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::PrincipledWithSimpleShader
    );

    // Swap: only a simple shader feeds the combiner, principled floats free.
    let mut graph = ShaderGraph::new();
    graph.add_node(common::principled("p")).unwrap();
    graph.add_node(common::emission("glow")).unwrap();
    graph
        .add_node(
            node_forge_bake_engine::dsl::Node::new("mix", NodeKind::AddShader)
                .with_outputs(&["Shader"]),
        )
        .unwrap();
    graph.add_node(common::sink("out")).unwrap();
    graph
        .connect(Endpoint::new("glow", "Emission"), Endpoint::new("mix", "Shader1"))
        .unwrap();
    graph
        .connect(Endpoint::new("mix", "Shader"), Endpoint::new("out", SURFACE_INPUT))
        .unwrap();
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::SimpleShaderWithPrincipled
    );
}

#[test]
fn direct_shader_links_with_the_other_family_present() {
    let scheme = load_default_scheme().unwrap();

    // Principled drives the sink, an emission node floats elsewhere.
    let mut graph = common::default_graph();
    graph.add_node(common::emission("glow")).unwrap();
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::PrincipledWithSimpleShader
    );

    // Emission drives the sink, a principled node floats elsewhere.
    let mut graph = common::simple_shader_graph();
    graph.add_node(common::principled("p")).unwrap();
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::SimpleShaderWithPrincipled
    );
}

#[test]
fn degenerate_graphs_are_unclassified() {
    let scheme = load_default_scheme().unwrap();

    // No sink at all.
    let mut graph = ShaderGraph::new();
    graph.add_node(common::principled("p")).unwrap();
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::Unclassified
    );

    // Sink with no surface link.
    let mut graph = common::default_graph();
    graph.disconnect("out", SURFACE_INPUT);
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::Unclassified
    );

    // Two sinks: ambiguous, conservative fallback.
    let mut graph = common::default_graph();
    graph.add_node(common::sink("out2")).unwrap();
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::Unclassified
    );

    // Sink driven by an opaque utility node.
    let mut graph = ShaderGraph::new();
    graph
        .add_node(
            node_forge_bake_engine::dsl::Node::new("odd", NodeKind::Unknown)
                .with_outputs(&["Value"]),
        )
        .unwrap();
    graph.add_node(common::sink("out")).unwrap();
    graph
        .connect(Endpoint::new("odd", "Value"), Endpoint::new("out", SURFACE_INPUT))
        .unwrap();
    assert_eq!(
        classify(&graph, &scheme).classification,
        MaterialClassification::Unclassified
    );
}

#[test]
fn diagnosis_reports_surface_wiring() {
    let scheme = load_default_scheme().unwrap();

    let lines = diagnose(&common::mixed_network_graph(), &scheme);
    assert!(lines[0].contains("mixed-shader-network"));
    assert!(lines.iter().any(|l| l.contains("MixShader")));
    assert!(lines.iter().any(|l| l.contains("first simple shader")));

    let mut unlinked = common::default_graph();
    unlinked.disconnect("out", SURFACE_INPUT);
    let lines = diagnose(&unlinked, &scheme);
    assert!(lines.iter().any(|l| l.contains("not connected")));
}

#[test]
fn classification_is_idempotent_across_all_categories() {
    let scheme = load_default_scheme().unwrap();
    let graphs = vec![
        common::default_graph(),
        common::textured_graph(),
        common::procedural_graph(),
        common::simple_shader_graph(),
        common::mixed_network_graph(),
    ];

    for graph in graphs {
        let first = classify(&graph, &scheme);
        let second = classify(&graph, &scheme);
        assert_eq!(first.classification, second.classification);
        assert_eq!(first.availability, second.availability);
    }
}

#[test]
fn missing_sockets_degrade_to_unavailable() {
    let scheme = load_default_scheme().unwrap();
    // A principled node with no recorded constants: every channel resolves
    // to "nothing observable", never an error.
    let mut graph = ShaderGraph::new();
    graph
        .add_node(
            node_forge_bake_engine::dsl::Node::new("p", NodeKind::Principled)
                .with_outputs(&["BSDF"]),
        )
        .unwrap();
    graph.add_node(common::sink("out")).unwrap();
    graph
        .connect(Endpoint::new("p", "BSDF"), Endpoint::new("out", SURFACE_INPUT))
        .unwrap();

    let analysis = classify(&graph, &scheme);
    assert_eq!(
        analysis.classification,
        MaterialClassification::DefaultConstant
    );
    let metallic = &analysis.availability.channels[&Channel::Metallic];
    assert!(metallic.socket.is_none());
    assert!(!metallic.non_default);
}
