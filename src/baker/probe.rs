//! Transactional graph rewiring. A probe splices a synthetic emission-like
//! surface in front of the sink so the engine's emit pass reads exactly one
//! quantity, then puts every link back the way it was: on the success path,
//! on the evaluation-failure path, and on drop.

use anyhow::{Result, bail};

use crate::dsl::{Endpoint, Node, NodeKind, SURFACE_INPUT, ShaderGraph, SocketValue};
use crate::schema::SocketScheme;

/// Probe color used when no output socket on the producer can be wired at
/// all. Matches the engine's neutral grey so a fallback bake is visibly
/// flat rather than black.
const FALLBACK_PROBE_COLOR: [f32; 4] = [0.8, 0.8, 0.8, 1.0];

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeSpec {
    /// Splice between the sink and whatever currently drives it.
    FullSurface,
    /// Expose one principled input (its link, or its constant via a
    /// synthesized color node), bypassing the current surface.
    SingleInput { channel_key: String },
    /// Wire exactly one named node to the sink, ignoring the rest of the
    /// graph. Used by the principled-only / custom-only mixed strategies.
    RestrictedSubgraph { node_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    Wired,
    Evaluated,
    Restored,
    RestoredAfterFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Clean,
    /// The sink's primary input could not be returned to its original state.
    /// Non-fatal for the sweep, but the material must be flagged.
    Inconsistent,
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub outcome: RestoreOutcome,
    pub errors: Vec<String>,
}

/// Undo log for one transaction. Everything needed to unwind the rewiring:
/// original links removed, synthetic nodes created (in creation order).
#[derive(Debug, Default)]
struct ProbeRecord {
    removed_links: Vec<(Endpoint, Endpoint)>,
    synthetic_nodes: Vec<String>,
    /// What drove the sink before wiring, for post-restore verification.
    original_surface_source: Option<Endpoint>,
}

/// Everything `open` decides up front. Planning is pure; applying the plan
/// cannot fail, so a half-wired graph is never observable.
struct WirePlan {
    remove: Vec<(String, String)>,
    nodes: Vec<Node>,
    links: Vec<(Endpoint, Endpoint)>,
}

#[derive(Debug)]
pub struct ProbeTransaction<'g> {
    graph: &'g mut ShaderGraph,
    sink_id: String,
    record: ProbeRecord,
    state: ProbeState,
    evaluation_failed: bool,
}

impl<'g> ProbeTransaction<'g> {
    /// Wires the graph for `spec`. On error the graph is untouched.
    pub fn open(
        graph: &'g mut ShaderGraph,
        spec: &ProbeSpec,
        scheme: &SocketScheme,
    ) -> Result<Self> {
        let sink_id = graph
            .sink()
            .map(|n| n.id.clone())
            .ok_or_else(|| anyhow::anyhow!("graph has no sink node"))?;

        let plan = match spec {
            ProbeSpec::FullSurface => plan_full_surface(graph, &sink_id, scheme)?,
            ProbeSpec::SingleInput { channel_key } => {
                plan_single_input(graph, &sink_id, channel_key, scheme)?
            }
            ProbeSpec::RestrictedSubgraph { node_id } => {
                plan_restricted(graph, &sink_id, node_id, scheme)?
            }
        };

        let mut record = ProbeRecord {
            original_surface_source: graph
                .incoming_link(&sink_id, SURFACE_INPUT)
                .map(|l| l.from.clone()),
            ..ProbeRecord::default()
        };

        for (node_id, socket) in &plan.remove {
            if let Some(link) = graph.disconnect(node_id, socket) {
                record.removed_links.push((link.from, link.to));
            }
        }
        for node in plan.nodes {
            record.synthetic_nodes.push(node.id.clone());
            // Ids are generated collision-free by the planner.
            graph.add_node(node).expect("synthetic node id collision");
        }
        for (from, to) in plan.links {
            // Planner validated both endpoints; connect cannot fail here.
            graph
                .connect(from, to)
                .expect("planned probe link failed to connect");
        }

        Ok(Self {
            graph,
            sink_id,
            record,
            state: ProbeState::Wired,
            evaluation_failed: false,
        })
    }

    /// Runs the (blocking) evaluation against the wired graph. A failure is
    /// recorded so `close` can report the right terminal state, but restore
    /// still happens either way.
    pub fn evaluate<T>(&mut self, f: impl FnOnce(&ShaderGraph) -> Result<T>) -> Result<T> {
        match f(self.graph) {
            Ok(v) => {
                self.state = ProbeState::Evaluated;
                Ok(v)
            }
            Err(e) => {
                self.evaluation_failed = true;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ProbeState {
        self.state
    }

    /// Unwinds the rewiring and verifies the sink ended up where it started.
    pub fn close(mut self) -> RestoreReport {
        let report = self.restore();
        self.state = if self.evaluation_failed {
            ProbeState::RestoredAfterFailure
        } else {
            ProbeState::Restored
        };
        report
    }

    fn restore(&mut self) -> RestoreReport {
        let mut errors = Vec::new();

        // Synthetic nodes go first, in reverse creation order; removing a
        // node drops its links with it.
        for node_id in self.record.synthetic_nodes.iter().rev() {
            self.graph.remove_node(node_id);
        }

        for (from, to) in std::mem::take(&mut self.record.removed_links) {
            if let Err(e) = self.graph.connect(from.clone(), to.clone()) {
                errors.push(format!(
                    "failed to reconnect {}.{} -> {}.{}: {e}",
                    from.node_id, from.socket, to.node_id, to.socket
                ));
            }
        }

        let current = self
            .graph
            .incoming_link(&self.sink_id, SURFACE_INPUT)
            .map(|l| l.from.clone());
        let outcome = if current == self.record.original_surface_source && errors.is_empty() {
            RestoreOutcome::Clean
        } else {
            RestoreOutcome::Inconsistent
        };

        RestoreReport { outcome, errors }
    }
}

impl Drop for ProbeTransaction<'_> {
    fn drop(&mut self) {
        if matches!(self.state, ProbeState::Wired | ProbeState::Evaluated) {
            let report = self.restore();
            self.state = ProbeState::RestoredAfterFailure;
            for e in &report.errors {
                eprintln!("[probe] restore on drop: {e}");
            }
        }
    }
}

/// First output socket on `node` that a probe can take color from: scheme
/// candidates for its kind, then `preferred` (the socket the original link
/// used), then the first declared output.
fn color_source_for(node: &Node, preferred: Option<&str>, scheme: &SocketScheme) -> Option<Endpoint> {
    for candidate in scheme.output_candidates(node.kind) {
        if node.has_output(candidate) {
            return Some(Endpoint::new(node.id.clone(), candidate.clone()));
        }
    }
    if let Some(p) = preferred {
        if node.outputs.is_empty() || node.has_output(p) {
            return Some(Endpoint::new(node.id.clone(), p));
        }
    }
    node.outputs
        .first()
        .map(|s| Endpoint::new(node.id.clone(), s.clone()))
}

fn unique_id(graph: &ShaderGraph, base: &str) -> String {
    if graph.node(base).is_none() {
        return base.to_string();
    }
    let mut n = 1u32;
    loop {
        let candidate = format!("{base}.{n}");
        if graph.node(&candidate).is_none() {
            return candidate;
        }
        n += 1;
    }
}

fn emission_node(graph: &ShaderGraph, label: &str) -> Node {
    Node::new(unique_id(graph, "sys.probe.emit"), NodeKind::Emission)
        .with_outputs(&["Emission"])
        .with_label(label)
}

fn rgb_node(graph: &ShaderGraph, color: [f32; 4]) -> Node {
    Node::new(unique_id(graph, "sys.probe.rgb"), NodeKind::Rgb)
        .with_outputs(&["Color"])
        .with_input("Color", SocketValue::Color(color))
}

fn plan_full_surface(graph: &ShaderGraph, sink_id: &str, scheme: &SocketScheme) -> Result<WirePlan> {
    let Some(link) = graph.incoming_link(sink_id, SURFACE_INPUT) else {
        bail!("sink primary input is not linked; nothing to probe");
    };
    let producer = graph.find_node(&link.from.node_id)?;

    let emit = emission_node(graph, "probe: surface");
    let emit_id = emit.id.clone();

    let mut nodes = vec![emit];
    let mut links = Vec::new();

    match color_source_for(producer, Some(&link.from.socket), scheme) {
        Some(source) => links.push((source, Endpoint::new(emit_id.clone(), "Color"))),
        None => {
            // Producer exposes nothing connectable; last resort is a flat
            // color so the pass still yields a well-defined buffer.
            let rgb = rgb_node(graph, FALLBACK_PROBE_COLOR);
            links.push((
                Endpoint::new(rgb.id.clone(), "Color"),
                Endpoint::new(emit_id.clone(), "Color"),
            ));
            nodes.insert(0, rgb);
        }
    }
    links.push((
        Endpoint::new(emit_id, "Emission"),
        Endpoint::new(sink_id, SURFACE_INPUT),
    ));

    Ok(WirePlan {
        remove: vec![(sink_id.to_string(), SURFACE_INPUT.to_string())],
        nodes,
        links,
    })
}

fn plan_single_input(
    graph: &ShaderGraph,
    sink_id: &str,
    channel_key: &str,
    scheme: &SocketScheme,
) -> Result<WirePlan> {
    let principled = graph
        .first_of_kind(NodeKind::Principled)
        .ok_or_else(|| anyhow::anyhow!("graph has no principled surface node"))?;

    let socket = scheme
        .resolve_input(graph, principled, channel_key)
        .or_else(|| scheme.preferred_input(channel_key))
        .ok_or_else(|| anyhow::anyhow!("no input socket known for channel {channel_key}"))?
        .to_string();

    let emit = emission_node(graph, &format!("probe: {channel_key}"));
    let emit_id = emit.id.clone();

    let mut nodes = vec![emit];
    let mut links = Vec::new();

    match graph.incoming_link(&principled.id, &socket) {
        Some(existing) => {
            // The input's producer feeds the probe directly; its link into
            // the principled node stays in place.
            links.push((
                existing.from.clone(),
                Endpoint::new(emit_id.clone(), "Color"),
            ));
        }
        None => {
            let value = principled
                .constant(&socket)
                .or_else(|| scheme.channel(channel_key).map(|c| c.default))
                .unwrap_or(SocketValue::Scalar(0.0));
            let rgb = rgb_node(graph, value.as_color());
            links.push((
                Endpoint::new(rgb.id.clone(), "Color"),
                Endpoint::new(emit_id.clone(), "Color"),
            ));
            nodes.insert(0, rgb);
        }
    }
    links.push((
        Endpoint::new(emit_id, "Emission"),
        Endpoint::new(sink_id, SURFACE_INPUT),
    ));

    Ok(WirePlan {
        remove: vec![(sink_id.to_string(), SURFACE_INPUT.to_string())],
        nodes,
        links,
    })
}

fn plan_restricted(
    graph: &ShaderGraph,
    sink_id: &str,
    node_id: &str,
    scheme: &SocketScheme,
) -> Result<WirePlan> {
    let target = graph.find_node(node_id)?;
    let Some(source) = color_source_for(target, None, scheme) else {
        bail!("node '{node_id}' has no connectable output for a restricted probe");
    };

    let emit = emission_node(graph, &format!("probe: only {node_id}"));
    let emit_id = emit.id.clone();

    Ok(WirePlan {
        remove: vec![(sink_id.to_string(), SURFACE_INPUT.to_string())],
        nodes: vec![emit],
        links: vec![
            (source, Endpoint::new(emit_id.clone(), "Color")),
            (
                Endpoint::new(emit_id, "Emission"),
                Endpoint::new(sink_id, SURFACE_INPUT),
            ),
        ],
    })
}
