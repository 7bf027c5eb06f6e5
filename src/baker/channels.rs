//! Channel descriptors and the per-material channel plan: which channels get
//! an evaluation pass, which can be filled analytically, and which are not
//! worth the engine time at all.

use serde::{Deserialize, Serialize};

use crate::dsl::SocketValue;
use crate::engine::{BakeSemantic, Colorspace, ShadowMode};
use crate::schema::SocketScheme;

use super::analyze::{ChannelAvailabilityMap, MaterialClassification};

/// Logical quantities the engine can extract. Declaration order is the
/// canonical processing order; plans and reconstruction both follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Channel {
    BaseColor,
    Roughness,
    Metallic,
    Normal,
    Subsurface,
    Transmission,
    Emission,
    Alpha,
    Specular,
    Clearcoat,
    ClearcoatRoughness,
    Sheen,
    Displacement,
    AmbientOcclusion,
    CustomShader,
}

pub const CANONICAL_ORDER: [Channel; 15] = [
    Channel::BaseColor,
    Channel::Roughness,
    Channel::Metallic,
    Channel::Normal,
    Channel::Subsurface,
    Channel::Transmission,
    Channel::Emission,
    Channel::Alpha,
    Channel::Specular,
    Channel::Clearcoat,
    Channel::ClearcoatRoughness,
    Channel::Sheen,
    Channel::Displacement,
    Channel::AmbientOcclusion,
    Channel::CustomShader,
];

impl Channel {
    /// File-name and scheme key. Matches the suffix convention of existing
    /// texture sets.
    pub fn suffix(self) -> &'static str {
        match self {
            Channel::BaseColor => "BaseColor",
            Channel::Roughness => "Roughness",
            Channel::Metallic => "Metallic",
            Channel::Normal => "Normal",
            Channel::Subsurface => "Subsurface",
            Channel::Transmission => "Transmission",
            Channel::Emission => "Emission",
            Channel::Alpha => "Alpha",
            Channel::Specular => "Specular",
            Channel::Clearcoat => "Clearcoat",
            Channel::ClearcoatRoughness => "ClearcoatRoughness",
            Channel::Sheen => "Sheen",
            Channel::Displacement => "Displacement",
            Channel::AmbientOcclusion => "AO",
            Channel::CustomShader => "CustomShader",
        }
    }

    /// Scheme lookup key for channels that map to a principled input socket.
    /// `None` for channels extracted without touching the principled node.
    pub fn scheme_key(self) -> Option<&'static str> {
        match self {
            Channel::Normal
            | Channel::Displacement
            | Channel::AmbientOcclusion
            | Channel::CustomShader => None,
            other => Some(other.suffix()),
        }
    }

    /// Color-like channels persist as sRGB, data channels as non-color.
    pub fn colorspace(self) -> Colorspace {
        match self {
            Channel::BaseColor | Channel::Emission | Channel::CustomShader => Colorspace::Srgb,
            _ => Colorspace::NonColor,
        }
    }

    /// Channels the engine always evaluates directly, bypassing the probe
    /// machinery and the skip heuristic.
    pub fn is_pass_through(self) -> bool {
        matches!(
            self,
            Channel::Normal | Channel::AmbientOcclusion | Channel::Displacement
        )
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// The four channels a minimal PBR export needs.
pub fn basic_channels() -> Vec<Channel> {
    vec![
        Channel::BaseColor,
        Channel::Roughness,
        Channel::Metallic,
        Channel::Normal,
    ]
}

/// Everything except the custom-shader capture.
pub fn full_channels() -> Vec<Channel> {
    CANONICAL_ORDER
        .into_iter()
        .filter(|c| *c != Channel::CustomShader)
        .collect()
}

/// How one channel reaches the engine for one material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalMode {
    /// Engine pass on the graph as-is; no rewiring.
    DirectPass(BakeSemantic),
    /// Route one principled input through a synthetic emission surface.
    SingleInputProbe,
    /// Expose the sink's upstream producer (or a restricted subgraph of it)
    /// through a synthetic emission surface.
    FullSurfaceProbe,
}

/// Picks the evaluation mode for a channel given what classification learned
/// about the graph.
pub fn evaluation_mode(
    channel: Channel,
    classification: MaterialClassification,
    has_image_samples: bool,
    lighting: Option<ShadowMode>,
) -> EvalMode {
    match channel {
        Channel::Normal => EvalMode::DirectPass(BakeSemantic::Normal),
        Channel::AmbientOcclusion => EvalMode::DirectPass(BakeSemantic::AmbientOcclusion),
        Channel::Displacement => EvalMode::DirectPass(BakeSemantic::Emit),
        Channel::CustomShader => EvalMode::FullSurfaceProbe,
        Channel::BaseColor => match lighting {
            // Lighting capture keeps the material untouched so the combined
            // pass sees the real surface.
            Some(shadows) => EvalMode::DirectPass(BakeSemantic::Combined { shadows }),
            None => EvalMode::SingleInputProbe,
        },
        Channel::Roughness => {
            // Constant-driven graphs get the emission route so the exact
            // constant lands in the texture; textured graphs use the
            // engine's dedicated roughness pass.
            let constant_only = matches!(
                classification,
                MaterialClassification::Procedural | MaterialClassification::DefaultConstant
            ) && !has_image_samples;
            if constant_only {
                EvalMode::SingleInputProbe
            } else {
                EvalMode::DirectPass(BakeSemantic::Roughness)
            }
        }
        _ => EvalMode::SingleInputProbe,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    Evaluate,
    /// Produce a uniform buffer carrying this value; no engine call.
    FillConstant(SocketValue),
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChannel {
    pub channel: Channel,
    pub action: PlannedAction,
}

/// Orders the requested channels canonically and decides, per channel,
/// whether an evaluation pass is worth it. The skip-default heuristic only
/// fires for graphs whose channels are driven purely by constants: an
/// unlinked input sitting within epsilon of its declared default would bake
/// to a texture indistinguishable from no texture at all.
pub fn plan(
    classification: MaterialClassification,
    availability: &ChannelAvailabilityMap,
    requested: &[Channel],
    scheme: &SocketScheme,
) -> Vec<PlannedChannel> {
    let heuristic_applies = matches!(
        classification,
        MaterialClassification::Procedural | MaterialClassification::DefaultConstant
    ) && !availability.has_image_samples;

    let mut planned = Vec::new();
    for channel in CANONICAL_ORDER {
        if !requested.contains(&channel) {
            continue;
        }

        let action = if channel.is_pass_through() || !heuristic_applies {
            PlannedAction::Evaluate
        } else {
            match channel
                .scheme_key()
                .and_then(|key| availability.channels.get(&channel).map(|a| (key, a)))
            {
                Some((key, avail)) if !avail.linked => match avail.constant {
                    Some(value) => {
                        let within_default = scheme
                            .channel(key)
                            .is_some_and(|c| value.approx_eq(&c.default, c.epsilon));
                        if within_default {
                            PlannedAction::Skip
                        } else {
                            PlannedAction::FillConstant(value)
                        }
                    }
                    // Socket present but no observable constant: nothing to
                    // decide on, evaluate conservatively.
                    None => PlannedAction::Evaluate,
                },
                _ => PlannedAction::Evaluate,
            }
        };

        planned.push(PlannedChannel { channel, action });
    }
    planned
}
