//! Spatializer strategies.
//!
//! A [`Listener`] stands for the receiving ear and an [`Emitter`] for one
//! sound-producing source. Each tier implements both roles:
//!
//! | Tier | Module | Directional cues |
//! |---|---|---|
//! | Ambisonic scene (Steam Audio) | `ambisonic` | full binaural |
//! | Directional panner, automated params | `panner` | equal-power, ramped |
//! | Directional panner, immediate params | `panner` | equal-power |
//! | Gain only | `gain` | none |
//! | Pass-through | [`EmitterSlot::PassThrough`] | none, no attenuation |
//!
//! The tier is picked once per manager by [`probe_listener`], and every
//! emitter is manufactured by that listener.

mod ambisonic;
mod distance;
mod gain;
mod hrtf;
mod panner;
mod probe;

pub use ambisonic::{
    AmbisonicDecoderNode, AmbisonicEmitter, AmbisonicEncoderNode, AmbisonicListener, SourceParams,
};
pub use distance::{gain_only_curve, inverse_distance_gain, scene_attenuation};
pub use gain::{GainEmitter, GainListener};
pub use panner::{PannerEmitter, PannerListener, PannerNode, PannerStyle};
pub use probe::{
    BackendCapabilities, CapabilityError, CapabilityProbeResult, ListenerFactory, ProbeContext,
    Tier, default_tiers, probe_listener,
};

use crate::config::AudioProperties;
use crate::error::Result;
use crate::graph::{AudioGraph, NodeId};
use crate::math::Pose;

/// Which strategy a spatializer implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatializerKind {
    Ambisonic,
    DirectionalNew,
    DirectionalOld,
    GainOnly,
    PassThrough,
}

impl std::fmt::Display for SpatializerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ambisonic => "ambisonic scene",
            Self::DirectionalNew => "directional panner (automated)",
            Self::DirectionalOld => "directional panner (immediate)",
            Self::GainOnly => "gain only",
            Self::PassThrough => "pass-through",
        };
        f.write_str(name)
    }
}

/// Behavior shared by listeners and emitters.
///
/// `dispose` must be safe to call repeatedly and must tolerate nodes that were
/// already removed from the graph by someone else.
pub trait Spatializer: Send {
    fn kind(&self) -> SpatializerKind;

    /// Pushes a pose into the backing graph nodes.
    fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, time: f64);

    fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties);

    fn dispose(&mut self, graph: &mut AudioGraph);

    fn is_disposed(&self) -> bool;
}

/// The sound-producing role. Owned by exactly one source.
pub trait Emitter: Spatializer {
    /// Node the source should feed; `None` once disposed.
    fn input(&self) -> Option<NodeId>;

    /// An independent emitter with the same parameters, for overlapping plays.
    fn clone_emitter(&self, graph: &mut AudioGraph) -> Result<Box<dyn Emitter>>;
}

/// The receiving role. Owned by the manager and outlives every emitter.
pub trait Listener: Spatializer {
    fn create_emitter(
        &self,
        graph: &mut AudioGraph,
        properties: &AudioProperties,
    ) -> Result<Box<dyn Emitter>>;
}

/// The emitter currently attached to a source.
///
/// `PassThrough` is the shared no-op spatializer: it owns no nodes, routes
/// straight into the mix, and is never disposed.
pub enum EmitterSlot {
    PassThrough,
    Owned(Box<dyn Emitter>),
}

impl EmitterSlot {
    pub fn kind(&self) -> SpatializerKind {
        match self {
            Self::PassThrough => SpatializerKind::PassThrough,
            Self::Owned(emitter) => emitter.kind(),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }

    /// Node the source's volume control should route into.
    pub fn input(&self, graph: &AudioGraph) -> Option<NodeId> {
        match self {
            Self::PassThrough => Some(graph.destination()),
            Self::Owned(emitter) => emitter.input(),
        }
    }

    pub fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, time: f64) {
        if let Self::Owned(emitter) = self {
            emitter.update(graph, pose, time);
        }
    }

    pub fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
        if let Self::Owned(emitter) = self {
            emitter.set_audio_properties(graph, properties);
        }
    }

    pub fn try_clone(&self, graph: &mut AudioGraph) -> Result<Self> {
        match self {
            Self::PassThrough => Ok(Self::PassThrough),
            Self::Owned(emitter) => Ok(Self::Owned(emitter.clone_emitter(graph)?)),
        }
    }

    /// Disposes an owned emitter; the shared pass-through is left alone.
    pub fn dispose(&mut self, graph: &mut AudioGraph) {
        if let Self::Owned(emitter) = self {
            emitter.dispose(graph);
        }
    }
}

impl std::fmt::Debug for EmitterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EmitterSlot({})", self.kind())
    }
}
