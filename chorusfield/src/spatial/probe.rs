//! Picking the best spatializer tier the output can run.
//!
//! Tiers are tried in preference order; the first whose listener constructs
//! wins, and every rejection is kept for diagnostics.

use super::{AmbisonicListener, GainListener, Listener, PannerListener, Spatializer, SpatializerKind};
use crate::config::ChorusConfig;
use crate::error::ChorusError;
use crate::graph::AudioGraph;
use thiserror::Error;

/// What the output backend can do, as far as spatialization cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub output_channels: u16,
    /// Binaural scene rendering is available
    pub ambisonics: bool,
    /// Directional panner nodes are available
    pub panning: bool,
    /// Parameters can ramp between blocks
    pub parameter_automation: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            output_channels: 2,
            ambisonics: true,
            panning: true,
            parameter_automation: true,
        }
    }
}

impl BackendCapabilities {
    /// Nothing beyond scaling a signal.
    pub fn gain_only(output_channels: u16) -> Self {
        Self {
            output_channels,
            ambisonics: false,
            panning: false,
            parameter_automation: false,
        }
    }
}

/// Why a tier could not be constructed.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} unavailable: {reason}")]
pub struct CapabilityError {
    pub kind: SpatializerKind,
    pub reason: String,
}

impl CapabilityError {
    pub fn new(kind: SpatializerKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<CapabilityError> for ChorusError {
    fn from(err: CapabilityError) -> Self {
        ChorusError::CapabilityUnavailable(err.to_string())
    }
}

/// Everything a tier factory may inspect or build into.
pub struct ProbeContext<'a> {
    pub graph: &'a mut AudioGraph,
    pub config: &'a ChorusConfig,
    pub capabilities: BackendCapabilities,
}

pub type ListenerFactory =
    fn(&mut ProbeContext<'_>) -> std::result::Result<Box<dyn Listener>, CapabilityError>;

/// One entry in the preference list.
#[derive(Clone, Copy)]
pub struct Tier {
    pub kind: SpatializerKind,
    pub factory: ListenerFactory,
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier").field("kind", &self.kind).finish()
    }
}

/// Preference order, best first. The gain-only tier never fails.
pub fn default_tiers() -> Vec<Tier> {
    vec![
        Tier {
            kind: SpatializerKind::Ambisonic,
            factory: AmbisonicListener::probe,
        },
        Tier {
            kind: SpatializerKind::DirectionalNew,
            factory: PannerListener::probe_automated,
        },
        Tier {
            kind: SpatializerKind::DirectionalOld,
            factory: PannerListener::probe_immediate,
        },
        Tier {
            kind: SpatializerKind::GainOnly,
            factory: GainListener::probe,
        },
    ]
}

/// Which tier won and why the better ones were skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityProbeResult {
    pub selected: SpatializerKind,
    pub unavailable: Vec<CapabilityError>,
}

impl CapabilityProbeResult {
    pub fn was_rejected(&self, kind: SpatializerKind) -> bool {
        self.unavailable.iter().any(|err| err.kind == kind)
    }
}

/// Tries each tier in order and keeps the first that constructs.
///
/// Failures are logged and recorded; if every tier fails the gain-only
/// listener is used, so a listener always exists.
pub fn probe_listener(
    tiers: &[Tier],
    ctx: &mut ProbeContext<'_>,
) -> (Box<dyn Listener>, CapabilityProbeResult) {
    let mut unavailable = Vec::new();

    for tier in tiers {
        match (tier.factory)(ctx) {
            Ok(listener) => {
                log::info!("Spatialization: using {}", listener.kind());
                let result = CapabilityProbeResult {
                    selected: listener.kind(),
                    unavailable,
                };
                return (listener, result);
            }
            Err(err) => {
                log::warn!("Spatialization: {}", err);
                unavailable.push(err);
            }
        }
    }

    log::warn!("Spatialization: every tier failed, falling back to gain only");
    let listener: Box<dyn Listener> = Box::new(GainListener::new());
    let result = CapabilityProbeResult {
        selected: listener.kind(),
        unavailable,
    };
    (listener, result)
}
