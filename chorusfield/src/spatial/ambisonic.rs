//! Binaural rendering through a second-order ambisonic scene.
//!
//! Each emitter owns an [`AmbisonicEncoderNode`] (distance attenuation plus
//! ambisonic encoding) that feeds the listener's shared
//! [`AmbisonicDecoderNode`], which renders the summed field to binaural stereo.

use super::{Emitter, Listener, ProbeContext, Spatializer, SpatializerKind};
use crate::config::AudioProperties;
use crate::error::{ChorusError, Result};
use crate::graph::{AudioGraph, AudioNode, NodeId, RenderContext, downmix_mono};
use crate::math::{Pose, Vec3};
use crate::spatial::distance::scene_attenuation;
use crate::spatial::hrtf::load_hrtf;
use crate::spatial::probe::CapabilityError;
use audionimbus::{
    AmbisonicsDecodeEffect, AmbisonicsDecodeEffectParams, AmbisonicsDecodeEffectSettings,
    AmbisonicsEncodeEffect, AmbisonicsEncodeEffectParams, AmbisonicsEncodeEffectSettings,
    AudioBufferSettings, AudioSettings, Context, CoordinateSystem, DirectEffect,
    DirectEffectParams, DirectEffectSettings, Direction, Hrtf, SpeakerLayout, Vector3,
    audio_buffer::AudioBuffer as AudioNimbusAudioBuffer,
};
use std::any::Any;

const AMBISONIC_ORDER: u32 = 2;
/// (order + 1)^2
pub const AMBISONIC_CHANNELS: usize = 9;

/// Maps a listener-local direction (right, up, forward) into Steam Audio's
/// frame, where "ahead" is -Z. A source at the listener is treated as ahead.
pub fn steam_direction(local: Vec3) -> Vec3 {
    if local.length_squared() <= f32::EPSILON {
        return Vec3::new(0.0, 0.0, -1.0);
    }
    Vec3::new(local.x, local.y, -local.z)
}

/// Pose, distance model and directivity of one scene source.
///
/// The encoder reads this every block. Directivity follows Steam Audio's
/// weighted dipole, `|(1 - w) + w cos θ|^p` with θ between the source's
/// forward vector and the direction to the listener; `w = 0` is omnidirectional.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceParams {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub properties: AudioProperties,
    pub dipole_weight: f32,
    pub dipole_power: f32,
}

impl SourceParams {
    pub fn new(properties: &AudioProperties) -> Self {
        let rest = Pose::resting();
        Self {
            position: rest.position,
            forward: rest.forward,
            up: rest.up,
            properties: *properties,
            dipole_weight: 0.0,
            dipole_power: 1.0,
        }
    }

    pub fn set_pose(&mut self, pose: &Pose) {
        self.position = pose.position;
        self.forward = pose.forward;
        self.up = pose.up;
    }

    pub fn attenuation(&self, listener: &Pose) -> f32 {
        scene_attenuation(listener.position.distance(self.position), &self.properties)
    }

    pub fn directivity(&self, listener: &Pose) -> f32 {
        let to_listener = (listener.position - self.position).normalize_or_zero();
        if to_listener == Vec3::ZERO || self.dipole_weight <= 0.0 {
            return 1.0;
        }
        let w = self.dipole_weight.min(1.0);
        let cos = self.forward.normalize_or_zero().dot(to_listener);
        ((1.0 - w) + w * cos).abs().powf(self.dipole_power)
    }

    /// Arrival direction in the listener's frame, Steam Audio axes.
    pub fn direction(&self, listener: &Pose) -> Vec3 {
        steam_direction(listener.local_direction(self.position))
    }
}

fn spatial_error(what: &str, e: impl std::fmt::Display) -> ChorusError {
    ChorusError::Spatialization(format!("{}: {}", what, e))
}

/// Shared decoder at the root of the ambisonic scene.
pub struct AmbisonicDecoderNode {
    context: Context,
    hrtf: Hrtf,
    decode_effect: AmbisonicsDecodeEffect,
    sample_rate: u32,
    frame_size: usize,
    failed: bool,
}

impl AmbisonicDecoderNode {
    pub fn new(sample_rate: u32, frame_size: usize, hrtf_path: Option<&str>) -> Result<Self> {
        log::info!(
            "Initializing ambisonic scene (sample_rate: {} Hz, frame_size: {})",
            sample_rate,
            frame_size
        );

        let context = Context::try_new(&audionimbus::ContextSettings::default())
            .map_err(|e| spatial_error("Failed to create Steam Audio context", e))?;

        let audio_settings = AudioSettings {
            sampling_rate: sample_rate,
            frame_size: frame_size as u32,
        };
        let hrtf = load_hrtf(&context, &audio_settings, hrtf_path)?;

        let decode_effect = AmbisonicsDecodeEffect::try_new(
            &context,
            &audio_settings,
            &AmbisonicsDecodeEffectSettings {
                max_order: AMBISONIC_ORDER,
                speaker_layout: SpeakerLayout::Stereo,
                hrtf: &hrtf,
            },
        )
        .map_err(|e| spatial_error("Failed to create AmbisonicsDecodeEffect", e))?;

        Ok(Self {
            context,
            hrtf,
            decode_effect,
            sample_rate,
            frame_size,
            failed: false,
        })
    }

    /// Builds an encoder bound to this scene's context and block size.
    pub fn create_encoder(&self, properties: &AudioProperties) -> Result<AmbisonicEncoderNode> {
        let audio_settings = AudioSettings {
            sampling_rate: self.sample_rate,
            frame_size: self.frame_size as u32,
        };

        let direct_effect = DirectEffect::try_new(
            &self.context,
            &audio_settings,
            &DirectEffectSettings { num_channels: 1 },
        )
        .map_err(|e| spatial_error("Failed to create DirectEffect", e))?;

        let encode_effect = AmbisonicsEncodeEffect::try_new(
            &self.context,
            &audio_settings,
            &AmbisonicsEncodeEffectSettings {
                max_order: AMBISONIC_ORDER,
            },
        )
        .map_err(|e| spatial_error("Failed to create AmbisonicsEncodeEffect", e))?;

        Ok(AmbisonicEncoderNode {
            direct_effect,
            encode_effect,
            params: SourceParams::new(properties),
            mono: vec![0.0; self.frame_size],
            direct: vec![0.0; self.frame_size],
            failed: false,
        })
    }

    fn decode(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        let params = AmbisonicsDecodeEffectParams {
            order: AMBISONIC_ORDER,
            hrtf: &self.hrtf,
            orientation: CoordinateSystem {
                ahead: Vector3::new(0.0, 0.0, -1.0),
                ..Default::default()
            },
            binaural: true,
        };

        let input_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            input,
            AudioBufferSettings {
                num_channels: Some(AMBISONIC_CHANNELS as u32),
                ..Default::default()
            },
        )
        .map_err(|e| spatial_error("Failed to create input buffer", e))?;

        let output_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            output,
            AudioBufferSettings {
                num_channels: Some(2),
                ..Default::default()
            },
        )
        .map_err(|e| spatial_error("Failed to create output buffer", e))?;

        self.decode_effect.apply(&params, &input_buf, &output_buf);
        Ok(())
    }
}

impl AudioNode for AmbisonicDecoderNode {
    fn input_channels(&self) -> usize {
        AMBISONIC_CHANNELS
    }

    fn process(&mut self, ctx: &RenderContext, input: &[f32], output: &mut [f32]) {
        if ctx.frames != self.frame_size {
            output.fill(0.0);
            return;
        }
        if let Err(e) = self.decode(input, output) {
            output.fill(0.0);
            if !self.failed {
                log::error!("Ambisonic decode failed: {}", e);
                self.failed = true;
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Per-emitter encoder: stereo in, nine ambisonic channels out.
pub struct AmbisonicEncoderNode {
    direct_effect: DirectEffect,
    encode_effect: AmbisonicsEncodeEffect,
    params: SourceParams,
    mono: Vec<f32>,
    direct: Vec<f32>,
    failed: bool,
}

impl AmbisonicEncoderNode {
    pub fn params(&self) -> &SourceParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut SourceParams {
        &mut self.params
    }

    fn encode(&mut self, listener: &Pose, output: &mut [f32]) -> Result<()> {
        let direct_params = DirectEffectParams {
            distance_attenuation: Some(self.params.attenuation(listener)),
            air_absorption: None,
            directivity: Some(self.params.directivity(listener)),
            occlusion: None,
            transmission: None,
        };

        let input_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &self.mono,
            AudioBufferSettings {
                num_channels: Some(1),
                ..Default::default()
            },
        )
        .map_err(|e| spatial_error("Failed to create input buffer", e))?;

        let direct_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &mut self.direct,
            AudioBufferSettings {
                num_channels: Some(1),
                ..Default::default()
            },
        )
        .map_err(|e| spatial_error("Failed to create direct buffer", e))?;

        self.direct_effect
            .apply(&direct_params, &input_buf, &direct_buf);

        let direction = self.params.direction(listener);
        let encode_params = AmbisonicsEncodeEffectParams {
            direction: Direction::new(direction.x, direction.y, direction.z),
            order: AMBISONIC_ORDER,
        };

        let direct_in = AudioNimbusAudioBuffer::try_with_data_and_settings(
            &self.direct,
            AudioBufferSettings {
                num_channels: Some(1),
                ..Default::default()
            },
        )
        .map_err(|e| spatial_error("Failed to create direct buffer", e))?;

        let output_buf = AudioNimbusAudioBuffer::try_with_data_and_settings(
            output,
            AudioBufferSettings {
                num_channels: Some(AMBISONIC_CHANNELS as u32),
                ..Default::default()
            },
        )
        .map_err(|e| spatial_error("Failed to create output buffer", e))?;

        self.encode_effect
            .apply(&encode_params, &direct_in, &output_buf);
        Ok(())
    }
}

impl AudioNode for AmbisonicEncoderNode {
    fn output_channels(&self) -> usize {
        AMBISONIC_CHANNELS
    }

    fn process(&mut self, ctx: &RenderContext, input: &[f32], output: &mut [f32]) {
        if ctx.frames != self.mono.len() {
            output.fill(0.0);
            return;
        }
        downmix_mono(input, self.input_channels(), ctx.frames, &mut self.mono);
        if let Err(e) = self.encode(&ctx.listener, output) {
            output.fill(0.0);
            if !self.failed {
                log::error!("Ambisonic encode failed: {}", e);
                self.failed = true;
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Listener for the ambisonic tier. Owns the decoder node.
#[derive(Debug)]
pub struct AmbisonicListener {
    scene: Option<NodeId>,
}

impl AmbisonicListener {
    /// Builds the scene and routes its decoder into the mix.
    pub fn new(graph: &mut AudioGraph, hrtf_path: Option<&str>) -> Result<Self> {
        let decoder = AmbisonicDecoderNode::new(graph.sample_rate(), graph.block_size(), hrtf_path)?;
        let scene = graph.add_node(Box::new(decoder));
        let destination = graph.destination();
        graph.connect(scene, destination)?;
        Ok(Self { scene: Some(scene) })
    }

    pub fn probe(
        ctx: &mut ProbeContext<'_>,
    ) -> std::result::Result<Box<dyn Listener>, CapabilityError> {
        let kind = SpatializerKind::Ambisonic;
        if !ctx.config.enable_ambisonics {
            return Err(CapabilityError::new(kind, "disabled by configuration"));
        }
        if !ctx.capabilities.ambisonics {
            return Err(CapabilityError::new(kind, "backend has no binaural renderer"));
        }
        if ctx.capabilities.output_channels < 2 {
            return Err(CapabilityError::new(kind, "binaural output needs two channels"));
        }

        let hrtf_path = ctx.config.hrtf_path.as_deref();
        let listener = Self::new(ctx.graph, hrtf_path)
            .map_err(|e| CapabilityError::new(kind, e.to_string()))?;
        Ok(Box::new(listener))
    }

    pub fn scene(&self) -> Option<NodeId> {
        self.scene
    }
}

impl Spatializer for AmbisonicListener {
    fn kind(&self) -> SpatializerKind {
        SpatializerKind::Ambisonic
    }

    fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, _time: f64) {
        graph.set_listener(*pose);
    }

    fn set_audio_properties(&mut self, _graph: &mut AudioGraph, _properties: &AudioProperties) {}

    fn dispose(&mut self, graph: &mut AudioGraph) {
        if let Some(scene) = self.scene.take() {
            graph.remove(scene);
            log::debug!("Disposed ambisonic scene");
        }
    }

    fn is_disposed(&self) -> bool {
        self.scene.is_none()
    }
}

impl Listener for AmbisonicListener {
    fn create_emitter(
        &self,
        graph: &mut AudioGraph,
        properties: &AudioProperties,
    ) -> Result<Box<dyn Emitter>> {
        let scene = self.scene.ok_or_else(|| {
            ChorusError::Spatialization("Ambisonic scene was disposed".to_string())
        })?;
        Ok(Box::new(AmbisonicEmitter::new(graph, scene, properties)?))
    }
}

/// Emitter backed by one encoder in the listener's scene.
#[derive(Debug)]
pub struct AmbisonicEmitter {
    node: Option<NodeId>,
    scene: NodeId,
}

impl AmbisonicEmitter {
    pub fn new(graph: &mut AudioGraph, scene: NodeId, properties: &AudioProperties) -> Result<Self> {
        let encoder = graph
            .node::<AmbisonicDecoderNode>(scene)
            .ok_or_else(|| ChorusError::Spatialization("Ambisonic scene is gone".to_string()))?
            .create_encoder(properties)?;
        let node = graph.add_node(Box::new(encoder));
        graph.connect(node, scene)?;
        Ok(Self {
            node: Some(node),
            scene,
        })
    }

    /// Per-source parameters, or `None` once disposed.
    pub fn params(&self, graph: &AudioGraph) -> Option<SourceParams> {
        self.node
            .and_then(|id| graph.node::<AmbisonicEncoderNode>(id))
            .map(|encoder| *encoder.params())
    }

    /// Weighted-dipole directivity; `weight` 0 is omnidirectional, 1 a pure dipole.
    pub fn set_directivity(&self, graph: &mut AudioGraph, weight: f32, power: f32) {
        if let Some(encoder) = self.encoder_mut(graph) {
            let params = encoder.params_mut();
            params.dipole_weight = weight.clamp(0.0, 1.0);
            params.dipole_power = power.max(0.0);
        }
    }

    fn encoder_mut<'g>(&self, graph: &'g mut AudioGraph) -> Option<&'g mut AmbisonicEncoderNode> {
        self.node
            .and_then(|id| graph.node_mut::<AmbisonicEncoderNode>(id))
    }
}

impl Spatializer for AmbisonicEmitter {
    fn kind(&self) -> SpatializerKind {
        SpatializerKind::Ambisonic
    }

    fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, _time: f64) {
        if let Some(encoder) = self.encoder_mut(graph) {
            encoder.params_mut().set_pose(pose);
        }
    }

    fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
        if let Some(encoder) = self.encoder_mut(graph) {
            encoder.params_mut().properties = *properties;
        }
    }

    fn dispose(&mut self, graph: &mut AudioGraph) {
        if let Some(id) = self.node.take() {
            graph.remove(id);
        }
    }

    fn is_disposed(&self) -> bool {
        self.node.is_none()
    }
}

impl Emitter for AmbisonicEmitter {
    fn input(&self) -> Option<NodeId> {
        self.node
    }

    fn clone_emitter(&self, graph: &mut AudioGraph) -> Result<Box<dyn Emitter>> {
        let params = self.params(graph).ok_or_else(|| {
            ChorusError::Spatialization("Cannot clone a disposed emitter".to_string())
        })?;

        let emitter = AmbisonicEmitter::new(graph, self.scene, &params.properties)?;
        if let Some(encoder) = emitter.encoder_mut(graph) {
            *encoder.params_mut() = params;
        }
        Ok(Box::new(emitter))
    }
}
