use super::{Emitter, Listener, ProbeContext, Spatializer, SpatializerKind};
use crate::config::{AudioProperties, DistanceAlgorithm};
use crate::error::{ChorusError, Result};
use crate::graph::{AudioGraph, AudioNode, NodeId, Param, RenderContext, downmix_mono};
use crate::math::{Pose, Vec3};
use crate::spatial::distance::inverse_distance_gain;
use crate::spatial::probe::CapabilityError;
use std::any::Any;
use std::f32::consts::FRAC_PI_2;

/// How pose updates reach the panner parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PannerStyle {
    /// Parameters ramp to the new value over the next block.
    Automated,
    /// Parameters jump to the new value.
    Immediate,
}

impl PannerStyle {
    fn kind(self) -> SpatializerKind {
        match self {
            Self::Automated => SpatializerKind::DirectionalNew,
            Self::Immediate => SpatializerKind::DirectionalOld,
        }
    }
}

/// Mono-to-stereo equal-power panner with an inverse distance model and an
/// optional sound cone.
pub struct PannerNode {
    position: [Param; 3],
    orientation: [Param; 3],
    reference_distance: f32,
    rolloff: f32,
    max_distance: f32,
    cone_inner_angle: f32,
    cone_outer_angle: f32,
    cone_outer_gain: f32,
    mono: Vec<f32>,
}

impl PannerNode {
    pub fn new(properties: &AudioProperties) -> Self {
        let mut node = Self {
            position: [Param::new(0.0); 3],
            orientation: [Param::new(0.0); 3],
            reference_distance: 1.0,
            rolloff: 1.0,
            max_distance: 10_000.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
            mono: Vec::new(),
        };
        node.set_distance_model(properties);
        node
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(
            self.position[0].value(),
            self.position[1].value(),
            self.position[2].value(),
        )
    }

    pub fn orientation(&self) -> Vec3 {
        Vec3::new(
            self.orientation[0].value(),
            self.orientation[1].value(),
            self.orientation[2].value(),
        )
    }

    pub fn set_position(&mut self, position: Vec3) {
        for (param, value) in self.position.iter_mut().zip(position.to_array()) {
            param.set(value);
        }
    }

    pub fn set_position_immediate(&mut self, position: Vec3) {
        for (param, value) in self.position.iter_mut().zip(position.to_array()) {
            param.set_immediate(value);
        }
    }

    pub fn set_orientation(&mut self, orientation: Vec3) {
        for (param, value) in self.orientation.iter_mut().zip(orientation.to_array()) {
            param.set(value);
        }
    }

    pub fn set_orientation_immediate(&mut self, orientation: Vec3) {
        for (param, value) in self.orientation.iter_mut().zip(orientation.to_array()) {
            param.set_immediate(value);
        }
    }

    /// Panners only model inverse distance; logarithmic falls back to it.
    pub fn set_distance_model(&mut self, properties: &AudioProperties) {
        if properties.algorithm == DistanceAlgorithm::Logarithmic {
            log::debug!("Panner has no logarithmic model, using inverse");
        }
        self.reference_distance = properties.min_distance;
        self.max_distance = properties.max_distance;
        self.rolloff = properties.rolloff;
    }

    pub fn reference_distance(&self) -> f32 {
        self.reference_distance
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    pub fn rolloff(&self) -> f32 {
        self.rolloff
    }

    /// Angles are full cone widths in degrees; 360 disables the cone.
    pub fn set_cone(&mut self, inner_angle: f32, outer_angle: f32, outer_gain: f32) {
        self.cone_inner_angle = inner_angle.clamp(0.0, 360.0);
        self.cone_outer_angle = outer_angle.clamp(self.cone_inner_angle, 360.0);
        self.cone_outer_gain = outer_gain.clamp(0.0, 1.0);
    }

    /// Left and right gains for a source at `position` facing `orientation`.
    pub fn channel_gains(&self, listener: &Pose, position: Vec3, orientation: Vec3) -> (f32, f32) {
        let local = listener.local_direction(position);
        let mut azimuth = if local.x.abs() <= f32::EPSILON && local.z.abs() <= f32::EPSILON {
            0.0
        } else {
            local.x.atan2(local.z).to_degrees()
        };
        // Sources behind fold onto the front half-plane.
        if azimuth > 90.0 {
            azimuth = 180.0 - azimuth;
        } else if azimuth < -90.0 {
            azimuth = -180.0 - azimuth;
        }

        let x = (azimuth + 90.0) / 180.0;
        let (left, right) = ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin());

        let distance = listener.position.distance(position);
        let gain = inverse_distance_gain(distance, self.reference_distance, self.rolloff)
            * self.cone_gain(listener.position, position, orientation);
        (left * gain, right * gain)
    }

    fn cone_gain(&self, listener: Vec3, position: Vec3, orientation: Vec3) -> f32 {
        if self.cone_inner_angle >= 360.0 && self.cone_outer_angle >= 360.0 {
            return 1.0;
        }
        let facing = orientation.normalize_or_zero();
        let to_listener = (listener - position).normalize_or_zero();
        if facing == Vec3::ZERO || to_listener == Vec3::ZERO {
            return 1.0;
        }

        let angle = facing.dot(to_listener).clamp(-1.0, 1.0).acos().to_degrees();
        let inner = self.cone_inner_angle * 0.5;
        let outer = self.cone_outer_angle * 0.5;
        if angle <= inner {
            1.0
        } else if angle >= outer || outer <= inner {
            self.cone_outer_gain
        } else {
            let x = (angle - inner) / (outer - inner);
            1.0 + (self.cone_outer_gain - 1.0) * x
        }
    }
}

impl AudioNode for PannerNode {
    fn process(&mut self, ctx: &RenderContext, input: &[f32], output: &mut [f32]) {
        let frames = ctx.frames;
        if self.mono.len() != frames {
            self.mono.resize(frames, 0.0);
        }
        downmix_mono(input, self.input_channels(), frames, &mut self.mono);

        let ramp = |params: &mut [Param; 3]| {
            let [x, y, z] = params;
            let (x0, x1) = x.advance();
            let (y0, y1) = y.advance();
            let (z0, z1) = z.advance();
            (Vec3::new(x0, y0, z0), Vec3::new(x1, y1, z1))
        };
        let (pos_start, pos_end) = ramp(&mut self.position);
        let (dir_start, dir_end) = ramp(&mut self.orientation);

        let (l0, r0) = self.channel_gains(&ctx.listener, pos_start, dir_start);
        let (l1, r1) = self.channel_gains(&ctx.listener, pos_end, dir_end);
        let inv = if frames > 0 { 1.0 / frames as f32 } else { 0.0 };

        let (left, right) = output.split_at_mut(frames);
        for (i, sample) in self.mono.iter().enumerate() {
            let t = i as f32 * inv;
            left[i] = sample * (l0 + (l1 - l0) * t);
            right[i] = sample * (r0 + (r1 - r0) * t);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Listener for both directional tiers. The listener pose is shared through
/// the graph; the style decides how its emitters write parameters.
#[derive(Debug)]
pub struct PannerListener {
    style: PannerStyle,
    disposed: bool,
}

impl PannerListener {
    pub fn new(style: PannerStyle) -> Self {
        Self {
            style,
            disposed: false,
        }
    }

    pub fn style(&self) -> PannerStyle {
        self.style
    }

    pub fn probe_automated(
        ctx: &mut ProbeContext<'_>,
    ) -> std::result::Result<Box<dyn Listener>, CapabilityError> {
        Self::probe(ctx, PannerStyle::Automated)
    }

    pub fn probe_immediate(
        ctx: &mut ProbeContext<'_>,
    ) -> std::result::Result<Box<dyn Listener>, CapabilityError> {
        Self::probe(ctx, PannerStyle::Immediate)
    }

    fn probe(
        ctx: &mut ProbeContext<'_>,
        style: PannerStyle,
    ) -> std::result::Result<Box<dyn Listener>, CapabilityError> {
        let caps = ctx.capabilities;
        if !caps.panning {
            return Err(CapabilityError::new(style.kind(), "backend has no panner"));
        }
        if caps.output_channels < 2 {
            return Err(CapabilityError::new(
                style.kind(),
                format!("panning needs stereo output, device has {}", caps.output_channels),
            ));
        }
        if style == PannerStyle::Automated && !caps.parameter_automation {
            return Err(CapabilityError::new(
                style.kind(),
                "backend cannot automate parameters",
            ));
        }
        Ok(Box::new(Self::new(style)))
    }
}

impl Spatializer for PannerListener {
    fn kind(&self) -> SpatializerKind {
        self.style.kind()
    }

    fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, _time: f64) {
        graph.set_listener(*pose);
    }

    fn set_audio_properties(&mut self, _graph: &mut AudioGraph, _properties: &AudioProperties) {}

    fn dispose(&mut self, _graph: &mut AudioGraph) {
        self.disposed = true;
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Listener for PannerListener {
    fn create_emitter(
        &self,
        graph: &mut AudioGraph,
        properties: &AudioProperties,
    ) -> Result<Box<dyn Emitter>> {
        Ok(Box::new(PannerEmitter::new(graph, properties, self.style)?))
    }
}

/// Emitter backed by one [`PannerNode`].
#[derive(Debug)]
pub struct PannerEmitter {
    node: Option<NodeId>,
    style: PannerStyle,
    properties: AudioProperties,
    last_pose: Option<Pose>,
}

impl PannerEmitter {
    pub fn new(graph: &mut AudioGraph, properties: &AudioProperties, style: PannerStyle) -> Result<Self> {
        let node = graph.add_node(Box::new(PannerNode::new(properties)));
        let destination = graph.destination();
        graph.connect(node, destination)?;
        Ok(Self {
            node: Some(node),
            style,
            properties: *properties,
            last_pose: None,
        })
    }

    pub fn style(&self) -> PannerStyle {
        self.style
    }

    /// Narrows the emitter's sound cone; see [`PannerNode::set_cone`].
    pub fn set_cone(&self, graph: &mut AudioGraph, inner_angle: f32, outer_angle: f32, outer_gain: f32) {
        if let Some(node) = self.node.and_then(|id| graph.node_mut::<PannerNode>(id)) {
            node.set_cone(inner_angle, outer_angle, outer_gain);
        }
    }

    fn push_pose(&self, graph: &mut AudioGraph, pose: &Pose, ramp: bool) {
        let Some(node) = self.node.and_then(|id| graph.node_mut::<PannerNode>(id)) else {
            return;
        };
        // The panner's orientation points out of the talker's back.
        let orientation = -pose.forward;
        if ramp {
            node.set_position(pose.position);
            node.set_orientation(orientation);
        } else {
            node.set_position_immediate(pose.position);
            node.set_orientation_immediate(orientation);
        }
    }
}

impl Spatializer for PannerEmitter {
    fn kind(&self) -> SpatializerKind {
        self.style.kind()
    }

    fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, _time: f64) {
        // The first pose is placed outright so a new emitter never sweeps in from the origin.
        let ramp = self.style == PannerStyle::Automated && self.last_pose.is_some();
        self.push_pose(graph, pose, ramp);
        self.last_pose = Some(*pose);
    }

    fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
        self.properties = *properties;
        if let Some(node) = self.node.and_then(|id| graph.node_mut::<PannerNode>(id)) {
            node.set_distance_model(properties);
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

impl Emitter for PannerEmitter {
    fn input(&self) -> Option<NodeId> {
        self.node
    }

    fn clone_emitter(&self, graph: &mut AudioGraph) -> Result<Box<dyn Emitter>> {
        if self.node.is_none() {
            return Err(ChorusError::Spatialization(
                "Cannot clone a disposed emitter".to_string(),
            ));
        }
        let mut emitter = PannerEmitter::new(graph, &self.properties, self.style)?;
        if let Some(pose) = self.last_pose {
            emitter.update(graph, &pose, 0.0);
        }
        Ok(Box::new(emitter))
    }
}
