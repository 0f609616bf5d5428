use super::{Emitter, Listener, ProbeContext, Spatializer, SpatializerKind};
use crate::config::AudioProperties;
use crate::error::{ChorusError, Result};
use crate::graph::{AudioGraph, GainNode, NodeId};
use crate::math::Pose;
use crate::spatial::distance::gain_only_curve;
use crate::spatial::probe::CapabilityError;

/// Listener for the gain-only tier. Only its position matters.
#[derive(Debug, Default)]
pub struct GainListener {
    disposed: bool,
}

impl GainListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last-resort tier: every backend can scale a signal.
    pub fn probe(_ctx: &mut ProbeContext<'_>) -> std::result::Result<Box<dyn Listener>, CapabilityError> {
        Ok(Box::new(Self::new()))
    }
}

impl Spatializer for GainListener {
    fn kind(&self) -> SpatializerKind {
        SpatializerKind::GainOnly
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

impl Listener for GainListener {
    fn create_emitter(
        &self,
        graph: &mut AudioGraph,
        properties: &AudioProperties,
    ) -> Result<Box<dyn Emitter>> {
        Ok(Box::new(GainEmitter::new(graph, properties)?))
    }
}

/// Distance attenuation with no directional cues.
#[derive(Debug)]
pub struct GainEmitter {
    node: Option<NodeId>,
    properties: AudioProperties,
    last_pose: Pose,
}

impl GainEmitter {
    pub fn new(graph: &mut AudioGraph, properties: &AudioProperties) -> Result<Self> {
        let node = graph.add_node(Box::new(GainNode::new(1.0)));
        let destination = graph.destination();
        graph.connect(node, destination)?;
        Ok(Self {
            node: Some(node),
            properties: *properties,
            last_pose: Pose::resting(),
        })
    }

    /// Current gain on the backing node, if still attached.
    pub fn gain(&self, graph: &AudioGraph) -> Option<f32> {
        self.node
            .and_then(|id| graph.node::<GainNode>(id))
            .map(GainNode::gain)
    }

    fn apply(&self, graph: &mut AudioGraph) {
        let Some(id) = self.node else {
            return;
        };
        let distance = self.last_pose.distance(graph.listener());
        let gain = gain_only_curve(distance, &self.properties);
        if let Some(node) = graph.node_mut::<GainNode>(id) {
            node.set_gain(gain);
        }
    }
}

impl Spatializer for GainEmitter {
    fn kind(&self) -> SpatializerKind {
        SpatializerKind::GainOnly
    }

    fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, _time: f64) {
        self.last_pose = *pose;
        self.apply(graph);
    }

    fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
        self.properties = *properties;
        self.apply(graph);
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

impl Emitter for GainEmitter {
    fn input(&self) -> Option<NodeId> {
        self.node
    }

    fn clone_emitter(&self, graph: &mut AudioGraph) -> Result<Box<dyn Emitter>> {
        if self.node.is_none() {
            return Err(ChorusError::Spatialization(
                "Cannot clone a disposed emitter".to_string(),
            ));
        }
        let mut emitter = GainEmitter::new(graph, &self.properties)?;
        emitter.last_pose = self.last_pose;
        emitter.apply(graph);
        Ok(Box::new(emitter))
    }
}
