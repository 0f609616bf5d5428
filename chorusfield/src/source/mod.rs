//! Positioned sound sources: users and clips.

mod clip;

pub use clip::{ClipPlay, ClipSource};

use crate::config::AudioProperties;
use crate::error::{ChorusError, Result};
use crate::graph::{AudioGraph, GainNode, NodeId};
use crate::math::Pose;
use crate::spatial::EmitterSlot;
use crate::trajectory::PoseTrajectory;

/// A sound source in the world.
///
/// Signal path: `input -> volume -> emitter input -> ... -> destination`.
/// With the pass-through emitter the volume node feeds the destination
/// directly.
#[derive(Debug)]
pub struct AudioSource {
    id: String,
    trajectory: PoseTrajectory,
    input: Option<NodeId>,
    volume: Option<NodeId>,
    spatializer: EmitterSlot,
}

impl AudioSource {
    /// Creates a silent source routed straight to the mix.
    pub fn new(id: impl Into<String>, graph: &mut AudioGraph) -> Result<Self> {
        let volume = graph.add_node(Box::new(GainNode::new(1.0)));
        let destination = graph.destination();
        graph.connect(volume, destination)?;
        Ok(Self {
            id: id.into(),
            trajectory: PoseTrajectory::new(),
            input: None,
            volume: Some(volume),
            spatializer: EmitterSlot::PassThrough,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trajectory(&self) -> &PoseTrajectory {
        &self.trajectory
    }

    pub fn trajectory_mut(&mut self) -> &mut PoseTrajectory {
        &mut self.trajectory
    }

    /// Current blended pose.
    pub fn pose(&self) -> Pose {
        *self.trajectory.current()
    }

    pub fn input(&self) -> Option<NodeId> {
        self.input
    }

    pub fn volume_node(&self) -> Option<NodeId> {
        self.volume
    }

    pub fn spatializer(&self) -> &EmitterSlot {
        &self.spatializer
    }

    pub fn is_disposed(&self) -> bool {
        self.volume.is_none()
    }

    /// Swaps the signal feeding this source. The previous input node is
    /// removed from the graph.
    pub fn set_input(&mut self, graph: &mut AudioGraph, input: Option<NodeId>) -> Result<()> {
        if input == self.input {
            return Ok(());
        }

        if let Some(old) = self.input.take() {
            graph.disconnect(old);
            graph.remove(old);
        }

        if let Some(new) = input {
            let volume = self.volume.ok_or_else(|| self.disposed_error())?;
            graph.connect(new, volume)?;
            self.input = Some(new);
            log::debug!("Source '{}' input set to {}", self.id, new);
        }
        Ok(())
    }

    /// Replaces the emitter, disposing the previous one, and re-wires the
    /// volume node into the replacement.
    pub fn set_spatializer(&mut self, graph: &mut AudioGraph, slot: EmitterSlot) -> Result<()> {
        let mut previous = std::mem::replace(&mut self.spatializer, slot);
        previous.dispose(graph);

        let pose = self.pose();
        let time = graph.current_time();
        self.spatializer.update(graph, &pose, time);
        self.route(graph)?;
        log::debug!("Source '{}' spatializer: {}", self.id, self.spatializer.kind());
        Ok(())
    }

    /// Advances the trajectory to `time` and pushes the pose to the emitter.
    pub fn update(&mut self, graph: &mut AudioGraph, time: f64) {
        self.trajectory.update(time);
        let pose = self.pose();
        self.spatializer.update(graph, &pose, time);
    }

    pub fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
        self.spatializer.set_audio_properties(graph, properties);
    }

    pub fn set_volume(&self, graph: &mut AudioGraph, volume: f32) {
        if let Some(node) = self.volume.and_then(|id| graph.node_mut::<GainNode>(id)) {
            node.set_gain(volume);
        }
    }

    pub fn volume(&self, graph: &AudioGraph) -> Option<f32> {
        self.volume
            .and_then(|id| graph.node::<GainNode>(id))
            .map(GainNode::gain)
    }

    /// Tears the source down: input, then emitter, then volume node.
    pub fn dispose(&mut self, graph: &mut AudioGraph) {
        if let Some(old) = self.input.take() {
            graph.remove(old);
        }
        let mut previous = std::mem::replace(&mut self.spatializer, EmitterSlot::PassThrough);
        previous.dispose(graph);
        if let Some(volume) = self.volume.take() {
            graph.remove(volume);
            log::debug!("Disposed source '{}'", self.id);
        }
    }

    fn route(&self, graph: &mut AudioGraph) -> Result<()> {
        let Some(volume) = self.volume else {
            return Err(self.disposed_error());
        };
        match self.spatializer.input(graph) {
            Some(target) => graph.connect(volume, target),
            None => {
                graph.disconnect(volume);
                Ok(())
            }
        }
    }

    fn disposed_error(&self) -> ChorusError {
        ChorusError::Graph(format!("Source '{}' was disposed", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;
    use crate::spatial::{Emitter, GainListener, Listener, SpatializerKind};

    #[test]
    fn new_source_routes_to_destination() {
        let mut graph = AudioGraph::new(48000, 32);
        let source = AudioSource::new("u1", &mut graph).unwrap();
        let volume = source.volume_node().unwrap();
        assert_eq!(graph.destination_of(volume), Some(graph.destination()));
        assert_eq!(source.spatializer().kind(), SpatializerKind::PassThrough);
        assert_eq!(*source.trajectory().current(), Pose::resting());
    }

    #[test]
    fn set_input_replaces_and_removes_old_node() {
        let mut graph = AudioGraph::new(48000, 32);
        let mut source = AudioSource::new("u1", &mut graph).unwrap();
        let first = graph.add_node(Box::new(GainNode::new(1.0)));
        let second = graph.add_node(Box::new(GainNode::new(1.0)));

        source.set_input(&mut graph, Some(first)).unwrap();
        assert_eq!(graph.destination_of(first), source.volume_node());

        // unchanged value is a no-op
        source.set_input(&mut graph, Some(first)).unwrap();
        assert!(graph.contains(first));

        source.set_input(&mut graph, Some(second)).unwrap();
        assert!(!graph.contains(first));
        assert_eq!(source.input(), Some(second));
    }

    #[test]
    fn set_spatializer_disposes_previous_and_rewires() {
        let mut graph = AudioGraph::new(48000, 32);
        let listener = GainListener::new();
        let props = AudioProperties::default();
        let mut source = AudioSource::new("u1", &mut graph).unwrap();

        let first = listener.create_emitter(&mut graph, &props).unwrap();
        let first_input = first.input().unwrap();
        source
            .set_spatializer(&mut graph, EmitterSlot::Owned(first))
            .unwrap();
        assert_eq!(graph.destination_of(source.volume_node().unwrap()), Some(first_input));

        let second = listener.create_emitter(&mut graph, &props).unwrap();
        let second_input = second.input().unwrap();
        source
            .set_spatializer(&mut graph, EmitterSlot::Owned(second))
            .unwrap();
        assert!(!graph.contains(first_input));
        assert_eq!(graph.destination_of(source.volume_node().unwrap()), Some(second_input));

        source
            .set_spatializer(&mut graph, EmitterSlot::PassThrough)
            .unwrap();
        assert!(!graph.contains(second_input));
        assert_eq!(
            graph.destination_of(source.volume_node().unwrap()),
            Some(graph.destination())
        );
    }

    #[test]
    fn update_moves_along_trajectory() {
        let mut graph = AudioGraph::new(48000, 32);
        let mut source = AudioSource::new("u1", &mut graph).unwrap();
        source
            .trajectory_mut()
            .set_position(Vec3::new(4.0, 0.0, 0.0), 0.0, 1.0);
        source.update(&mut graph, 0.5);
        assert!((source.pose().position.x - 2.0).abs() < 1e-5);
        source.update(&mut graph, 2.0);
        assert_eq!(source.pose().position, Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut graph = AudioGraph::new(48000, 32);
        let mut source = AudioSource::new("u1", &mut graph).unwrap();
        let input = graph.add_node(Box::new(GainNode::new(1.0)));
        source.set_input(&mut graph, Some(input)).unwrap();

        source.dispose(&mut graph);
        source.dispose(&mut graph);
        assert!(source.is_disposed());
        assert_eq!(graph.len(), 1);
        let destination = graph.destination();
        assert!(source.set_input(&mut graph, Some(destination)).is_err());
    }
}
