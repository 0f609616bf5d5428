//! Audio graph shared between the tick thread and the render callback.
//!
//! The graph is an arena of nodes where every node records at most one
//! destination, so the topology is always a tree rooted at the mix
//! destination. Rendering walks from the leaves towards the root; removing a
//! node only detaches its children, it never frees them. Whoever created a
//! node owns it and is responsible for removing it.

mod analyser;
mod node;
mod nodes;

pub use analyser::Analyser;
pub use node::{AudioNode, Param, RenderContext, downmix_mono, mix_into};
pub use nodes::{BufferPlayerNode, DestinationNode, GainNode};

use crate::error::{ChorusError, Result};
use crate::math::Pose;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle to a node in an [`AudioGraph`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// The graph as shared with the audio callback.
pub type SharedGraph = Arc<Mutex<AudioGraph>>;

/// Locks the graph, recovering it if a panicking holder poisoned the mutex.
pub fn lock_graph(graph: &SharedGraph) -> MutexGuard<'_, AudioGraph> {
    graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct NodeSlot {
    node: Box<dyn AudioNode>,
    destination: Option<NodeId>,
    input: Vec<f32>,
    output: Vec<f32>,
    analyser: Option<Analyser>,
}

pub struct AudioGraph {
    nodes: HashMap<NodeId, NodeSlot>,
    next_id: u64,
    destination: NodeId,
    listener: Pose,
    sample_rate: u32,
    block_size: usize,
    frames_rendered: u64,
    order: Vec<NodeId>,
    order_dirty: bool,
}

impl AudioGraph {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let mut graph = Self {
            nodes: HashMap::new(),
            next_id: 0,
            destination: NodeId(0),
            listener: Pose::resting(),
            sample_rate,
            block_size: block_size.max(1),
            frames_rendered: 0,
            order: Vec::new(),
            order_dirty: true,
        };
        graph.destination = graph.add_node(Box::new(DestinationNode));
        graph
    }

    pub fn into_shared(self) -> SharedGraph {
        Arc::new(Mutex::new(self))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Graph clock in seconds, advanced by rendering.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn listener(&self) -> &Pose {
        &self.listener
    }

    pub fn set_listener(&mut self, pose: Pose) {
        self.listener = pose;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds an unconnected node.
    pub fn add_node(&mut self, node: Box<dyn AudioNode>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let input = vec![0.0; node.input_channels() * self.block_size];
        let output = vec![0.0; node.output_channels() * self.block_size];
        self.nodes.insert(
            id,
            NodeSlot {
                node,
                destination: None,
                input,
                output,
                analyser: None,
            },
        );
        self.order_dirty = true;
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Removes a node. Nodes that fed into it become disconnected.
    ///
    /// Returns false if the node was already gone. The destination cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> bool {
        if id == self.destination {
            return false;
        }
        if self.nodes.remove(&id).is_none() {
            return false;
        }
        for slot in self.nodes.values_mut() {
            if slot.destination == Some(id) {
                slot.destination = None;
            }
        }
        self.order_dirty = true;
        true
    }

    /// Routes `source`'s output into `target`, replacing any previous destination.
    pub fn connect(&mut self, source: NodeId, target: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&target) {
            return Err(ChorusError::Graph(format!("Target {} does not exist", target)));
        }
        if source == self.destination {
            return Err(ChorusError::Graph(
                "The mix destination cannot feed another node".to_string(),
            ));
        }
        if !self.nodes.contains_key(&source) {
            return Err(ChorusError::Graph(format!("Source {} does not exist", source)));
        }

        let mut cursor = Some(target);
        while let Some(id) = cursor {
            if id == source {
                return Err(ChorusError::Graph(format!(
                    "Connecting {} to {} would create a cycle",
                    source, target
                )));
            }
            cursor = self.nodes.get(&id).and_then(|slot| slot.destination);
        }

        if let Some(slot) = self.nodes.get_mut(&source) {
            slot.destination = Some(target);
        }
        self.order_dirty = true;
        Ok(())
    }

    /// Detaches `source` from its destination. Missing nodes are ignored.
    pub fn disconnect(&mut self, source: NodeId) {
        if let Some(slot) = self.nodes.get_mut(&source) {
            if slot.destination.take().is_some() {
                self.order_dirty = true;
            }
        }
    }

    pub fn destination_of(&self, source: NodeId) -> Option<NodeId> {
        self.nodes.get(&source).and_then(|slot| slot.destination)
    }

    pub fn node<T: AudioNode>(&self, id: NodeId) -> Option<&T> {
        self.nodes
            .get(&id)
            .and_then(|slot| slot.node.as_any().downcast_ref::<T>())
    }

    pub fn node_mut<T: AudioNode>(&mut self, id: NodeId) -> Option<&mut T> {
        self.nodes
            .get_mut(&id)
            .and_then(|slot| slot.node.as_any_mut().downcast_mut::<T>())
    }

    /// Starts capturing the last `size` samples of `id`'s output.
    pub fn attach_analyser(&mut self, id: NodeId, size: usize) -> Result<()> {
        let slot = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ChorusError::Graph(format!("Node {} does not exist", id)))?;
        slot.analyser = Some(Analyser::new(size));
        Ok(())
    }

    pub fn detach_analyser(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(&id) {
            slot.analyser = None;
        }
    }

    /// Copies the analyser window of `id` into `out`. False if there is none.
    pub fn analyser_snapshot(&self, id: NodeId, out: &mut [f32]) -> bool {
        match self.nodes.get(&id).and_then(|slot| slot.analyser.as_ref()) {
            Some(analyser) => {
                analyser.snapshot(out);
                true
            }
            None => false,
        }
    }

    /// Renders one block and returns the planar stereo mix.
    pub fn render_block(&mut self) -> &[f32] {
        if self.order_dirty {
            self.rebuild_order();
        }

        let ctx = RenderContext {
            sample_rate: self.sample_rate,
            frames: self.block_size,
            listener: self.listener,
            time: self.current_time(),
        };
        let frames = self.block_size;

        for slot in self.nodes.values_mut() {
            slot.input.fill(0.0);
        }

        for id in &self.order {
            let Some(slot) = self.nodes.get_mut(id) else {
                continue;
            };
            slot.node.process(&ctx, &slot.input, &mut slot.output);
            let out_channels = slot.node.output_channels();
            if let Some(analyser) = slot.analyser.as_mut() {
                analyser.capture(&slot.output, out_channels, frames);
            }

            let Some(target) = slot.destination else {
                continue;
            };
            let output = std::mem::take(&mut slot.output);
            if let Some(dest) = self.nodes.get_mut(&target) {
                let in_channels = dest.node.input_channels();
                mix_into(&mut dest.input, in_channels, &output, out_channels, frames);
            }
            if let Some(slot) = self.nodes.get_mut(id) {
                slot.output = output;
            }
        }

        self.frames_rendered += frames as u64;
        self.nodes
            .get(&self.destination)
            .map(|slot| slot.output.as_slice())
            .unwrap_or(&[])
    }

    /// Renders one block interleaved for a device with `channels` outputs.
    ///
    /// `out` must hold `block_size * channels` samples. Mono devices get the
    /// average of both sides; channels past the second are silent.
    pub fn render_interleaved(&mut self, channels: u16, out: &mut [f32]) {
        let frames = self.block_size;
        let channels = channels as usize;
        let mix = self.render_block();
        if mix.len() < frames * 2 {
            out.fill(0.0);
            return;
        }
        let (left, right) = mix.split_at(frames);

        for (i, frame) in out.chunks_mut(channels).take(frames).enumerate() {
            match channels {
                0 => {}
                1 => frame[0] = 0.5 * (left[i] + right[i]),
                _ => {
                    frame[0] = left[i];
                    frame[1] = right[i];
                    for extra in frame.iter_mut().skip(2) {
                        *extra = 0.0;
                    }
                }
            }
        }
    }

    /// Orders reachable nodes deepest-first so every node runs after all of its inputs.
    fn rebuild_order(&mut self) {
        let mut depths: Vec<(usize, NodeId)> = Vec::with_capacity(self.nodes.len());
        for &id in self.nodes.keys() {
            if let Some(depth) = self.depth_of(id) {
                depths.push((depth, id));
            }
        }
        depths.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        self.order = depths.into_iter().map(|(_, id)| id).collect();
        self.order_dirty = false;

        log::debug!(
            "Graph order rebuilt: {} of {} nodes reachable",
            self.order.len(),
            self.nodes.len()
        );
    }

    fn depth_of(&self, id: NodeId) -> Option<usize> {
        let mut depth = 0;
        let mut cursor = id;
        while cursor != self.destination {
            cursor = self.nodes.get(&cursor)?.destination?;
            depth += 1;
            if depth > self.nodes.len() {
                return None;
            }
        }
        Some(depth)
    }
}
