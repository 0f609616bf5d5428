use super::AudioSource;
use crate::audio_data::ClipData;
use crate::config::AudioProperties;
use crate::error::{ChorusError, Result};
use crate::graph::{AudioGraph, BufferPlayerNode, NodeId};
use crate::spatial::EmitterSlot;
use std::sync::Arc;

/// One running play of a clip: a player node feeding its own emitter.
#[derive(Debug)]
pub struct ClipPlay {
    player: NodeId,
    emitter: EmitterSlot,
}

impl ClipPlay {
    pub fn player(&self) -> NodeId {
        self.player
    }

    pub fn emitter(&self) -> &EmitterSlot {
        &self.emitter
    }

    fn dispose(mut self, graph: &mut AudioGraph) {
        graph.remove(self.player);
        self.emitter.dispose(graph);
    }
}

/// A decoded sound effect that can be played several times at once.
///
/// The base source holds the clip's pose and a template emitter; every play
/// gets a fresh player node and a clone of the template, so overlapping
/// plays do not cut each other off.
#[derive(Debug)]
pub struct ClipSource {
    base: AudioSource,
    data: Arc<ClipData>,
    looped: bool,
    spatialize: bool,
    plays: Vec<ClipPlay>,
}

impl ClipSource {
    pub fn new(
        name: impl Into<String>,
        graph: &mut AudioGraph,
        data: Arc<ClipData>,
        looped: bool,
        spatialize: bool,
    ) -> Result<Self> {
        Ok(Self {
            base: AudioSource::new(name, graph)?,
            data,
            looped,
            spatialize,
            plays: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        self.base.id()
    }

    pub fn base(&self) -> &AudioSource {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut AudioSource {
        &mut self.base
    }

    pub fn data(&self) -> &Arc<ClipData> {
        &self.data
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    pub fn is_spatialized(&self) -> bool {
        self.spatialize
    }

    pub fn plays(&self) -> &[ClipPlay] {
        &self.plays
    }

    pub fn is_playing(&self) -> bool {
        !self.plays.is_empty()
    }

    /// Sets the template emitter cloned by later plays.
    pub fn set_spatializer(&mut self, graph: &mut AudioGraph, slot: EmitterSlot) -> Result<()> {
        self.base.set_spatializer(graph, slot)
    }

    /// Starts a new play at `volume`.
    ///
    /// A looped clip keeps a single play; calling this again only changes its
    /// volume.
    pub fn play(&mut self, graph: &mut AudioGraph, volume: f32) -> Result<()> {
        if self.looped {
            if let Some(play) = self.plays.first() {
                if let Some(player) = graph.node_mut::<BufferPlayerNode>(play.player) {
                    player.set_volume(volume);
                    return Ok(());
                }
            }
        }

        let mut emitter = self.base.spatializer().try_clone(graph)?;
        let pose = self.base.pose();
        let time = graph.current_time();
        emitter.update(graph, &pose, time);

        let target = match emitter.input(graph) {
            Some(target) => target,
            None => {
                emitter.dispose(graph);
                return Err(ChorusError::Graph(format!(
                    "Clip '{}' has no emitter input",
                    self.name()
                )));
            }
        };

        let player = graph.add_node(Box::new(BufferPlayerNode::new(
            Arc::clone(&self.data),
            self.looped,
            volume,
        )));
        if let Err(e) = graph.connect(player, target) {
            graph.remove(player);
            emitter.dispose(graph);
            return Err(e);
        }

        log::debug!(
            "Clip '{}' play started ({} active)",
            self.name(),
            self.plays.len() + 1
        );
        self.plays.push(ClipPlay { player, emitter });
        Ok(())
    }

    /// Stops and disposes every active play. The clip can be played again.
    pub fn stop(&mut self, graph: &mut AudioGraph) {
        for play in self.plays.drain(..) {
            play.dispose(graph);
        }
    }

    pub fn set_volume(&self, graph: &mut AudioGraph, volume: f32) {
        for play in &self.plays {
            if let Some(player) = graph.node_mut::<BufferPlayerNode>(play.player) {
                player.set_volume(volume);
            }
        }
    }

    /// Moves the clip and its plays, then reaps plays that finished.
    ///
    /// Returns how many plays ended on their own.
    pub fn update(&mut self, graph: &mut AudioGraph, time: f64) -> usize {
        self.base.update(graph, time);
        let pose = self.base.pose();
        for play in &mut self.plays {
            play.emitter.update(graph, &pose, time);
        }

        let mut ended = 0;
        let mut index = 0;
        while index < self.plays.len() {
            let finished = graph
                .node::<BufferPlayerNode>(self.plays[index].player)
                .is_none_or(BufferPlayerNode::has_ended);
            if finished {
                self.plays.swap_remove(index).dispose(graph);
                ended += 1;
            } else {
                index += 1;
            }
        }
        ended
    }

    pub fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
        self.base.set_audio_properties(graph, properties);
        for play in &mut self.plays {
            play.emitter.set_audio_properties(graph, properties);
        }
    }

    pub fn dispose(&mut self, graph: &mut AudioGraph) {
        self.stop(graph);
        self.base.dispose(graph);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::{GainListener, Listener};

    fn clip(frames: usize) -> Arc<ClipData> {
        Arc::new(ClipData::new(vec![0.5; frames], 48000, 1))
    }

    #[test]
    fn overlapping_plays_get_own_nodes() {
        let mut graph = AudioGraph::new(48000, 32);
        let mut source = ClipSource::new("ping", &mut graph, clip(4800), false, false).unwrap();
        source.play(&mut graph, 1.0).unwrap();
        source.play(&mut graph, 0.5).unwrap();
        assert_eq!(source.plays().len(), 2);
        assert_ne!(source.plays()[0].player(), source.plays()[1].player());
    }

    #[test]
    fn looped_clip_reuses_its_play() {
        let mut graph = AudioGraph::new(48000, 32);
        let mut source = ClipSource::new("music", &mut graph, clip(64), true, false).unwrap();
        source.play(&mut graph, 1.0).unwrap();
        source.play(&mut graph, 0.25).unwrap();
        assert_eq!(source.plays().len(), 1);
        let player = graph
            .node::<BufferPlayerNode>(source.plays()[0].player())
            .unwrap();
        assert_eq!(player.volume(), 0.25);
    }

    #[test]
    fn finished_plays_are_reaped() {
        let mut graph = AudioGraph::new(48000, 32);
        let mut source = ClipSource::new("ping", &mut graph, clip(40), false, false).unwrap();
        source.play(&mut graph, 1.0).unwrap();
        let player = source.plays()[0].player();

        graph.render_block();
        assert_eq!(source.update(&mut graph, 0.0), 0);
        graph.render_block();
        assert_eq!(source.update(&mut graph, 0.0), 1);
        assert!(!source.is_playing());
        assert!(!graph.contains(player));
    }

    #[test]
    fn spatialized_plays_clone_the_template() {
        let mut graph = AudioGraph::new(48000, 32);
        let listener = GainListener::new();
        let mut source = ClipSource::new("ping", &mut graph, clip(4800), false, true).unwrap();
        let template = listener
            .create_emitter(&mut graph, &AudioProperties::default())
            .unwrap();
        source
            .set_spatializer(&mut graph, EmitterSlot::Owned(template))
            .unwrap();
        let template_input = source.base().spatializer().input(&graph);

        source.play(&mut graph, 1.0).unwrap();
        let play = &source.plays()[0];
        let play_input = play.emitter().input(&graph);
        assert_ne!(play_input, template_input);
        assert_eq!(graph.destination_of(play.player()), play_input);

        let nodes_while_playing = graph.len();
        source.stop(&mut graph);
        assert_eq!(graph.len(), nodes_while_playing - 2);
        source.play(&mut graph, 1.0).unwrap();
        assert!(source.is_playing());
    }
}
