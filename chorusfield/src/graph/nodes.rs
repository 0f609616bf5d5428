//! Built-in nodes: the mix destination, gain control and clip playback.

use super::node::{AudioNode, Param, RenderContext};
use crate::audio_data::ClipData;
use std::any::Any;
use std::sync::Arc;

/// Root of the graph. Everything that should be heard ends up here.
pub struct DestinationNode;

impl AudioNode for DestinationNode {
    fn process(&mut self, _ctx: &RenderContext, input: &[f32], output: &mut [f32]) {
        output.copy_from_slice(input);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Scales its input by a ramped gain.
pub struct GainNode {
    gain: Param,
}

impl GainNode {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: Param::new(gain),
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain.value()
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain.set(gain);
    }

    pub fn set_gain_immediate(&mut self, gain: f32) {
        self.gain.set_immediate(gain);
    }
}

impl AudioNode for GainNode {
    fn process(&mut self, ctx: &RenderContext, input: &[f32], output: &mut [f32]) {
        let (start, end) = self.gain.advance();
        let frames = ctx.frames;
        let step = if frames > 0 {
            (end - start) / frames as f32
        } else {
            0.0
        };

        for (ch_in, ch_out) in input.chunks(frames).zip(output.chunks_mut(frames)) {
            for (i, (s, o)) in ch_in.iter().zip(ch_out.iter_mut()).enumerate() {
                *o = *s * (start + step * i as f32);
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

/// Plays one decoded clip from start to end (or forever when looped).
///
/// Clip data is interleaved; the player writes planar stereo. Mono clips are
/// duplicated to both channels.
pub struct BufferPlayerNode {
    data: Arc<ClipData>,
    cursor: usize,
    looped: bool,
    playing: bool,
    ended: bool,
    volume: Param,
}

impl BufferPlayerNode {
    pub fn new(data: Arc<ClipData>, looped: bool, volume: f32) -> Self {
        Self {
            data,
            cursor: 0,
            looped,
            playing: true,
            ended: false,
            volume: Param::new(volume),
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume.set(volume);
    }

    pub fn volume(&self) -> f32 {
        self.volume.value()
    }

    pub fn is_looped(&self) -> bool {
        self.looped
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.ended = true;
    }

    /// True once the clip ran out (non-looped) or was stopped.
    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn position_frames(&self) -> usize {
        self.cursor
    }
}

impl AudioNode for BufferPlayerNode {
    fn input_channels(&self) -> usize {
        0
    }

    fn process(&mut self, ctx: &RenderContext, _input: &[f32], output: &mut [f32]) {
        output.fill(0.0);
        let (start, end) = self.volume.advance();
        if !self.playing {
            return;
        }

        let frames = ctx.frames;
        let data = Arc::clone(&self.data);
        let channels = data.channels() as usize;
        let total = data.total_frames();
        if total == 0 || channels == 0 {
            self.stop();
            return;
        }

        let samples = data.samples();
        let step = (end - start) / frames.max(1) as f32;
        let (left, right) = output.split_at_mut(frames);

        for i in 0..frames {
            if self.cursor >= total {
                if self.looped {
                    self.cursor = 0;
                } else {
                    self.stop();
                    break;
                }
            }

            let gain = start + step * i as f32;
            let frame = &samples[self.cursor * channels..(self.cursor + 1) * channels];
            let l = frame[0];
            let r = if channels > 1 { frame[1] } else { l };
            left[i] = l * gain;
            right[i] = r * gain;
            self.cursor += 1;
        }

        if !self.looped && self.cursor >= total {
            self.stop();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Pose;

    fn ctx(frames: usize) -> RenderContext {
        RenderContext {
            sample_rate: 48000,
            frames,
            listener: Pose::resting(),
            time: 0.0,
        }
    }

    #[test]
    fn gain_ramps_across_block() {
        let mut node = GainNode::new(1.0);
        node.set_gain(0.0);
        let input = vec![1.0; 8];
        let mut output = vec![0.0; 8];
        node.process(&ctx(4), &input, &mut output);
        assert_eq!(output[0], 1.0);
        assert!(output[3] < output[0]);

        node.process(&ctx(4), &input, &mut output);
        assert!(output.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn one_shot_player_ends() {
        let data = Arc::new(ClipData::new(vec![0.5; 6], 48000, 1));
        let mut player = BufferPlayerNode::new(data, false, 1.0);
        let mut output = vec![0.0; 8];
        player.process(&ctx(4), &[], &mut output);
        assert!(!player.has_ended());
        player.process(&ctx(4), &[], &mut output);
        assert!(player.has_ended());
        assert_eq!(&output[..4], &[0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn looped_player_wraps() {
        let data = Arc::new(ClipData::new(vec![1.0, 2.0, 3.0], 48000, 1));
        let mut player = BufferPlayerNode::new(data, true, 1.0);
        let mut output = vec![0.0; 10];
        player.process(&ctx(5), &[], &mut output);
        assert_eq!(&output[..5], &[1.0, 2.0, 3.0, 1.0, 2.0]);
        assert!(!player.has_ended());
    }
}
