use crate::math::Pose;
use std::any::Any;

/// Per-block state every node sees while rendering.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext {
    pub sample_rate: u32,
    /// Frames in this block
    pub frames: usize,
    /// Listener pose the spatializing nodes render against
    pub listener: Pose,
    /// Graph clock at the start of the block, in seconds
    pub time: f64,
}

/// A processing unit in the [`AudioGraph`](super::AudioGraph).
///
/// # Data Format
/// Both `input` and `output` are **PLANAR**: channel `c` occupies
/// `[c * frames, (c + 1) * frames)`. This matches the buffer layout Steam Audio
/// expects, so ambisonic nodes can hand slices straight through.
pub trait AudioNode: Any + Send {
    /// Channels this node accepts from its inputs; 0 for pure sources.
    fn input_channels(&self) -> usize {
        2
    }

    fn output_channels(&self) -> usize {
        2
    }

    fn process(&mut self, ctx: &RenderContext, input: &[f32], output: &mut [f32]);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A scalar parameter that ramps linearly to its target over one block.
///
/// Setting the target between blocks removes the zipper noise a hard jump
/// would produce.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Param {
    current: f32,
    target: f32,
}

impl Param {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
        }
    }

    pub fn value(&self) -> f32 {
        self.target
    }

    /// Ramp to `value` during the next block.
    pub fn set(&mut self, value: f32) {
        self.target = value;
    }

    /// Jump to `value` with no ramp.
    pub fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    /// Returns `(start, end)` for the block being rendered and lands on the target.
    pub fn advance(&mut self) -> (f32, f32) {
        let start = self.current;
        self.current = self.target;
        (start, self.target)
    }
}

/// Sums `src` (with `src_channels`) into `dest` (with `dest_channels`).
///
/// Mono fans out to every destination channel, stereo folds down to mono by
/// averaging, and any other mismatch maps channel-to-channel.
pub fn mix_into(
    dest: &mut [f32],
    dest_channels: usize,
    src: &[f32],
    src_channels: usize,
    frames: usize,
) {
    if dest_channels == 0 || src_channels == 0 {
        return;
    }

    if src_channels == dest_channels {
        for (d, s) in dest.iter_mut().zip(src.iter()) {
            *d += *s;
        }
    } else if src_channels == 1 {
        for ch in 0..dest_channels {
            let d = &mut dest[ch * frames..(ch + 1) * frames];
            for (d, s) in d.iter_mut().zip(&src[..frames]) {
                *d += *s;
            }
        }
    } else if dest_channels == 1 {
        let scale = 1.0 / src_channels as f32;
        for ch in 0..src_channels {
            let s = &src[ch * frames..(ch + 1) * frames];
            for (d, s) in dest[..frames].iter_mut().zip(s) {
                *d += *s * scale;
            }
        }
    } else {
        for ch in 0..dest_channels.min(src_channels) {
            let range = ch * frames..(ch + 1) * frames;
            for (d, s) in dest[range.clone()].iter_mut().zip(&src[range]) {
                *d += *s;
            }
        }
    }
}

/// Averages a planar buffer down to one channel.
pub fn downmix_mono(src: &[f32], channels: usize, frames: usize, out: &mut [f32]) {
    out[..frames].fill(0.0);
    if channels == 0 {
        return;
    }
    let scale = 1.0 / channels as f32;
    for ch in 0..channels {
        for (o, s) in out[..frames]
            .iter_mut()
            .zip(&src[ch * frames..(ch + 1) * frames])
        {
            *o += *s * scale;
        }
    }
}
