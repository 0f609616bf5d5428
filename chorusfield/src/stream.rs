//! Decoded voice feeds handed over by the transport layer.

use crate::graph::{AudioNode, RenderContext};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::any::Any;

/// Transport side of a voice stream. Push decoded mono PCM at the graph rate.
pub struct VoiceStreamWriter {
    producer: HeapProd<f32>,
}

impl VoiceStreamWriter {
    /// Queues samples; returns how many fit. Excess samples are dropped.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let written = self.producer.push_slice(samples);
        if written < samples.len() {
            log::debug!(
                "Voice stream full, dropped {} samples",
                samples.len() - written
            );
        }
        written
    }

    pub fn free_len(&self) -> usize {
        self.producer.vacant_len()
    }
}

/// Graph side of a voice stream, consumed by [`set_user_stream`](crate::AudioManager::set_user_stream).
pub struct VoiceStream {
    consumer: HeapCons<f32>,
}

impl VoiceStream {
    /// Creates a single-producer/single-consumer feed holding `capacity` samples.
    pub fn channel(capacity: usize) -> (VoiceStreamWriter, VoiceStream) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        (VoiceStreamWriter { producer }, VoiceStream { consumer })
    }

    pub fn queued_len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub(crate) fn into_node(self) -> StreamInputNode {
        StreamInputNode {
            consumer: self.consumer,
            underruns: 0,
        }
    }
}

/// Graph source node that drains a [`VoiceStream`]. Missing samples render as silence.
pub struct StreamInputNode {
    consumer: HeapCons<f32>,
    underruns: u64,
}

impl StreamInputNode {
    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

impl AudioNode for StreamInputNode {
    fn input_channels(&self) -> usize {
        0
    }

    fn output_channels(&self) -> usize {
        1
    }

    fn process(&mut self, ctx: &RenderContext, _input: &[f32], output: &mut [f32]) {
        let frames = ctx.frames.min(output.len());
        let read = self.consumer.pop_slice(&mut output[..frames]);
        if read < frames {
            output[read..frames].fill(0.0);
            if read > 0 {
                self.underruns += 1;
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
