use crate::error::{ChorusError, Result};
use rubato::{FftFixedIn, Resampler};

const DEFAULT_CHUNK: usize = 1024;

/// Whole-clip sample rate conversion, run once when a clip is loaded.
///
/// All channels go through a single rubato resampler so they stay aligned.
/// The filter delay is removed and the resampler flushed, so the output is
/// exactly `round(frames * ratio)` frames and lines up with the input.
pub struct BatchResampler {
    source_sample_rate: u32,
    target_sample_rate: u32,
    channels: usize,
    chunk_size: usize,
}

impl BatchResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: u16,
        chunk_size: Option<usize>,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(ChorusError::AudioFormat(format!(
                "Cannot resample {} Hz to {} Hz",
                source_sample_rate, target_sample_rate
            )));
        }
        if channels == 0 {
            return Err(ChorusError::AudioFormat("Clip has no channels".to_string()));
        }

        Ok(Self {
            source_sample_rate,
            target_sample_rate,
            channels: channels as usize,
            chunk_size: chunk_size.unwrap_or(DEFAULT_CHUNK).max(1),
        })
    }

    /// Target rate over source rate.
    pub fn ratio(&self) -> f64 {
        self.target_sample_rate as f64 / self.source_sample_rate as f64
    }

    /// Resamples interleaved audio, returning interleaved audio.
    pub fn resample_interleaved(&self, interleaved: &[f32]) -> Result<Vec<f32>> {
        if self.source_sample_rate == self.target_sample_rate {
            return Ok(interleaved.to_vec());
        }

        let frames = interleaved.len() / self.channels;
        let planar = self.deinterleave(interleaved, frames);
        let output = self.resample_planar(&planar)?;

        let out_frames = output.iter().map(Vec::len).min().unwrap_or(0);
        let mut result = Vec::with_capacity(out_frames * self.channels);
        for frame in 0..out_frames {
            result.extend(output.iter().map(|channel| channel[frame]));
        }
        Ok(result)
    }

    fn deinterleave(&self, interleaved: &[f32], frames: usize) -> Vec<Vec<f32>> {
        let mut planar = vec![Vec::with_capacity(frames); self.channels];
        for frame in interleaved.chunks_exact(self.channels) {
            for (channel, sample) in planar.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        planar
    }

    fn resample_planar(&self, planar: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let mut resampler = FftFixedIn::<f32>::new(
            self.source_sample_rate as usize,
            self.target_sample_rate as usize,
            self.chunk_size,
            2,
            self.channels,
        )
        .map_err(|e| ChorusError::AudioLoading(format!("Failed to create resampler: {}", e)))?;

        let frames = planar.first().map_or(0, Vec::len);
        let expected = (frames as f64 * self.ratio()).round() as usize;
        // the filter delays its output; skip that much and flush for the tail
        let delay = resampler.output_delay();
        let wanted = delay + expected;
        let mut output = vec![Vec::with_capacity(wanted + self.chunk_size); self.channels];
        let mut chunk = vec![vec![0.0f32; self.chunk_size]; self.channels];

        let mut offset = 0;
        while offset < frames {
            let take = (frames - offset).min(self.chunk_size);
            for (buffer, channel) in chunk.iter_mut().zip(planar) {
                buffer[..take].copy_from_slice(&channel[offset..offset + take]);
                // zero-pad the last chunk
                buffer[take..].fill(0.0);
            }

            let waves = resampler
                .process(chunk.as_slice(), None)
                .map_err(|e| ChorusError::AudioLoading(format!("Resampling error: {}", e)))?;
            append(&mut output, waves);
            offset += take;
        }

        while output.first().map_or(0, Vec::len) < wanted {
            let waves = resampler
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| ChorusError::AudioLoading(format!("Resampling error: {}", e)))?;
            if waves.first().is_none_or(Vec::is_empty) {
                break;
            }
            append(&mut output, waves);
        }

        for channel in &mut output {
            channel.drain(..delay.min(channel.len()));
            channel.truncate(expected);
        }
        Ok(output)
    }
}

fn append(output: &mut [Vec<f32>], waves: Vec<Vec<f32>>) {
    for (out, wave) in output.iter_mut().zip(waves) {
        out.extend_from_slice(&wave);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_rates() {
        assert!(BatchResampler::new(0, 48000, 1, None).is_err());
        assert!(BatchResampler::new(44100, 48000, 0, None).is_err());
    }

    #[test]
    fn same_rate_is_passthrough() {
        let resampler = BatchResampler::new(48000, 48000, 2, None).unwrap();
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resampler.resample_interleaved(&input).unwrap(), input);
    }

    #[test]
    fn upsampling_scales_length() {
        let resampler = BatchResampler::new(24000, 48000, 1, Some(256)).unwrap();
        let output = resampler.resample_interleaved(&vec![0.0; 2400]).unwrap();
        assert_eq!(output.len(), 4800);
    }

    #[test]
    fn stereo_stays_interleaved() {
        let resampler = BatchResampler::new(44100, 48000, 2, Some(1024)).unwrap();
        let input: Vec<f32> = (0..4410).flat_map(|_| [0.5, -0.5]).collect();
        let output = resampler.resample_interleaved(&input).unwrap();
        assert_eq!(output.len(), 4800 * 2);
        // past the filter's warm-up, left stays positive and right negative
        let middle = &output[4000..4002];
        assert!(middle[0] > 0.0 && middle[1] < 0.0);
    }

    #[test]
    fn clip_tail_survives_resampling() {
        let resampler = BatchResampler::new(44100, 48000, 1, Some(1024)).unwrap();
        let output = resampler.resample_interleaved(&vec![0.5; 4410]).unwrap();
        assert_eq!(output.len(), 4800);
        // a constant clip keeps its level all the way through
        let mean = output.iter().sum::<f32>() / output.len() as f32;
        assert!((mean - 0.5).abs() < 0.01, "mean {}", mean);
    }

    #[test]
    fn output_is_not_delayed() {
        let resampler = BatchResampler::new(24000, 48000, 1, Some(256)).unwrap();
        let mut input = vec![0.0f32; 2400];
        input[1200..].fill(1.0);
        let output = resampler.resample_interleaved(&input).unwrap();
        // the step lands near frame 2400 of the output, not a filter delay later
        assert!(output[2300] < 0.1);
        assert!(output[2500] > 0.9);
    }
}
