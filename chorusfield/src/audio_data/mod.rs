mod batch_resampler;
mod clip_loader;
mod default_loader;
mod load_options;
mod loader;

use crate::error::{ChorusError, Result};
pub use batch_resampler::BatchResampler;
pub use clip_loader::{ClipLoader, PendingClip};
pub use default_loader::DefaultAudioLoader;
pub use load_options::{ConvertToMono, LoadOptions};
pub use loader::AudioDataLoader;
use std::sync::Arc;
use std::time::Duration;

/// Decoded clip audio with reference-counted sharing.
///
/// # Data Format
/// Samples are **INTERLEAVED**: stereo is `[L0, R0, L1, R1, ...]`, mono is
/// `[M0, M1, ...]`. Every overlapping play of a clip reads the same buffer.
#[derive(Debug, Clone)]
pub struct ClipData {
    inner: Arc<ClipDataInner>,
}

#[derive(Debug)]
struct ClipDataInner {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    duration: Duration,
    total_frames: usize,
}

impl ClipData {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let total_frames = samples.len() / channels as usize;
        let duration = if sample_rate > 0 {
            Duration::from_secs_f64(total_frames as f64 / sample_rate as f64)
        } else {
            Duration::ZERO
        };
        Self {
            inner: Arc::new(ClipDataInner {
                samples,
                sample_rate,
                channels,
                duration,
                total_frames,
            }),
        }
    }

    /// Load clip data from a file path using the default loader.
    pub fn from_path(path: &str) -> Result<Arc<Self>> {
        DefaultAudioLoader.load(path, &LoadOptions::default())
    }

    /// Load clip data from a file path with custom loading options.
    pub fn from_path_with_options(path: &str, options: &LoadOptions) -> Result<Arc<Self>> {
        DefaultAudioLoader.load(path, options)
    }

    /// Tries each path in order and returns the first that decodes.
    ///
    /// # Errors
    ///
    /// Returns [`ChorusError::LoadFailure`] listing every attempt when none succeed.
    pub fn from_paths<L: AudioDataLoader>(
        paths: &[String],
        loader: &L,
        options: &LoadOptions,
    ) -> Result<Arc<Self>> {
        if paths.is_empty() {
            return Err(ChorusError::LoadFailure("No source paths given".to_string()));
        }

        let mut failures = Vec::with_capacity(paths.len());
        for path in paths {
            match loader.load(path, options) {
                Ok(data) => {
                    log::info!(
                        "Loaded clip '{}' ({} ch, {} Hz, {:?})",
                        path,
                        data.channels(),
                        data.sample_rate(),
                        data.duration()
                    );
                    return Ok(data);
                }
                Err(e) => {
                    log::warn!("Could not load '{}': {}", path, e);
                    failures.push(format!("{}: {}", path, e));
                }
            }
        }
        Err(ChorusError::LoadFailure(failures.join("; ")))
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels
    }

    pub fn duration(&self) -> Duration {
        self.inner.duration
    }

    pub fn samples(&self) -> &[f32] {
        &self.inner.samples
    }

    pub fn total_frames(&self) -> usize {
        self.inner.total_frames
    }

    pub fn is_empty(&self) -> bool {
        self.inner.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.samples.len()
    }

    /// Convert to mono by downmixing all channels
    pub fn to_mono(&self) -> Self {
        if self.inner.channels == 1 {
            return self.clone();
        }

        let channels = self.inner.channels as usize;
        let mono_samples: Vec<f32> = self
            .inner
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        Self::new(mono_samples, self.inner.sample_rate, 1)
    }

    /// Resample to a different sample rate using rubato
    pub fn resample(&self, target_sample_rate: u32) -> Result<Self> {
        if target_sample_rate == self.inner.sample_rate {
            return Ok(self.clone());
        }

        let resampler = BatchResampler::new(
            self.inner.sample_rate,
            target_sample_rate,
            self.inner.channels,
            Some(1024),
        )?;

        let resampled = resampler.resample_interleaved(&self.inner.samples)?;
        Ok(Self::new(resampled, target_sample_rate, self.inner.channels))
    }
}
