use super::AudioProperties;

/// Configuration descriptor for an [`AudioManager`](crate::AudioManager)
#[derive(Debug, Clone)]
pub struct ChorusConfig {
    /// Sample rate of the audio graph (clips are resampled to it)
    pub sample_rate: u32,
    /// Number of frames rendered per graph block. The ambisonic tier processes
    /// exactly this many frames per call.
    pub block_size: usize,
    /// Number of output channels (typically 2 for stereo)
    pub channels: u16,
    /// Analyser window for voice activity detection; must be a power of two
    pub fft_size: usize,
    /// Capacity, in frames, of each participant's voice stream queue
    pub voice_buffer_frames: usize,
    /// Optional path to a custom HRTF SOFA file (None uses Steam Audio's default HRTF)
    pub hrtf_path: Option<String>,
    /// Allow the ambisonic tier to be probed
    pub enable_ambisonics: bool,
    /// Distance and smoothing defaults applied to new sources
    pub properties: AudioProperties,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 512,
            channels: 2,
            fft_size: 1024,
            voice_buffer_frames: 48000,
            hrtf_path: None,
            enable_ambisonics: true,
            properties: AudioProperties::default(),
        }
    }
}

impl ChorusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn fft_size(mut self, size: usize) -> Self {
        self.fft_size = size;
        self
    }

    pub fn voice_buffer_frames(mut self, frames: usize) -> Self {
        self.voice_buffer_frames = frames;
        self
    }

    pub fn hrtf_path(mut self, path: impl Into<String>) -> Self {
        self.hrtf_path = Some(path.into());
        self
    }

    pub fn enable_ambisonics(mut self, enable: bool) -> Self {
        self.enable_ambisonics = enable;
        self
    }

    pub fn properties(mut self, properties: AudioProperties) -> Self {
        self.properties = properties;
        self
    }
}
