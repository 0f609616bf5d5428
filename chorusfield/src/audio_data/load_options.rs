/// Defines how to handle channel conversion during clip loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConvertToMono {
    /// Keep original channels: stereo if input is stereo, mono if input is mono.
    #[default]
    Original,

    /// Force mono: channels are averaged together.
    ///
    /// Spatialized clips are always loaded this way, since panning a stereo
    /// signal has no well-defined position.
    ForceMono,
}

/// Options for controlling clip decoding.
///
/// ```no_run
/// # use chorusfield::audio_data::{LoadOptions, ConvertToMono};
/// let options = LoadOptions::new()
///     .convert_to_mono(ConvertToMono::ForceMono)
///     .target_sample_rate(48000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// How to handle mono conversion during loading.
    pub convert_to_mono: ConvertToMono,
    /// Resample to this rate after decoding (None keeps the file's rate).
    pub target_sample_rate: Option<u32>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert_to_mono(mut self, convert: ConvertToMono) -> Self {
        self.convert_to_mono = convert;
        self
    }

    pub fn target_sample_rate(mut self, rate: u32) -> Self {
        self.target_sample_rate = Some(rate);
        self
    }
}
