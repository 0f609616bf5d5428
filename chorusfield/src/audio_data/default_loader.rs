use crate::audio_data::{AudioDataLoader, ClipData, ConvertToMono, LoadOptions};
use crate::error::{ChorusError, Result};
use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

/// Symphonia-backed loader (WAV, FLAC, OGG/Vorbis, ...).
///
/// Decodes to interleaved f32, then applies the mono conversion and
/// resampling requested in [`LoadOptions`].
pub struct DefaultAudioLoader;

impl DefaultAudioLoader {
    /// Decodes an in-memory file, e.g. a clip fetched over the network.
    /// `extension` is only a format hint.
    pub fn load_bytes(
        &self,
        bytes: Vec<u8>,
        extension: Option<&str>,
        options: &LoadOptions,
    ) -> Result<Arc<ClipData>> {
        let clip = decode(Box::new(Cursor::new(bytes)), extension)?;
        finish(clip, options)
    }
}

impl AudioDataLoader for DefaultAudioLoader {
    fn load(&self, path: &str, options: &LoadOptions) -> Result<Arc<ClipData>> {
        let file = File::open(path)?;
        let extension = Path::new(path).extension().and_then(|e| e.to_str());
        let clip = decode(Box::new(file), extension)?;
        finish(clip, options)
    }
}

fn loading_error(context: &str, e: SymphoniaError) -> ChorusError {
    ChorusError::AudioLoading(format!("{}: {}", context, e))
}

fn open_track(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<(Box<dyn FormatReader>, Box<dyn Decoder>, u32, u16)> {
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let stream = MediaSourceStream::new(source, Default::default());
    let probed = get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| loading_error("Unrecognized audio format", e))?;
    let format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| ChorusError::AudioLoading("File has no audio track".to_string()))?;
    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| ChorusError::AudioLoading("Track has no sample rate".to_string()))?;
    let channels = params
        .channels
        .map(|c| c.count() as u16)
        .ok_or_else(|| ChorusError::AudioLoading("Track has no channel layout".to_string()))?;

    let decoder = get_codecs()
        .make(params, &DecoderOptions::default())
        .map_err(|e| loading_error("Unsupported codec", e))?;

    Ok((format, decoder, sample_rate, channels))
}

fn decode(source: Box<dyn MediaSource>, extension: Option<&str>) -> Result<ClipData> {
    let (mut format, mut decoder, sample_rate, channels) = open_track(source, extension)?;
    let mut samples = Vec::new();
    let mut scratch: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(loading_error("Failed to read packet", e)),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("Skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(loading_error("Failed to decode packet", e)),
        };

        let spec = *decoded.spec();
        let needed = decoded.capacity() * spec.channels.count();
        if scratch.as_ref().is_none_or(|b| b.capacity() < needed) {
            scratch = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
        }
        if let Some(buffer) = scratch.as_mut() {
            buffer.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buffer.samples());
        }
    }

    if samples.is_empty() {
        return Err(ChorusError::AudioLoading("File decoded to no samples".to_string()));
    }
    Ok(ClipData::new(samples, sample_rate, channels))
}

fn finish(mut clip: ClipData, options: &LoadOptions) -> Result<Arc<ClipData>> {
    if options.convert_to_mono == ConvertToMono::ForceMono {
        clip = clip.to_mono();
    }
    if let Some(rate) = options.target_sample_rate {
        clip = clip.resample(rate)?;
    }
    Ok(Arc::new(clip))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn decodes_stereo_wav_and_downmixes() {
        let samples: Vec<i16> = [16384, 0].repeat(480);
        let options = LoadOptions::new().convert_to_mono(ConvertToMono::ForceMono);
        let clip = DefaultAudioLoader
            .load_bytes(wav_bytes(48000, 2, &samples), Some("wav"), &options)
            .unwrap();
        assert_eq!(clip.channels(), 1);
        assert_eq!(clip.total_frames(), 480);
        assert!((clip.samples()[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn garbage_is_a_loading_error() {
        let result =
            DefaultAudioLoader.load_bytes(vec![7; 64], Some("wav"), &LoadOptions::default());
        assert!(matches!(result, Err(ChorusError::AudioLoading(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = DefaultAudioLoader.load("/nonexistent/ping.ogg", &LoadOptions::default());
        assert!(matches!(result, Err(ChorusError::Io(_))));
    }
}
