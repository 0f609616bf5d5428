//! Voice activity detection on a user's input signal.

use crate::error::{ChorusError, Result};
use crate::graph::{AudioGraph, NodeId};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

pub const DEFAULT_FFT_SIZE: usize = 1024;
const SMOOTHING: f32 = 0.8;
const MIN_DECIBELS: f32 = -140.0;
const SPEECH_LOW_HZ: f32 = 85.0;
const SPEECH_HIGH_HZ: f32 = 255.0;
const ACTIVE_ENERGY: f32 = 0.5;
const MAX_COUNTER: u32 = 60;
const ACTIVE_COUNTER: u32 = 5;

/// Periodic Blackman window, the one browser analysers use.
fn blackman_window(n: usize) -> Vec<f32> {
    let two_pi = std::f32::consts::PI * 2.0;
    (0..n)
        .map(|i| {
            let phi = two_pi * i as f32 / n as f32;
            0.42 - 0.5 * phi.cos() + 0.08 * (2.0 * phi).cos()
        })
        .collect()
}

/// Debounced speaking detector for one user.
///
/// Each sample measures the mean level of the 85–255 Hz band and moves a
/// counter up or down by one. The user counts as active while the counter
/// is above 5, so brief blips and gaps never flip the state.
pub struct ActivityDetector {
    id: String,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    time_domain: Vec<f32>,
    spectrum: Vec<Complex32>,
    smoothed: Vec<f32>,
    decibels: Vec<f32>,
    band: (usize, usize),
    counter: u32,
    was_active: bool,
}

impl ActivityDetector {
    pub fn new(id: impl Into<String>, sample_rate: u32, fft_size: usize) -> Result<Self> {
        if fft_size < 2 || !fft_size.is_power_of_two() {
            return Err(ChorusError::Configuration(format!(
                "FFT size must be a power of two, got {}",
                fft_size
            )));
        }
        if sample_rate == 0 {
            return Err(ChorusError::Configuration(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        let bin_count = fft_size / 2;
        let nyquist = sample_rate as f32 / 2.0;
        let bin_of = |hz: f32| ((hz / nyquist * bin_count as f32).round() as usize).min(bin_count - 1);

        let mut planner = FftPlanner::<f32>::new();
        Ok(Self {
            id: id.into(),
            fft_size,
            fft: planner.plan_fft_forward(fft_size),
            window: blackman_window(fft_size),
            time_domain: vec![0.0; fft_size],
            spectrum: vec![Complex32::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; bin_count],
            decibels: vec![MIN_DECIBELS; bin_count],
            band: (bin_of(SPEECH_LOW_HZ), bin_of(SPEECH_HIGH_HZ)),
            counter: 0,
            was_active: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Inclusive bin range of the speech band.
    pub fn speech_band(&self) -> (usize, usize) {
        self.band
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn is_active(&self) -> bool {
        self.was_active
    }

    /// Smoothed spectrum in dB from the last analysis.
    pub fn decibels(&self) -> &[f32] {
        &self.decibels
    }

    /// Reads the analyser window on `node` and samples it.
    ///
    /// Returns the new state when it flipped. Missing taps count as silence.
    pub fn sample(&mut self, graph: &AudioGraph, node: NodeId) -> Option<bool> {
        self.capture(graph, node);
        self.process_captured()
    }

    /// Copies the analyser window on `node` without analysing it, so the
    /// graph can be released before [`process_captured`](Self::process_captured).
    pub fn capture(&mut self, graph: &AudioGraph, node: NodeId) {
        if !graph.analyser_snapshot(node, &mut self.time_domain) {
            self.time_domain.fill(0.0);
        }
    }

    /// Analyses the last captured window and applies one hysteresis step.
    pub fn process_captured(&mut self) -> Option<bool> {
        self.analyse();
        let decibels = std::mem::take(&mut self.decibels);
        let changed = self.sample_magnitudes(&decibels);
        self.decibels = decibels;
        changed
    }

    /// Samples a raw window of time-domain audio, most recent last.
    pub fn sample_time_domain(&mut self, samples: &[f32]) -> Option<bool> {
        let n = samples.len().min(self.fft_size);
        self.time_domain.fill(0.0);
        let offset = self.fft_size - n;
        self.time_domain[offset..].copy_from_slice(&samples[samples.len() - n..]);
        self.process_captured()
    }

    /// Applies one hysteresis step to a dB spectrum snapshot.
    ///
    /// Returns `Some(is_active)` only when the state flips.
    pub fn sample_magnitudes(&mut self, decibels: &[f32]) -> Option<bool> {
        let energy = self.speech_energy(decibels);
        if energy >= ACTIVE_ENERGY {
            self.counter = (self.counter + 1).min(MAX_COUNTER);
        } else {
            self.counter = self.counter.saturating_sub(1);
        }

        let is_active = self.counter > ACTIVE_COUNTER;
        if is_active != self.was_active {
            self.was_active = is_active;
            log::debug!("{} is {}", self.id, if is_active { "speaking" } else { "quiet" });
            Some(is_active)
        } else {
            None
        }
    }

    /// `1.1 + mean_db / 100` over the speech band; roughly 0 for silence
    /// and above 0.5 for normal speech.
    pub fn speech_energy(&self, decibels: &[f32]) -> f32 {
        let (low, high) = self.band;
        let high = high.min(decibels.len().saturating_sub(1));
        if decibels.is_empty() || low > high {
            return 1.1 + MIN_DECIBELS / 100.0;
        }
        let band = &decibels[low..=high];
        let mean = band.iter().sum::<f32>() / band.len() as f32;
        1.1 + mean / 100.0
    }

    fn analyse(&mut self) {
        for ((bin, sample), w) in self
            .spectrum
            .iter_mut()
            .zip(&self.time_domain)
            .zip(&self.window)
        {
            *bin = Complex32::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.spectrum);

        let scale = 1.0 / self.fft_size as f32;
        for ((smoothed, db), bin) in self
            .smoothed
            .iter_mut()
            .zip(self.decibels.iter_mut())
            .zip(&self.spectrum)
        {
            let magnitude = bin.norm() * scale;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
            *db = if *smoothed > 0.0 {
                (20.0 * smoothed.log10()).max(MIN_DECIBELS)
            } else {
                MIN_DECIBELS
            };
        }
    }
}

impl std::fmt::Debug for ActivityDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityDetector")
            .field("id", &self.id)
            .field("fft_size", &self.fft_size)
            .field("counter", &self.counter)
            .field("active", &self.was_active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BufferPlayerNode;

    fn detector() -> ActivityDetector {
        ActivityDetector::new("alice", 48000, DEFAULT_FFT_SIZE).unwrap()
    }

    fn snapshot(db: f32) -> Vec<f32> {
        vec![db; DEFAULT_FFT_SIZE / 2]
    }

    #[test]
    fn rejects_non_power_of_two() {
        assert!(ActivityDetector::new("a", 48000, 1000).is_err());
        assert!(ActivityDetector::new("a", 0, 1024).is_err());
    }

    #[test]
    fn speech_band_bins() {
        // 46.875 Hz per bin at 48 kHz / 1024
        assert_eq!(detector().speech_band(), (2, 5));
    }

    #[test]
    fn sustained_speech_turns_on_after_six_samples() {
        let mut d = detector();
        let loud = snapshot(-30.0);
        for _ in 0..5 {
            assert_eq!(d.sample_magnitudes(&loud), None);
        }
        assert_eq!(d.sample_magnitudes(&loud), Some(true));
        assert!(d.is_active());
        for _ in 0..100 {
            assert_eq!(d.sample_magnitudes(&loud), None);
        }
        assert_eq!(d.counter(), 60);
    }

    #[test]
    fn rapid_toggling_never_flips() {
        let mut d = detector();
        let loud = snapshot(-30.0);
        let quiet = snapshot(-140.0);
        for i in 0..200 {
            let frame = if i % 2 == 0 { &loud } else { &quiet };
            assert_eq!(d.sample_magnitudes(frame), None);
        }
        assert!(!d.is_active());
    }

    #[test]
    fn silence_after_speech_turns_off_once() {
        let mut d = detector();
        let loud = snapshot(-30.0);
        let quiet = snapshot(-140.0);
        for _ in 0..60 {
            d.sample_magnitudes(&loud);
        }
        let mut flips = Vec::new();
        for _ in 0..60 {
            if let Some(state) = d.sample_magnitudes(&quiet) {
                flips.push(state);
            }
        }
        assert_eq!(flips, vec![false]);
        assert_eq!(d.counter(), 0);
    }

    #[test]
    fn sine_in_speech_band_is_detected() {
        let mut d = detector();
        let tone: Vec<f32> = (0..DEFAULT_FFT_SIZE)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 150.0 * i as f32 / 48000.0).sin())
            .collect();
        let mut became_active = false;
        for _ in 0..30 {
            if d.sample_time_domain(&tone) == Some(true) {
                became_active = true;
            }
        }
        assert!(became_active);

        let silence = vec![0.0; DEFAULT_FFT_SIZE];
        for _ in 0..200 {
            d.sample_time_domain(&silence);
        }
        assert!(!d.is_active());
    }

    #[test]
    fn captured_window_matches_direct_sampling() {
        let tone: Vec<f32> = (0..DEFAULT_FFT_SIZE)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 150.0 * i as f32 / 48000.0).sin())
            .collect();
        let mut graph = AudioGraph::new(48000, DEFAULT_FFT_SIZE);
        let clip = Arc::new(crate::audio_data::ClipData::new(tone, 48000, 1));
        let player = graph.add_node(Box::new(BufferPlayerNode::new(clip, true, 1.0)));
        let destination = graph.destination();
        graph.connect(player, destination).unwrap();
        graph.attach_analyser(player, DEFAULT_FFT_SIZE).unwrap();
        graph.render_block();

        let mut direct = detector();
        let mut split = detector();
        for _ in 0..10 {
            let a = direct.sample(&graph, node);
            split.capture(&graph, node);
            // the graph is no longer needed once captured
            let b = split.process_captured();
            assert_eq!(a, b);
        }
        assert_eq!(direct.decibels(), split.decibels());
        assert!(split.is_active());
    }
}
