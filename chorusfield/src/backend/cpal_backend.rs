use super::{AudioBackend, BackendState, DeviceInfo};
use crate::config::ChorusConfig;
use crate::error::{ChorusError, DeviceKind, Result};
use crate::graph::SharedGraph;
use crate::spatial::BackendCapabilities;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::HeapRb;
use ringbuf::traits::{Consumer, Observer, Producer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Output devices on the default host.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| ChorusError::AudioDevice(format!("Failed to enumerate devices: {}", e)))?;
    Ok(devices
        .filter_map(|d| d.name().ok())
        .map(|name| DeviceInfo {
            id: name.clone(),
            label: name,
            kind: DeviceKind::AudioOutput,
        })
        .collect())
}

/// Fixed graph blocks in, device-sized buffers out.
///
/// The ring grows the first time the device asks for more than it holds, so
/// any callback size is served in full. When the graph is busy the fill stops
/// and only what is already queued is played; silence is never queued.
pub struct OutputFifo {
    channels: u16,
    block: Vec<f32>,
    ring: HeapRb<f32>,
    scratch: Vec<f32>,
}

impl OutputFifo {
    pub fn new(channels: u16, block_size: usize) -> Self {
        let block_len = (block_size * channels as usize).max(1);
        Self {
            channels,
            block: vec![0.0; block_len],
            ring: HeapRb::new(block_len * 4),
            scratch: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Samples rendered but not yet played.
    pub fn queued(&self) -> usize {
        self.ring.occupied_len()
    }

    /// Renders until `wanted` interleaved samples are queued, then pops them.
    ///
    /// The tail is zero when the graph could not be locked.
    pub fn fill(&mut self, graph: &SharedGraph, wanted: usize, missed: &AtomicUsize) -> &[f32] {
        let block_len = self.block.len();
        if self.capacity() < wanted + block_len {
            self.grow((wanted + block_len).next_multiple_of(block_len) * 2);
        }

        while self.ring.occupied_len() < wanted && self.ring.vacant_len() >= block_len {
            match graph.try_lock() {
                Ok(mut graph) => graph.render_interleaved(self.channels, &mut self.block),
                Err(_) => {
                    missed.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }
            self.ring.push_slice(&self.block);
        }

        self.scratch.resize(wanted, 0.0);
        let read = self.ring.pop_slice(&mut self.scratch);
        self.scratch[read..].fill(0.0);
        &self.scratch
    }

    fn grow(&mut self, capacity: usize) {
        let mut ring = HeapRb::new(capacity);
        while let Some(sample) = self.ring.try_pop() {
            let _ = ring.try_push(sample);
        }
        self.ring = ring;
    }
}

/// Real-time output through cpal.
///
/// The device callback drains an [`OutputFifo`], so the device's buffer size
/// is free to differ from the graph's. The graph lock is only ever
/// `try_lock`ed there.
pub struct CpalBackend {
    sample_rate: u32,
    channels: u16,
    block_size: usize,
    device_name: Option<String>,
    graph: Option<SharedGraph>,
    stream: Option<cpal::Stream>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
    missed_blocks: Arc<AtomicUsize>,
}

impl CpalBackend {
    pub fn new(config: &ChorusConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            block_size: config.block_size,
            device_name: None,
            graph: None,
            stream: None,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
            missed_blocks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Frames delivered to the device since the first resume.
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Callbacks that found the graph busy on the tick thread and played short.
    pub fn missed_blocks(&self) -> usize {
        self.missed_blocks.load(Ordering::Relaxed)
    }

    fn open_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        if let Some(wanted) = &self.device_name {
            let mut devices = host.output_devices().map_err(|e| {
                ChorusError::AudioDevice(format!("Failed to enumerate devices: {}", e))
            })?;
            if let Some(device) = devices.find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
            {
                return Ok(device);
            }
            log::warn!("Output device '{}' not found, using default", wanted);
        }
        host.default_output_device()
            .ok_or_else(|| ChorusError::AudioDevice("No default output device available".into()))
    }

    fn start(&mut self) -> Result<()> {
        let graph = self
            .graph
            .clone()
            .ok_or_else(|| ChorusError::Graph("No graph attached to output".into()))?;

        let device = self.open_device()?;
        let default_config = device.default_output_config().map_err(|e| {
            ChorusError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        if default_config.sample_rate().0 != self.sample_rate {
            log::warn!(
                "Device prefers {} Hz; requesting {} Hz",
                default_config.sample_rate().0,
                self.sample_rate
            );
        }

        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config, graph)?,
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config, graph)?,
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config, graph)?,
            _ => {
                return Err(ChorusError::AudioFormat("Unsupported sample format".into()));
            }
        };

        stream
            .play()
            .map_err(|e| ChorusError::AudioDevice(format!("Failed to start stream: {}", e)))?;

        log::info!(
            "Output started on '{}' ({} Hz, {} channels)",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            self.sample_rate,
            self.channels
        );
        self.stream = Some(stream);
        self.is_running.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            self.is_running.store(false, Ordering::Relaxed);
            drop(stream);
            log::info!("Output stopped");
        }
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        graph: SharedGraph,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.channels;
        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();
        let missed_blocks = self.missed_blocks.clone();
        let mut fifo = OutputFifo::new(channels, self.block_size);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if !is_running.load(Ordering::Relaxed) {
                        for sample in data.iter_mut() {
                            *sample = T::from_sample(0.0f32);
                        }
                        return;
                    }

                    let samples = fifo.fill(&graph, data.len(), &missed_blocks);
                    for (out, sample) in data.iter_mut().zip(samples) {
                        *out = T::from_sample(*sample);
                    }
                    frames_processed.fetch_add(data.len() / channels as usize, Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| ChorusError::AudioDevice(format!("Failed to build stream: {}", e)))?;

        Ok(stream)
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn state(&self) -> BackendState {
        if self.stream.is_some() && self.is_running.load(Ordering::Relaxed) {
            BackendState::Running
        } else {
            BackendState::Suspended
        }
    }

    fn resume(&mut self) -> Result<()> {
        if self.state() == BackendState::Running {
            return Ok(());
        }
        self.start()
    }

    fn suspend(&mut self) -> Result<()> {
        self.stop();
        Ok(())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            output_channels: self.channels,
            ..Default::default()
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn attach(&mut self, graph: SharedGraph) {
        self.graph = Some(graph);
    }

    fn set_output_device(&mut self, device: &DeviceInfo) -> Result<()> {
        device.ensure_output()?;
        self.device_name = Some(device.id.clone());
        if self.stream.is_some() {
            self.stop();
            self.start()?;
        }
        Ok(())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_data::ClipData;
    use crate::graph::{AudioGraph, BufferPlayerNode, lock_graph};

    fn tone_graph(block_size: usize) -> SharedGraph {
        let mut graph = AudioGraph::new(48000, block_size);
        let clip = Arc::new(ClipData::new(vec![0.5; 480], 48000, 1));
        let player = graph.add_node(Box::new(BufferPlayerNode::new(clip, true, 1.0)));
        let destination = graph.destination();
        graph.connect(player, destination).unwrap();
        graph.into_shared()
    }

    #[test]
    fn large_callbacks_are_served_in_full() {
        let graph = tone_graph(64);
        let missed = AtomicUsize::new(0);
        let mut fifo = OutputFifo::new(2, 64);
        assert_eq!(fifo.capacity(), 512);

        let samples = fifo.fill(&graph, 4096, &missed).to_vec();
        assert_eq!(samples.len(), 4096);
        assert!(samples.iter().all(|s| *s > 0.0));
        assert!(fifo.capacity() >= 4096 + 128);
        assert_eq!(missed.load(Ordering::Relaxed), 0);

        assert_eq!(fifo.queued(), 0);

        // the rest of a rendered block carries into the next call
        let samples = fifo.fill(&graph, 100, &missed).to_vec();
        assert!(samples.iter().all(|s| *s > 0.0));
        assert_eq!(fifo.queued(), 28);
    }

    #[test]
    fn busy_graph_queues_no_silence() {
        let graph = tone_graph(64);
        let missed = AtomicUsize::new(0);
        let mut fifo = OutputFifo::new(2, 64);

        {
            let _tick = lock_graph(&graph);
            let samples = fifo.fill(&graph, 256, &missed);
            assert!(samples.iter().all(|s| *s == 0.0));
        }
        assert_eq!(missed.load(Ordering::Relaxed), 1);
        assert_eq!(fifo.queued(), 0);

        let samples = fifo.fill(&graph, 256, &missed);
        assert!(samples.iter().all(|s| *s > 0.0));
    }
}
