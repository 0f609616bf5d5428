use super::{AudioBackend, BackendState, DeviceInfo};
use crate::config::ChorusConfig;
use crate::error::{ChorusError, Result};
use crate::graph::{SharedGraph, lock_graph};
use crate::spatial::BackendCapabilities;

/// Renders on demand instead of on a device clock.
///
/// Used for tests and headless export. Starts running unless built with
/// [`start_suspended`](Self::start_suspended).
pub struct OfflineBackend {
    sample_rate: u32,
    channels: u16,
    capabilities: BackendCapabilities,
    state: BackendState,
    graph: Option<SharedGraph>,
    device: Option<DeviceInfo>,
    pending: Vec<f32>,
}

impl OfflineBackend {
    pub fn new(config: &ChorusConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            capabilities: BackendCapabilities {
                output_channels: config.channels,
                ..Default::default()
            },
            state: BackendState::Running,
            graph: None,
            device: None,
            pending: Vec::new(),
        }
    }

    /// Waits for [`resume`](AudioBackend::resume) like a browser context
    /// waiting for a user gesture.
    pub fn start_suspended(mut self) -> Self {
        self.state = BackendState::Suspended;
        self
    }

    pub fn with_capabilities(mut self, capabilities: BackendCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    /// Renders `frames` interleaved frames. A suspended output renders silence
    /// without advancing the graph.
    pub fn render(&mut self, frames: usize) -> Result<Vec<f32>> {
        let channels = self.channels as usize;
        let wanted = frames * channels;
        if self.state != BackendState::Running {
            return Ok(vec![0.0; wanted]);
        }

        let graph = self
            .graph
            .as_ref()
            .ok_or_else(|| ChorusError::Graph("No graph attached to output".into()))?;

        let mut graph = lock_graph(graph);
        let mut block = vec![0.0; graph.block_size() * channels];
        while self.pending.len() < wanted {
            graph.render_interleaved(self.channels, &mut block);
            self.pending.extend_from_slice(&block);
        }

        let rest = self.pending.split_off(wanted);
        Ok(std::mem::replace(&mut self.pending, rest))
    }
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn state(&self) -> BackendState {
        self.state
    }

    fn resume(&mut self) -> Result<()> {
        if self.state == BackendState::Closed {
            return Err(ChorusError::AudioDevice("Output is closed".into()));
        }
        self.state = BackendState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<()> {
        if self.state == BackendState::Running {
            self.state = BackendState::Suspended;
        }
        Ok(())
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities
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
        log::debug!("Offline output now reports device '{}'", device.label);
        self.device = Some(device.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AudioGraph;

    fn backend() -> OfflineBackend {
        let config = ChorusConfig::default().block_size(64);
        let mut backend = OfflineBackend::new(&config);
        backend.attach(AudioGraph::new(config.sample_rate, config.block_size).into_shared());
        backend
    }

    #[test]
    fn renders_requested_frame_count_across_blocks() {
        let mut backend = backend();
        assert_eq!(backend.render(100).unwrap().len(), 200);
        assert_eq!(backend.render(28).unwrap().len(), 56);
        let graph = backend.graph.clone().unwrap();
        // 128 frames needed exactly two blocks
        assert!((lock_graph(&graph).current_time() - 128.0 / 48000.0).abs() < 1e-12);
    }

    #[test]
    fn suspended_output_is_silent_until_resumed() {
        let mut backend = backend().start_suspended();
        assert_eq!(backend.state(), BackendState::Suspended);
        assert!(backend.render(10).unwrap().iter().all(|s| *s == 0.0));
        backend.resume().unwrap();
        assert_eq!(backend.state(), BackendState::Running);
    }

    #[test]
    fn unattached_output_reports_error() {
        let mut backend = OfflineBackend::new(&ChorusConfig::default());
        assert!(backend.render(10).is_err());
    }
}
