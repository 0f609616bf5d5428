//! Output back-ends that pull the shared audio graph.

mod cpal_backend;
mod offline;

pub use cpal_backend::{CpalBackend, list_output_devices};
pub use offline::OfflineBackend;

use crate::error::{ChorusError, DeviceKind, Result};
use crate::graph::SharedGraph;
use crate::spatial::BackendCapabilities;

/// Lifecycle of an output.
///
/// Outputs start `Suspended` until a user gesture resumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    Suspended,
    Running,
    Closed,
}

/// A media device as enumerated by the host or reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

impl DeviceInfo {
    pub fn output(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            kind: DeviceKind::AudioOutput,
        }
    }

    /// Rejects anything that is not an audio output.
    pub fn ensure_output(&self) -> Result<()> {
        if self.kind != DeviceKind::AudioOutput {
            return Err(ChorusError::InvalidDeviceKind {
                expected: DeviceKind::AudioOutput,
                actual: self.kind,
            });
        }
        Ok(())
    }
}

pub trait AudioBackend {
    fn name(&self) -> &str;

    fn state(&self) -> BackendState;

    /// Starts output. Idempotent while running.
    fn resume(&mut self) -> Result<()>;

    fn suspend(&mut self) -> Result<()>;

    fn capabilities(&self) -> BackendCapabilities;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Hands the graph the output should render.
    fn attach(&mut self, graph: SharedGraph);

    /// Re-targets output to `device`. Non-output devices are rejected.
    fn set_output_device(&mut self, device: &DeviceInfo) -> Result<()>;
}
