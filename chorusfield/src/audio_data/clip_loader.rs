use crate::audio_data::{ClipData, DefaultAudioLoader, LoadOptions};
use crate::error::{ChorusError, Result};
use crossbeam_channel::{Receiver, TryRecvError, bounded};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Decodes clips off the tick thread.
///
/// The tick loop keeps running while a clip loads; the caller collects the
/// result explicitly through the returned [`PendingClip`]. Failures are
/// reported once and never retried.
pub struct ClipLoader;

impl ClipLoader {
    /// Starts decoding the first loadable path in `paths` on a worker thread.
    pub fn spawn(paths: Vec<String>, options: LoadOptions) -> Result<PendingClip> {
        let (sender, receiver) = bounded(1);
        let label = paths.first().cloned().unwrap_or_default();

        thread::Builder::new()
            .name(format!("clip-loader:{}", label))
            .spawn(move || {
                let result = ClipData::from_paths(&paths, &DefaultAudioLoader, &options);
                // The caller may have dropped the handle; nothing to report then.
                let _ = sender.send(result);
            })
            .map_err(|e| ChorusError::LoadFailure(format!("Failed to spawn loader: {}", e)))?;

        Ok(PendingClip {
            receiver,
            label,
            taken: false,
        })
    }
}

/// Handle to a clip that is still decoding.
pub struct PendingClip {
    receiver: Receiver<Result<Arc<ClipData>>>,
    label: String,
    taken: bool,
}

impl PendingClip {
    /// Returns the result if decoding finished, without blocking.
    pub fn try_take(&mut self) -> Option<Result<Arc<ClipData>>> {
        if self.taken {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.taken = true;
                Some(Err(self.worker_lost()))
            }
        }
    }

    /// Blocks until decoding finishes.
    pub fn wait(self) -> Result<Arc<ClipData>> {
        self.receiver.recv().map_err(|_| self.worker_lost())?
    }

    /// Blocks for at most `timeout`.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<Arc<ClipData>>> {
        if self.taken {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => None,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                self.taken = true;
                Some(Err(self.worker_lost()))
            }
        }
    }

    fn worker_lost(&self) -> ChorusError {
        ChorusError::LoadFailure(format!("Loader for '{}' exited without a result", self.label))
    }
}
