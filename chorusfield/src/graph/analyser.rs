/// Time-domain tap on a node's output, read by activity detection.
///
/// Keeps the most recent `size` mono samples in a circular buffer.
#[derive(Debug, Clone)]
pub struct Analyser {
    ring: Vec<f32>,
    write: usize,
}

impl Analyser {
    pub fn new(size: usize) -> Self {
        Self {
            ring: vec![0.0; size.max(1)],
            write: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.ring.len()
    }

    /// Appends a planar block, averaging its channels down to mono.
    pub fn capture(&mut self, block: &[f32], channels: usize, frames: usize) {
        if channels == 0 {
            return;
        }
        let scale = 1.0 / channels as f32;
        for i in 0..frames {
            let mut sample = 0.0;
            for ch in 0..channels {
                sample += block[ch * frames + i];
            }
            self.ring[self.write] = sample * scale;
            self.write = (self.write + 1) % self.ring.len();
        }
    }

    /// Copies the window into `out`, oldest sample first.
    pub fn snapshot(&self, out: &mut [f32]) {
        let len = self.ring.len();
        let n = out.len().min(len);
        let start = (self.write + len - n) % len;
        for (i, o) in out[..n].iter_mut().enumerate() {
            *o = self.ring[(start + i) % len];
        }
    }
}
