use anyhow::{Context, Result};
use chorusfield::{
    AudioManager, BackendCapabilities, ChorusConfig, ChorusEvent, ManualClock, OfflineBackend,
    TimeSource, Vec3, VoiceStreamWriter,
};
use std::f32::consts::TAU;
use std::time::{Duration, Instant};

const TICK_SECONDS: f64 = 0.02;

/// A fake participant: a buzzy 150 Hz voice that talks in bursts while it
/// circles the listener.
struct Talker {
    id: &'static str,
    writer: VoiceStreamWriter,
    radius: f32,
    speed: f32,
    phase: f32,
    burst_seconds: f32,
    sample_index: usize,
}

impl Talker {
    fn position(&self, t: f32) -> Vec3 {
        let angle = self.phase + self.speed * t;
        Vec3::new(self.radius * angle.cos(), 0.0, self.radius * angle.sin())
    }

    /// Pushes `frames` samples of voice at `sample_rate`.
    fn speak(&mut self, frames: usize, sample_rate: u32) {
        let rate = sample_rate as f32;
        let samples: Vec<f32> = (0..frames)
            .map(|i| {
                let t = (self.sample_index + i) as f32 / rate;
                let talking = (t / self.burst_seconds) as usize % 2 == 0;
                if !talking {
                    return 0.0;
                }
                let voice = (TAU * 150.0 * t).sin() + 0.3 * (TAU * 300.0 * t).sin();
                0.3 * voice
            })
            .collect();
        self.sample_index += frames;
        self.writer.write(&samples);
    }
}

fn spawn_talkers(manager: &mut AudioManager) -> Result<Vec<Talker>> {
    let specs = [("alice", 2.0, 0.6, 0.0, 1.5), ("bob", 4.0, -0.3, 3.1, 2.5)];
    let mut talkers = Vec::new();
    for (id, radius, speed, phase, burst_seconds) in specs {
        manager.create_user(id)?;
        let (writer, stream) = manager.voice_stream();
        manager.set_user_stream(id, Some(stream))?;
        talkers.push(Talker {
            id,
            writer,
            radius,
            speed,
            phase,
            burst_seconds,
            sample_index: 0,
        });
    }
    Ok(talkers)
}

/// Loops `path` as a spatialized clip parked in front of the listener.
fn start_clip(manager: &mut AudioManager, path: Option<&str>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    manager
        .create_clip("ambience", true, true, true, &[path])
        .with_context(|| format!("Failed to load clip '{}'", path))?;
    manager.set_clip_position("ambience", Vec3::new(0.0, 0.0, -3.0), Some(0.0));
    Ok(())
}

fn report(events: Vec<ChorusEvent>) {
    for event in events {
        match event {
            ChorusEvent::AudioActivity { id, is_active } => {
                log::info!("{} {}", id, if is_active { "started talking" } else { "went quiet" });
            }
            ChorusEvent::AudioReady => log::info!("Output is running"),
            ChorusEvent::ClipEnded { name } => log::info!("Clip '{}' finished", name),
        }
    }
}

/// Plays two orbiting talkers on the default output for `seconds`.
pub fn run_live(seconds: f64, clip: Option<&str>) -> Result<()> {
    let mut manager = AudioManager::with_default_output(ChorusConfig::default())
        .context("Failed to create audio manager")?;
    log::info!("Spatializer: {}", manager.listener_kind());

    manager.create_local_user("me")?;
    let mut talkers = spawn_talkers(&mut manager)?;
    start_clip(&mut manager, clip)?;
    manager.resume().context("Failed to start output")?;

    let sample_rate = manager.config().sample_rate;
    let frames_per_tick = (sample_rate as f64 * TICK_SECONDS) as usize;
    let start = Instant::now();
    while start.elapsed().as_secs_f64() < seconds {
        let t = start.elapsed().as_secs_f32();
        for talker in &mut talkers {
            talker.speak(frames_per_tick, sample_rate);
            manager.set_user_position(talker.id, talker.position(t), Some(TICK_SECONDS));
        }
        manager.update();
        report(manager.poll_events());
        std::thread::sleep(Duration::from_secs_f64(TICK_SECONDS));
    }

    manager.dispose();
    log::info!("Live demo finished");
    Ok(())
}

/// Same scene rendered without a device, clocked by hand.
pub fn run_offline(seconds: f64, clip: Option<&str>) -> Result<()> {
    let config = ChorusConfig::default().block_size(480);
    let clock = ManualClock::new();
    // No Steam Audio here; the probe settles on a panner tier.
    let backend = OfflineBackend::new(&config).with_capabilities(BackendCapabilities {
        ambisonics: false,
        ..Default::default()
    });
    let mut manager = AudioManager::new(config, Box::new(backend), Box::new(clock.clone()))?;
    log::info!("Spatializer: {}", manager.listener_kind());

    manager.create_local_user("me")?;
    let mut talkers = spawn_talkers(&mut manager)?;
    start_clip(&mut manager, clip)?;

    let sample_rate = manager.config().sample_rate;
    let block = manager.config().block_size;
    let mut peak = [0.0f32; 2];
    let mut out = vec![0.0f32; block * 2];
    while clock.now() < seconds {
        let t = clock.now() as f32;
        for talker in &mut talkers {
            talker.speak(block, sample_rate);
            manager.set_user_position(talker.id, talker.position(t), Some(TICK_SECONDS));
        }
        manager.update();
        report(manager.poll_events());

        {
            let mut graph = chorusfield::graph::lock_graph(manager.graph());
            graph.render_interleaved(2, &mut out);
        }
        for frame in out.chunks(2) {
            peak[0] = peak[0].max(frame[0].abs());
            peak[1] = peak[1].max(frame[1].abs());
        }
        clock.advance(block as f64 / sample_rate as f64);
    }

    log::info!("Peak level: left {:.3}, right {:.3}", peak[0], peak[1]);
    Ok(())
}
