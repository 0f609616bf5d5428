//! The session-wide registry of sources, the listener and the output.

use crate::activity::ActivityDetector;
use crate::audio_data::{ClipData, ClipLoader, ConvertToMono, DefaultAudioLoader, LoadOptions, PendingClip};
use crate::backend::{AudioBackend, BackendState, CpalBackend, DeviceInfo};
use crate::clock::{SystemClock, TimeSource};
use crate::config::{AudioProperties, ChorusConfig};
use crate::error::{ChorusError, Result};
use crate::events::ChorusEvent;
use crate::graph::{AudioGraph, SharedGraph, lock_graph};
use crate::math::{Pose, Vec3};
use crate::source::{AudioSource, ClipSource};
use crate::spatial::{
    CapabilityProbeResult, EmitterSlot, Listener, ProbeContext, Spatializer, SpatializerKind, Tier,
    default_tiers, probe_listener,
};
use crate::stream::{VoiceStream, VoiceStreamWriter};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns every user and clip source, the single listener, and the output.
///
/// All methods run on the caller's tick thread. The output reads the shared
/// graph on its own thread and never waits for the tick.
///
/// # Example
///
/// ```no_run
/// use chorusfield::{AudioManager, ChorusConfig, Vec3};
///
/// let mut manager = AudioManager::with_default_output(ChorusConfig::default())?;
/// manager.create_local_user("me")?;
/// manager.create_user("friend")?;
/// manager.set_user_position("friend", Vec3::new(2.0, 0.0, -1.0), None);
/// manager.resume()?;
/// loop {
///     manager.update();
///     for event in manager.poll_events() {
///         println!("{:?}", event);
///     }
///     # break;
/// }
/// # Ok::<(), chorusfield::ChorusError>(())
/// ```
pub struct AudioManager {
    config: ChorusConfig,
    properties: AudioProperties,
    graph: SharedGraph,
    backend: Box<dyn AudioBackend>,
    clock: Box<dyn TimeSource>,
    listener: Box<dyn Listener>,
    probe: CapabilityProbeResult,
    users: HashMap<String, AudioSource>,
    clips: HashMap<String, ClipSource>,
    detectors: HashMap<String, ActivityDetector>,
    local_user: Option<String>,
    ready_sent: bool,
    disposed: bool,
    event_sender: Sender<ChorusEvent>,
    event_receiver: Receiver<ChorusEvent>,
}

impl AudioManager {
    pub fn new(
        config: ChorusConfig,
        backend: Box<dyn AudioBackend>,
        clock: Box<dyn TimeSource>,
    ) -> Result<Self> {
        Self::with_tiers(config, backend, clock, &default_tiers())
    }

    /// Real-time output on the default device, wall-clock ticks.
    pub fn with_default_output(config: ChorusConfig) -> Result<Self> {
        let backend = Box::new(CpalBackend::new(&config));
        Self::new(config, backend, Box::new(SystemClock::new()))
    }

    /// Like [`new`](Self::new) with a custom tier preference list.
    pub fn with_tiers(
        config: ChorusConfig,
        mut backend: Box<dyn AudioBackend>,
        clock: Box<dyn TimeSource>,
        tiers: &[Tier],
    ) -> Result<Self> {
        config.properties.validate()?;
        if config.block_size == 0 {
            return Err(ChorusError::Configuration(
                "Block size must be greater than 0".to_string(),
            ));
        }

        let sample_rate = backend.sample_rate();
        if sample_rate != config.sample_rate {
            log::warn!(
                "Output runs at {} Hz, not the configured {} Hz",
                sample_rate,
                config.sample_rate
            );
        }

        let mut graph = AudioGraph::new(sample_rate, config.block_size);
        let (listener, probe) = {
            let mut ctx = ProbeContext {
                graph: &mut graph,
                config: &config,
                capabilities: backend.capabilities(),
            };
            probe_listener(tiers, &mut ctx)
        };

        let graph = graph.into_shared();
        backend.attach(Arc::clone(&graph));

        let (event_sender, event_receiver) = unbounded();
        log::info!(
            "Audio manager ready: {} output, {} Hz, {}",
            backend.name(),
            sample_rate,
            probe.selected
        );

        Ok(Self {
            properties: config.properties,
            config,
            graph,
            backend,
            clock,
            listener,
            probe,
            users: HashMap::new(),
            clips: HashMap::new(),
            detectors: HashMap::new(),
            local_user: None,
            ready_sent: false,
            disposed: false,
            event_sender,
            event_receiver,
        })
    }

    pub fn config(&self) -> &ChorusConfig {
        &self.config
    }

    pub fn properties(&self) -> &AudioProperties {
        &self.properties
    }

    pub fn capability_probe(&self) -> &CapabilityProbeResult {
        &self.probe
    }

    pub fn listener_kind(&self) -> SpatializerKind {
        self.listener.kind()
    }

    /// The graph shared with the output.
    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn backend(&self) -> &dyn AudioBackend {
        self.backend.as_ref()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    // ---- output lifecycle ----

    /// Starts output. Call from a user gesture where the platform requires one.
    pub fn resume(&mut self) -> Result<()> {
        self.backend.resume()
    }

    pub fn suspend(&mut self) -> Result<()> {
        self.backend.suspend()
    }

    pub fn is_ready(&self) -> bool {
        self.backend.state() == BackendState::Running
    }

    /// Moves output to `device`, which must be an audio output.
    pub fn set_output_device(&mut self, device: &DeviceInfo) -> Result<()> {
        device.ensure_output()?;
        self.backend.set_output_device(device)?;
        log::info!("Output device set to '{}'", device.label);
        Ok(())
    }

    /// Drains pending notifications.
    pub fn poll_events(&self) -> Vec<ChorusEvent> {
        self.event_receiver.try_iter().collect()
    }

    // ---- users ----

    /// Registers a remote participant. Returns without change if the id exists.
    pub fn create_user(&mut self, id: &str) -> Result<()> {
        if self.users.contains_key(id) {
            return Ok(());
        }

        let mut graph = lock_graph(&self.graph);
        let mut source = AudioSource::new(id, &mut graph)?;
        let emitter = match self.listener.create_emitter(&mut graph, &self.properties) {
            Ok(emitter) => emitter,
            Err(e) => {
                source.dispose(&mut graph);
                return Err(e);
            }
        };
        if let Err(e) = source.set_spatializer(&mut graph, EmitterSlot::Owned(emitter)) {
            source.dispose(&mut graph);
            return Err(e);
        }
        drop(graph);

        log::debug!("Created user '{}'", id);
        self.users.insert(id.to_string(), source);
        Ok(())
    }

    /// Registers the local participant, whose pose drives the listener.
    ///
    /// The local voice is analysed for activity but muted in the mix.
    pub fn create_local_user(&mut self, id: &str) -> Result<()> {
        if !self.users.contains_key(id) {
            let mut graph = lock_graph(&self.graph);
            let source = AudioSource::new(id, &mut graph)?;
            drop(graph);
            self.users.insert(id.to_string(), source);
        }

        let mut graph = lock_graph(&self.graph);
        if let Some(source) = self.users.get_mut(id) {
            source.set_spatializer(&mut graph, EmitterSlot::PassThrough)?;
            source.set_volume(&mut graph, 0.0);
        }
        drop(graph);

        if let Some(previous) = self.local_user.replace(id.to_string()) {
            if previous != id {
                log::warn!("Local user changed from '{}' to '{}'", previous, id);
            }
        }
        log::debug!("Created local user '{}'", id);
        Ok(())
    }

    pub fn local_user(&self) -> Option<&str> {
        self.local_user.as_deref()
    }

    pub fn has_user(&self, id: &str) -> bool {
        self.users.contains_key(id)
    }

    pub fn user(&self, id: &str) -> Option<&AudioSource> {
        self.users.get(id)
    }

    pub fn user_ids(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }

    /// Disposes and forgets a user. Unknown ids are ignored.
    pub fn remove_user(&mut self, id: &str) {
        let Some(mut source) = self.users.remove(id) else {
            return;
        };
        source.dispose(&mut lock_graph(&self.graph));
        self.detectors.remove(id);
        if self.local_user.as_deref() == Some(id) {
            self.local_user = None;
        }
        log::debug!("Removed user '{}'", id);
    }

    /// A voice feed sized by `voice_buffer_frames`, for [`set_user_stream`](Self::set_user_stream).
    pub fn voice_stream(&self) -> (VoiceStreamWriter, VoiceStream) {
        VoiceStream::channel(self.config.voice_buffer_frames)
    }

    /// Attaches or detaches a participant's decoded voice.
    pub fn set_user_stream(&mut self, id: &str, stream: Option<VoiceStream>) -> Result<()> {
        let source = self
            .users
            .get_mut(id)
            .ok_or_else(|| ChorusError::MissingSource(id.to_string()))?;
        let mut graph = lock_graph(&self.graph);

        match stream {
            Some(stream) => {
                let detector =
                    ActivityDetector::new(id, graph.sample_rate(), self.config.fft_size)?;
                let node = graph.add_node(Box::new(stream.into_node()));
                graph.attach_analyser(node, self.config.fft_size)?;
                if let Err(e) = source.set_input(&mut graph, Some(node)) {
                    graph.remove(node);
                    return Err(e);
                }
                self.detectors.insert(id.to_string(), detector);
                log::debug!("Voice stream attached to '{}'", id);
            }
            None => {
                source.set_input(&mut graph, None)?;
                if let Some(detector) = self.detectors.remove(id) {
                    if detector.is_active() {
                        self.emit(ChorusEvent::AudioActivity {
                            id: id.to_string(),
                            is_active: false,
                        });
                    }
                }
                log::debug!("Voice stream detached from '{}'", id);
            }
        }
        Ok(())
    }

    pub fn set_user_volume(&mut self, id: &str, volume: f32) {
        if self.local_user.as_deref() == Some(id) {
            return;
        }
        if let Some(source) = self.users.get(id) {
            source.set_volume(&mut lock_graph(&self.graph), volume);
        }
    }

    pub fn is_user_active(&self, id: &str) -> bool {
        self.detectors.get(id).is_some_and(ActivityDetector::is_active)
    }

    pub fn set_user_position(&mut self, id: &str, position: Vec3, transition: Option<f64>) {
        let (now, duration) = self.timing(transition);
        if let Some(source) = self.users.get_mut(id) {
            source.trajectory_mut().set_position(position, now, duration);
        }
    }

    pub fn set_user_orientation(&mut self, id: &str, forward: Vec3, up: Vec3, transition: Option<f64>) {
        let (now, duration) = self.timing(transition);
        if let Some(source) = self.users.get_mut(id) {
            source
                .trajectory_mut()
                .set_orientation(forward, up, now, duration);
        }
    }

    pub fn set_user_pose(&mut self, id: &str, pose: Pose, transition: Option<f64>) {
        let (now, duration) = self.timing(transition);
        if let Some(source) = self.users.get_mut(id) {
            source.trajectory_mut().set_target(pose, now, duration);
        }
    }

    pub fn user_pose(&self, id: &str) -> Option<Pose> {
        self.users.get(id).map(AudioSource::pose)
    }

    // ---- clips ----

    /// Decodes the first loadable path and registers it as clip `name`.
    ///
    /// Spatialized clips are down-mixed to mono. Every clip is resampled to
    /// the output rate. An existing clip with the same name is replaced.
    pub fn create_clip<P: AsRef<str>>(
        &mut self,
        name: &str,
        looped: bool,
        auto_play: bool,
        spatialize: bool,
        paths: &[P],
    ) -> Result<()> {
        let paths: Vec<String> = paths.iter().map(|p| p.as_ref().to_string()).collect();
        let data = ClipData::from_paths(&paths, &DefaultAudioLoader, &self.load_options(spatialize))?;
        self.create_clip_from_data(name, data, looped, auto_play, spatialize)
    }

    /// Starts decoding on a worker thread; pass the result to
    /// [`create_clip_from_data`](Self::create_clip_from_data).
    pub fn load_clip<P: AsRef<str>>(&self, paths: &[P], spatialize: bool) -> Result<PendingClip> {
        let paths = paths.iter().map(|p| p.as_ref().to_string()).collect();
        ClipLoader::spawn(paths, self.load_options(spatialize))
    }

    /// Registers already decoded audio as clip `name`.
    ///
    /// An existing clip of that name is replaced only once the new one is
    /// fully built; on error the old clip keeps playing.
    pub fn create_clip_from_data(
        &mut self,
        name: &str,
        data: Arc<ClipData>,
        looped: bool,
        auto_play: bool,
        spatialize: bool,
    ) -> Result<()> {
        let data = self.prepare_clip(data, spatialize)?;

        let mut graph = lock_graph(&self.graph);
        let mut clip = ClipSource::new(name, &mut graph, data, looped, spatialize)?;
        if let Err(e) = self.attach_clip(&mut graph, &mut clip, auto_play, spatialize) {
            clip.dispose(&mut graph);
            return Err(e);
        }
        drop(graph);
        self.remove_clip(name);

        log::info!(
            "Created clip '{}' ({:.2}s, looped: {}, spatialized: {})",
            name,
            clip.data().duration().as_secs_f32(),
            looped,
            spatialize
        );
        self.clips.insert(name.to_string(), clip);
        Ok(())
    }

    pub fn has_clip(&self, name: &str) -> bool {
        self.clips.contains_key(name)
    }

    pub fn clip(&self, name: &str) -> Option<&ClipSource> {
        self.clips.get(name)
    }

    /// Starts a play of `name`. Unknown names are ignored.
    pub fn play_clip(&mut self, name: &str, volume: f32) -> Result<()> {
        match self.clips.get_mut(name) {
            Some(clip) => clip.play(&mut lock_graph(&self.graph), volume),
            None => Ok(()),
        }
    }

    pub fn stop_clip(&mut self, name: &str) {
        if let Some(clip) = self.clips.get_mut(name) {
            clip.stop(&mut lock_graph(&self.graph));
        }
    }

    pub fn set_clip_volume(&mut self, name: &str, volume: f32) {
        if let Some(clip) = self.clips.get(name) {
            clip.set_volume(&mut lock_graph(&self.graph), volume);
        }
    }

    pub fn remove_clip(&mut self, name: &str) {
        if let Some(mut clip) = self.clips.remove(name) {
            clip.dispose(&mut lock_graph(&self.graph));
            log::debug!("Removed clip '{}'", name);
        }
    }

    pub fn set_clip_position(&mut self, name: &str, position: Vec3, transition: Option<f64>) {
        let (now, duration) = self.timing(transition);
        if let Some(clip) = self.clips.get_mut(name) {
            clip.base_mut()
                .trajectory_mut()
                .set_position(position, now, duration);
        }
    }

    pub fn set_clip_orientation(&mut self, name: &str, forward: Vec3, up: Vec3, transition: Option<f64>) {
        let (now, duration) = self.timing(transition);
        if let Some(clip) = self.clips.get_mut(name) {
            clip.base_mut()
                .trajectory_mut()
                .set_orientation(forward, up, now, duration);
        }
    }

    pub fn set_clip_pose(&mut self, name: &str, pose: Pose, transition: Option<f64>) {
        let (now, duration) = self.timing(transition);
        if let Some(clip) = self.clips.get_mut(name) {
            clip.base_mut().trajectory_mut().set_target(pose, now, duration);
        }
    }

    pub fn clip_pose(&self, name: &str) -> Option<Pose> {
        self.clips.get(name).map(|clip| clip.base().pose())
    }

    // ---- configuration ----

    /// Replaces the distance model and applies it to every live emitter.
    pub fn set_audio_properties(&mut self, properties: AudioProperties) -> Result<()> {
        properties.validate()?;
        self.properties = properties;

        let mut graph = lock_graph(&self.graph);
        self.listener.set_audio_properties(&mut graph, &properties);
        for source in self.users.values_mut() {
            source.set_audio_properties(&mut graph, &properties);
        }
        for clip in self.clips.values_mut() {
            clip.set_audio_properties(&mut graph, &properties);
        }
        log::debug!(
            "Audio properties: min {} max {} rolloff {} {}",
            properties.min_distance,
            properties.max_distance,
            properties.rolloff,
            properties.algorithm
        );
        Ok(())
    }

    // ---- tick ----

    /// One tick at the clock's current time.
    pub fn update(&mut self) {
        let now = self.clock.now();
        self.update_at(now);
    }

    /// One tick at `time` seconds.
    pub fn update_at(&mut self, time: f64) {
        if self.disposed {
            return;
        }

        if !self.ready_sent && self.is_ready() {
            self.ready_sent = true;
            log::info!("Audio output is running");
            self.emit(ChorusEvent::AudioReady);
        }

        let mut events = Vec::new();
        {
            let mut graph = lock_graph(&self.graph);

            if let Some(local) = self.local_user.as_deref().and_then(|id| self.users.get_mut(id)) {
                local.update(&mut graph, time);
                let pose = local.pose();
                self.listener.update(&mut graph, &pose, time);
            }

            for (id, source) in self.users.iter_mut() {
                if self.local_user.as_deref() != Some(id.as_str()) {
                    source.update(&mut graph, time);
                }
            }

            for (name, clip) in self.clips.iter_mut() {
                for _ in 0..clip.update(&mut graph, time) {
                    events.push(ChorusEvent::ClipEnded { name: name.clone() });
                }
            }

            for (id, detector) in self.detectors.iter_mut() {
                if let Some(node) = self.users.get(id).and_then(AudioSource::input) {
                    detector.capture(&graph, node);
                }
            }
        }

        // analysis runs without the graph lock
        for (id, detector) in self.detectors.iter_mut() {
            if !self.users.get(id).is_some_and(|user| user.input().is_some()) {
                continue;
            }
            if let Some(is_active) = detector.process_captured() {
                events.push(ChorusEvent::AudioActivity {
                    id: id.clone(),
                    is_active,
                });
            }
        }

        for event in events {
            self.emit(event);
        }
    }

    /// Disposes every source, then the listener, and suspends output.
    /// Idempotent; also runs on drop.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        {
            let mut graph = lock_graph(&self.graph);
            for (_, mut source) in self.users.drain() {
                source.dispose(&mut graph);
            }
            for (_, mut clip) in self.clips.drain() {
                clip.dispose(&mut graph);
            }
            self.listener.dispose(&mut graph);
        }
        self.detectors.clear();
        self.local_user = None;

        if let Err(e) = self.backend.suspend() {
            log::warn!("Failed to suspend output: {}", e);
        }
        log::info!("Audio manager disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn timing(&self, transition: Option<f64>) -> (f64, f64) {
        (
            self.clock.now(),
            transition.unwrap_or(self.properties.transition_time),
        )
    }

    fn load_options(&self, spatialize: bool) -> LoadOptions {
        let convert = if spatialize {
            ConvertToMono::ForceMono
        } else {
            ConvertToMono::Original
        };
        LoadOptions::new()
            .convert_to_mono(convert)
            .target_sample_rate(self.backend.sample_rate())
    }

    fn attach_clip(
        &self,
        graph: &mut AudioGraph,
        clip: &mut ClipSource,
        auto_play: bool,
        spatialize: bool,
    ) -> Result<()> {
        if spatialize {
            let emitter = self.listener.create_emitter(graph, &self.properties)?;
            clip.set_spatializer(graph, EmitterSlot::Owned(emitter))?;
        }
        if auto_play {
            clip.play(graph, 1.0)?;
        }
        Ok(())
    }

    fn prepare_clip(&self, data: Arc<ClipData>, spatialize: bool) -> Result<Arc<ClipData>> {
        let mut data = data;
        if spatialize && data.channels() > 1 {
            data = Arc::new(data.to_mono());
        }
        let rate = self.backend.sample_rate();
        if data.sample_rate() != rate {
            data = Arc::new(data.resample(rate)?);
        }
        Ok(data)
    }

    fn emit(&self, event: ChorusEvent) {
        // The receiver lives in `self`, so sending cannot fail while we exist.
        let _ = self.event_sender.send(event);
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OfflineBackend;
    use crate::clock::ManualClock;
    use crate::error::DeviceKind;
    use crate::graph::GainNode;
    use crate::spatial::{
        BackendCapabilities, CapabilityError, Emitter, GainEmitter, GainListener, PannerNode,
        gain_only_curve,
    };

    fn config() -> ChorusConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        ChorusConfig::default().block_size(256)
    }

    fn manager_with(capabilities: BackendCapabilities, clock: &ManualClock) -> AudioManager {
        let config = config();
        let backend = OfflineBackend::new(&config).with_capabilities(capabilities);
        AudioManager::new(config, Box::new(backend), Box::new(clock.clone())).unwrap()
    }

    fn panning_caps() -> BackendCapabilities {
        BackendCapabilities {
            ambisonics: false,
            ..Default::default()
        }
    }

    fn manager() -> (AudioManager, ManualClock) {
        let clock = ManualClock::new();
        (manager_with(panning_caps(), &clock), clock)
    }

    fn render(manager: &AudioManager, blocks: usize) {
        let mut graph = lock_graph(manager.graph());
        for _ in 0..blocks {
            graph.render_block();
        }
    }

    fn write_wav(path: &std::path::Path, sample_rate: u32, samples: &[i16]) {
        let data_len = (samples.len() * 2) as u32;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for sample in samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn new_user_reads_resting_pose_before_any_tick() {
        let (mut manager, _clock) = manager();
        manager.create_user("U1").unwrap();
        manager.set_user_position("U1", Vec3::ZERO, None);
        assert_eq!(manager.user_pose("U1"), Some(Pose::resting()));
    }

    #[test]
    fn user_position_blends_over_transition() {
        let (mut manager, clock) = manager();
        manager.create_user("U1").unwrap();
        manager.set_user_position("U1", Vec3::new(2.0, 0.0, 0.0), Some(1.0));

        clock.set(0.5);
        manager.update();
        let halfway = manager.user_pose("U1").unwrap().position;
        assert!((halfway.x - 1.0).abs() < 1e-5);

        clock.set(2.0);
        manager.update();
        assert_eq!(manager.user_pose("U1").unwrap().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn calls_on_removed_user_are_ignored() {
        let (mut manager, _clock) = manager();
        manager.create_user("U1").unwrap();
        manager.remove_user("U1");
        manager.set_user_position("U1", Vec3::ONE, None);
        manager.set_user_volume("U1", 0.5);
        manager.remove_user("U1");
        assert!(!manager.has_user("U1"));
        assert!(manager.user_pose("U1").is_none());
        assert!(matches!(
            manager.set_user_stream("U1", None),
            Err(ChorusError::MissingSource(_))
        ));
    }

    #[test]
    fn create_user_is_get_or_create() {
        let (mut manager, _clock) = manager();
        manager.create_user("U1").unwrap();
        let nodes = lock_graph(manager.graph()).len();
        manager.create_user("U1").unwrap();
        assert_eq!(lock_graph(manager.graph()).len(), nodes);
    }

    #[test]
    fn remote_users_get_emitters_from_selected_tier() {
        let (mut manager, _clock) = manager();
        assert_eq!(manager.listener_kind(), SpatializerKind::DirectionalNew);
        assert!(manager.capability_probe().was_rejected(SpatializerKind::Ambisonic));

        manager.create_user("U1").unwrap();
        manager.create_local_user("me").unwrap();
        assert_eq!(
            manager.user("U1").unwrap().spatializer().kind(),
            SpatializerKind::DirectionalNew
        );
        assert!(manager.user("me").unwrap().spatializer().is_pass_through());
        assert_eq!(manager.local_user(), Some("me"));
    }

    #[test]
    fn listener_falls_back_to_gain_only() {
        let clock = ManualClock::new();
        let manager = manager_with(BackendCapabilities::gain_only(2), &clock);
        assert_eq!(manager.listener_kind(), SpatializerKind::GainOnly);
        assert_eq!(manager.capability_probe().unavailable.len(), 3);
    }

    #[test]
    fn local_user_pose_drives_listener() {
        let (mut manager, clock) = manager();
        manager.create_local_user("me").unwrap();
        manager.set_user_position("me", Vec3::new(0.0, 0.0, 5.0), Some(0.0));
        clock.set(0.1);
        manager.update();
        assert_eq!(
            lock_graph(manager.graph()).listener().position,
            Vec3::new(0.0, 0.0, 5.0)
        );
    }

    #[test]
    fn clip_plays_again_after_stop() {
        let (mut manager, _clock) = manager();
        let path = std::env::temp_dir().join(format!("chorusfield-ping-{}.wav", std::process::id()));
        write_wav(&path, 48000, &[8000; 4800]);
        let missing = "does-not-exist.webm".to_string();
        let found = path.to_string_lossy().to_string();

        manager
            .create_clip("ping", false, false, false, &[missing, found])
            .unwrap();
        assert!(!manager.clip("ping").unwrap().is_playing());

        manager.play_clip("ping", 1.0).unwrap();
        manager.stop_clip("ping");
        assert!(!manager.clip("ping").unwrap().is_playing());
        manager.play_clip("ping", 1.0).unwrap();
        assert!(manager.clip("ping").unwrap().is_playing());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn clip_with_no_loadable_path_fails() {
        let (mut manager, _clock) = manager();
        let err = manager
            .create_clip("ping", false, false, false, &["nope.ogg", "nope.mp3"])
            .unwrap_err();
        assert!(matches!(err, ChorusError::LoadFailure(_)));
        assert!(!manager.has_clip("ping"));
        // Unknown names are ignored.
        manager.play_clip("ping", 1.0).unwrap();
        manager.stop_clip("ping");
    }

    #[test]
    fn finished_clip_play_is_reported() {
        let (mut manager, _clock) = manager();
        let data = Arc::new(ClipData::new(vec![0.25; 300], 48000, 1));
        manager
            .create_clip_from_data("chime", data, false, true, true)
            .unwrap();
        assert!(manager.clip("chime").unwrap().is_playing());

        render(&manager, 2);
        manager.update_at(0.0);
        assert!(!manager.clip("chime").unwrap().is_playing());
        let ended: Vec<_> = manager
            .poll_events()
            .into_iter()
            .filter(|e| matches!(e, ChorusEvent::ClipEnded { .. }))
            .collect();
        assert_eq!(
            ended,
            vec![ChorusEvent::ClipEnded {
                name: "chime".to_string()
            }]
        );
    }

    #[test]
    fn stereo_spatial_clip_is_downmixed_and_resampled() {
        let (mut manager, _clock) = manager();
        let data = Arc::new(ClipData::new(vec![0.1; 44100 * 2], 44100, 2));
        manager
            .create_clip_from_data("music", data, true, false, true)
            .unwrap();
        let clip = manager.clip("music").unwrap();
        assert_eq!(clip.data().channels(), 1);
        assert_eq!(clip.data().sample_rate(), 48000);
    }

    #[test]
    fn audio_ready_is_sent_once() {
        let clock = ManualClock::new();
        let config = config();
        let backend = OfflineBackend::new(&config)
            .with_capabilities(panning_caps())
            .start_suspended();
        let mut manager =
            AudioManager::new(config, Box::new(backend), Box::new(clock.clone())).unwrap();

        manager.update();
        assert!(!manager.is_ready());
        assert!(manager.poll_events().is_empty());

        manager.resume().unwrap();
        manager.update();
        manager.update();
        assert_eq!(manager.poll_events(), vec![ChorusEvent::AudioReady]);
    }

    #[test]
    fn output_device_must_be_audio_output() {
        let (mut manager, _clock) = manager();
        let microphone = DeviceInfo {
            id: "mic".to_string(),
            label: "Microphone".to_string(),
            kind: DeviceKind::AudioInput,
        };
        assert!(matches!(
            manager.set_output_device(&microphone),
            Err(ChorusError::InvalidDeviceKind {
                expected: DeviceKind::AudioOutput,
                actual: DeviceKind::AudioInput,
            })
        ));
        manager
            .set_output_device(&DeviceInfo::output("speakers"))
            .unwrap();
    }

    #[test]
    fn speaking_user_raises_activity_events() {
        let (mut manager, _clock) = manager();
        manager.create_user("alice").unwrap();
        let (mut writer, stream) = manager.voice_stream();
        manager.set_user_stream("alice", Some(stream)).unwrap();

        let block = manager.config().block_size;
        let tone: Vec<f32> = (0..block * 40)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 150.0 * i as f32 / 48000.0).sin())
            .collect();
        writer.write(&tone);

        let mut events = Vec::new();
        for _ in 0..40 {
            render(&manager, 1);
            manager.update_at(0.0);
            events.extend(manager.poll_events());
        }
        assert!(events.contains(&ChorusEvent::AudioActivity {
            id: "alice".to_string(),
            is_active: true,
        }));
        assert!(manager.is_user_active("alice"));

        manager.set_user_stream("alice", None).unwrap();
        assert_eq!(
            manager.poll_events(),
            vec![ChorusEvent::AudioActivity {
                id: "alice".to_string(),
                is_active: false,
            }]
        );
        assert!(!manager.is_user_active("alice"));
    }

    #[test]
    fn rejects_invalid_properties() {
        let (mut manager, _clock) = manager();
        let bad = AudioProperties::default().min_distance(20.0).max_distance(5.0);
        assert!(manager.set_audio_properties(bad).is_err());
        let good = AudioProperties::default().rolloff(2.0);
        manager.create_user("U1").unwrap();
        manager.set_audio_properties(good).unwrap();
        assert_eq!(manager.properties().rolloff, 2.0);
    }

    #[test]
    fn dispose_releases_graph_nodes() {
        let (mut manager, _clock) = manager();
        let baseline = lock_graph(manager.graph()).len();
        manager.create_user("U1").unwrap();
        manager.create_local_user("me").unwrap();
        manager.dispose();
        manager.dispose();
        assert!(manager.is_disposed());
        assert_eq!(lock_graph(manager.graph()).len(), baseline);
    }

    /// Gain emitters that cannot be cloned, so every new play fails.
    struct SinglePlayEmitter(GainEmitter);

    impl Spatializer for SinglePlayEmitter {
        fn kind(&self) -> SpatializerKind {
            self.0.kind()
        }

        fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, time: f64) {
            self.0.update(graph, pose, time);
        }

        fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
            self.0.set_audio_properties(graph, properties);
        }

        fn dispose(&mut self, graph: &mut AudioGraph) {
            self.0.dispose(graph);
        }

        fn is_disposed(&self) -> bool {
            self.0.is_disposed()
        }
    }

    impl Emitter for SinglePlayEmitter {
        fn input(&self) -> Option<crate::graph::NodeId> {
            self.0.input()
        }

        fn clone_emitter(&self, _graph: &mut AudioGraph) -> Result<Box<dyn Emitter>> {
            Err(ChorusError::Spatialization("Emitter cannot be cloned".to_string()))
        }
    }

    struct SinglePlayListener(GainListener);

    impl Spatializer for SinglePlayListener {
        fn kind(&self) -> SpatializerKind {
            self.0.kind()
        }

        fn update(&mut self, graph: &mut AudioGraph, pose: &Pose, time: f64) {
            self.0.update(graph, pose, time);
        }

        fn set_audio_properties(&mut self, graph: &mut AudioGraph, properties: &AudioProperties) {
            self.0.set_audio_properties(graph, properties);
        }

        fn dispose(&mut self, graph: &mut AudioGraph) {
            self.0.dispose(graph);
        }

        fn is_disposed(&self) -> bool {
            self.0.is_disposed()
        }
    }

    impl Listener for SinglePlayListener {
        fn create_emitter(
            &self,
            graph: &mut AudioGraph,
            properties: &AudioProperties,
        ) -> Result<Box<dyn Emitter>> {
            Ok(Box::new(SinglePlayEmitter(GainEmitter::new(graph, properties)?)))
        }
    }

    fn single_play_tier(
        _ctx: &mut ProbeContext<'_>,
    ) -> std::result::Result<Box<dyn Listener>, CapabilityError> {
        Ok(Box::new(SinglePlayListener(GainListener::new())))
    }

    #[test]
    fn failed_clip_replacement_keeps_old_clip() {
        let config = config();
        let backend = OfflineBackend::new(&config);
        let tiers = [Tier {
            kind: SpatializerKind::GainOnly,
            factory: single_play_tier,
        }];
        let mut manager = AudioManager::with_tiers(
            config,
            Box::new(backend),
            Box::new(ManualClock::new()),
            &tiers,
        )
        .unwrap();

        let data = Arc::new(ClipData::new(vec![0.25; 4800], 48000, 1));
        manager
            .create_clip_from_data("bell", Arc::clone(&data), false, false, true)
            .unwrap();
        let nodes = lock_graph(manager.graph()).len();

        // the first play needs a clone of the template emitter
        let err = manager
            .create_clip_from_data("bell", data, true, true, true)
            .unwrap_err();
        assert!(matches!(err, ChorusError::Spatialization(_)));

        let clip = manager.clip("bell").unwrap();
        assert!(!clip.is_looped());
        assert!(!clip.base().is_disposed());
        assert_eq!(lock_graph(manager.graph()).len(), nodes);
    }

    fn gain_of(manager: &AudioManager, slot: &EmitterSlot) -> f32 {
        let graph = lock_graph(manager.graph());
        let id = slot.input(&graph).unwrap();
        graph.node::<GainNode>(id).unwrap().gain()
    }

    fn panner_of(manager: &AudioManager, slot: &EmitterSlot) -> (f32, f32, f32) {
        let graph = lock_graph(manager.graph());
        let node = graph.node::<PannerNode>(slot.input(&graph).unwrap()).unwrap();
        (node.reference_distance(), node.max_distance(), node.rolloff())
    }

    fn place_user_and_clip(manager: &mut AudioManager) {
        let position = Vec3::new(0.0, 0.0, -5.0);
        manager.create_user("U1").unwrap();
        manager.set_user_position("U1", position, Some(0.0));

        let data = Arc::new(ClipData::new(vec![0.25; 4800], 48000, 1));
        manager
            .create_clip_from_data("hum", data, true, false, true)
            .unwrap();
        manager.set_clip_position("hum", position, Some(0.0));
        manager.play_clip("hum", 1.0).unwrap();
        manager.update_at(1.0);
    }

    #[test]
    fn new_properties_reach_every_gain_emitter() {
        let clock = ManualClock::new();
        let mut manager = manager_with(BackendCapabilities::gain_only(2), &clock);
        place_user_and_clip(&mut manager);

        let before = AudioProperties::default();
        let user = manager.user("U1").unwrap().spatializer();
        assert!((gain_of(&manager, user) - gain_only_curve(5.0, &before)).abs() < 1e-5);

        let after = AudioProperties::default()
            .min_distance(2.0)
            .max_distance(30.0)
            .rolloff(2.0);
        manager.set_audio_properties(after).unwrap();

        let expected = gain_only_curve(5.0, &after);
        assert!((expected - gain_only_curve(5.0, &before)).abs() > 0.1);
        let clip = manager.clip("hum").unwrap();
        let slots = [
            manager.user("U1").unwrap().spatializer(),
            clip.base().spatializer(),
            clip.plays()[0].emitter(),
        ];
        for slot in slots {
            assert!((gain_of(&manager, slot) - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn new_properties_reach_every_panner() {
        let (mut manager, _clock) = manager();
        place_user_and_clip(&mut manager);

        let after = AudioProperties::default()
            .min_distance(2.0)
            .max_distance(30.0)
            .rolloff(2.0);
        manager.set_audio_properties(after).unwrap();

        let clip = manager.clip("hum").unwrap();
        let slots = [
            manager.user("U1").unwrap().spatializer(),
            clip.base().spatializer(),
            clip.plays()[0].emitter(),
        ];
        for slot in slots {
            assert_eq!(panner_of(&manager, slot), (2.0, 30.0, 2.0));
        }
    }
}
