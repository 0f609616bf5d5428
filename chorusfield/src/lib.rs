//! # Chorusfield
//!
//! Spatialized voice-chat audio for shared virtual spaces.
//!
//! Every remote participant and every sound effect is an audio source with a
//! smoothed pose. The local participant's pose drives a single listener. Each
//! tick, poses advance and are pushed into whichever spatialization tier the
//! output supports, and each participant's voice is checked for speech.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chorusfield::*;
//!
//! let mut manager = AudioManager::with_default_output(ChorusConfig::default())?;
//! manager.create_local_user("me")?;
//! manager.create_user("alice")?;
//!
//! // Hand the transport a writer; the manager reads the other end.
//! let (mut writer, stream) = manager.voice_stream();
//! manager.set_user_stream("alice", Some(stream))?;
//! writer.write(&[0.0; 480]);
//!
//! manager.set_user_position("alice", Vec3::new(3.0, 0.0, -2.0), None);
//! manager.resume()?;
//!
//! manager.update();
//! for event in manager.poll_events() {
//!     if let ChorusEvent::AudioActivity { id, is_active } = event {
//!         println!("{} speaking: {}", id, is_active);
//!     }
//! }
//! # Ok::<(), ChorusError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`AudioManager`]**: registry of users and clips, the listener, and the tick
//! - **[`PoseTrajectory`]**: time-based blending from a current pose to a target
//! - **[`spatial`]**: the spatializer tiers and the capability probe that picks one
//! - **[`ActivityDetector`]**: speech-band energy with hysteresis
//! - **[`AudioBackend`]**: real-time (`cpal`) or offline output of the shared graph
//!
//! ## Architecture
//!
//! 1. **Tick thread**: owns the manager, advances poses, samples analysers
//! 2. **Output callback**: renders the shared [`AudioGraph`](graph::AudioGraph)
//!    in fixed blocks, skipping a block rather than waiting on the tick
//! 3. **Loader threads**: decode clips off the tick thread when asked

pub mod activity;
pub mod audio_data;
pub mod backend;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod manager;
pub mod math;
pub mod source;
pub mod spatial;
pub mod stream;
pub mod trajectory;

pub use activity::ActivityDetector;
pub use audio_data::{ClipData, ClipLoader, PendingClip};
pub use backend::{AudioBackend, BackendState, CpalBackend, DeviceInfo, OfflineBackend};
pub use clock::{ManualClock, SystemClock, TimeSource};
pub use config::{AudioProperties, ChorusConfig, DistanceAlgorithm};
pub use error::{ChorusError, DeviceKind, Result};
pub use events::ChorusEvent;
pub use manager::AudioManager;
pub use math::{Pose, Vec3};
pub use source::{AudioSource, ClipSource};
pub use spatial::{BackendCapabilities, CapabilityProbeResult, SpatializerKind};
pub use stream::{VoiceStream, VoiceStreamWriter};
pub use trajectory::PoseTrajectory;
