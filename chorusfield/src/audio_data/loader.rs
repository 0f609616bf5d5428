use crate::audio_data::{ClipData, LoadOptions};
use crate::error::Result;
use std::sync::Arc;

/// Decodes clip media from a path.
///
/// [`DefaultAudioLoader`](super::DefaultAudioLoader) covers the formats
/// symphonia knows. Implement this to pull clips from an asset bundle or a
/// cache instead of the filesystem.
///
/// # Example
///
/// ```ignore
/// use chorusfield::audio_data::{AudioDataLoader, ClipData, LoadOptions};
/// use chorusfield::error::Result;
/// use std::sync::Arc;
///
/// struct BundleLoader;
///
/// impl AudioDataLoader for BundleLoader {
///     fn load(&self, path: &str, options: &LoadOptions) -> Result<Arc<ClipData>> {
///         todo!()
///     }
/// }
/// ```
pub trait AudioDataLoader {
    /// # Errors
    ///
    /// Returns a `ChorusError` if the media cannot be read or decoded.
    fn load(&self, path: &str, options: &LoadOptions) -> Result<Arc<ClipData>>;
}
