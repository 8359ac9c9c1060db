/// Registers FFmpeg components (formats, protocols). Call once at startup
/// before opening any address with the ffmpeg backend.
#[cfg(feature = "ffmpeg")]
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))?;
    ffmpeg_next::format::network::init();
    Ok(())
}

pub mod error;
pub mod media;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod mirror;
pub mod packet;
pub mod rescale;
pub mod session;
pub mod stream;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
#[cfg(feature = "ffmpeg")]
pub mod input;
#[cfg(feature = "ffmpeg")]
pub mod metadata;
#[cfg(feature = "ffmpeg")]
pub mod output;

pub use error::RelayError;
pub use session::{RelayConfig, RelayReport, RelaySession, SessionState};
