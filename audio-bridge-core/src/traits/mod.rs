pub mod audio_platform;
pub mod bridge_delegate;
pub mod capture_source;
pub mod playback_sink;
