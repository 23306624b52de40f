#[cfg(feature = "audio-processing")]
pub mod audio;
#[cfg(feature = "vtt-processing")]
pub mod vtt;
