//! Wraps `ytdlp_bindings`'s FFmpeg bindings with the normalise/cut/probe
//! operations the transcription engine needs (§4.4). Owns nothing; every
//! path it touches belongs to whichever caller supplied it.

use std::path::{Path, PathBuf};

use ytdlp_bindings::{FlacProcessor, YtDlp};

use crate::error::TranscriptionError;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_CHANNELS: u8 = 1;
const MAX_CUT_HALVINGS: u32 = 3;

/// Resamples `input_path` to 16 kHz mono FLAC at the lowest compression
/// level, with an optional tempo multiplier, writing to `output_path`.
pub fn normalize(
    ytdlp: &YtDlp,
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    speed_multiplier: f64,
) -> Result<PathBuf, TranscriptionError> {
    ytdlp.normalize_to_flac(
        &input_path,
        &output_path,
        DEFAULT_SAMPLE_RATE,
        DEFAULT_CHANNELS,
        speed_multiplier,
    )?;
    Ok(output_path.as_ref().to_path_buf())
}

/// Cuts a `(start, duration)` window out of an already-normalised FLAC
/// file. If the resulting file exceeds `max_size_mb`, the requested
/// duration is halved and retried up to `MAX_CUT_HALVINGS` times before the
/// chunk is abandoned (§4.4 rule 2).
pub fn cut(
    ytdlp: &YtDlp,
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    start_seconds: f64,
    duration_seconds: f64,
    max_size_mb: f64,
) -> Result<PathBuf, TranscriptionError> {
    let mut duration = duration_seconds;

    for attempt in 0..=MAX_CUT_HALVINGS {
        ytdlp.cut_flac(&input_path, &output_path, start_seconds, duration)?;

        let size_mb = std::fs::metadata(output_path.as_ref())
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);

        if size_mb < max_size_mb {
            return Ok(output_path.as_ref().to_path_buf());
        }

        if attempt == MAX_CUT_HALVINGS {
            tracing::warn!(size_mb, max_size_mb, attempt, "chunk still exceeds upload cap after max halvings, abandoning");
            let _ = std::fs::remove_file(output_path.as_ref());
            return Err(TranscriptionError::AllChunksFailed);
        }

        tracing::warn!(size_mb, max_size_mb, attempt, "chunk exceeds upload cap, halving duration");
        duration /= 2.0;
    }

    unreachable!("loop always returns on its last iteration")
}

/// Duration of a (possibly un-normalised) audio file, in seconds.
pub fn probe_duration_seconds(ytdlp: &YtDlp, input_path: impl AsRef<Path>) -> Result<f64, TranscriptionError> {
    Ok(ytdlp.probe_duration_seconds(input_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_16khz_mono() {
        assert_eq!(DEFAULT_SAMPLE_RATE, 16_000);
        assert_eq!(DEFAULT_CHANNELS, 1);
    }
}
