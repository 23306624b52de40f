//! # audio
//!
//! Enrich `YtDlp` by adding audio processing capabilities

use std::path::Path;

use crate::{YtDlp, YtDlpError};

/// A trait for processing audio files.
/// Requires `ffmpeg` v7* available in the evironment
pub trait AudioProcessor {
    /// Split an given audi into chunks based on a segment time in seconds
    ///
    /// # Arguments
    ///
    /// * `file_input_path` - The path to the downloaded audio file.
    /// * `segment_time_s` - The duration of segments to split the audio file by in seconds
    /// * `out_template` - Path/ template string of the split audio files
    /// * `extra_args` - Additional optional args
    ///
    /// # Errors
    ///
    /// Returns `YtDlpError` if the file cannot be read.
    fn split_audio_to_chunks(
        &self,
        file_input_path: impl AsRef<Path>,
        segment_time_s: u16,
        out_template: impl AsRef<Path>,
        extra_args: Option<&[&str]>,
    ) -> Result<(), YtDlpError>;

    /// Extracts the audio track from a video file into mp3, for the
    /// `AudioFetcher` fallback that downloads video when no audio-only
    /// format is extractable directly.
    fn extract_audio_track(
        &self,
        video_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Result<(), YtDlpError>;
}

impl AudioProcessor for YtDlp {
    fn split_audio_to_chunks(
        &self,
        file_input_path: impl AsRef<Path>,
        segment_time_s: u16,
        out_template: impl AsRef<Path>,
        extra_args: Option<&[&str]>,
    ) -> Result<(), YtDlpError> {
        let input_str = file_input_path.as_ref().to_str().ok_or_else(|| {
            YtDlpError::InvalidPath(file_input_path.as_ref().display().to_string())
        })?;
        let output_str = out_template
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(out_template.as_ref().display().to_string()))?;
        let segment_time_s = segment_time_s.to_string();

        let mut args = vec![
            "-i",
            input_str,
            "-f",
            "segment",
            "-segment_time",
            &segment_time_s,
            "-ac",
            "1",
            "-b:a",
            "64k",
            "-ar",
            "16000",
            "-c:a",
            "libmp3lame",
        ];

        if let Some(extra) = extra_args {
            args.extend_from_slice(extra);
        }

        args.push(output_str);

        self.run_ffmpeg(&args)
    }

    fn extract_audio_track(
        &self,
        video_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
    ) -> Result<(), YtDlpError> {
        let input_str = video_path
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(video_path.as_ref().display().to_string()))?;
        let output_str = output_path
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(output_path.as_ref().display().to_string()))?;

        self.run_ffmpeg(&["-y", "-i", input_str, "-vn", "-acodec", "libmp3lame", output_str])
    }
}

/// Normalise/cut operations used by the transcription engine's preprocessor
/// stage: resample to 16kHz mono FLAC, and cut a `(start, duration)` window
/// out of an already-normalised file.
pub trait FlacProcessor {
    /// Resamples to 16 kHz, downmixes to mono, re-encodes to FLAC at the
    /// lowest compression level, with an optional tempo multiplier (1/2/3/4x).
    /// A single `atempo` filter only accepts `0.5-2.0`, so 3x/4x are built by
    /// chaining two `atempo=2.0,atempo=1.5`/`atempo=2.0,atempo=2.0` filters.
    fn normalize_to_flac(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        sample_rate: u32,
        channels: u8,
        speed_multiplier: f64,
    ) -> Result<(), YtDlpError>;

    /// Cuts a `(start, duration)` window from an already-normalised FLAC
    /// file into a new FLAC file.
    fn cut_flac(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        start_seconds: f64,
        duration_seconds: f64,
    ) -> Result<(), YtDlpError>;

    /// Probes an audio file's duration in seconds via `ffprobe`.
    fn probe_duration_seconds(&self, input_path: impl AsRef<Path>) -> Result<f64, YtDlpError>;
}

fn atempo_filter_chain(speed_multiplier: f64) -> Option<String> {
    if (speed_multiplier - 1.0).abs() < f64::EPSILON {
        return None;
    }
    let stages = match speed_multiplier {
        m if (m - 2.0).abs() < f64::EPSILON => vec![2.0],
        m if (m - 3.0).abs() < f64::EPSILON => vec![2.0, 1.5],
        m if (m - 4.0).abs() < f64::EPSILON => vec![2.0, 2.0],
        m => vec![m.clamp(0.5, 2.0)],
    };
    Some(
        stages
            .iter()
            .map(|s| format!("atempo={s}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

impl FlacProcessor for YtDlp {
    fn normalize_to_flac(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        sample_rate: u32,
        channels: u8,
        speed_multiplier: f64,
    ) -> Result<(), YtDlpError> {
        let input_str = input_path
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(input_path.as_ref().display().to_string()))?;
        let output_str = output_path
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(output_path.as_ref().display().to_string()))?;

        let sample_rate = sample_rate.to_string();
        let channels = channels.to_string();

        let mut args = vec![
            "-y", "-i", input_str, "-ar", &sample_rate, "-ac", &channels, "-compression_level",
            "0",
        ];

        let tempo_filter = atempo_filter_chain(speed_multiplier);
        if let Some(ref filter) = tempo_filter {
            args.push("-filter:a");
            args.push(filter);
        }

        args.push(output_str);

        self.run_ffmpeg(&args)
    }

    fn cut_flac(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        start_seconds: f64,
        duration_seconds: f64,
    ) -> Result<(), YtDlpError> {
        let input_str = input_path
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(input_path.as_ref().display().to_string()))?;
        let output_str = output_path
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(output_path.as_ref().display().to_string()))?;

        let start = format!("{start_seconds:.3}");
        let duration = format!("{duration_seconds:.3}");

        self.run_ffmpeg(&[
            "-y", "-ss", &start, "-i", input_str, "-t", &duration, "-c", "copy", output_str,
        ])
    }

    fn probe_duration_seconds(&self, input_path: impl AsRef<Path>) -> Result<f64, YtDlpError> {
        let input_str = input_path
            .as_ref()
            .to_str()
            .ok_or_else(|| YtDlpError::InvalidPath(input_path.as_ref().display().to_string()))?;

        if which::which("ffprobe").is_err() {
            return Err(YtDlpError::BinaryNotFound("ffprobe".to_string()));
        }

        let output = std::process::Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                input_str,
            ])
            .output()?;

        if !output.status.success() {
            return Err(YtDlpError::NonZeroExit {
                command: "ffprobe".to_string(),
                status: output.status.code().unwrap_or(-1),
                output: String::from_utf8_lossy(&output.stderr).into(),
            });
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| YtDlpError::ProbeError(format!("could not parse ffprobe duration: {e}")))
    }
}

#[cfg(test)]
mod tempo_tests {
    use super::atempo_filter_chain;

    #[test]
    fn default_speed_has_no_filter() {
        assert_eq!(atempo_filter_chain(1.0), None);
    }

    #[test]
    fn doubles_speed_with_single_atempo() {
        assert_eq!(atempo_filter_chain(2.0), Some("atempo=2".to_string()));
    }

    #[test]
    fn triples_speed_by_chaining_filters() {
        assert_eq!(atempo_filter_chain(3.0), Some("atempo=2,atempo=1.5".to_string()));
    }

    #[test]
    fn quadruples_speed_by_chaining_filters() {
        assert_eq!(atempo_filter_chain(4.0), Some("atempo=2,atempo=2".to_string()));
    }
}
