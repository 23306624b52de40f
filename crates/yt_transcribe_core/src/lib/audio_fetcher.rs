//! Seven-strategy audio acquisition ladder (§4.6). Every strategy is the
//! same `bestaudio` extraction wrapped around a different set of `yt-dlp`
//! extractor flags; the last strategy falls back to a video download with
//! the audio track pulled out locally via `ffmpeg`.

use std::path::{Path, PathBuf};

use uuid::Uuid;
use ytdlp_bindings::{AudioProcessor, YtDlp};

use crate::error::AcquisitionError;
use crate::rate_gate::retry_delay;

const RETRY_ATTEMPTS: u32 = 4;
const RETRY_BASE_SECS: f64 = 2.0;
const RETRY_CAP_SECS: f64 = 10.0;
const LOW_BITRATE_VIDEO_FORMAT: &str = "worstvideo[height<=360]+worstaudio/worst";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    BrowserCookiesMultiClient,
    CookieFile,
    IosImpersonation,
    TvEmbeddedImpersonation,
    LibraryFallbackReencode,
    WebEmbeddedClient,
    VideoThenExtractAudio,
}

const LADDER: [Strategy; 7] = [
    Strategy::BrowserCookiesMultiClient,
    Strategy::CookieFile,
    Strategy::IosImpersonation,
    Strategy::TvEmbeddedImpersonation,
    Strategy::LibraryFallbackReencode,
    Strategy::WebEmbeddedClient,
    Strategy::VideoThenExtractAudio,
];

pub struct AudioFetcher<'a> {
    ytdlp: &'a YtDlp,
    cookie_file: Option<&'a Path>,
    temp_dir: PathBuf,
}

impl<'a> AudioFetcher<'a> {
    pub fn new(ytdlp: &'a YtDlp, cookie_file: Option<&'a Path>, temp_dir: PathBuf) -> Self {
        AudioFetcher { ytdlp, cookie_file, temp_dir }
    }

    /// Runs the seven-strategy ladder for a bare video id, returning the
    /// path to a downloaded mp3 (or, for the last strategy, an extracted
    /// audio track) on the first strategy that produces a file.
    #[tracing::instrument(skip(self))]
    pub fn fetch(&self, video_id: &str) -> Result<PathBuf, AcquisitionError> {
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let mut last_err = AcquisitionError::DownloadFailed("no strategy was attempted".into());

        for strategy in LADDER {
            if strategy == Strategy::CookieFile && self.cookie_file.is_none() {
                continue;
            }

            match self.run_with_retry(strategy, video_id, &url) {
                Ok(path) => return Ok(path),
                Err(err) => {
                    tracing::info!(?strategy, ?err, "audio strategy exhausted, falling through");
                    last_err = err;
                }
            }
        }

        Err(last_err)
    }

    fn run_with_retry(&self, strategy: Strategy, video_id: &str, url: &str) -> Result<PathBuf, AcquisitionError> {
        let mut attempt = 0;

        loop {
            match self.run_once(strategy, video_id, url) {
                Ok(path) => return Ok(path),
                Err(err) if attempt + 1 < RETRY_ATTEMPTS => {
                    tracing::warn!(?strategy, attempt, %err, "audio fetch attempt failed, retrying");
                    attempt += 1;
                    std::thread::sleep(retry_delay(attempt, RETRY_BASE_SECS, RETRY_CAP_SECS));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn run_once(&self, strategy: Strategy, video_id: &str, url: &str) -> Result<PathBuf, AcquisitionError> {
        let stem = format!("{video_id}-{}", Uuid::new_v4());
        let output_template = self.temp_dir.join(format!("{stem}.%(ext)s"));

        match strategy {
            Strategy::BrowserCookiesMultiClient => self.ytdlp.download_audio_with_args(
                url,
                &output_template,
                &[
                    "--cookies-from-browser", "chrome",
                    "--extractor-args", "youtube:player_client=web,android,ios;skip=dash,hls",
                    "--force-ipv4",
                ],
            )?,
            Strategy::CookieFile => {
                let cookie_path = self.cookie_file.expect("caller checked cookie_file is Some");
                let cookie_str = cookie_path.to_str().ok_or_else(|| {
                    AcquisitionError::DownloadFailed(format!("invalid cookie path {}", cookie_path.display()))
                })?;
                self.ytdlp.download_audio_with_args(url, &output_template, &["--cookies", cookie_str])?
            }
            Strategy::IosImpersonation => self.ytdlp.download_audio_with_args(
                url,
                &output_template,
                &["--extractor-args", "youtube:player_client=ios"],
            )?,
            Strategy::TvEmbeddedImpersonation => self.ytdlp.download_audio_with_args(
                url,
                &output_template,
                &["--extractor-args", "youtube:player_client=tv_embedded"],
            )?,
            Strategy::LibraryFallbackReencode => self.ytdlp.download_audio_with_args(
                url,
                &output_template,
                &[
                    "--extractor-args", "youtube:player_client=default,-web",
                    "--postprocessor-args", "ffmpeg:-ar 16000 -ac 1",
                ],
            )?,
            Strategy::WebEmbeddedClient => self.ytdlp.download_audio_with_args(
                url,
                &output_template,
                &["--extractor-args", "youtube:player_client=web_embedded"],
            )?,
            Strategy::VideoThenExtractAudio => return self.fetch_via_video(video_id, url, &stem),
        }

        find_downloaded_sibling(&output_template)
            .ok_or_else(|| AcquisitionError::DownloadFailed(format!("{strategy:?} produced no audio file")))
    }

    /// Last-resort strategy: download a low-bitrate video rendition and
    /// pull the audio track out locally with `ffmpeg`, since some videos
    /// expose no extractable audio-only format at all.
    fn fetch_via_video(&self, video_id: &str, url: &str, stem: &str) -> Result<PathBuf, AcquisitionError> {
        let video_template = self.temp_dir.join(format!("{stem}.video.%(ext)s"));
        self.ytdlp.download_video(url, LOW_BITRATE_VIDEO_FORMAT, &video_template)?;

        let video_path = find_downloaded_sibling(&video_template).ok_or_else(|| {
            AcquisitionError::DownloadFailed(format!("no video file downloaded for {video_id}"))
        })?;

        let audio_path = self.temp_dir.join(format!("{stem}.mp3"));
        self.ytdlp.extract_audio_track(&video_path, &audio_path)?;
        let _ = std::fs::remove_file(&video_path);

        Ok(audio_path)
    }
}

/// `yt-dlp` resolves `%(ext)s` at download time; locate whatever file
/// landed next to the requested stem.
fn find_downloaded_sibling(output_template: &Path) -> Option<PathBuf> {
    let stem = output_template.file_stem()?.to_str()?.trim_end_matches(".%(ext)");
    let dir = output_template.parent()?;
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .find(|p| p.file_stem().and_then(|s| s.to_str()).is_some_and(|s| s.starts_with(stem)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_file_strategy_is_second_in_ladder() {
        assert_eq!(LADDER[1], Strategy::CookieFile);
    }

    #[test]
    fn video_fallback_is_last_in_ladder() {
        assert_eq!(LADDER[6], Strategy::VideoThenExtractAudio);
    }

    #[test]
    fn ladder_has_seven_strategies() {
        assert_eq!(LADDER.len(), 7);
    }
}
