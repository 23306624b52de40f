//! # vtt
//!
//! Parses WebVTT subtitle files produced by `YtDlp::download_auto_sub` /
//! `download_sub` (the legacy caption methods, §4.5 methods 3/4) into owned
//! cue lists the caption fetcher can adapt into `Segment`s.

use std::fs;
use std::path::Path;

use webvtt_parser::{parse_vtt, OwnedVtt};

use crate::YtDlpError;

pub trait VttProcessor {
    /// Reads and parses a `.vtt` file from disk.
    fn parse_vtt_file(&self, path: impl AsRef<Path>) -> Result<OwnedVtt, YtDlpError>;
}

impl VttProcessor for crate::YtDlp {
    fn parse_vtt_file(&self, path: impl AsRef<Path>) -> Result<OwnedVtt, YtDlpError> {
        let contents = fs::read_to_string(path.as_ref())
            .map_err(|e| YtDlpError::VttReadError(format!("{}: {e}", path.as_ref().display())))?;

        parse_vtt(&contents)
            .map(|vtt| vtt.to_owned())
            .map_err(|e| YtDlpError::VttReadError(format!("{e:?}")))
    }
}
