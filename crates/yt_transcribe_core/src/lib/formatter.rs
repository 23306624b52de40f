//! Pure `(segments, format) -> string` conversions, and the reverse for SRT
//! (§4.8, P3).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::segment::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Txt,
    Srt,
    Vtt,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Txt => "txt",
            OutputFormat::Srt => "srt",
            OutputFormat::Vtt => "vtt",
            OutputFormat::Json => "json",
        }
    }
}

/// Optional header prepended to a `txt` transcript by the caller (§4.8).
pub struct TxtHeader<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub video_id: &'a str,
}

pub fn format(segments: &[Segment], format: OutputFormat) -> String {
    match format {
        OutputFormat::Txt => format_txt(segments),
        OutputFormat::Srt => format_srt(segments),
        OutputFormat::Vtt => format_vtt(segments),
        OutputFormat::Json => format_json(segments),
    }
}

pub fn format_txt(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn format_txt_with_header(segments: &[Segment], header: TxtHeader<'_>) -> String {
    format!(
        "{}\n{}\n{}\n{}\n\n{}",
        header.title,
        header.url,
        header.video_id,
        "-".repeat(40),
        format_txt(segments)
    )
}

pub fn format_srt(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        out.push_str(&(i + 1).to_string());
        out.push('\n');
        out.push_str(&srt_timestamp(seg.start));
        out.push_str(" --> ");
        out.push_str(&srt_timestamp(seg.end()));
        out.push('\n');
        out.push_str(seg.text.trim());
        out.push_str("\n\n");
    }
    out
}

pub fn format_vtt(segments: &[Segment]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for seg in segments {
        out.push_str(&vtt_timestamp(seg.start));
        out.push_str(" --> ");
        out.push_str(&vtt_timestamp(seg.end()));
        out.push('\n');
        out.push_str(seg.text.trim());
        out.push_str("\n\n");
    }
    out
}

pub fn format_json(segments: &[Segment]) -> String {
    serde_json::to_string_pretty(segments).unwrap_or_else(|_| "[]".to_string())
}

fn srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round().max(0.0) as u64;
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

fn vtt_timestamp(seconds: f64) -> String {
    srt_timestamp(seconds).replacen(',', ".", 1)
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}):(\d{2}):(\d{2})[.,](\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2})[.,](\d{3})")
        .unwrap()
});

/// Parses an SRT (or WebVTT-flavoured SRT) document back into segments,
/// reversing `format_srt` for P3. Blocks are separated by a blank line; the
/// index line is ignored; the timestamp line accepts `,` or `.` as the
/// fractional separator; inline markup is stripped from the text; empty
/// texts are discarded.
pub fn parse_srt(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();

    for block in input.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }

        let mut lines = block.lines();
        let mut first = lines.next().unwrap_or_default().trim();

        // Skip a bare numeric index line (SRT) to get to the timestamp line.
        let timestamp_line = if TIMESTAMP_RE.is_match(first) {
            first
        } else {
            match lines.next() {
                Some(next) if TIMESTAMP_RE.is_match(next.trim()) => {
                    first = next.trim();
                    first
                }
                _ => continue,
            }
        };

        let Some(caps) = TIMESTAMP_RE.captures(timestamp_line) else {
            continue;
        };
        let start = timestamp_seconds(&caps, 1);
        let end = timestamp_seconds(&caps, 5);

        let text_lines: Vec<&str> = lines.collect();
        let text = TAG_RE
            .replace_all(&text_lines.join(" "), "")
            .trim()
            .to_string();

        if text.is_empty() {
            continue;
        }

        segments.push(Segment::new(text, start, (end - start).max(0.0)));
    }

    segments
}

fn timestamp_seconds(caps: &regex::Captures<'_>, offset: usize) -> f64 {
    let h: f64 = caps[offset].parse().unwrap_or(0.0);
    let m: f64 = caps[offset + 1].parse().unwrap_or(0.0);
    let s: f64 = caps[offset + 2].parse().unwrap_or(0.0);
    let ms: f64 = caps[offset + 3].parse().unwrap_or(0.0);
    h * 3600.0 + m * 60.0 + s + ms / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Segment> {
        vec![
            Segment::new("hello world", 0.0, 1.5),
            Segment::new("second line", 1.5, 2.25),
        ]
    }

    #[test]
    fn txt_joins_with_single_spaces() {
        assert_eq!(format_txt(&sample()), "hello world second line");
    }

    #[test]
    fn srt_uses_comma_fraction() {
        let srt = format_srt(&sample());
        assert!(srt.contains("00:00:00,000 --> 00:00:01,500"));
        assert!(srt.starts_with('1'));
    }

    #[test]
    fn vtt_has_header_and_dot_fraction() {
        let vtt = format_vtt(&sample());
        assert!(vtt.starts_with("WEBVTT\n\n"));
        assert!(vtt.contains("00:00:00.000 --> 00:00:01.500"));
    }

    #[test]
    fn json_round_trips_through_serde() {
        let json = format_json(&sample());
        let parsed: Vec<Segment> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn srt_round_trip_p3() {
        let segments = sample();
        let srt = format_srt(&segments);
        let parsed = parse_srt(&srt);
        assert_eq!(parsed, segments);
    }

    #[test]
    fn srt_parse_strips_inline_markup() {
        let srt = "1\n00:00:00,000 --> 00:00:01,000\n<b>bolded</b> text\n\n";
        let parsed = parse_srt(srt);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "bolded text");
    }

    #[test]
    fn srt_parse_discards_empty_text_blocks() {
        let srt = "1\n00:00:00,000 --> 00:00:01,000\n\n\n2\n00:00:01,000 --> 00:00:02,000\nreal text\n\n";
        let parsed = parse_srt(srt);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "real text");
    }

    #[test]
    fn srt_parse_accepts_dot_fraction() {
        let srt = "1\n00:00:00.000 --> 00:00:01.000\nvtt-flavoured\n\n";
        let parsed = parse_srt(srt);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].start, 0.0);
    }
}
