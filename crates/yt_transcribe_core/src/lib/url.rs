//! Strict parsing of YouTube video/playlist/channel URLs (§6, P1).
//!
//! URL parsing is the first acquisition-pipeline boundary: a job can only be
//! created once the source URL has been classified, so this module has no
//! dependency on anything else in the crate.

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Video,
    Playlist,
    Channel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    pub kind: SourceKind,
    /// Video id for `Video`, playlist id for `Playlist`, channel handle/id
    /// for `Channel`.
    pub id: String,
}

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
];
const SHORT_HOST: &str = "youtu.be";

/// Parses a source URL into a video/playlist/channel reference, per §6.
/// Returns `None` for any shape not enumerated there (P1).
pub fn parse_source(raw: &str) -> Option<ParsedSource> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed).ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    if host == SHORT_HOST {
        let id = url.path().trim_start_matches('/');
        let id = first_segment(id);
        return video_id(id).map(|id| ParsedSource {
            kind: SourceKind::Video,
            id,
        });
    }

    if !YOUTUBE_HOSTS.contains(&host.as_str()) {
        return None;
    }

    if let Some(list) = query_param(&url, "list") {
        return Some(ParsedSource {
            kind: SourceKind::Playlist,
            id: first_segment(&list),
        });
    }

    let path = url.path();
    if path.starts_with("/playlist") {
        let list = query_param(&url, "list")?;
        return Some(ParsedSource {
            kind: SourceKind::Playlist,
            id: first_segment(&list),
        });
    }

    if let Some(rest) = path.strip_prefix("/channel/") {
        return Some(ParsedSource {
            kind: SourceKind::Channel,
            id: first_segment(rest).to_string(),
        });
    }
    if let Some(rest) = path.strip_prefix("/c/") {
        return Some(ParsedSource {
            kind: SourceKind::Channel,
            id: first_segment(rest).to_string(),
        });
    }
    if let Some(rest) = path.strip_prefix("/user/") {
        return Some(ParsedSource {
            kind: SourceKind::Channel,
            id: first_segment(rest).to_string(),
        });
    }
    if let Some(rest) = path.strip_prefix("/@") {
        return Some(ParsedSource {
            kind: SourceKind::Channel,
            id: format!("@{}", first_segment(rest)),
        });
    }

    if let Some(v) = query_param(&url, "v") {
        return video_id(&v).map(|id| ParsedSource {
            kind: SourceKind::Video,
            id,
        });
    }
    for prefix in ["/shorts/", "/embed/", "/v/", "/live/"] {
        if let Some(rest) = path.strip_prefix(prefix) {
            return video_id(first_segment(rest)).map(|id| ParsedSource {
                kind: SourceKind::Video,
                id,
            });
        }
    }

    None
}

/// A lone video-id shortcut for call sites that only care about the video
/// case (the single-video end-to-end scenario in §8).
pub fn parse_video_id(raw: &str) -> Option<String> {
    match parse_source(raw) {
        Some(ParsedSource {
            kind: SourceKind::Video,
            id,
        }) => Some(id),
        _ => None,
    }
}

fn video_id(raw: &str) -> Option<String> {
    let id = first_segment(raw);
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Takes a path/query fragment up to the first `&`, per §6's "video id taken
/// up to the first `&`" rule.
fn first_segment(raw: &str) -> &str {
    raw.split('&').next().unwrap_or(raw)
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_watch_url() {
        let p = parse_source("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap();
        assert_eq!(p.kind, SourceKind::Video);
        assert_eq!(p.id, "dQw4w9WgXcQ");
    }

    #[test]
    fn parses_watch_url_with_trailing_params() {
        let p = parse_source("https://www.youtube.com/watch?v=abc123&t=30s").unwrap();
        assert_eq!(p.id, "abc123");
    }

    #[test]
    fn parses_short_url() {
        let p = parse_source("https://youtu.be/XXXXXXXXXXX").unwrap();
        assert_eq!(p.kind, SourceKind::Video);
        assert_eq!(p.id, "XXXXXXXXXXX");
    }

    #[test]
    fn parses_short_url_with_query() {
        let p = parse_source("https://youtu.be/abc123?si=foo").unwrap();
        assert_eq!(p.id, "abc123");
    }

    #[test]
    fn parses_shorts_embed_v_live() {
        for prefix in ["shorts", "embed", "v", "live"] {
            let url = format!("https://www.youtube.com/{prefix}/abc123");
            let p = parse_source(&url).unwrap();
            assert_eq!(p.kind, SourceKind::Video);
            assert_eq!(p.id, "abc123");
        }
    }

    #[test]
    fn parses_playlist_query() {
        let p = parse_source("https://www.youtube.com/watch?v=abc&list=PLtest").unwrap();
        assert_eq!(p.kind, SourceKind::Playlist);
        assert_eq!(p.id, "PLtest");
    }

    #[test]
    fn parses_playlist_path() {
        let p = parse_source("https://www.youtube.com/playlist?list=PLtest").unwrap();
        assert_eq!(p.kind, SourceKind::Playlist);
        assert_eq!(p.id, "PLtest");
    }

    #[test]
    fn parses_channel_shapes() {
        assert_eq!(
            parse_source("https://www.youtube.com/channel/UC123").unwrap().id,
            "UC123"
        );
        assert_eq!(
            parse_source("https://www.youtube.com/c/SomeName").unwrap().id,
            "SomeName"
        );
        assert_eq!(
            parse_source("https://www.youtube.com/user/SomeName").unwrap().id,
            "SomeName"
        );
        assert_eq!(
            parse_source("https://www.youtube.com/@SomeHandle").unwrap().id,
            "@SomeHandle"
        );
    }

    #[test]
    fn trims_whitespace() {
        let p = parse_source("  https://youtu.be/abc123  \n").unwrap();
        assert_eq!(p.id, "abc123");
    }

    #[test]
    fn rejects_non_youtube_hosts() {
        assert!(parse_source("https://vimeo.com/watch?v=abc123").is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_source("not a url").is_none());
        assert!(parse_source("https://www.youtube.com/").is_none());
    }
}
