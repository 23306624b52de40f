//! Pure function from `(duration, model, tier)` to a chunk plan (§4.3, P4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Lower RPM, higher cost, multilingual, single general-purpose model.
    Openai,
    /// Higher RPM, multi-model family (turbo/standard/distilled).
    Groq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    /// Provider A's single general-purpose model.
    OpenaiWhisper,
    /// Provider B's turbo-class model.
    GroqTurbo,
    /// Provider B's standard large model.
    GroqStandard,
    /// Provider B's English-only distilled model.
    GroqDistilled,
}

impl Model {
    pub fn provider(self) -> Provider {
        match self {
            Model::OpenaiWhisper => Provider::Openai,
            Model::GroqTurbo | Model::GroqStandard | Model::GroqDistilled => Provider::Groq,
        }
    }

    pub fn rpm(self) -> u32 {
        match self {
            Model::OpenaiWhisper => 50,
            Model::GroqTurbo => 400,
            Model::GroqStandard => 300,
            Model::GroqDistilled => 100,
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Model::OpenaiWhisper => "whisper-1",
            Model::GroqTurbo => "whisper-large-v3-turbo",
            Model::GroqStandard => "whisper-large-v3",
            Model::GroqDistilled => "distil-whisper-large-v3-en",
        }
    }
}

pub const MAX_CHUNK_SECONDS_SINGLE: f64 = 180.0;
const MAX_CHUNK_SECONDS: f64 = 300.0;
const MIN_CHUNK_SECONDS: f64 = 60.0;
const OVERLAP_SECONDS: f64 = 0.5;
const BASE_RPM: f64 = 400.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    /// `(start, duration)` pairs; starts are monotonically non-decreasing.
    pub chunks: Vec<(f64, f64)>,
    pub model: Model,
    pub workers: usize,
}

/// Selects a model when the caller passes `model = auto`, per §4.3's
/// `select_optimal_model` heuristic. `fastest_requested` models the caller
/// explicitly asking for the turbo tier regardless of duration.
pub fn select_model(
    provider: Provider,
    duration_seconds: f64,
    language: &str,
    fastest_requested: bool,
) -> Model {
    match provider {
        Provider::Openai => Model::OpenaiWhisper,
        Provider::Groq => {
            if fastest_requested {
                return Model::GroqTurbo;
            }
            if duration_seconds <= 1800.0 && language == "en" {
                Model::GroqDistilled
            } else {
                Model::GroqStandard
            }
        }
    }
}

/// Computes the chunk plan for a given audio duration and model, per §4.3's
/// rules. `estimated_flac_mb` is the caller's estimate of the normalised
/// FLAC's size, used for the single-chunk short-circuit.
pub fn plan_chunks(
    duration_seconds: f64,
    model: Model,
    estimated_flac_mb: f64,
    max_chunk_size_mb: f64,
) -> ChunkPlan {
    let rpm = model.rpm() as f64;

    if duration_seconds <= MAX_CHUNK_SECONDS_SINGLE && estimated_flac_mb < max_chunk_size_mb {
        return ChunkPlan {
            chunks: vec![(0.0, duration_seconds)],
            model,
            workers: 1,
        };
    }

    let base_chunk = if duration_seconds > 14400.0 {
        120.0
    } else if duration_seconds > 7200.0 {
        150.0
    } else if duration_seconds > 3600.0 {
        180.0
    } else if duration_seconds > 1800.0 {
        240.0
    } else {
        300.0
    };

    let chunk_duration = (base_chunk * (rpm / BASE_RPM)).clamp(MIN_CHUNK_SECONDS, MAX_CHUNK_SECONDS);
    let overlap = OVERLAP_SECONDS;

    let mut chunks = Vec::new();
    let mut start = 0.0_f64;
    while start < duration_seconds {
        let remaining = duration_seconds - start;
        let this_duration = remaining.min(chunk_duration);
        chunks.push((start, this_duration));
        start += chunk_duration - overlap;
    }

    let workers = worker_count(model, rpm, duration_seconds);

    ChunkPlan { chunks, model, workers }
}

fn worker_count(model: Model, rpm: f64, duration_seconds: f64) -> usize {
    let mut w = (rpm / 60.0).clamp(2.0, 10.0);

    if duration_seconds > 14400.0 {
        w /= 4.0;
    } else if duration_seconds > 7200.0 {
        w /= 3.0;
    } else if duration_seconds > 3600.0 {
        w /= 2.0;
    }

    let mut w = w.round().max(1.0) as usize;

    // The lower-throughput provider (Provider A / OpenAI) is capped at 3.
    if model.provider() == Provider::Openai {
        w = w.min(3);
    }

    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_audio_is_a_single_chunk() {
        let plan = plan_chunks(45.0, Model::GroqTurbo, 5.0, 25.0);
        assert_eq!(plan.chunks, vec![(0.0, 45.0)]);
        assert_eq!(plan.workers, 1);
    }

    #[test]
    fn large_file_forces_chunking_even_if_short() {
        let plan = plan_chunks(45.0, Model::GroqTurbo, 30.0, 25.0);
        assert!(plan.chunks.len() > 1);
    }

    #[test]
    fn p4_chunks_cover_duration_with_exact_stride() {
        for duration in [500.0, 2000.0, 4000.0, 8000.0, 16000.0] {
            let plan = plan_chunks(duration, Model::GroqStandard, 100.0, 25.0);
            assert_eq!(plan.chunks[0].0, 0.0);

            for w in plan.chunks.windows(2) {
                let (s0, d0) = w[0];
                let (s1, _) = w[1];
                assert!(s0 + d0 >= s1, "chunks must not leave a gap");
            }

            let (last_start, last_duration) = *plan.chunks.last().unwrap();
            assert!((last_start + last_duration - duration).abs() < 1e-6);

            if plan.chunks.len() > 2 {
                let stride_0 = plan.chunks[1].0 - plan.chunks[0].0;
                let stride_1 = plan.chunks[2].0 - plan.chunks[1].0;
                assert!((stride_0 - stride_1).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn worker_count_is_capped_for_openai() {
        let plan = plan_chunks(10000.0, Model::OpenaiWhisper, 100.0, 25.0);
        assert!(plan.workers <= 3);
    }

    #[test]
    fn worker_count_downscales_for_long_audio() {
        let short = plan_chunks(1000.0, Model::GroqStandard, 100.0, 25.0);
        let long = plan_chunks(20000.0, Model::GroqStandard, 100.0, 25.0);
        assert!(long.workers <= short.workers);
    }

    #[test]
    fn model_auto_selection_prefers_distilled_for_short_english() {
        let m = select_model(Provider::Groq, 900.0, "en", false);
        assert_eq!(m, Model::GroqDistilled);
    }

    #[test]
    fn model_auto_selection_falls_back_to_standard() {
        assert_eq!(select_model(Provider::Groq, 900.0, "fr", false), Model::GroqStandard);
        assert_eq!(select_model(Provider::Groq, 3600.0, "en", false), Model::GroqStandard);
    }

    #[test]
    fn model_auto_selection_honors_fastest_request() {
        assert_eq!(select_model(Provider::Groq, 3600.0, "en", true), Model::GroqTurbo);
    }

    #[test]
    fn openai_provider_ignores_model_selection() {
        assert_eq!(select_model(Provider::Openai, 100.0, "fr", true), Model::OpenaiWhisper);
    }
}
