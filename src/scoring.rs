//! Heuristic response quality scoring.
//!
//! The score is a proxy signal for the learning loop, not a correctness
//! oracle. It starts at 0.5 and moves on three cheap signals:
//!
//! | signal | condition | delta |
//! |---|---|---|
//! | length | `50 < chars < 5000` | +0.2 |
//! | latency | `500ms < t < 2000ms` | +0.2 |
//! | latency | `t > 10s` | −0.1 |
//! | formatting | contains a line break or `". "` | +0.1 |
//!
//! The result is clamped to `[0, 1]`.

use std::time::Duration;

const BASE: f64 = 0.5;

/// Score a provider response. Deterministic for a given input.
pub fn quality_score(content: &str, latency: Duration) -> f64 {
    let mut score = BASE;

    let chars = content.chars().count();
    if chars > 50 && chars < 5000 {
        score += 0.2;
    }

    let ms = latency.as_millis();
    if ms > 500 && ms < 2000 {
        score += 0.2;
    } else if ms > 10_000 {
        score -= 0.1;
    }

    if content.contains('\n') || content.contains(". ") {
        score += 0.1;
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn ideal_response_scores_one() {
        let content = "Launch day is here. Meet the tool that writes your captions for you!\nTry it today.";
        assert!(close(quality_score(content, Duration::from_millis(900)), 1.0));
    }

    #[test]
    fn empty_slow_response_scores_low() {
        assert!(close(quality_score("", Duration::from_secs(12)), 0.4));
    }

    #[test]
    fn band_edges_are_exclusive() {
        let fifty = "a".repeat(50);
        assert!(close(quality_score(&fifty, Duration::from_millis(500)), 0.5));
        let fifty_one = "a".repeat(51);
        assert!(close(quality_score(&fifty_one, Duration::from_millis(501)), 0.9));
    }

    #[test]
    fn middling_latency_gets_no_bonus_or_penalty() {
        assert!(close(quality_score("ok", Duration::from_secs(5)), 0.5));
    }

    #[test]
    fn too_long_content_loses_length_bonus() {
        let long = "word. ".repeat(1000);
        assert!(close(quality_score(&long, Duration::from_millis(1000)), 0.8));
    }
}
