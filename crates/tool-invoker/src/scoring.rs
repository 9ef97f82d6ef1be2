//! Extraction quality score for text output
//!
//! A rough signal for callers: documents that yield little or no text were
//! probably scanned and need OCR, which this service does not do.

use serde::Serialize;

/// Characters of extracted text that earn a full score
const FULL_SCORE_CHARS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreStatus {
    /// Score of 80 or more
    Green,
    /// Score of 30 or more
    Yellow,
    Red,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExtractionScore {
    /// 0 to 100
    pub score: f64,
    pub status: ScoreStatus,
}

impl ExtractionScore {
    pub fn from_text(text: &str) -> Self {
        let chars = text.trim().chars().count() as f64;
        let score = (chars / FULL_SCORE_CHARS * 100.0).min(100.0);
        Self {
            score,
            status: ScoreStatus::from_score(score),
        }
    }
}

impl ExtractionScore {
    /// Combined score of several files
    ///
    /// Averages the non-zero scores only, so a file that yielded no text
    /// does not drag down the others; all zero gives zero.
    pub fn overall(scores: &[ExtractionScore]) -> Self {
        let valid: Vec<f64> = scores.iter().map(|s| s.score).filter(|s| *s > 0.0).collect();
        let score = if valid.is_empty() {
            0.0
        } else {
            valid.iter().sum::<f64>() / valid.len() as f64
        };
        Self {
            score,
            status: ScoreStatus::from_score(score),
        }
    }
}

impl ScoreStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            ScoreStatus::Green
        } else if score >= 30.0 {
            ScoreStatus::Yellow
        } else {
            ScoreStatus::Red
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_text_scores_zero() {
        let score = ExtractionScore::from_text("   \n\t ");
        assert_eq!(score.score, 0.0);
        assert_eq!(score.status, ScoreStatus::Red);
    }

    #[test]
    fn test_score_is_capped() {
        let text = "x".repeat(5000);
        let score = ExtractionScore::from_text(&text);
        assert_eq!(score.score, 100.0);
        assert_eq!(score.status, ScoreStatus::Green);
    }

    #[test]
    fn test_partial_score() {
        let text = "y".repeat(450);
        let score = ExtractionScore::from_text(&text);
        assert_eq!(score.score, 45.0);
        assert_eq!(score.status, ScoreStatus::Yellow);
    }

    #[test]
    fn test_status_boundaries() {
        assert_eq!(ScoreStatus::from_score(80.0), ScoreStatus::Green);
        assert_eq!(ScoreStatus::from_score(79.9), ScoreStatus::Yellow);
        assert_eq!(ScoreStatus::from_score(30.0), ScoreStatus::Yellow);
        assert_eq!(ScoreStatus::from_score(29.9), ScoreStatus::Red);
    }

    #[test]
    fn test_overall_ignores_zero_scores() {
        let scores = [
            ExtractionScore::from_text(&"a".repeat(900)),
            ExtractionScore::from_text(""),
            ExtractionScore::from_text(&"b".repeat(500)),
        ];
        let overall = ExtractionScore::overall(&scores);
        assert_eq!(overall.score, 70.0);
        assert_eq!(overall.status, ScoreStatus::Yellow);
    }

    #[test]
    fn test_overall_of_nothing_is_zero() {
        let overall = ExtractionScore::overall(&[ExtractionScore::from_text("  ")]);
        assert_eq!(overall.score, 0.0);
        assert_eq!(overall.status, ScoreStatus::Red);
        assert_eq!(ExtractionScore::overall(&[]).score, 0.0);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let text = "é".repeat(100);
        assert_eq!(ExtractionScore::from_text(&text).score, 10.0);
    }
}
