//! # Affect Scoring
//!
//! Collapses a ranked list of emotion scores into two scalars:
//!
//! - **valence** in [-1, 1]: positive emotions push it up, negative ones down
//! - **arousal** in [0, 1]: starts at 0.5, high-energy emotions raise it by
//!   half their score and low-energy emotions lower it by half their score
//!
//! Name matching is exact and case-sensitive. Emotions outside the lists
//! contribute nothing. An emotion can sit in one valence list and one arousal
//! list at the same time (Joy is positive and high-arousal).

use crate::prosody::EmotionScore;
use serde::Serialize;

pub const POSITIVE_EMOTIONS: &[&str] = &[
    "Joy",
    "Excitement",
    "Interest",
    "Love",
    "Pride",
    "Amusement",
    "Contentment",
];

pub const NEGATIVE_EMOTIONS: &[&str] = &[
    "Anger", "Fear", "Sadness", "Disgust", "Anxiety", "Shame", "Distress",
];

pub const HIGH_AROUSAL_EMOTIONS: &[&str] =
    &["Anger", "Fear", "Excitement", "Anxiety", "Surprise", "Joy"];

pub const LOW_AROUSAL_EMOTIONS: &[&str] =
    &["Sadness", "Calm", "Boredom", "Tiredness", "Contentment"];

/// Neutral arousal before any emotion is applied.
pub const AROUSAL_BASELINE: f64 = 0.5;

const AROUSAL_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Affect {
    pub valence: f64,
    pub arousal: f64,
}

impl Affect {
    /// Score a list of emotions. Pure: the same list always gives the same result.
    pub fn score(emotions: &[EmotionScore]) -> Self {
        Self {
            valence: valence(emotions),
            arousal: arousal(emotions),
        }
    }
}

pub fn valence(emotions: &[EmotionScore]) -> f64 {
    let raw: f64 = emotions
        .iter()
        .map(|emotion| {
            let name = emotion.name.as_str();
            if POSITIVE_EMOTIONS.contains(&name) {
                emotion.score
            } else if NEGATIVE_EMOTIONS.contains(&name) {
                -emotion.score
            } else {
                0.0
            }
        })
        .sum();

    clamp(raw, -1.0, 1.0)
}

pub fn arousal(emotions: &[EmotionScore]) -> f64 {
    let raw = emotions.iter().fold(AROUSAL_BASELINE, |acc, emotion| {
        let name = emotion.name.as_str();
        if HIGH_AROUSAL_EMOTIONS.contains(&name) {
            acc + emotion.score * AROUSAL_WEIGHT
        } else if LOW_AROUSAL_EMOTIONS.contains(&name) {
            acc - emotion.score * AROUSAL_WEIGHT
        } else {
            acc
        }
    });

    clamp(raw, 0.0, 1.0)
}

// f64::clamp would pass NaN straight through; a NaN score lands on the lower bound instead.
fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.max(min).min(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> Vec<EmotionScore> {
        pairs
            .iter()
            .map(|(name, score)| EmotionScore::new(*name, *score))
            .collect()
    }

    #[test]
    fn test_empty_list_is_neutral() {
        let affect = Affect::score(&[]);
        assert_eq!(affect.valence, 0.0);
        assert_eq!(affect.arousal, 0.5);
    }

    #[test]
    fn test_joy_and_fear() {
        let affect = Affect::score(&scores(&[("Joy", 0.8), ("Fear", 0.3)]));
        assert!((affect.valence - 0.5).abs() < 1e-9);
        // 0.5 + 0.4 + 0.15 clamps to 1.0
        assert_eq!(affect.arousal, 1.0);
    }

    #[test]
    fn test_low_arousal_emotions_calm_things_down() {
        let affect = Affect::score(&scores(&[("Sadness", 0.6), ("Calm", 0.2)]));
        assert!((affect.valence + 0.6).abs() < 1e-9);
        assert!((affect.arousal - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_contentment_counts_for_both_axes() {
        let affect = Affect::score(&scores(&[("Contentment", 0.4)]));
        assert!((affect.valence - 0.4).abs() < 1e-9);
        assert!((affect.arousal - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_and_differently_cased_names_are_ignored() {
        let affect = Affect::score(&scores(&[("joy", 0.9), ("Nostalgia", 0.7)]));
        assert_eq!(affect.valence, 0.0);
        assert_eq!(affect.arousal, 0.5);
    }

    #[test]
    fn test_large_scores_stay_in_range() {
        let affect = Affect::score(&scores(&[("Joy", 5.0), ("Excitement", 3.0)]));
        assert_eq!(affect.valence, 1.0);
        assert_eq!(affect.arousal, 1.0);

        let affect = Affect::score(&scores(&[("Anger", 2.5), ("Sadness", 9.0)]));
        assert_eq!(affect.valence, -1.0);
        assert!((0.0..=1.0).contains(&affect.arousal));

        let affect = Affect::score(&scores(&[("Tiredness", 4.0)]));
        assert_eq!(affect.arousal, 0.0);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let input = scores(&[("Interest", 0.3), ("Anxiety", 0.2), ("Surprise", 0.1)]);
        let first = Affect::score(&input);
        for _ in 0..10 {
            assert_eq!(Affect::score(&input), first);
        }
    }
}
