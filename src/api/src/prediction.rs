//! Weighted win-rate prediction.
//!
//! Each horse is scored from three factors blended with a normalized weight
//! vector:
//!
//! * popularity: `max(0, 1 - (rank - 1) / field_size)`
//! * jockey: historical jockey win rate (percent / 100), 0 without history
//! * odds: `max(0, 1 - ln(odds) / ln(20))`
//!
//! `raw = base * 0.5 + Σ weight_i * score_i`, clamped to `[0, 1]`.
//! These are heuristics, not fitted coefficients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::{aggregate, entrants_at_distance, normalize_jockey, Dimension, RaceFilter, RateTable};
use crate::types::{Horse, Race};

/// Odds at which the odds factor reaches zero
const ODDS_CEILING: f64 = 20.0;

/// Share of the base weight added to every raw score
const BASE_FACTOR: f64 = 0.5;

/// Sample total at which evidence-based confidence saturates (50 + 50 + 30)
const EVIDENCE_SATURATION: f64 = 130.0;

#[derive(Debug, Error, PartialEq)]
pub enum PredictionError {
    #[error("candidate race has no entrants")]
    NoEntrants,
    #[error("weights must be non-negative with a positive finite sum, got {0}")]
    InvalidWeights(String),
}

/// Factor weights. Need not sum to 1; they are normalized before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub popularity: f64,
    pub jockey: f64,
    /// Odds-derived factor (older clients call it `distance`)
    #[serde(alias = "distance")]
    pub odds: f64,
    pub base: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self::new(0.4, 0.3, 0.2, 0.1)
    }
}

impl Weights {
    pub const fn new(popularity: f64, jockey: f64, odds: f64, base: f64) -> Self {
        Self {
            popularity,
            jockey,
            odds,
            base,
        }
    }

    pub fn sum(&self) -> f64 {
        self.popularity + self.jockey + self.odds + self.base
    }

    /// Divide every component by the sum so the blend is convex.
    pub fn normalized(&self) -> Result<Weights, PredictionError> {
        let parts = [self.popularity, self.jockey, self.odds, self.base];
        let sum = self.sum();
        if parts.iter().any(|w| *w < 0.0 || !w.is_finite()) || !(sum > 0.0) || !sum.is_finite() {
            return Err(PredictionError::InvalidWeights(format!("{:?}", self)));
        }
        Ok(Weights::new(
            self.popularity / sum,
            self.jockey / sum,
            self.odds / sum,
            self.base / sum,
        ))
    }

    pub fn scale(&self, popularity: f64, jockey: f64, odds: f64) -> Weights {
        Weights::new(
            self.popularity * popularity,
            self.jockey * jockey,
            self.odds * odds,
            self.base,
        )
    }
}

/// How a prediction's confidence is derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidencePolicy {
    /// `0.6 + 0.3 * predicted_win_rate`
    #[default]
    Outcome,
    /// Historical sample volume behind the factors, saturating at 130
    Evidence,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionOptions {
    pub confidence: ConfidencePolicy,
    pub top_recommendations: usize,
}

impl Default for PredictionOptions {
    fn default() -> Self {
        Self {
            confidence: ConfidencePolicy::Outcome,
            top_recommendations: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorScore {
    pub rate: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Factors {
    pub popularity: FactorScore,
    pub jockey: FactorScore,
    pub odds: FactorScore,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HorsePrediction {
    pub horse: Horse,
    pub predicted_win_rate: f64,
    pub confidence: f64,
    pub factors: Factors,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RacePrediction {
    /// Sorted by predicted win rate, best first
    pub predictions: Vec<HorsePrediction>,
    pub top_recommendations: Vec<HorsePrediction>,
    pub average_confidence: f64,
}

pub fn popularity_score(popularity: i32, field_size: usize) -> f64 {
    if field_size == 0 {
        return 0.0;
    }
    (1.0 - (popularity as f64 - 1.0) / field_size as f64).max(0.0)
}

pub fn odds_score(odds: f64) -> f64 {
    if !(odds > 0.0) {
        return 0.0;
    }
    (1.0 - odds.ln() / ODDS_CEILING.ln()).max(0.0)
}

/// Historical tables a prediction draws on.
pub struct Predictor<'a> {
    history: &'a [Race],
    jockeys: RateTable,
    popularity: RateTable,
}

impl<'a> Predictor<'a> {
    /// Jockey and popularity tables over the whole history.
    pub fn new(history: &'a [Race]) -> Self {
        let all = RaceFilter::default();
        Self {
            history,
            jockeys: aggregate(history, Dimension::Jockey, &all),
            popularity: aggregate(history, Dimension::Popularity, &all),
        }
    }

    /// Jockey win rate as a fraction, with the number of rides behind it.
    pub fn jockey_rate(&self, jockey: &str) -> (f64, usize) {
        self.jockeys
            .get(normalize_jockey(jockey).as_str())
            .map(|r| (r.win_rate / 100.0, r.total))
            .unwrap_or((0.0, 0))
    }

    fn popularity_samples(&self, popularity: i32) -> usize {
        self.popularity
            .get(popularity as i64)
            .map(|r| r.total)
            .unwrap_or(0)
    }

    fn score_horse(
        &self,
        horse: &Horse,
        race: &Race,
        weights: &Weights,
        policy: ConfidencePolicy,
        distance_samples: usize,
    ) -> HorsePrediction {
        let field_size = race.field_size();
        let pop_score = popularity_score(horse.popularity, field_size);
        let (jockey_score, jockey_samples) = self.jockey_rate(&horse.jockey);
        let odds = odds_score(horse.odds);

        let raw = weights.base * BASE_FACTOR
            + weights.popularity * pop_score
            + weights.jockey * jockey_score
            + weights.odds * odds;
        let predicted = raw.clamp(0.0, 1.0);

        let confidence = match policy {
            ConfidencePolicy::Outcome => 0.6 + 0.3 * predicted,
            ConfidencePolicy::Evidence => {
                let samples =
                    jockey_samples + self.popularity_samples(horse.popularity) + distance_samples;
                (samples as f64 / EVIDENCE_SATURATION).min(1.0)
            }
        };

        HorsePrediction {
            horse: horse.clone(),
            predicted_win_rate: predicted,
            confidence,
            factors: Factors {
                popularity: FactorScore {
                    rate: pop_score,
                    weight: weights.popularity,
                },
                jockey: FactorScore {
                    rate: jockey_score,
                    weight: weights.jockey,
                },
                odds: FactorScore {
                    rate: odds,
                    weight: weights.odds,
                },
            },
        }
    }

    /// Score every entrant of `candidate`, best first.
    pub fn predict(
        &self,
        candidate: &Race,
        weights: &Weights,
        options: &PredictionOptions,
    ) -> Result<RacePrediction, PredictionError> {
        if candidate.horses.is_empty() {
            return Err(PredictionError::NoEntrants);
        }
        let weights = weights.normalized()?;
        let distance_samples = match options.confidence {
            ConfidencePolicy::Evidence => entrants_at_distance(self.history, candidate.distance),
            ConfidencePolicy::Outcome => 0,
        };

        let mut predictions: Vec<HorsePrediction> = candidate
            .horses
            .iter()
            .map(|h| self.score_horse(h, candidate, &weights, options.confidence, distance_samples))
            .collect();

        // Stable: equal scores keep entry order
        predictions.sort_by(|a, b| {
            b.predicted_win_rate
                .partial_cmp(&a.predicted_win_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let average_confidence =
            predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64;
        let top_recommendations = predictions
            .iter()
            .take(options.top_recommendations)
            .cloned()
            .collect();

        tracing::debug!(
            "Predicted {} horses, average confidence {:.3}",
            predictions.len(),
            average_confidence
        );

        Ok(RacePrediction {
            predictions,
            top_recommendations,
            average_confidence,
        })
    }
}

/// Predict a candidate race against the full history.
pub fn predict_race(
    candidate: &Race,
    history: &[Race],
    weights: Option<&Weights>,
    options: &PredictionOptions,
) -> Result<RacePrediction, PredictionError> {
    let weights = weights.copied().unwrap_or_default();
    Predictor::new(history).predict(candidate, &weights, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::tests::{create_test_race, horse};
    use crate::types::{Course, Surface};

    fn candidate() -> Race {
        let mut race = create_test_race("c", Course::Tokyo, Surface::Turf, 1600);
        race.result = None;
        race
    }

    #[test]
    fn test_weight_normalization() {
        let w = Weights::new(2.0, 1.0, 1.0, 0.0).normalized().unwrap();
        assert!((w.popularity - 0.5).abs() < 1e-12);
        assert!((w.jockey - 0.25).abs() < 1e-12);
        assert!((w.odds - 0.25).abs() < 1e-12);
        assert_eq!(w.base, 0.0);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        assert!(Weights::new(0.0, 0.0, 0.0, 0.0).normalized().is_err());
        assert!(Weights::new(-1.0, 1.0, 1.0, 1.0).normalized().is_err());
        assert!(Weights::new(f64::NAN, 1.0, 1.0, 1.0).normalized().is_err());
    }

    #[test]
    fn test_distance_alias() {
        let w: Weights =
            serde_json::from_str(r#"{"popularity":0.4,"jockey":0.3,"distance":0.2,"base":0.1}"#)
                .unwrap();
        assert_eq!(w.odds, 0.2);
    }

    #[test]
    fn test_factor_scores() {
        assert_eq!(popularity_score(1, 16), 1.0);
        assert!((popularity_score(9, 16) - 0.5).abs() < 1e-12);
        assert_eq!(popularity_score(3, 0), 0.0);

        assert_eq!(odds_score(1.0), 1.0);
        assert!(odds_score(20.0).abs() < 1e-12);
        assert_eq!(odds_score(50.0), 0.0);
        assert_eq!(odds_score(0.0), 0.0);
    }

    #[test]
    fn test_end_to_end_ranking() {
        let history = vec![create_test_race("r1", Course::Tokyo, Surface::Turf, 1600)];
        let prediction =
            predict_race(&candidate(), &history, None, &PredictionOptions::default()).unwrap();

        let names: Vec<_> = prediction
            .predictions
            .iter()
            .map(|p| p.horse.name.as_str())
            .collect();
        assert_eq!(names, vec!["H1", "H2", "H3"]);

        // 0.05 + 0.4 * 1 + 0.3 * 0.5 + 0.2 * (1 - ln2/ln20)
        let top = &prediction.predictions[0];
        assert!((top.predicted_win_rate - 0.7537).abs() < 0.001);
        assert!((top.factors.jockey.rate - 0.5).abs() < 1e-12);
        assert!((top.confidence - (0.6 + 0.3 * top.predicted_win_rate)).abs() < 1e-12);
        assert_eq!(prediction.top_recommendations.len(), 3);
    }

    #[test]
    fn test_sorted_descending() {
        let mut race = candidate();
        // popularity alone decides with these weights
        race.horses[0].popularity = 2;
        race.horses[1].popularity = 1;
        let weights = Weights::new(1.0, 0.0, 0.0, 0.0);
        let prediction = Predictor::new(&[])
            .predict(&race, &weights, &PredictionOptions::default())
            .unwrap();

        assert_eq!(prediction.predictions[0].horse.name, "H2");
        let rates: Vec<_> = prediction.predictions.iter().map(|p| p.predicted_win_rate).collect();
        assert!(rates.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_ties_keep_entry_order() {
        let mut race = candidate();
        for h in race.horses.iter_mut() {
            h.popularity = 1;
            h.odds = 3.0;
        }
        let prediction = Predictor::new(&[])
            .predict(&race, &Weights::default(), &PredictionOptions::default())
            .unwrap();
        let names: Vec<_> = prediction.predictions.iter().map(|p| p.horse.name.as_str()).collect();
        assert_eq!(names, vec!["H1", "H2", "H3"]);
    }

    #[test]
    fn test_win_rate_clamped() {
        let mut race = candidate();
        race.horses[0].popularity = 0;
        race.horses[0].odds = 0.5;
        let prediction = Predictor::new(&[])
            .predict(&race, &Weights::new(1.0, 0.0, 1.0, 0.0), &PredictionOptions::default())
            .unwrap();
        assert!(prediction
            .predictions
            .iter()
            .all(|p| (0.0..=1.0).contains(&p.predicted_win_rate)));
    }

    #[test]
    fn test_no_entrants() {
        let mut race = candidate();
        race.horses.clear();
        let err = predict_race(&race, &[], None, &PredictionOptions::default()).unwrap_err();
        assert_eq!(err, PredictionError::NoEntrants);
    }

    #[test]
    fn test_unknown_jockey_scores_zero() {
        let history = vec![create_test_race("r1", Course::Tokyo, Surface::Turf, 1600)];
        let predictor = Predictor::new(&history);
        assert_eq!(predictor.jockey_rate("Nobody"), (0.0, 0));
        assert_eq!(predictor.jockey_rate("▲A"), (0.5, 2));
    }

    #[test]
    fn test_jockey_rate_spans_all_conditions() {
        let history = vec![
            create_test_race("r1", Course::Tokyo, Surface::Turf, 1600),
            create_test_race("r2", Course::Kyoto, Surface::Dirt, 1200),
        ];
        let predictor = Predictor::new(&history);
        assert_eq!(predictor.jockey_rate("A"), (0.5, 4));
    }

    #[test]
    fn test_evidence_confidence() {
        let history: Vec<Race> = (0..10)
            .map(|i| create_test_race(&format!("r{}", i), Course::Tokyo, Surface::Turf, 1600))
            .collect();
        let options = PredictionOptions {
            confidence: ConfidencePolicy::Evidence,
            top_recommendations: 5,
        };
        let mut race = candidate();
        race.horses.push(horse(4, "H4", "Z", 30.0, 4));
        let prediction = Predictor::new(&history)
            .predict(&race, &Weights::default(), &options)
            .unwrap();

        let by_name = |n: &str| {
            prediction
                .predictions
                .iter()
                .find(|p| p.horse.name == n)
                .unwrap()
                .confidence
        };
        // jockey A: 20 rides, popularity 1: 10 runs, distance 1600: 30 entrants
        assert!((by_name("H1") - 60.0 / 130.0).abs() < 1e-9);
        // unknown jockey, popularity 4 never seen
        assert!((by_name("H4") - 30.0 / 130.0).abs() < 1e-9);
        assert_eq!(prediction.top_recommendations.len(), 4);
    }

    #[test]
    fn test_average_confidence() {
        let prediction =
            predict_race(&candidate(), &[], None, &PredictionOptions::default()).unwrap();
        let mean = prediction.predictions.iter().map(|p| p.confidence).sum::<f64>() / 3.0;
        assert!((prediction.average_confidence - mean).abs() < 1e-12);
    }
}
