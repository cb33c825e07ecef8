//! Betting recommendations derived from a race prediction.

use serde::Serialize;

use crate::prediction::{HorsePrediction, RacePrediction};
use crate::stats::round1;

/// Assumed average show payout
const SHOW_ODDS: f64 = 1.8;
/// Show rate relative to win rate
const SHOW_RATE_FACTOR: f64 = 2.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Win,
    SafeWin,
    Show,
    Longshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_confidence(average: f64) -> Self {
        if average > 0.8 {
            RiskLevel::Low
        } else if average > 0.6 {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    #[serde(rename = "type")]
    pub kind: StrategyKind,
    /// Horse name, or comma-joined names for multi-horse bets
    pub target: String,
    pub reason: String,
    pub confidence: f64,
    pub expected_value: f64,
    /// `(expected_value - 1) * 100`, one decimal
    pub profit_margin: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyReport {
    pub race_analysis: RacePrediction,
    pub recommended_strategies: Vec<Strategy>,
    pub risk_level: RiskLevel,
}

fn expected_value(p: &HorsePrediction) -> f64 {
    p.horse.odds * p.predicted_win_rate
}

fn margin(ev: f64) -> f64 {
    round1((ev - 1.0) * 100.0)
}

fn win_strategy(top: &HorsePrediction) -> Option<Strategy> {
    let ev = expected_value(top);
    let (kind, reason) = if ev > 1.0 && top.confidence > 0.6 {
        (
            StrategyKind::Win,
            format!(
                "Expected value {:.2} (+{:.1}%), confidence {:.0}%",
                ev,
                margin(ev),
                top.confidence * 100.0
            ),
        )
    } else if top.confidence > 0.8 && top.predicted_win_rate > 0.2 {
        (
            StrategyKind::SafeWin,
            format!(
                "High confidence {:.0}% and win rate {:.1}% (expected value {:.2})",
                top.confidence * 100.0,
                top.predicted_win_rate * 100.0,
                ev
            ),
        )
    } else {
        return None;
    };

    Some(Strategy {
        kind,
        target: top.horse.name.clone(),
        reason,
        confidence: top.confidence,
        expected_value: ev,
        profit_margin: margin(ev),
    })
}

fn show_strategy(top: &[HorsePrediction]) -> Option<Strategy> {
    if top.len() < 3 {
        return None;
    }
    let top3 = &top[..3];
    let confidence = top3.iter().map(|p| p.confidence).sum::<f64>() / 3.0;
    let win_rate = top3.iter().map(|p| p.predicted_win_rate).sum::<f64>() / 3.0;
    if confidence <= 0.65 {
        return None;
    }

    let show_rate = win_rate * SHOW_RATE_FACTOR;
    let ev = SHOW_ODDS * show_rate.min(1.0);
    Some(Strategy {
        kind: StrategyKind::Show,
        target: top3
            .iter()
            .map(|p| p.horse.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        reason: format!(
            "Top three, mean confidence {:.0}%, estimated show rate {:.1}%",
            confidence * 100.0,
            show_rate * 100.0
        ),
        confidence,
        expected_value: ev,
        profit_margin: margin(ev),
    })
}

fn longshot_strategy(predictions: &[HorsePrediction]) -> Option<Strategy> {
    predictions
        .iter()
        .skip(1)
        .take(5)
        .find(|p| expected_value(p) > 1.5 && p.confidence > 0.5 && p.horse.odds > 5.0)
        .map(|p| {
            let ev = expected_value(p);
            Strategy {
                kind: StrategyKind::Longshot,
                target: p.horse.name.clone(),
                reason: format!(
                    "Longshot at {} with expected value {:.2}, win rate {:.1}%",
                    p.horse.odds,
                    ev,
                    p.predicted_win_rate * 100.0
                ),
                confidence: p.confidence,
                expected_value: ev,
                profit_margin: margin(ev),
            }
        })
}

/// Apply the win, show and longshot rules to a prediction.
pub fn recommend(prediction: RacePrediction) -> StrategyReport {
    let mut strategies = Vec::new();
    if let Some(top) = prediction.top_recommendations.first() {
        strategies.extend(win_strategy(top));
    }
    strategies.extend(show_strategy(&prediction.top_recommendations));
    strategies.extend(longshot_strategy(&prediction.predictions));

    tracing::debug!("{} strategies recommended", strategies.len());

    StrategyReport {
        risk_level: RiskLevel::from_confidence(prediction.average_confidence),
        race_analysis: prediction,
        recommended_strategies: strategies,
    }
}
