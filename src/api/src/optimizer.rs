//! Weight optimization from historical results.
//!
//! The global optimizer scores how well each factor picked past winners and
//! turns those accuracies into a normalized weight vector. The conditional
//! optimizer runs the same estimate over races similar to a target and falls
//! back to hand-authored presets when history is thin.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::prediction::Weights;
use crate::stats::normalize_jockey;
use crate::types::{Course, Race, Surface};

const DEFAULT_POPULARITY_ACCURACY: f64 = 0.3;
const DEFAULT_JOCKEY_ACCURACY: f64 = 0.2;
const DEFAULT_ODDS_ACCURACY: f64 = 0.15;
const BASE_ACCURACY: f64 = 0.05;

/// Jockeys need this many rides to count towards jockey accuracy
const MIN_JOCKEY_RIDES: usize = 2;
const MAX_JOCKEY_ACCURACY: f64 = 0.5;
const ODDS_ACCURACY_SCALE: f64 = 0.4;

/// Similar races needed before history overrides the preset
pub const MIN_SIMILAR_RACES: usize = 3;
const MIN_SIMILARITY: u32 = 2;

/// Venues where jockey skill is weighted up
const MAJOR_COURSES: [Course; 4] = [Course::Tokyo, Course::Nakayama, Course::Kyoto, Course::Hanshin];

/// Target conditions for conditional optimization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RaceConditions {
    pub surface: Surface,
    pub distance: u32,
    #[serde(default)]
    pub course: Course,
}

impl RaceConditions {
    pub fn of(race: &Race) -> Self {
        Self {
            surface: race.surface,
            distance: race.distance,
            course: race.course,
        }
    }

    pub fn band(&self) -> DistanceBand {
        DistanceBand::of(self.surface, self.distance)
    }

    /// 0..=6 rubric: surface +3, distance within 200m +2 (400m +1), course +1.
    pub fn similarity(&self, race: &Race) -> u32 {
        let mut score = 0;
        if race.surface == self.surface {
            score += 3;
        }
        let gap = race.distance.abs_diff(self.distance);
        if gap <= 200 {
            score += 2;
        } else if gap <= 400 {
            score += 1;
        }
        if self.course.is_known() && race.course == self.course {
            score += 1;
        }
        score
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceBand {
    Short,
    Middle,
    Long,
}

impl DistanceBand {
    /// Turf splits three ways; dirt has no long band.
    pub fn of(surface: Surface, distance: u32) -> Self {
        match (surface, distance) {
            (_, d) if d <= 1400 => DistanceBand::Short,
            (Surface::Turf, d) if d >= 2400 => DistanceBand::Long,
            _ => DistanceBand::Middle,
        }
    }
}

/// The three raw factor accuracies behind an optimized vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Accuracies {
    pub popularity: f64,
    pub jockey: f64,
    pub odds: f64,
}

impl Accuracies {
    pub fn measure(races: &[Race]) -> Self {
        let resulted: Vec<&Race> = races.iter().filter(|r| r.has_result()).collect();
        Self {
            popularity: popularity_accuracy(&resulted),
            jockey: jockey_accuracy(&resulted),
            odds: odds_accuracy(&resulted),
        }
    }

    fn to_weights(self) -> Weights {
        let w = Weights::new(self.popularity, self.jockey, self.odds, BASE_ACCURACY);
        let sum = w.sum();
        Weights::new(w.popularity / sum, w.jockey / sum, w.odds / sum, w.base / sum)
    }
}

/// Sum `score` over winners, divided by every entrant.
fn winner_score(races: &[&Race], score: impl Fn(&Race, f64, i32) -> f64) -> Option<f64> {
    let mut total = 0usize;
    let mut acc = 0.0;
    for race in races {
        let Some(result) = race.result.as_ref() else {
            continue;
        };
        for horse in &race.horses {
            total += 1;
            if result.finish_of(&horse.name).win {
                acc += score(race, horse.odds, horse.popularity);
            }
        }
    }
    (total > 0).then(|| acc / total as f64)
}

fn popularity_accuracy(races: &[&Race]) -> f64 {
    winner_score(races, |race, _, popularity| {
        let field = race.field_size() as f64;
        ((field - popularity as f64 + 1.0) / field).max(0.0)
    })
    .unwrap_or(DEFAULT_POPULARITY_ACCURACY)
}

fn jockey_accuracy(races: &[&Race]) -> f64 {
    let mut tallies: HashMap<String, (usize, usize)> = HashMap::new();
    for race in races {
        let Some(result) = race.result.as_ref() else {
            continue;
        };
        for horse in &race.horses {
            let jockey = normalize_jockey(&horse.jockey);
            if jockey.is_empty() {
                continue;
            }
            let entry = tallies.entry(jockey).or_default();
            entry.1 += 1;
            if result.finish_of(&horse.name).win {
                entry.0 += 1;
            }
        }
    }

    let rates: Vec<f64> = tallies
        .values()
        .filter(|(_, rides)| *rides >= MIN_JOCKEY_RIDES)
        .map(|(wins, rides)| *wins as f64 / *rides as f64)
        .collect();
    if rates.is_empty() {
        return DEFAULT_JOCKEY_ACCURACY;
    }
    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    (mean * 2.0).min(MAX_JOCKEY_ACCURACY)
}

fn odds_accuracy(races: &[&Race]) -> f64 {
    winner_score(races, |_, odds, _| ((10.0 - odds) / 10.0).clamp(0.0, 1.0))
        .map(|s| s * ODDS_ACCURACY_SCALE)
        .unwrap_or(DEFAULT_ODDS_ACCURACY)
}

/// Weights derived from the whole collection. Always sums to 1.
pub fn optimize_global_weights(races: &[Race]) -> Weights {
    let acc = Accuracies::measure(races);
    tracing::debug!(
        popularity = acc.popularity,
        jockey = acc.jockey,
        odds = acc.odds,
        "Global factor accuracies"
    );
    acc.to_weights()
}

/// Static weights for a surface and distance band.
pub fn preset_for(surface: Surface, distance: u32) -> Weights {
    match (surface, DistanceBand::of(surface, distance)) {
        (Surface::Turf, DistanceBand::Short) => Weights::new(0.40, 0.30, 0.20, 0.10),
        (Surface::Turf, DistanceBand::Middle) => Weights::new(0.35, 0.30, 0.25, 0.10),
        (Surface::Turf, DistanceBand::Long) => Weights::new(0.30, 0.40, 0.20, 0.10),
        (Surface::Dirt, DistanceBand::Short) => Weights::new(0.45, 0.25, 0.20, 0.10),
        (Surface::Dirt, _) => Weights::new(0.45, 0.30, 0.15, 0.10),
    }
}

/// Manually selectable weight sets.
pub fn named_preset(name: &str) -> Option<Weights> {
    let weights = match name.trim().to_lowercase().as_str() {
        "default" => Weights::default(),
        "popularity" => Weights::new(0.6, 0.2, 0.1, 0.1),
        "jockey" => Weights::new(0.2, 0.6, 0.1, 0.1),
        "odds" => Weights::new(0.2, 0.1, 0.6, 0.1),
        "balanced" => Weights::new(0.3, 0.3, 0.3, 0.1),
        _ => return None,
    };
    Some(weights)
}

pub const PRESET_NAMES: [&str; 5] = ["default", "popularity", "jockey", "odds", "balanced"];

/// Resolved vector plus how it was obtained
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalWeights {
    pub weights: Weights,
    pub similar_races: usize,
    pub used_preset: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracies: Option<Accuracies>,
}

/// Races that score at least 2 on the similarity rubric and have a result.
pub fn similar_races<'a>(races: &'a [Race], conditions: &RaceConditions) -> Vec<&'a Race> {
    races
        .iter()
        .filter(|r| r.has_result() && conditions.similarity(r) >= MIN_SIMILARITY)
        .collect()
}

pub fn optimize_conditional(races: &[Race], conditions: &RaceConditions) -> ConditionalWeights {
    let similar = similar_races(races, conditions);

    if similar.len() < MIN_SIMILAR_RACES {
        tracing::debug!(
            "Only {} similar races for {} {}m, using preset",
            similar.len(),
            conditions.surface,
            conditions.distance
        );
        return ConditionalWeights {
            weights: preset_for(conditions.surface, conditions.distance),
            similar_races: similar.len(),
            used_preset: true,
            accuracies: None,
        };
    }

    let acc = Accuracies {
        popularity: popularity_accuracy(&similar),
        jockey: jockey_accuracy(&similar),
        odds: odds_accuracy(&similar),
    };
    tracing::debug!(
        popularity = acc.popularity,
        jockey = acc.jockey,
        odds = acc.odds,
        similar = similar.len(),
        "Conditional factor accuracies"
    );

    let mut weights = acc.to_weights();
    if conditions.surface == Surface::Turf && conditions.band() == DistanceBand::Long {
        weights = weights.scale(0.9, 1.2, 1.0);
    }
    if conditions.surface == Surface::Dirt {
        weights = weights.scale(1.15, 1.0, 1.0);
    }
    if MAJOR_COURSES.contains(&conditions.course) {
        weights = weights.scale(1.0, 1.1, 1.0);
    }
    let sum = weights.sum();
    let weights = Weights::new(
        weights.popularity / sum,
        weights.jockey / sum,
        weights.odds / sum,
        weights.base / sum,
    );

    ConditionalWeights {
        weights,
        similar_races: similar.len(),
        used_preset: false,
        accuracies: Some(acc),
    }
}

/// Weights scoped to races like `conditions`. Always sums to 1.
pub fn optimize_conditional_weights(races: &[Race], conditions: &RaceConditions) -> Weights {
    optimize_conditional(races, conditions).weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::tests::{create_test_race, result};

    fn assert_sums_to_one(w: &Weights) {
        assert!((w.sum() - 1.0).abs() < 1e-9, "sum was {}", w.sum());
    }

    #[test]
    fn test_global_defaults_on_empty_history() {
        let w = optimize_global_weights(&[]);
        assert_sums_to_one(&w);
        // 0.3 / 0.2 / 0.15 / 0.05 over 0.7
        assert!((w.popularity - 0.3 / 0.7).abs() < 1e-9);
        assert!((w.jockey - 0.2 / 0.7).abs() < 1e-9);
        assert!((w.odds - 0.15 / 0.7).abs() < 1e-9);
        assert!((w.base - 0.05 / 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_pending_races_use_defaults() {
        let mut race = create_test_race("p", Course::Tokyo, Surface::Turf, 1600);
        race.result = None;
        let acc = Accuracies::measure(&[race]);
        assert_eq!(acc.popularity, 0.3);
        assert_eq!(acc.jockey, 0.2);
        assert_eq!(acc.odds, 0.15);
    }

    #[test]
    fn test_accuracies() {
        // favorite H1 (odds 2.0) wins; 3 entrants; jockey A 1/2, B 0/1
        let races = vec![create_test_race("r1", Course::Tokyo, Surface::Turf, 1600)];
        let acc = Accuracies::measure(&races);

        assert!((acc.popularity - 1.0 / 3.0).abs() < 1e-9);
        // only A qualifies: 2 * 0.5 capped at 0.5
        assert!((acc.jockey - 0.5).abs() < 1e-9);
        assert!((acc.odds - 0.8 / 3.0 * 0.4).abs() < 1e-9);
        assert_sums_to_one(&optimize_global_weights(&races));
    }

    #[test]
    fn test_jockey_accuracy_merges_marks() {
        let mut race = create_test_race("r1", Course::Tokyo, Surface::Turf, 1600);
        race.horses[0].jockey = "▲C".to_string();
        race.horses[1].jockey = "C".to_string();
        race.horses[2].jockey = "D".to_string();
        race.result = result("H2", "", "");
        let acc = Accuracies::measure(&[race]);
        // C: 1/2 rides -> min(0.5, 1.0)
        assert!((acc.jockey - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_jockey_accuracy_ignores_missing_jockeys() {
        let mut race = create_test_race("r1", Course::Tokyo, Surface::Turf, 1600);
        race.horses[0].jockey = "C".to_string();
        race.horses[1].jockey = String::new();
        race.horses[2].jockey = String::new();
        let acc = Accuracies::measure(&[race]);
        // C has one ride and the blanks are not a jockey: nothing qualifies
        assert_eq!(acc.jockey, 0.2);
    }

    #[test]
    fn test_similarity_rubric() {
        let target = RaceConditions {
            surface: Surface::Turf,
            distance: 1600,
            course: Course::Tokyo,
        };
        let race = |c, s, d| create_test_race("x", c, s, d);

        assert_eq!(target.similarity(&race(Course::Tokyo, Surface::Turf, 1600)), 6);
        assert_eq!(target.similarity(&race(Course::Kyoto, Surface::Turf, 2000)), 4);
        assert_eq!(target.similarity(&race(Course::Kyoto, Surface::Dirt, 1800)), 2);
        assert_eq!(target.similarity(&race(Course::Tokyo, Surface::Dirt, 2400)), 1);

        let unknown = RaceConditions {
            course: Course::Unknown,
            ..target
        };
        assert_eq!(unknown.similarity(&race(Course::Unknown, Surface::Dirt, 2400)), 0);
    }

    #[test]
    fn test_preset_fallback() {
        let races = vec![
            create_test_race("a", Course::Tokyo, Surface::Turf, 1600),
            create_test_race("b", Course::Tokyo, Surface::Turf, 1600),
        ];
        let conditions = RaceConditions {
            surface: Surface::Turf,
            distance: 1600,
            course: Course::Tokyo,
        };
        let out = optimize_conditional(&races, &conditions);
        assert!(out.used_preset);
        assert_eq!(out.similar_races, 2);
        assert_eq!(out.weights, Weights::new(0.35, 0.30, 0.25, 0.10));
    }

    #[test]
    fn test_conditional_on_history_is_normalized() {
        let races: Vec<Race> = (0..4)
            .map(|i| create_test_race(&format!("r{}", i), Course::Hanshin, Surface::Turf, 2400))
            .collect();
        let conditions = RaceConditions {
            surface: Surface::Turf,
            distance: 2500,
            course: Course::Hanshin,
        };
        let out = optimize_conditional(&races, &conditions);

        assert!(!out.used_preset);
        assert_eq!(out.similar_races, 4);
        assert_sums_to_one(&out.weights);

        // long turf and major venue both lift jockey relative to the global vector
        let global = optimize_global_weights(&races);
        assert!(out.weights.jockey > global.jockey);
        assert!(out.weights.popularity < global.popularity);
    }

    #[test]
    fn test_dirt_adjustment_lifts_popularity() {
        let races: Vec<Race> = (0..3)
            .map(|i| create_test_race(&format!("r{}", i), Course::Niigata, Surface::Dirt, 1200))
            .collect();
        let conditions = RaceConditions {
            surface: Surface::Dirt,
            distance: 1200,
            course: Course::Niigata,
        };
        let out = optimize_conditional(&races, &conditions);
        let global = optimize_global_weights(&races);

        assert!(!out.used_preset);
        assert!(out.weights.popularity > global.popularity);
        assert_sums_to_one(&out.weights);
    }

    #[test]
    fn test_presets() {
        assert_eq!(preset_for(Surface::Turf, 1400), Weights::new(0.40, 0.30, 0.20, 0.10));
        assert_eq!(preset_for(Surface::Turf, 2400), Weights::new(0.30, 0.40, 0.20, 0.10));
        assert_eq!(preset_for(Surface::Dirt, 1400), Weights::new(0.45, 0.25, 0.20, 0.10));
        assert_eq!(preset_for(Surface::Dirt, 2400), Weights::new(0.45, 0.30, 0.15, 0.10));
        for name in PRESET_NAMES {
            assert!(named_preset(name).is_some());
        }
        assert!(named_preset("random").is_none());
    }
}
