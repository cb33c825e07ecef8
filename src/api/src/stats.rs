//! Rate statistics over stored races.
//!
//! Every dimension shares one traversal: filter races, skip those without a
//! result, key each entrant, and tally cumulative win/place/show counts.
//! Entrants whose key fails its validity check are dropped and counted in
//! [`RateTable::excluded`].

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::types::{Course, Finish, Horse, Level, Race, Surface};

/// Largest gate number a JRA field can have
pub const MAX_GATE_NUMBER: i32 = 18;

/// Minimum rides for a jockey to appear in the summary ranking
pub const SUMMARY_MIN_RIDES: usize = 10;

/// Number of jockeys listed in the summary ranking
pub const SUMMARY_TOP_JOCKEYS: usize = 10;

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Percentage of `count` over `total`, one decimal; 0.0 when `total` is 0.
pub fn rate(count: usize, total: usize) -> f64 {
    if total > 0 {
        round1(count as f64 / total as f64 * 100.0)
    } else {
        0.0
    }
}

/// Strip weight-allowance and prediction marks from a jockey name.
///
/// "▲J.Smith" and "J.Smith" aggregate into the same bucket.
pub fn normalize_jockey(raw: &str) -> String {
    static MARKS: OnceLock<Regex> = OnceLock::new();
    let re = MARKS.get_or_init(|| Regex::new(r"[▲△☆◇★◎○◯✓]").unwrap());
    re.replace_all(raw, "").trim().to_string()
}

/// Statistic dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Popularity,
    Jockey,
    GateNumber,
    Course,
    DistanceSurface,
}

impl Dimension {
    pub fn name(&self) -> &'static str {
        match self {
            Dimension::Popularity => "popularity",
            Dimension::Jockey => "jockey",
            Dimension::GateNumber => "gateNumber",
            Dimension::Course => "course",
            Dimension::DistanceSurface => "distanceSurface",
        }
    }

    /// Key shared by every entrant of a race, for race-level dimensions.
    fn race_key(&self, race: &Race) -> Option<StatKey> {
        match self {
            Dimension::Course => race
                .course
                .is_known()
                .then(|| StatKey::Label(race.course.as_str().to_string())),
            Dimension::DistanceSurface => (race.distance > 0).then(|| {
                StatKey::Label(format!("{}{}m", race.surface.as_str(), race.distance))
            }),
            _ => None,
        }
    }

    fn entrant_key(&self, race: &Race, horse: &Horse) -> EntrantKey {
        match self {
            Dimension::Popularity => {
                let field = race.field_size() as i64;
                let pop = horse.popularity as i64;
                if pop >= 1 && pop <= field {
                    EntrantKey::Valid(StatKey::Number(pop))
                } else {
                    EntrantKey::Invalid(pop)
                }
            }
            Dimension::GateNumber => {
                if (1..=MAX_GATE_NUMBER).contains(&horse.horse_number) {
                    EntrantKey::Valid(StatKey::Number(horse.horse_number as i64))
                } else {
                    EntrantKey::Invalid(horse.horse_number as i64)
                }
            }
            Dimension::Jockey => {
                let name = normalize_jockey(&horse.jockey);
                if name.is_empty() {
                    EntrantKey::Missing
                } else {
                    EntrantKey::Valid(StatKey::Label(name))
                }
            }
            Dimension::Course | Dimension::DistanceSurface => match self.race_key(race) {
                Some(key) => EntrantKey::Valid(key),
                None => EntrantKey::Missing,
            },
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dimension {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "popularity" | "pop" => Ok(Dimension::Popularity),
            "jockey" => Ok(Dimension::Jockey),
            "gate" | "gatenumber" | "gate_number" | "horsenumber" => Ok(Dimension::GateNumber),
            "course" => Ok(Dimension::Course),
            "distance" | "distancesurface" | "distance_surface" => Ok(Dimension::DistanceSurface),
            other => anyhow::bail!("Unknown statistics dimension: {}", other),
        }
    }
}

enum EntrantKey {
    Valid(StatKey),
    /// Key present but out of range; dropped and logged
    Invalid(i64),
    /// No key at all; skipped silently
    Missing,
}

/// Row key of a rate table. Numeric keys sort numerically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatKey {
    Number(i64),
    Label(String),
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatKey::Number(n) => write!(f, "{}", n),
            StatKey::Label(s) => f.write_str(s),
        }
    }
}

impl Serialize for StatKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl From<i64> for StatKey {
    fn from(n: i64) -> Self {
        StatKey::Number(n)
    }
}

impl From<&str> for StatKey {
    fn from(s: &str) -> Self {
        StatKey::Label(s.to_string())
    }
}

/// Co-occurrence counts in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Breakdown {
    entries: Vec<(String, usize)>,
}

impl Breakdown {
    fn record(&mut self, value: &str) {
        match self.entries.iter_mut().find(|(v, _)| v == value) {
            Some((_, count)) => *count += 1,
            None => self.entries.push((value.to_string(), 1)),
        }
    }

    pub fn count(&self, value: &str) -> usize {
        self.entries
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    }

    /// Highest count; ties go to the value seen first.
    pub fn most_common(&self) -> Option<&str> {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.entries {
            if best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(v, _)| v.as_str())
    }
}

impl Serialize for Breakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (value, count) in &self.entries {
            map.serialize_entry(value, count)?;
        }
        map.end()
    }
}

/// Race-level composition of a course row
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseComposition {
    pub races: usize,
    pub avg_field: f64,
    pub surfaces: Breakdown,
    pub distances: Breakdown,
    pub levels: Breakdown,
    pub most_common_surface: Option<String>,
    pub most_common_distance: Option<String>,
    pub most_common_level: Option<String>,
}

/// Race-level composition of a distance x surface row
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceComposition {
    pub surface: Surface,
    pub distance: u32,
    pub races: usize,
    pub avg_field: f64,
    pub courses: Breakdown,
    pub most_common_course: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Composition {
    Course(CourseComposition),
    DistanceSurface(DistanceComposition),
}

impl Composition {
    fn new(dimension: Dimension, race: &Race) -> Option<Self> {
        match dimension {
            Dimension::Course => Some(Composition::Course(CourseComposition::default())),
            Dimension::DistanceSurface => Some(Composition::DistanceSurface(DistanceComposition {
                surface: race.surface,
                distance: race.distance,
                races: 0,
                avg_field: 0.0,
                courses: Breakdown::default(),
                most_common_course: None,
            })),
            _ => None,
        }
    }

    /// Count one race, updating the running mean field size.
    fn record_race(&mut self, race: &Race) {
        let field = race.field_size() as f64;
        match self {
            Composition::Course(c) => {
                c.races += 1;
                c.avg_field = (c.avg_field * (c.races - 1) as f64 + field) / c.races as f64;
                c.surfaces.record(race.surface.as_str());
                c.distances.record(&race.distance.to_string());
                c.levels
                    .record(race.level.map(|l| l.as_str()).unwrap_or("unknown"));
            }
            Composition::DistanceSurface(d) => {
                d.races += 1;
                d.avg_field = (d.avg_field * (d.races - 1) as f64 + field) / d.races as f64;
                d.courses.record(race.course.as_str());
            }
        }
    }

    fn finish(&mut self) {
        match self {
            Composition::Course(c) => {
                c.avg_field = round1(c.avg_field);
                c.most_common_surface = c.surfaces.most_common().map(str::to_string);
                c.most_common_distance = c.distances.most_common().map(str::to_string);
                c.most_common_level = c.levels.most_common().map(str::to_string);
            }
            Composition::DistanceSurface(d) => {
                d.avg_field = round1(d.avg_field);
                d.most_common_course = d.courses.most_common().map(str::to_string);
            }
        }
    }
}

/// Win/place/show tallies for one key
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRecord {
    pub total: usize,
    pub wins: usize,
    pub places: usize,
    pub shows: usize,
    pub win_rate: f64,
    pub place_rate: f64,
    pub show_rate: f64,
    /// Mean field size of the races ridden (jockey rows)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_field: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composition: Option<Composition>,
    #[serde(skip)]
    field_sum: usize,
}

impl RateRecord {
    fn record(&mut self, finish: Finish, field_size: usize) {
        self.total += 1;
        self.field_sum += field_size;
        if finish.win {
            self.wins += 1;
        }
        if finish.place {
            self.places += 1;
        }
        if finish.show {
            self.shows += 1;
        }
    }

    fn finish(&mut self, dimension: Dimension) {
        self.win_rate = rate(self.wins, self.total);
        self.place_rate = rate(self.places, self.total);
        self.show_rate = rate(self.shows, self.total);
        if dimension == Dimension::Jockey {
            self.avg_field = Some(if self.total > 0 {
                round1(self.field_sum as f64 / self.total as f64)
            } else {
                0.0
            });
        }
        if let Some(comp) = self.composition.as_mut() {
            comp.finish();
        }
    }
}

/// Rate rows keyed by dimension value
#[derive(Debug, Clone, Serialize)]
pub struct RateTable {
    pub dimension: Dimension,
    pub rows: BTreeMap<StatKey, RateRecord>,
    /// Entrants dropped for an out-of-range key
    pub excluded: usize,
}

impl RateTable {
    pub fn get(&self, key: impl Into<StatKey>) -> Option<&RateRecord> {
        self.rows.get(&key.into())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Multi-select race filter.
///
/// `None` on a dimension matches every race; `Some(set)` matches races whose
/// value is in the set. Dimensions combine with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaceFilter {
    pub course: Option<BTreeSet<Course>>,
    pub surface: Option<BTreeSet<Surface>>,
    pub distance: Option<BTreeSet<u32>>,
    pub level: Option<BTreeSet<Level>>,
}

/// Leading-digit integer parse ("1600m" -> 1600).
fn parse_distance(label: &str) -> Option<u32> {
    let digits: String = label.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn label_set<T: Ord, S: AsRef<str>>(
    labels: &[S],
    parse: impl Fn(&str) -> Option<T>,
) -> Option<BTreeSet<T>> {
    let labels: Vec<&str> = labels
        .iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .collect();
    if labels.is_empty() {
        return None;
    }
    // Unparseable labels leave the dimension present but unmatched
    Some(labels.into_iter().filter_map(parse).collect())
}

impl RaceFilter {
    /// Build a filter from raw label lists, as sent by a form or CLI.
    pub fn from_labels<S: AsRef<str>>(
        course: &[S],
        surface: &[S],
        distance: &[S],
        level: &[S],
    ) -> Self {
        Self {
            course: label_set(course, Course::from_label),
            surface: label_set(surface, Surface::from_label),
            distance: label_set(distance, parse_distance),
            level: label_set(level, Level::from_label),
        }
    }

    pub fn matches(&self, race: &Race) -> bool {
        fn accepts<T: Ord>(set: &Option<BTreeSet<T>>, value: Option<&T>) -> bool {
            match set {
                None => true,
                Some(set) => value.map_or(false, |v| set.contains(v)),
            }
        }

        accepts(&self.course, Some(&race.course))
            && accepts(&self.surface, Some(&race.surface))
            && accepts(&self.distance, Some(&race.distance))
            && accepts(&self.level, race.level.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.course.is_none()
            && self.surface.is_none()
            && self.distance.is_none()
            && self.level.is_none()
    }
}

/// Query-string form of [`RaceFilter`]: comma-separated values per key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    pub course: Option<String>,
    pub surface: Option<String>,
    pub distance: Option<String>,
    pub level: Option<String>,
}

impl FilterParams {
    pub fn to_filter(&self) -> RaceFilter {
        fn split(v: &Option<String>) -> Vec<String> {
            v.as_deref()
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default()
        }
        RaceFilter::from_labels(
            &split(&self.course),
            &split(&self.surface),
            &split(&self.distance),
            &split(&self.level),
        )
    }
}

/// Build the rate table for one dimension.
pub fn aggregate(races: &[Race], dimension: Dimension, filter: &RaceFilter) -> RateTable {
    let mut rows: BTreeMap<StatKey, RateRecord> = BTreeMap::new();
    let mut excluded = 0;

    for race in races.iter().filter(|r| filter.matches(r)) {
        let Some(result) = race.result.as_ref() else {
            continue;
        };
        let field_size = race.field_size();

        if let Some(key) = dimension.race_key(race) {
            let row = rows.entry(key).or_default();
            if row.composition.is_none() {
                row.composition = Composition::new(dimension, race);
            }
            if let Some(comp) = row.composition.as_mut() {
                comp.record_race(race);
            }
        }

        for horse in &race.horses {
            match dimension.entrant_key(race, horse) {
                EntrantKey::Valid(key) => {
                    rows.entry(key)
                        .or_default()
                        .record(result.finish_of(&horse.name), field_size);
                }
                EntrantKey::Invalid(value) => {
                    tracing::warn!(
                        race_id = %race.id,
                        horse = %horse.name,
                        value,
                        field_size,
                        "Excluding entrant with invalid {}",
                        dimension
                    );
                    excluded += 1;
                }
                EntrantKey::Missing => {}
            }
        }
    }

    for row in rows.values_mut() {
        row.finish(dimension);
    }

    tracing::debug!(
        "Aggregated {} rows by {} ({} excluded)",
        rows.len(),
        dimension,
        excluded
    );

    RateTable {
        dimension,
        rows,
        excluded,
    }
}

/// Entrants in resulted races run at `distance`.
pub fn entrants_at_distance(races: &[Race], distance: u32) -> usize {
    races
        .iter()
        .filter(|r| r.has_result() && r.distance == distance)
        .map(Race::field_size)
        .sum()
}

/// Jockey entry in the summary ranking
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JockeyRanking {
    pub jockey: String,
    pub rides: usize,
    pub wins: usize,
    pub win_rate: f64,
}

/// Overview of the whole collection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_races: usize,
    pub total_horses: usize,
    pub resulted_races: usize,
    pub top_jockeys: Vec<JockeyRanking>,
}

/// Collection overview with the best jockeys by win rate.
pub fn summary(races: &[Race]) -> Summary {
    let jockeys = aggregate(races, Dimension::Jockey, &RaceFilter::default());

    let mut ranked: Vec<JockeyRanking> = jockeys
        .rows
        .iter()
        .filter(|(_, r)| r.total >= SUMMARY_MIN_RIDES)
        .map(|(k, r)| JockeyRanking {
            jockey: k.to_string(),
            rides: r.total,
            wins: r.wins,
            win_rate: r.win_rate,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.win_rate
            .partial_cmp(&a.win_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(SUMMARY_TOP_JOCKEYS);

    Summary {
        total_races: races.len(),
        total_horses: races.iter().map(Race::field_size).sum(),
        resulted_races: races.iter().filter(|r| r.has_result()).count(),
        top_jockeys: ranked,
    }
}
