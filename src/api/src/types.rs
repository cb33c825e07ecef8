//! Race records and API payload types for RaceDB.
//!
//! Enum labels accept both the English identifiers used by the API and the
//! Japanese labels found in manually entered race cards.

use chrono::NaiveDate;
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Parse a single enum label through its serde representation (aliases included).
fn parse_label<'de, T: Deserialize<'de>>(label: &'de str) -> Option<T> {
    let de: StrDeserializer<'de, ValueError> = label.trim().into_deserializer();
    T::deserialize(de).ok()
}

/// `YYYY-MM-DD` date; blank or malformed input becomes `None`.
fn lenient_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()))
}

/// Going label; blank or unrecognized input becomes `None`.
fn lenient_condition<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Condition>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Condition::from_label))
}

/// Track surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    #[serde(alias = "芝")]
    Turf,
    #[serde(alias = "ダート", alias = "ダ")]
    Dirt,
}

impl Surface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Surface::Turf => "turf",
            Surface::Dirt => "dirt",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        parse_label(label)
    }
}

/// Going (track condition)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    #[serde(alias = "良")]
    Good,
    #[serde(alias = "稍重")]
    Yielding,
    #[serde(alias = "重")]
    Heavy,
    #[serde(alias = "不良")]
    Bad,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Good => "good",
            Condition::Yielding => "yielding",
            Condition::Heavy => "heavy",
            Condition::Bad => "bad",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        parse_label(label)
    }
}

/// JRA racecourse
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Course {
    #[serde(alias = "東京")]
    Tokyo,
    #[serde(alias = "中山")]
    Nakayama,
    #[serde(alias = "京都")]
    Kyoto,
    #[serde(alias = "阪神")]
    Hanshin,
    #[serde(alias = "新潟")]
    Niigata,
    #[serde(alias = "中京")]
    Chukyo,
    #[serde(alias = "札幌")]
    Sapporo,
    #[serde(alias = "函館")]
    Hakodate,
    #[serde(alias = "福島")]
    Fukushima,
    #[serde(alias = "小倉")]
    Kokura,
    /// Any label outside the known venues
    #[default]
    #[serde(other)]
    Unknown,
}

impl Course {
    pub fn as_str(&self) -> &'static str {
        match self {
            Course::Tokyo => "tokyo",
            Course::Nakayama => "nakayama",
            Course::Kyoto => "kyoto",
            Course::Hanshin => "hanshin",
            Course::Niigata => "niigata",
            Course::Chukyo => "chukyo",
            Course::Sapporo => "sapporo",
            Course::Hakodate => "hakodate",
            Course::Fukushima => "fukushima",
            Course::Kokura => "kokura",
            Course::Unknown => "unknown",
        }
    }

    /// Parse a known venue. Unrecognized labels yield `None`, never `Unknown`.
    pub fn from_label(label: &str) -> Option<Self> {
        parse_label(label).filter(|c| *c != Course::Unknown)
    }

    pub fn is_known(&self) -> bool {
        *self != Course::Unknown
    }
}

/// Race class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    #[serde(rename = "newcomer", alias = "新馬")]
    Newcomer,
    #[serde(rename = "maiden", alias = "未勝利")]
    Maiden,
    #[serde(rename = "1win", alias = "500万下", alias = "1勝クラス")]
    OneWin,
    #[serde(rename = "2win", alias = "1000万下", alias = "2勝クラス")]
    TwoWin,
    #[serde(rename = "3win", alias = "1600万下", alias = "3勝クラス")]
    ThreeWin,
    #[serde(rename = "open", alias = "オープン", alias = "OP")]
    Open,
    #[serde(rename = "g3", alias = "G3")]
    G3,
    #[serde(rename = "g2", alias = "G2")]
    G2,
    #[serde(rename = "g1", alias = "G1")]
    G1,
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Newcomer => "newcomer",
            Level::Maiden => "maiden",
            Level::OneWin => "1win",
            Level::TwoWin => "2win",
            Level::ThreeWin => "3win",
            Level::Open => "open",
            Level::G3 => "g3",
            Level::G2 => "g2",
            Level::G1 => "g1",
            Level::Unknown => "unknown",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        parse_label(label).filter(|l| *l != Level::Unknown)
    }
}

macro_rules! display_as_str {
    ($($t:ty),*) => {
        $(impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Surface, Condition, Course, Level);

/// One entrant in a race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Horse {
    #[serde(default)]
    pub frame_number: u8,
    /// Gate number; values outside 1..=18 are kept but never aggregated
    #[serde(default)]
    pub horse_number: i32,
    pub name: String,
    #[serde(default)]
    pub sex: String,
    #[serde(default)]
    pub age: u8,
    /// Weight carried (kg)
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub jockey: String,
    #[serde(default)]
    pub odds: f64,
    /// Betting rank, 1 = favorite; validated against field size at aggregation time
    #[serde(default)]
    pub popularity: i32,
}

/// Top-three finishers by horse name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    #[serde(rename = "1st", alias = "1着", default, skip_serializing_if = "Option::is_none")]
    pub first: Option<String>,
    #[serde(rename = "2nd", alias = "2着", default, skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    #[serde(rename = "3rd", alias = "3着", default, skip_serializing_if = "Option::is_none")]
    pub third: Option<String>,
}

/// Cumulative finish flags for one entrant: a winner also places and shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Finish {
    pub win: bool,
    pub place: bool,
    pub show: bool,
}

impl RaceResult {
    /// Finish flags for a horse name. Names not in the result never match.
    pub fn finish_of(&self, name: &str) -> Finish {
        let is = |slot: &Option<String>| slot.as_deref() == Some(name);
        let win = is(&self.first);
        let place = win || is(&self.second);
        let show = place || is(&self.third);
        Finish { win, place, show }
    }
}

/// A race card, with its result once run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    #[serde(default)]
    pub id: String,
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub course: Course,
    #[serde(default)]
    pub distance: u32,
    pub surface: Surface,
    #[serde(
        default,
        deserialize_with = "lenient_condition",
        skip_serializing_if = "Option::is_none"
    )]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default)]
    pub horses: Vec<Horse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RaceResult>,
}

impl Race {
    pub fn field_size(&self) -> usize {
        self.horses.len()
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_japanese_labels() {
        let json = r#"{
            "date": "2024-01-15",
            "course": "東京",
            "distance": 1600,
            "surface": "芝",
            "condition": "稍重",
            "level": "1000万下",
            "horses": [],
            "result": {"1着": "A", "2着": "B"}
        }"#;
        let race: Race = serde_json::from_str(json).unwrap();

        assert_eq!(race.course, Course::Tokyo);
        assert_eq!(race.surface, Surface::Turf);
        assert_eq!(race.condition, Some(Condition::Yielding));
        assert_eq!(race.level, Some(Level::TwoWin));
        let result = race.result.unwrap();
        assert_eq!(result.first.as_deref(), Some("A"));
        assert!(result.third.is_none());
    }

    #[test]
    fn test_unknown_course_is_not_fatal() {
        let json = r#"{"course": "大井", "surface": "dirt", "distance": 1200}"#;
        let race: Race = serde_json::from_str(json).unwrap();
        assert_eq!(race.course, Course::Unknown);
        assert!(race.horses.is_empty());
        assert!(!race.has_result());
    }

    #[test]
    fn test_blank_date_and_condition_are_dropped() {
        let json = r#"{"surface": "芝", "date": "", "condition": ""}"#;
        let race: Race = serde_json::from_str(json).unwrap();
        assert_eq!(race.date, None);
        assert_eq!(race.condition, None);

        let json = r#"{"surface": "dirt", "date": "2024/13/45", "condition": "firm"}"#;
        let race: Race = serde_json::from_str(json).unwrap();
        assert_eq!(race.date, None);
        assert_eq!(race.condition, None);

        let json = r#"{"surface": "dirt", "date": null, "condition": null}"#;
        let race: Race = serde_json::from_str(json).unwrap();
        assert_eq!(race.date, None);
        assert_eq!(race.condition, None);
    }

    #[test]
    fn test_from_label() {
        assert_eq!(Course::from_label("中山"), Some(Course::Nakayama));
        assert_eq!(Course::from_label(" hanshin "), Some(Course::Hanshin));
        assert_eq!(Course::from_label("大井"), None);
        assert_eq!(Surface::from_label("ダート"), Some(Surface::Dirt));
        assert_eq!(Level::from_label("G1"), Some(Level::G1));
        assert_eq!(Level::from_label("???"), None);
    }

    #[test]
    fn test_finish_flags_are_cumulative() {
        let result = RaceResult {
            first: Some("A".to_string()),
            second: Some("B".to_string()),
            third: Some("C".to_string()),
        };

        assert_eq!(
            result.finish_of("A"),
            Finish { win: true, place: true, show: true }
        );
        assert_eq!(
            result.finish_of("B"),
            Finish { win: false, place: true, show: true }
        );
        assert_eq!(
            result.finish_of("C"),
            Finish { win: false, place: false, show: true }
        );
        assert_eq!(result.finish_of("Z"), Finish::default());
    }

    #[test]
    fn test_result_serializes_english_keys() {
        let result = RaceResult {
            first: Some("A".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"1st":"A"}"#);
    }
}
