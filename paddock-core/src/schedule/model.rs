use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    Practice,
    Qualifying,
    Race,
    Sprint,
    Warmup,
    Test,
    Stage,
    RallyStage,
    #[serde(rename = "RACE_1")]
    Race1,
    #[serde(rename = "RACE_2")]
    Race2,
    Feature,
    Heat,
    Other,
}

impl SessionType {
    pub const ALL: [SessionType; 13] = [
        SessionType::Practice,
        SessionType::Qualifying,
        SessionType::Race,
        SessionType::Sprint,
        SessionType::Warmup,
        SessionType::Test,
        SessionType::Stage,
        SessionType::RallyStage,
        SessionType::Race1,
        SessionType::Race2,
        SessionType::Feature,
        SessionType::Heat,
        SessionType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Practice => "PRACTICE",
            SessionType::Qualifying => "QUALIFYING",
            SessionType::Race => "RACE",
            SessionType::Sprint => "SPRINT",
            SessionType::Warmup => "WARMUP",
            SessionType::Test => "TEST",
            SessionType::Stage => "STAGE",
            SessionType::RallyStage => "RALLY_STAGE",
            SessionType::Race1 => "RACE_1",
            SessionType::Race2 => "RACE_2",
            SessionType::Feature => "FEATURE",
            SessionType::Heat => "HEAT",
            SessionType::Other => "OTHER",
        }
    }
}

impl FromStr for SessionType {
    type Err = ();

    /// Exact canonical names, ignoring case and space/hyphen separators.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let canonical = canonical_token(value);
        SessionType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == canonical)
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Updated,
    Cancelled,
    Tbd,
}

impl FromStr for SessionStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match canonical_token(value).as_str() {
            "SCHEDULED" | "CONFIRMED" => Ok(SessionStatus::Scheduled),
            "UPDATED" | "RESCHEDULED" | "POSTPONED" => Ok(SessionStatus::Updated),
            "CANCELLED" | "CANCELED" => Ok(SessionStatus::Cancelled),
            "TBD" | "TBC" | "TO_BE_DETERMINED" | "TO_BE_CONFIRMED" => Ok(SessionStatus::Tbd),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeriesCategory {
    Openwheel,
    Endurance,
    Rally,
    Motorcycle,
    Gt,
    Touring,
    Formula,
    Sportcar,
    Stock,
    #[default]
    Other,
}

impl FromStr for SeriesCategory {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match canonical_token(value).replace('_', "").as_str() {
            "OPENWHEEL" => Ok(SeriesCategory::Openwheel),
            "ENDURANCE" => Ok(SeriesCategory::Endurance),
            "RALLY" => Ok(SeriesCategory::Rally),
            "MOTORCYCLE" | "MOTORBIKE" => Ok(SeriesCategory::Motorcycle),
            "GT" => Ok(SeriesCategory::Gt),
            "TOURING" | "TOURINGCAR" => Ok(SeriesCategory::Touring),
            "FORMULA" => Ok(SeriesCategory::Formula),
            "SPORTCAR" | "SPORTSCAR" => Ok(SeriesCategory::Sportcar),
            "STOCK" | "STOCKCAR" => Ok(SeriesCategory::Stock),
            "OTHER" => Ok(SeriesCategory::Other),
            _ => Err(()),
        }
    }
}

fn canonical_token(value: &str) -> String {
    value
        .trim()
        .to_ascii_uppercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Venue {
    pub circuit: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    /// IANA zone identifier.
    pub timezone: Option<String>,
    #[serde(default)]
    pub inferred_timezone: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(rename = "type")]
    pub session_type: SessionType,
    pub name: String,
    pub start: Option<DateTime<FixedOffset>>,
    pub end: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub status: SessionStatus,
}

/// Where a record came from and how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSource {
    pub url: String,
    pub provider: String,
    pub retrieved_at: DateTime<Utc>,
    pub extraction_method: ExtractionMethod,
    #[serde(default)]
    pub discovered_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Cache,
    Http,
    Browser,
    GraduatedEndpoint,
    Document,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExtractionMethod::Cache => "cache",
            ExtractionMethod::Http => "http",
            ExtractionMethod::Browser => "browser",
            ExtractionMethod::GraduatedEndpoint => "graduated_endpoint",
            ExtractionMethod::Document => "document",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub series_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub venue: Venue,
    #[serde(default)]
    pub sessions: Vec<Session>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub series_id: String,
    pub name: String,
    pub season: i32,
    pub category: SeriesCategory,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Series {
    pub fn session_count(&self) -> usize {
        self.events.iter().map(|event| event.sessions.len()).sum()
    }
}

/// Lower-case ASCII slug used for derived identifiers.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_separator = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_use_upper_snake_names() {
        assert_eq!(
            serde_json::to_string(&SessionType::RallyStage).unwrap(),
            "\"RALLY_STAGE\""
        );
        assert_eq!(serde_json::to_string(&SessionType::Race1).unwrap(), "\"RACE_1\"");
        assert_eq!("race 2".parse::<SessionType>(), Ok(SessionType::Race2));
        assert_eq!("Rally-Stage".parse::<SessionType>(), Ok(SessionType::RallyStage));
        assert!("FP1".parse::<SessionType>().is_err());
    }

    #[test]
    fn status_and_category_accept_common_spellings() {
        assert_eq!("canceled".parse::<SessionStatus>(), Ok(SessionStatus::Cancelled));
        assert_eq!("TBC".parse::<SessionStatus>(), Ok(SessionStatus::Tbd));
        assert_eq!("open wheel".parse::<SeriesCategory>(), Ok(SeriesCategory::Openwheel));
        assert_eq!("Sports Car".parse::<SeriesCategory>(), Ok(SeriesCategory::Sportcar));
    }

    #[test]
    fn slugs_are_stable() {
        assert_eq!(slugify("Formula 1 – Bahrain GP!"), "formula_1_bahrain_gp");
        assert_eq!(slugify("  São Paulo  "), "s_o_paulo");
    }
}
