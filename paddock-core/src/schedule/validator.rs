use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::extraction::ExtractionCandidate;

use super::model::{
    slugify, Event, RecordSource, Series, SeriesCategory, Session, SessionStatus, SessionType,
    Venue,
};
use super::timezone::{infer_timezone, is_iana_zone};

const SEASON_RANGE: RangeInclusive<i32> = 1900..=2100;

/// Non-fatal note about a coercion or omission, addressed by JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Rejected candidate. Carries every issue plus the warnings collected on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("schedule validation failed: {}", join_issues(.issues))]
pub struct ValidationFailure {
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The only artifact handed upstream as authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedRecord {
    pub series: Series,
    pub warnings: Vec<ValidationWarning>,
    pub source: Option<RecordSource>,
}

impl ValidatedRecord {
    pub fn with_source(mut self, source: RecordSource) -> Self {
        self.source = Some(source);
        self
    }
}

#[derive(Default)]
struct Report {
    warnings: Vec<ValidationWarning>,
    issues: Vec<ValidationIssue>,
}

impl Report {
    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ValidationWarning {
            path: path.into(),
            message: message.into(),
        });
    }

    fn reject(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Pure, deterministic check of extraction output against the schedule schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        candidate: &ExtractionCandidate,
    ) -> Result<ValidatedRecord, ValidationFailure> {
        let mut report = Report::default();
        for warning in &candidate.warnings {
            report.warn("extraction", warning.clone());
        }
        let series = self.validate_series(&candidate.payload, &mut report);
        match series {
            Some(series) if report.issues.is_empty() => Ok(ValidatedRecord {
                series,
                warnings: report.warnings,
                source: None,
            }),
            _ => Err(ValidationFailure {
                issues: report.issues,
                warnings: report.warnings,
            }),
        }
    }

    fn validate_series(&self, payload: &Value, report: &mut Report) -> Option<Series> {
        let Some(root) = payload.as_object() else {
            report.reject("$", format!("expected a JSON object, found {}", type_name(payload)));
            return None;
        };
        let series_obj = match root.get("series") {
            Some(Value::Object(inner)) => inner,
            _ => root,
        };

        let mut name = string_field(series_obj, "name", "series", report);
        if name.is_none() {
            if let Some(Value::String(label)) = root.get("series") {
                let label = label.trim();
                if !label.is_empty() {
                    report.warn("series.name", "taken from top-level `series` string");
                    name = Some(label.to_string());
                }
            }
        }
        if name.is_none() {
            report.reject("series.name", "missing required field `name`");
        }

        let season = season_field(series_obj.get("season").or_else(|| root.get("season")), report);

        let category = match string_field(series_obj, "category", "series", report) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                report.warn("series.category", format!("unknown category `{raw}`; set to OTHER"));
                SeriesCategory::Other
            }),
            None => SeriesCategory::Other,
        };

        let events_value = series_obj.get("events").or_else(|| root.get("events"));
        let Some(raw_events) = events_value.and_then(Value::as_array) else {
            report.reject("series.events", "missing required array `events`");
            return None;
        };

        let (Some(name), Some(season)) = (name, season) else {
            return None;
        };
        let series_id = string_field(series_obj, "series_id", "series", report)
            .unwrap_or_else(|| slugify(&format!("{name} {season}")));

        let mut events = Vec::with_capacity(raw_events.len());
        let mut seen_ids = HashSet::new();
        for (index, raw) in raw_events.iter().enumerate() {
            let path = format!("series.events[{index}]");
            let Some(obj) = raw.as_object() else {
                report.warn(path, format!("expected an object, found {}; event dropped", type_name(raw)));
                continue;
            };
            if let Some(mut event) = validate_event(obj, &path, &series_id, report) {
                event.event_id = unique_id(event.event_id, &mut seen_ids);
                events.push(event);
            }
        }
        if events.is_empty() {
            report.reject("series.events", "no event survived validation");
            return None;
        }

        Some(Series {
            series_id,
            name,
            season,
            category,
            events,
        })
    }
}

fn validate_event(
    obj: &Map<String, Value>,
    path: &str,
    series_id: &str,
    report: &mut Report,
) -> Option<Event> {
    let Some(name) = string_field(obj, "name", path, report) else {
        report.warn(format!("{path}.name"), "missing required field `name`; event dropped");
        return None;
    };

    let start_path = format!("{path}.start_date");
    let start_date = match string_field(obj, "start_date", path, report) {
        Some(raw) => match parse_date(&raw) {
            Some((date, coerced)) => {
                if coerced {
                    report.warn(&start_path, format!("coerced `{raw}` to {date}"));
                }
                date
            }
            None => {
                report.warn(start_path, format!("unrecognised date `{raw}`; event dropped"));
                return None;
            }
        },
        None => {
            report.warn(start_path, "missing required field `start_date`; event dropped");
            return None;
        }
    };

    let end_path = format!("{path}.end_date");
    let mut end_date = match string_field(obj, "end_date", path, report) {
        Some(raw) => match parse_date(&raw) {
            Some((date, coerced)) => {
                if coerced {
                    report.warn(&end_path, format!("coerced `{raw}` to {date}"));
                }
                date
            }
            None => {
                report.warn(&end_path, format!("unrecognised date `{raw}`; set to start_date"));
                start_date
            }
        },
        None => {
            report.warn(&end_path, "missing; set to start_date");
            start_date
        }
    };
    if end_date < start_date {
        report.warn(&end_path, "before start_date; set to start_date");
        end_date = start_date;
    }

    let event_id = string_field(obj, "event_id", path, report)
        .unwrap_or_else(|| slugify(&format!("{series_id} {name}")));
    let venue = validate_venue(obj.get("venue"), &format!("{path}.venue"), report);

    let mut sessions = Vec::new();
    match obj.get("sessions") {
        None | Some(Value::Null) => {}
        Some(Value::Array(raw_sessions)) => {
            let mut seen_ids = HashSet::new();
            for (index, raw) in raw_sessions.iter().enumerate() {
                let session_path = format!("{path}.sessions[{index}]");
                let Some(session_obj) = raw.as_object() else {
                    report.warn(
                        session_path,
                        format!("expected an object, found {}; session dropped", type_name(raw)),
                    );
                    continue;
                };
                if let Some(mut session) =
                    validate_session(session_obj, &session_path, &event_id, report)
                {
                    session.session_id = unique_id(session.session_id, &mut seen_ids);
                    sessions.push(session);
                }
            }
        }
        Some(other) => report.warn(
            format!("{path}.sessions"),
            format!("expected an array, found {}; ignored", type_name(other)),
        ),
    }

    Some(Event {
        event_id,
        series_id: series_id.to_string(),
        name,
        start_date,
        end_date,
        venue,
        sessions,
    })
}

fn validate_venue(value: Option<&Value>, path: &str, report: &mut Report) -> Venue {
    let mut venue = Venue::default();
    let mut declared_inferred = false;
    let mut declared_zone = None;
    match value {
        None | Some(Value::Null) => {}
        Some(Value::String(circuit)) => {
            report.warn(path, "given as a string; used as circuit name");
            venue.circuit = Some(circuit.trim().to_string()).filter(|c| !c.is_empty());
        }
        Some(Value::Object(obj)) => {
            venue.circuit = string_field(obj, "circuit", path, report);
            venue.city = string_field(obj, "city", path, report);
            venue.region = string_field(obj, "region", path, report);
            venue.country = string_field(obj, "country", path, report);
            declared_zone = string_field(obj, "timezone", path, report);
            declared_inferred = obj
                .get("inferred_timezone")
                .and_then(Value::as_bool)
                .unwrap_or(false);
        }
        Some(other) => report.warn(
            path,
            format!("expected an object, found {}; ignored", type_name(other)),
        ),
    }

    let zone_path = format!("{path}.timezone");
    if let Some(zone) = declared_zone {
        if is_iana_zone(&zone) {
            venue.timezone = Some(zone);
            venue.inferred_timezone = declared_inferred;
            return venue;
        }
        report.warn(&zone_path, format!("`{zone}` is not an IANA zone; ignored"));
    }
    match infer_timezone(venue.country.as_deref(), venue.city.as_deref()) {
        Some(zone) => {
            report.warn(zone_path, format!("time zone inferred as {zone}"));
            venue.timezone = Some(zone.to_string());
            venue.inferred_timezone = true;
        }
        None => report.warn(zone_path, "time zone unknown"),
    }
    venue
}

fn validate_session(
    obj: &Map<String, Value>,
    path: &str,
    event_id: &str,
    report: &mut Report,
) -> Option<Session> {
    let Some(name) = string_field(obj, "name", path, report) else {
        report.warn(format!("{path}.name"), "missing required field `name`; session dropped");
        return None;
    };

    let type_path = format!("{path}.type");
    let declared = string_field(obj, "type", path, report)
        .or_else(|| string_field(obj, "session_type", path, report));
    let session_type = match declared {
        Some(raw) => match raw.parse::<SessionType>() {
            Ok(kind) => kind,
            Err(()) => match classify_session(&raw).or_else(|| classify_session(&name)) {
                Some(kind) => {
                    report.warn(&type_path, format!("`{raw}` normalised to {}", kind.as_str()));
                    kind
                }
                None => {
                    report.warn(type_path, format!("unrecognised type `{raw}`; session dropped"));
                    return None;
                }
            },
        },
        None => match classify_session(&name) {
            Some(kind) => {
                report.warn(&type_path, format!("missing; inferred {} from name", kind.as_str()));
                kind
            }
            None => {
                report.warn(
                    type_path,
                    "missing required field `type` and none inferable from name; session dropped",
                );
                return None;
            }
        },
    };

    let start = instant_field(obj, "start", path, report);
    let mut end = instant_field(obj, "end", path, report);
    if let (Some(start), Some(finish)) = (start, end) {
        if finish <= start {
            report.warn(format!("{path}.end"), "not after start; omitted");
            end = None;
        }
    }

    let status = match string_field(obj, "status", path, report) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            report.warn(format!("{path}.status"), format!("unknown status `{raw}`; set to SCHEDULED"));
            SessionStatus::Scheduled
        }),
        None => SessionStatus::Scheduled,
    };

    let session_id = string_field(obj, "session_id", path, report)
        .unwrap_or_else(|| slugify(&format!("{event_id} {name}")));

    Some(Session {
        session_id,
        session_type,
        name,
        start,
        end,
        status,
    })
}

static SESSION_RULES: LazyLock<Vec<(Regex, SessionType)>> = LazyLock::new(|| {
    [
        (r"practice|\bfp\d|free\s*practice|training", SessionType::Practice),
        (r"qualifying|qualif|\bquali|\bq\d\b|super\s*pole", SessionType::Qualifying),
        (r"warm\s*-?\s*up", SessionType::Warmup),
        (r"\btest|shakedown", SessionType::Test),
        (r"stage\s*\d+|rally\s*stage|\bss\d+|special\s*stage", SessionType::RallyStage),
        (r"race\s*1\b", SessionType::Race1),
        (r"race\s*2\b", SessionType::Race2),
        (r"sprint", SessionType::Sprint),
        (r"feature", SessionType::Feature),
        (r"\bheat", SessionType::Heat),
        (r"indianapolis\s*500|indy\s*500", SessionType::Race),
        (r"\brace\b|grand\s*prix|\bgp\b|main\s*race", SessionType::Race),
    ]
    .into_iter()
    .map(|(pattern, kind)| {
        let regex = Regex::new(&format!("(?i){pattern}")).expect("valid regex");
        (regex, kind)
    })
    .collect()
});

/// Maps free-form session labels ("FP1", "Quali", "Warm Up") onto a type.
pub fn classify_session(label: &str) -> Option<SessionType> {
    SESSION_RULES
        .iter()
        .find(|(regex, _)| regex.is_match(label))
        .map(|(_, kind)| *kind)
}

/// Parses date-like text; the flag is set when the input was not canonical `YYYY-MM-DD`.
fn parse_date(raw: &str) -> Option<(NaiveDate, bool)> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some((date, false));
    }
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Some((stamp.date_naive(), true));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, format) {
            return Some((stamp.date(), true));
        }
    }
    for format in ["%Y/%m/%d", "%d %B %Y", "%B %d, %Y", "%d %b %Y", "%b %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some((date, true));
        }
    }
    None
}

enum InstantProblem {
    MissingOffset,
    Unrecognised,
}

fn parse_instant(raw: &str) -> Result<DateTime<FixedOffset>, InstantProblem> {
    let raw = raw.trim();
    if let Ok(stamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(stamp);
    }
    let spaced = raw.replacen(' ', "T", 1);
    if let Ok(stamp) = DateTime::parse_from_rfc3339(&spaced) {
        return Ok(stamp);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M%:z", "%Y-%m-%dT%H:%M%z"] {
        if let Ok(stamp) = DateTime::parse_from_str(&spaced, format) {
            return Ok(stamp);
        }
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if NaiveDateTime::parse_from_str(&spaced, format).is_ok() {
            return Err(InstantProblem::MissingOffset);
        }
    }
    Err(InstantProblem::Unrecognised)
}

fn instant_field(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    report: &mut Report,
) -> Option<DateTime<FixedOffset>> {
    let raw = string_field(obj, key, path, report)?;
    match parse_instant(&raw) {
        Ok(stamp) => Some(stamp),
        Err(InstantProblem::MissingOffset) => {
            report.warn(format!("{path}.{key}"), format!("`{raw}` has no UTC offset; omitted"));
            None
        }
        Err(InstantProblem::Unrecognised) => {
            report.warn(format!("{path}.{key}"), format!("unrecognised timestamp `{raw}`; omitted"));
            None
        }
    }
}

fn season_field(value: Option<&Value>, report: &mut Report) -> Option<i32> {
    let season = match value {
        None | Some(Value::Null) => {
            report.reject("series.season", "missing required field `season`");
            return None;
        }
        Some(Value::Number(number)) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Some(Value::String(raw)) => {
            let parsed = raw.trim().parse::<i64>().ok();
            if parsed.is_some() {
                report.warn("series.season", format!("coerced from string `{raw}`"));
            }
            parsed
        }
        Some(_) => None,
    };
    match season.and_then(|year| i32::try_from(year).ok()) {
        Some(year) if SEASON_RANGE.contains(&year) => Some(year),
        Some(year) => {
            report.reject(
                "series.season",
                format!(
                    "{year} outside {}..={}",
                    SEASON_RANGE.start(),
                    SEASON_RANGE.end()
                ),
            );
            None
        }
        None => {
            report.reject("series.season", "expected an integer year");
            None
        }
    }
}

/// Non-empty trimmed text; numbers are accepted as their decimal form.
fn string_field(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    report: &mut Report,
) -> Option<String> {
    match obj.get(key)? {
        Value::String(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Value::Number(number) => {
            report.warn(format!("{path}.{key}"), "coerced from number");
            Some(number.to_string())
        }
        Value::Null => None,
        other => {
            report.warn(
                format!("{path}.{key}"),
                format!("expected a string, found {}; ignored", type_name(other)),
            );
            None
        }
    }
}

fn unique_id(id: String, seen: &mut HashSet<String>) -> String {
    if seen.insert(id.clone()) {
        return id;
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{id}_{suffix}");
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        suffix += 1;
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(payload: Value) -> ExtractionCandidate {
        ExtractionCandidate {
            payload,
            raw_response: String::new(),
            provider: "test".into(),
            model: "canned".into(),
            warnings: Vec::new(),
        }
    }

    fn bahrain() -> Value {
        json!({
            "series": {
                "name": "Formula 1",
                "season": 2025,
                "category": "FORMULA",
                "events": [{
                    "name": "Bahrain Grand Prix",
                    "start_date": "2025-02-28",
                    "end_date": "2025-03-02",
                    "venue": {"circuit": "Bahrain International Circuit", "city": "Sakhir",
                              "country": "Bahrain", "timezone": "Asia/Bahrain"},
                    "sessions": [
                        {"name": "Practice 1", "type": "PRACTICE",
                         "start": "2025-02-28T14:30:00+03:00", "end": "2025-02-28T15:30:00+03:00"},
                        {"type": "QUALIFYING", "start": "2025-03-01T19:00:00+03:00"},
                        {"name": "Race", "type": "RACE", "start": "2025-03-02T18:00:00+03:00"}
                    ]
                }]
            }
        })
    }

    #[test]
    fn session_without_name_is_dropped_with_warning() {
        let record = SchemaValidator::new().validate(&candidate(bahrain())).unwrap();
        let event = &record.series.events[0];
        assert_eq!(event.sessions.len(), 2);
        assert_eq!(event.sessions[1].session_type, SessionType::Race);
        let dropped = record
            .warnings
            .iter()
            .find(|w| w.path == "series.events[0].sessions[1].name")
            .expect("warning for the dropped session");
        assert!(dropped.message.contains("`name`"));
        assert!(dropped.message.contains("dropped"));
    }

    #[test]
    fn validation_is_idempotent() {
        let validator = SchemaValidator::new();
        let input = candidate(bahrain());
        let first = validator.validate(&input).unwrap();
        let second = validator.validate(&input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn ids_are_derived_when_missing() {
        let record = SchemaValidator::new().validate(&candidate(bahrain())).unwrap();
        assert_eq!(record.series.series_id, "formula_1_2025");
        let event = &record.series.events[0];
        assert_eq!(event.event_id, "formula_1_2025_bahrain_grand_prix");
        assert_eq!(event.series_id, "formula_1_2025");
        assert_eq!(event.sessions[0].session_id, "formula_1_2025_bahrain_grand_prix_practice_1");
    }

    #[test]
    fn coerces_season_dates_and_types() {
        let payload = json!({
            "series": {
                "name": "IndyCar",
                "season": "2025",
                "events": [{
                    "name": "Indianapolis 500",
                    "start_date": "2025/05/25",
                    "venue": {"city": "Indianapolis", "country": "USA"},
                    "sessions": [
                        {"name": "FP1", "start": "2025-05-23T11:00:00"},
                        {"name": "Quali", "type": "Qualifying session"},
                        {"name": "Indy 500", "start": "2025-05-25T12:45:00-04:00",
                         "end": "2025-05-25T12:00:00-04:00"},
                        {"name": "Fan parade"}
                    ]
                }]
            }
        });
        let record = SchemaValidator::new().validate(&candidate(payload)).unwrap();
        assert_eq!(record.series.season, 2025);
        assert_eq!(record.series.category, SeriesCategory::Other);

        let event = &record.series.events[0];
        assert_eq!(event.start_date, NaiveDate::from_ymd_opt(2025, 5, 25).unwrap());
        assert_eq!(event.end_date, event.start_date);
        assert_eq!(event.venue.timezone.as_deref(), Some("America/Indiana/Indianapolis"));
        assert!(event.venue.inferred_timezone);

        let kinds: Vec<_> = event.sessions.iter().map(|s| s.session_type).collect();
        assert_eq!(
            kinds,
            vec![SessionType::Practice, SessionType::Qualifying, SessionType::Race]
        );
        assert!(event.sessions[0].start.is_none());
        assert!(event.sessions[2].start.is_some());
        assert!(event.sessions[2].end.is_none());

        let messages: Vec<String> = record.warnings.iter().map(ToString::to_string).collect();
        assert!(messages.iter().any(|m| m.contains("time zone inferred")));
        assert!(messages.iter().any(|m| m.contains("no UTC offset")));
        assert!(messages.iter().any(|m| m.contains("sessions[2].end")));
        assert!(messages
            .iter()
            .any(|m| m.starts_with("series.events[0].sessions[3].type")));
    }

    #[test]
    fn flat_series_object_is_accepted() {
        let payload = json!({
            "name": "WRC",
            "season": 2024,
            "category": "rally",
            "events": [{"name": "Rally Japan", "start_date": "2024-11-21",
                        "venue": {"country": "Japan"},
                        "sessions": [{"name": "SS1 Kuragaike Park"}]}]
        });
        let record = SchemaValidator::new().validate(&candidate(payload)).unwrap();
        assert_eq!(record.series.category, SeriesCategory::Rally);
        let session = &record.series.events[0].sessions[0];
        assert_eq!(session.session_type, SessionType::RallyStage);
        assert_eq!(record.series.events[0].venue.timezone.as_deref(), Some("Asia/Tokyo"));
    }

    #[test]
    fn record_without_surviving_events_fails() {
        let payload = json!({
            "series": {"name": "Formula E", "season": 2025,
                       "events": [{"start_date": "2025-01-11"}, {"name": "Mexico", "start_date": "soon"}]}
        });
        let failure = SchemaValidator::new().validate(&candidate(payload)).unwrap_err();
        assert_eq!(failure.issues.len(), 1);
        assert_eq!(failure.issues[0].path, "series.events");
        assert_eq!(failure.warnings.len(), 2);
    }

    #[test]
    fn missing_name_and_bad_season_are_field_level_issues() {
        let payload = json!({"series": {"season": 1850, "events": []}});
        let failure = SchemaValidator::new().validate(&candidate(payload)).unwrap_err();
        let paths: Vec<&str> = failure.issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["series.name", "series.season"]);
        assert!(failure.to_string().contains("1850 outside 1900..=2100"));
    }

    #[test]
    fn non_object_payload_fails() {
        let failure = SchemaValidator::new().validate(&candidate(json!([1, 2]))).unwrap_err();
        assert_eq!(failure.issues[0].path, "$");
    }

    #[test]
    fn extraction_warnings_carry_over() {
        let mut input = candidate(bahrain());
        input.warnings.push("repaired trailing commas".into());
        let record = SchemaValidator::new().validate(&input).unwrap();
        assert_eq!(record.warnings[0].path, "extraction");
    }

    #[test]
    fn classifier_follows_pattern_order() {
        assert_eq!(classify_session("Free Practice 2"), Some(SessionType::Practice));
        assert_eq!(classify_session("Sprint Qualifying"), Some(SessionType::Qualifying));
        assert_eq!(classify_session("Warm Up"), Some(SessionType::Warmup));
        assert_eq!(classify_session("Race 2"), Some(SessionType::Race2));
        assert_eq!(classify_session("Sprint"), Some(SessionType::Sprint));
        assert_eq!(classify_session("Monaco Grand Prix"), Some(SessionType::Race));
        assert_eq!(classify_session("Autograph session"), None);
    }
}
