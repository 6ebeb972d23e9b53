mod model;
mod timezone;
mod validator;

pub use model::{
    slugify, Event, ExtractionMethod, RecordSource, Series, SeriesCategory, Session,
    SessionStatus, SessionType, Venue,
};
pub use timezone::{infer_timezone, is_iana_zone};
pub use validator::{
    classify_session, SchemaValidator, ValidatedRecord, ValidationFailure, ValidationIssue,
    ValidationWarning,
};
