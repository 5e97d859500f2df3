//! Validated query parameters for the read endpoints.
//!
//! Every setter checks its input immediately and consumes the builder, so a
//! bad value is reported at the call that supplied it:
//!
//! ```
//! use tweetkit::api::fields::Fields;
//!
//! let fields = Fields::new()
//!     .query(Some("from:rustlang"))
//!     .max_results(Some(50))
//!     .unwrap();
//! assert_eq!(fields.get("max_results"), Some("50"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use thiserror::Error;

pub const MAX_IDS: usize = 100;
pub const MAX_RESULTS_RANGE: std::ops::RangeInclusive<u32> = 10..=100;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

static TIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}Z$")
        .expect("TIME_PATTERN should compile")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },
    #[error("at most {max} ids allowed, got {count}")]
    TooManyIds { max: usize, count: usize },
    #[error("{field} must look like YYYY-MM-DDTHH:mm:ssZ, got '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },
    #[error("granularity must be one of minute, hour, day, got '{0}'")]
    InvalidGranularity(String),
    #[error("reply settings must be one of everyone, mentionedUsers, following, got '{0}'")]
    InvalidReplySettings(String),
    #[error("a poll needs 2 to 4 options, got {0}")]
    PollOptions(usize),
    #[error("tweet text is {len} characters, limit is {max}")]
    TextTooLong { len: usize, max: usize },
    #[error("a tweet carries 1 to 4 media ids, got {0}")]
    MediaCount(usize),
    #[error("{0} is required")]
    Required(&'static str),
}

/// Bucket width for tweet counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    Minute,
    #[default]
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(Self::Minute),
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            other => Err(ValidationError::InvalidGranularity(other.to_string())),
        }
    }
}

/// Anything that can become an ISO-8601 UTC timestamp on the wire.
pub trait IsoTimestamp {
    fn to_iso(&self, field: &'static str) -> Result<String, ValidationError>;
}

impl IsoTimestamp for &str {
    fn to_iso(&self, field: &'static str) -> Result<String, ValidationError> {
        if TIME_PATTERN.is_match(self) {
            Ok((*self).to_string())
        } else {
            Err(ValidationError::InvalidTimestamp {
                field,
                value: (*self).to_string(),
            })
        }
    }
}

impl IsoTimestamp for String {
    fn to_iso(&self, field: &'static str) -> Result<String, ValidationError> {
        self.as_str().to_iso(field)
    }
}

impl IsoTimestamp for DateTime<Utc> {
    fn to_iso(&self, _field: &'static str) -> Result<String, ValidationError> {
        Ok(self.format(TIME_FORMAT).to_string())
    }
}

impl IsoTimestamp for NaiveDateTime {
    fn to_iso(&self, _field: &'static str) -> Result<String, ValidationError> {
        Ok(self.format(TIME_FORMAT).to_string())
    }
}

/// Accumulated query parameters, keyed by wire name.
///
/// Values only enter through the validating setters:
///
/// ```compile_fail
/// use tweetkit::api::fields::Fields;
///
/// let _ = Fields::new().set("max_results", Some("5000"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    values: BTreeMap<String, String>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Owned `(name, value)` pairs in name order.
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Set `name`, or remove it when `value` is absent or empty.
    fn set(mut self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value.map(Into::into).filter(|v| !v.is_empty()) {
            Some(v) => {
                self.values.insert(name.to_string(), v);
            }
            None => {
                self.values.remove(name);
            }
        }
        self
    }

    pub fn query(self, query: Option<&str>) -> Self {
        self.set("query", query)
    }

    pub fn start_time(self, time: Option<impl IsoTimestamp>) -> Result<Self, ValidationError> {
        let value = time.map(|t| t.to_iso("start_time")).transpose()?;
        Ok(self.set("start_time", value))
    }

    pub fn end_time(self, time: Option<impl IsoTimestamp>) -> Result<Self, ValidationError> {
        let value = time.map(|t| t.to_iso("end_time")).transpose()?;
        Ok(self.set("end_time", value))
    }

    pub fn since_id(self, id: Option<&str>) -> Self {
        self.set("since_id", id)
    }

    pub fn until_id(self, id: Option<&str>) -> Self {
        self.set("until_id", id)
    }

    pub fn expansions(self, expansions: Option<&str>) -> Self {
        self.set("expansions", expansions)
    }

    pub fn media_fields(self, fields: Option<&str>) -> Self {
        self.set("media.fields", fields)
    }

    pub fn place_fields(self, fields: Option<&str>) -> Self {
        self.set("place.fields", fields)
    }

    pub fn poll_fields(self, fields: Option<&str>) -> Self {
        self.set("poll.fields", fields)
    }

    pub fn tweet_fields(self, fields: Option<&str>) -> Self {
        self.set("tweet.fields", fields)
    }

    pub fn user_fields(self, fields: Option<&str>) -> Self {
        self.set("user.fields", fields)
    }

    pub fn max_results(self, max: Option<u32>) -> Result<Self, ValidationError> {
        if let Some(v) = max
            && !MAX_RESULTS_RANGE.contains(&v)
        {
            return Err(ValidationError::OutOfRange {
                field: "max_results",
                min: i64::from(*MAX_RESULTS_RANGE.start()),
                max: i64::from(*MAX_RESULTS_RANGE.end()),
                value: i64::from(v),
            });
        }
        Ok(self.set("max_results", max.map(|v| v.to_string())))
    }

    pub fn granularity(self, granularity: Option<Granularity>) -> Self {
        self.set("granularity", granularity.map(Granularity::as_str))
    }

    /// Comma-separated ids with all whitespace removed.
    pub fn ids(self, ids: Option<&str>) -> Result<Self, ValidationError> {
        let Some(raw) = ids else {
            return Ok(self.set("ids", None::<String>));
        };
        let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let count = cleaned.split(',').filter(|id| !id.is_empty()).count();
        if count > MAX_IDS {
            return Err(ValidationError::TooManyIds {
                max: MAX_IDS,
                count,
            });
        }
        Ok(self.set("ids", Some(cleaned)))
    }
}
