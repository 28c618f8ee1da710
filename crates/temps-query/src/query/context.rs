use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::{DataError, Result};

/// Default timezone for filters that don't specify one
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| DataError::validation(format!("Invalid timezone '{}'", name)))
}

/// Clock and timezone used to rewrite and evaluate relative-date conditions
#[derive(Debug, Clone, Copy)]
pub struct EvalContext {
    pub timezone: Tz,
    pub now: DateTime<Utc>,
}

impl EvalContext {
    /// Context evaluated at the current instant
    pub fn new(timezone: Tz) -> Self {
        Self {
            timezone,
            now: Utc::now(),
        }
    }

    /// Context frozen at a given instant
    pub fn at(timezone: Tz, now: DateTime<Utc>) -> Self {
        Self { timezone, now }
    }

    /// Parse the timezone name and capture the current instant
    pub fn from_timezone(name: &str) -> Result<Self> {
        Ok(Self::new(parse_timezone(name)?))
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}
