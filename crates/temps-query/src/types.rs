use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A record as returned by collections.
/// Relation fields hold nested objects (to-one), arrays of objects (to-many) or null.
pub type RecordData = serde_json::Map<String, serde_json::Value>;

/// Values of the primary key columns of a record, in schema order
pub type CompositeId = Vec<serde_json::Value>;

/// Identity of whoever issues a request against a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caller {
    pub id: i64,
    pub email: String,
    /// Free-form tags forwarded to segment resolvers, computed fields and actions
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Caller {
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            tags: HashMap::new(),
        }
    }

    /// Caller used for internal requests and tests
    pub fn system() -> Self {
        Self::new(0, "system@localhost")
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Column data types a collection can declare
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Binary,
    /// ISO 8601 timestamp
    Date,
    /// ISO 8601 calendar date (yyyy-MM-dd)
    Dateonly,
    Enum,
    Json,
    Number,
    Point,
    String,
    Time,
    Uuid,
    Array(Box<ColumnType>),
}

impl ColumnType {
    pub fn is_date(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Dateonly)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Boolean => write!(f, "Boolean"),
            ColumnType::Binary => write!(f, "Binary"),
            ColumnType::Date => write!(f, "Date"),
            ColumnType::Dateonly => write!(f, "Dateonly"),
            ColumnType::Enum => write!(f, "Enum"),
            ColumnType::Json => write!(f, "Json"),
            ColumnType::Number => write!(f, "Number"),
            ColumnType::Point => write!(f, "Point"),
            ColumnType::String => write!(f, "String"),
            ColumnType::Time => write!(f, "Time"),
            ColumnType::Uuid => write!(f, "Uuid"),
            ColumnType::Array(inner) => write!(f, "[{}]", inner),
        }
    }
}

/// Which records an action applies to
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ActionScope {
    Single,
    Bulk,
    Global,
}

/// Widget types for action forms
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ActionFieldType {
    Boolean,
    Date,
    Dateonly,
    Enum,
    Json,
    Number,
    String,
    File,
}

/// A field of an action form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionField {
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: ActionFieldType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_read_only: bool,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub enum_values: Vec<String>,
}

impl ActionField {
    pub fn new(label: impl Into<String>, field_type: ActionFieldType) -> Self {
        Self {
            label: label.into(),
            field_type,
            description: None,
            is_required: false,
            is_read_only: false,
            default_value: None,
            value: None,
            enum_values: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_enum_values(mut self, values: &[&str]) -> Self {
        self.enum_values = values.iter().map(|v| v.to_string()).collect();
        self
    }
}

/// Outcome of an action execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActionResult {
    Success {
        message: String,
        /// Collections whose content was changed by the action
        #[serde(default)]
        invalidated: Vec<String>,
    },
    Error {
        message: String,
    },
    Redirect {
        path: String,
    },
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        ActionResult::Success {
            message: message.into(),
            invalidated: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ActionResult::Error {
            message: message.into(),
        }
    }
}
