//! Column schemas

use serde::{Deserialize, Serialize};

/// Default character limit for STRING columns without an explicit size
pub const DEFAULT_STRING_SIZE: u64 = 50;
/// Default element limit for list columns
pub const DEFAULT_MAX_LIST_LENGTH: u64 = 100;

const MAX_BYTES_PER_CHAR: u64 = 4;
const NUMERIC_BYTES: u64 = 20;
const DOUBLE_BYTES: u64 = 23;
const BOOLEAN_BYTES: u64 = 5;
const LINK_SIZE: u64 = 1000;
const MEDIUM_TEXT_SIZE: u64 = 2000;
const LARGE_TEXT_BYTES: u64 = 1_000_000;
const JSON_BYTES: u64 = 64_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ColumnType {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    #[serde(rename = "ENTITYID")]
    EntityId,
    #[serde(rename = "FILEHANDLEID")]
    FileHandleId,
    #[serde(rename = "USERID")]
    UserId,
    #[serde(rename = "SUBMISSIONID")]
    SubmissionId,
    #[serde(rename = "EVALUATIONID")]
    EvaluationId,
    Link,
    #[serde(rename = "MEDIUMTEXT")]
    MediumText,
    #[serde(rename = "LARGETEXT")]
    LargeText,
    Json,
    StringList,
    IntegerList,
    BooleanList,
    DateList,
    #[serde(rename = "ENTITYID_LIST")]
    EntityIdList,
    #[serde(rename = "USERID_LIST")]
    UserIdList,
}

impl ColumnType {
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            ColumnType::StringList
                | ColumnType::IntegerList
                | ColumnType::BooleanList
                | ColumnType::DateList
                | ColumnType::EntityIdList
                | ColumnType::UserIdList
        )
    }

    /// Element type of a list column, or the type itself
    pub fn element_type(&self) -> ColumnType {
        match self {
            ColumnType::StringList => ColumnType::String,
            ColumnType::IntegerList => ColumnType::Integer,
            ColumnType::BooleanList => ColumnType::Boolean,
            ColumnType::DateList => ColumnType::Date,
            ColumnType::EntityIdList => ColumnType::EntityId,
            ColumnType::UserIdList => ColumnType::UserId,
            other => *other,
        }
    }

    /// Worst case bytes one value of this type occupies in a result row.
    pub fn max_bytes(&self, max_size: Option<u64>, max_list_length: Option<u64>) -> u64 {
        if self.is_list() {
            let elements = max_list_length.unwrap_or(DEFAULT_MAX_LIST_LENGTH);
            // brackets plus a separator per element
            return 2 + elements * (self.element_type().max_bytes(max_size, None) + 1);
        }
        match self {
            ColumnType::String => max_size.unwrap_or(DEFAULT_STRING_SIZE) * MAX_BYTES_PER_CHAR,
            ColumnType::Link => max_size.unwrap_or(LINK_SIZE) * MAX_BYTES_PER_CHAR,
            ColumnType::MediumText => MEDIUM_TEXT_SIZE * MAX_BYTES_PER_CHAR,
            ColumnType::LargeText => LARGE_TEXT_BYTES,
            ColumnType::Json => JSON_BYTES,
            ColumnType::Double => DOUBLE_BYTES,
            ColumnType::Boolean => BOOLEAN_BYTES,
            _ => NUMERIC_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FacetType {
    Enumeration,
    Range,
}

/// A column of a table schema. The query engine only reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub id: i64,
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_list_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facet_type: Option<FacetType>,
}

impl ColumnSchema {
    pub fn new(id: i64, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            id,
            name: name.into(),
            column_type,
            max_size: None,
            max_list_length: None,
            facet_type: None,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_facet(mut self, facet_type: FacetType) -> Self {
        self.facet_type = Some(facet_type);
        self
    }

    /// `_C<id>_`
    pub fn internal_name(&self) -> String {
        format!("_C{}_", self.id)
    }

    pub fn max_bytes(&self) -> u64 {
        self.column_type.max_bytes(self.max_size, self.max_list_length)
    }
}
