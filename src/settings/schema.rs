//! Physical column names of a queue table.

use crate::error::{Error, Result};
use crate::settings::sanitize_identifier;
use serde::{Deserialize, Serialize};

const DEFAULT_ID_FIELD: &str = "id";
const DEFAULT_QUEUE_NAME_FIELD: &str = "queue_name";
const DEFAULT_PAYLOAD_FIELD: &str = "payload";
const DEFAULT_CREATED_AT_FIELD: &str = "created_at";
const DEFAULT_NEXT_PROCESS_AT_FIELD: &str = "next_process_at";
const DEFAULT_ATTEMPT_FIELD: &str = "attempt";
const DEFAULT_REENQUEUE_ATTEMPT_FIELD: &str = "reenqueue_attempt";
const DEFAULT_TOTAL_ATTEMPT_FIELD: &str = "total_attempt";

/// Column layout of a queue table.
///
/// Every name is sanitized like a table name. Extension fields keep their declaration
/// order and are deduplicated. Two extension fields whose parameter names coincide
/// (`trace.id` and `trace_id`) are rejected. One schema is typically shared by every queue of a
/// multi-tenant table.
///
/// ```rust
/// use dbqueue::settings::QueueTableSchema;
///
/// let schema = QueueTableSchema::builder()
///     .with_payload_field("task_body")
///     .with_ext_fields(["trace_id", "tenant"])
///     .build()?;
/// assert_eq!(schema.payload_field(), "task_body");
/// assert_eq!(schema.ext_fields(), ["trace_id", "tenant"]);
/// # Ok::<_, dbqueue::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQueueTableSchema")]
pub struct QueueTableSchema {
    id_field: String,
    queue_name_field: String,
    payload_field: String,
    created_at_field: String,
    next_process_at_field: String,
    attempt_field: String,
    reenqueue_attempt_field: String,
    total_attempt_field: String,
    ext_fields: Vec<String>,
}

impl QueueTableSchema {
    pub fn builder() -> QueueTableSchemaBuilder {
        QueueTableSchemaBuilder(RawQueueTableSchema::default())
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn queue_name_field(&self) -> &str {
        &self.queue_name_field
    }

    pub fn payload_field(&self) -> &str {
        &self.payload_field
    }

    pub fn created_at_field(&self) -> &str {
        &self.created_at_field
    }

    pub fn next_process_at_field(&self) -> &str {
        &self.next_process_at_field
    }

    pub fn attempt_field(&self) -> &str {
        &self.attempt_field
    }

    pub fn reenqueue_attempt_field(&self) -> &str {
        &self.reenqueue_attempt_field
    }

    pub fn total_attempt_field(&self) -> &str {
        &self.total_attempt_field
    }

    pub fn ext_fields(&self) -> &[String] {
        &self.ext_fields
    }

    pub fn has_ext_field(&self, name: &str) -> bool {
        self.ext_fields.iter().any(|field| field == name)
    }

    /// Named parameter carrying the value of an extension column.
    pub(crate) fn ext_param(field: &str) -> String {
        field.replace('.', "_")
    }

    /// Columns returned to the caller for a picked task, in a stable order.
    pub(crate) fn task_columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.id_field(),
            self.payload_field(),
            self.attempt_field(),
            self.reenqueue_attempt_field(),
            self.total_attempt_field(),
            self.created_at_field(),
            self.next_process_at_field(),
        ];
        columns.extend(self.ext_fields.iter().map(String::as_str));
        columns
    }
}

impl Default for QueueTableSchema {
    fn default() -> Self {
        let raw = RawQueueTableSchema::default();
        Self {
            id_field: raw.id_field,
            queue_name_field: raw.queue_name_field,
            payload_field: raw.payload_field,
            created_at_field: raw.created_at_field,
            next_process_at_field: raw.next_process_at_field,
            attempt_field: raw.attempt_field,
            reenqueue_attempt_field: raw.reenqueue_attempt_field,
            total_attempt_field: raw.total_attempt_field,
            ext_fields: raw.ext_fields,
        }
    }
}

/// Unsanitized form used for deserialization and by the builder.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawQueueTableSchema {
    id_field: String,
    queue_name_field: String,
    payload_field: String,
    created_at_field: String,
    next_process_at_field: String,
    attempt_field: String,
    reenqueue_attempt_field: String,
    total_attempt_field: String,
    ext_fields: Vec<String>,
}

impl Default for RawQueueTableSchema {
    fn default() -> Self {
        Self {
            id_field: DEFAULT_ID_FIELD.to_string(),
            queue_name_field: DEFAULT_QUEUE_NAME_FIELD.to_string(),
            payload_field: DEFAULT_PAYLOAD_FIELD.to_string(),
            created_at_field: DEFAULT_CREATED_AT_FIELD.to_string(),
            next_process_at_field: DEFAULT_NEXT_PROCESS_AT_FIELD.to_string(),
            attempt_field: DEFAULT_ATTEMPT_FIELD.to_string(),
            reenqueue_attempt_field: DEFAULT_REENQUEUE_ATTEMPT_FIELD.to_string(),
            total_attempt_field: DEFAULT_TOTAL_ATTEMPT_FIELD.to_string(),
            ext_fields: Vec::new(),
        }
    }
}

impl TryFrom<RawQueueTableSchema> for QueueTableSchema {
    type Error = Error;

    fn try_from(raw: RawQueueTableSchema) -> Result<Self> {
        let mut ext_fields: Vec<String> = Vec::with_capacity(raw.ext_fields.len());
        for field in raw.ext_fields.iter().map(|f| sanitize_identifier(f)) {
            if field.is_empty() || ext_fields.contains(&field) {
                continue;
            }
            let param = Self::ext_param(&field);
            if let Some(other) = ext_fields.iter().find(|f| Self::ext_param(f) == param) {
                return Err(Error::InvalidConfig {
                    field: "ext_fields".to_string(),
                    message: format!("'{}' and '{}' both bind as :{}", other, field, param),
                });
            }
            ext_fields.push(field);
        }

        Ok(Self {
            id_field: sanitize_identifier(&raw.id_field),
            queue_name_field: sanitize_identifier(&raw.queue_name_field),
            payload_field: sanitize_identifier(&raw.payload_field),
            created_at_field: sanitize_identifier(&raw.created_at_field),
            next_process_at_field: sanitize_identifier(&raw.next_process_at_field),
            attempt_field: sanitize_identifier(&raw.attempt_field),
            reenqueue_attempt_field: sanitize_identifier(&raw.reenqueue_attempt_field),
            total_attempt_field: sanitize_identifier(&raw.total_attempt_field),
            ext_fields,
        })
    }
}

#[derive(Debug, Clone)]
pub struct QueueTableSchemaBuilder(RawQueueTableSchema);

impl QueueTableSchemaBuilder {
    pub fn with_id_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.id_field = name.into();
        self
    }

    pub fn with_queue_name_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.queue_name_field = name.into();
        self
    }

    pub fn with_payload_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.payload_field = name.into();
        self
    }

    pub fn with_created_at_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.created_at_field = name.into();
        self
    }

    pub fn with_next_process_at_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.next_process_at_field = name.into();
        self
    }

    pub fn with_attempt_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.attempt_field = name.into();
        self
    }

    pub fn with_reenqueue_attempt_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.reenqueue_attempt_field = name.into();
        self
    }

    pub fn with_total_attempt_field<S: Into<String>>(mut self, name: S) -> Self {
        self.0.total_attempt_field = name.into();
        self
    }

    pub fn with_ext_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.ext_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Fails when two extension fields map to the same parameter name.
    pub fn build(self) -> Result<QueueTableSchema> {
        self.0.try_into()
    }
}
