//! Queue identity: [`QueueId`], [`QueueTable`] and [`QueueLocation`].
//!
//! Table and sequence names end up spliced into dynamic SQL, so both are passed through
//! [`sanitize_identifier`] when a [`QueueTable`] is built. Disallowed characters are
//! dropped rather than rejected.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Strip every character outside `[A-Za-z0-9_.]`.
///
/// The filter is idempotent and keeps the relative order of the surviving characters.
///
/// ```rust
/// use dbqueue::settings::sanitize_identifier;
/// assert_eq!(sanitize_identifier("orders; DROP TABLE x"), "ordersDROPTABLEx");
/// assert_eq!(sanitize_identifier("public.queue_tasks"), "public.queue_tasks");
/// ```
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect()
}

/// Name of a logical queue. Several queues may share one physical table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueId(String);

impl QueueId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for QueueId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Physical table holding queue rows, plus the optional id sequence.
///
/// `id_sequence` is only needed for engines without native auto-increment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueTable {
    table_name: String,
    id_sequence: Option<String>,
}

impl QueueTable {
    pub fn new<S: AsRef<str>>(table_name: S, id_sequence: Option<S>) -> Self {
        Self {
            table_name: sanitize_identifier(table_name.as_ref()),
            id_sequence: id_sequence.map(|seq| sanitize_identifier(seq.as_ref())),
        }
    }

    pub fn builder() -> QueueTableBuilder {
        QueueTableBuilder::default()
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn id_sequence(&self) -> Option<&str> {
        self.id_sequence.as_deref()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueTableBuilder {
    table_name: Option<String>,
    id_sequence: Option<String>,
}

impl QueueTableBuilder {
    pub fn with_table_name<S: Into<String>>(mut self, table_name: S) -> Self {
        self.table_name = Some(table_name.into());
        self
    }

    pub fn with_id_sequence<S: Into<String>>(mut self, id_sequence: Option<S>) -> Self {
        self.id_sequence = id_sequence.map(Into::into);
        self
    }

    pub fn build(self) -> Result<QueueTable> {
        let table_name = self.table_name.ok_or_else(|| Error::MissingConfig {
            field: "table_name".to_string(),
        })?;
        Ok(QueueTable::new(table_name, self.id_sequence))
    }
}

/// Identity of a logical queue: physical table plus queue id.
///
/// Equality and hashing use the table name and the queue id only, so two locations that
/// differ only in their id sequence are the same location. Built once at startup and
/// never mutated.
#[derive(Debug, Clone)]
pub struct QueueLocation {
    table: QueueTable,
    queue_id: QueueId,
}

impl QueueLocation {
    pub fn builder() -> QueueLocationBuilder {
        QueueLocationBuilder {
            table: QueueTable::builder(),
            queue_id: None,
        }
    }

    /// Start from a pre-populated table builder, e.g. one shared by several queues.
    pub fn builder_from(table: QueueTableBuilder) -> QueueLocationBuilder {
        QueueLocationBuilder {
            table,
            queue_id: None,
        }
    }

    pub fn table(&self) -> &QueueTable {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        self.table.table_name()
    }

    pub fn id_sequence(&self) -> Option<&str> {
        self.table.id_sequence()
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }
}

impl PartialEq for QueueLocation {
    fn eq(&self, other: &Self) -> bool {
        self.table.table_name == other.table.table_name && self.queue_id == other.queue_id
    }
}

impl Eq for QueueLocation {}

impl Hash for QueueLocation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.table_name.hash(state);
        self.queue_id.hash(state);
    }
}

impl fmt::Display for QueueLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{id={},table={}", self.queue_id, self.table_name())?;
        if let Some(seq) = self.id_sequence() {
            write!(f, ",idSequence={}", seq)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Clone)]
pub struct QueueLocationBuilder {
    table: QueueTableBuilder,
    queue_id: Option<QueueId>,
}

impl QueueLocationBuilder {
    pub fn with_table_name<S: Into<String>>(mut self, table_name: S) -> Self {
        self.table = self.table.with_table_name(table_name);
        self
    }

    pub fn with_queue_id<Q: Into<QueueId>>(mut self, queue_id: Q) -> Self {
        self.queue_id = Some(queue_id.into());
        self
    }

    pub fn with_id_sequence<S: Into<String>>(mut self, id_sequence: Option<S>) -> Self {
        self.table = self.table.with_id_sequence(id_sequence);
        self
    }

    /// Fails when the queue id or the table name was never set.
    pub fn build(self) -> Result<QueueLocation> {
        let queue_id = self.queue_id.ok_or_else(|| Error::MissingConfig {
            field: "queue_id".to_string(),
        })?;
        Ok(QueueLocation {
            table: self.table.build()?,
            queue_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(location: &QueueLocation) -> u64 {
        let mut hasher = DefaultHasher::new();
        location.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_sanitize_strips_disallowed_characters() {
        assert_eq!(sanitize_identifier("orders; DROP TABLE x"), "ordersDROPTABLEx");
        assert_eq!(sanitize_identifier("queue-tasks\"--"), "queuetasks");
        assert_eq!(sanitize_identifier("схема.tasks_1"), ".tasks_1");
        assert_eq!(sanitize_identifier(""), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "orders; DROP TABLE x",
            "public.tasks",
            "a b\tc\nd",
            "'quoted'",
            "seq$1",
        ];
        for input in inputs {
            let once = sanitize_identifier(input);
            assert_eq!(sanitize_identifier(&once), once, "input: {input}");
        }
    }

    #[test]
    fn test_queue_table_sanitizes_both_names() {
        let table = QueueTable::new("tasks;--", Some("tasks_seq'"));
        assert_eq!(table.table_name(), "tasks");
        assert_eq!(table.id_sequence(), Some("tasks_seq"));

        let table = QueueTable::new("tasks", None);
        assert_eq!(table.id_sequence(), None);
    }

    #[test]
    fn test_location_equality_ignores_sequence() {
        let first = QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("emails")
            .with_id_sequence(Some("seq_a"))
            .build()
            .unwrap();
        let second = QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("emails")
            .with_id_sequence(Some("seq_b"))
            .build()
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));

        let mut set = HashSet::new();
        set.insert(first);
        assert!(set.contains(&second));
    }

    #[test]
    fn test_location_inequality() {
        let base = QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("emails")
            .build()
            .unwrap();
        let other_queue = QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("sms")
            .build()
            .unwrap();
        let other_table = QueueLocation::builder()
            .with_table_name("tasks_v2")
            .with_queue_id("emails")
            .build()
            .unwrap();

        assert_ne!(base, other_queue);
        assert_ne!(base, other_table);
    }

    #[test]
    fn test_build_requires_queue_id() {
        let result = QueueLocation::builder().with_table_name("tasks").build();
        match result {
            Err(Error::MissingConfig { field }) => assert_eq!(field, "queue_id"),
            other => panic!("Expected MissingConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_build_requires_table_name() {
        let result = QueueLocation::builder().with_queue_id("emails").build();
        assert!(matches!(result, Err(Error::MissingConfig { field }) if field == "table_name"));
    }

    #[test]
    fn test_builder_from_shared_table_settings() {
        let shared = QueueTable::builder()
            .with_table_name("shared_tasks")
            .with_id_sequence(Some("shared_seq"));
        let location = QueueLocation::builder_from(shared)
            .with_queue_id("reports")
            .build()
            .unwrap();
        assert_eq!(location.table_name(), "shared_tasks");
        assert_eq!(location.id_sequence(), Some("shared_seq"));
    }

    #[test]
    fn test_display_format() {
        let location = QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("emails")
            .with_id_sequence(Some("tasks_seq"))
            .build()
            .unwrap();
        assert_eq!(location.to_string(), "{id=emails,table=tasks,idSequence=tasks_seq}");

        let location = QueueLocation::builder()
            .with_table_name("tasks")
            .with_queue_id("emails")
            .build()
            .unwrap();
        assert_eq!(location.to_string(), "{id=emails,table=tasks}");
    }
}
