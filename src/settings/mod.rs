//! Queue identity, table layout and tuning knobs.
//!
//! ## What
//!
//! - [`QueueLocation`] names a logical queue: physical table plus [`QueueId`].
//! - [`QueueTableSchema`] maps logical columns to physical names and declares extension columns.
//! - [`ExtSettings`] / [`ExtSettingsParser`] carry free-form `additional.*` overrides.
//! - [`FailureSettings`] decides how far an unacknowledged pick is pushed back.
//!
//! ## How
//!
//! Build these once at startup, typically from [`crate::config::Config`], and hand them to
//! [`crate::DatabaseAccessLayer`].

mod ext;
mod failure;
mod location;
mod schema;

pub use ext::{ExtSettings, ExtSettingsBuilder, ExtSettingsParser, EXT_SETTINGS_PREFIX};
pub use failure::{FailRetryType, FailureSettings, FailureSettingsPolicy};
pub use location::{
    sanitize_identifier, QueueId, QueueLocation, QueueLocationBuilder, QueueTable,
    QueueTableBuilder,
};
pub use schema::{QueueTableSchema, QueueTableSchemaBuilder};
