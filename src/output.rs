//! Rendering of CLI results: statement listings and the dialect matrix.

use clap::ValueEnum;
use dbqueue::RenderedStatement;
use serde::Serialize;
use std::io::Write;
use tabled::settings::{Style, Width};
use tabled::{Table, Tabled};

/// Table output wraps long SQL to this many columns.
const TABLE_WIDTH: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One table per queue
    Table,
    /// Pretty-printed JSON array
    Json,
    /// Runnable script, one commented statement per operation
    Sql,
}

#[derive(Tabled)]
struct StatementRow<'a> {
    operation: &'a str,
    sql: &'a str,
}

/// Statements grouped by queue, in the order `render_statements` produced them.
fn by_queue(statements: &[RenderedStatement]) -> Vec<(&str, Vec<&RenderedStatement>)> {
    let mut groups: Vec<(&str, Vec<&RenderedStatement>)> = Vec::new();
    for statement in statements {
        match groups.last_mut() {
            Some((queue, group)) if *queue == statement.queue_id => group.push(statement),
            _ => groups.push((statement.queue_id.as_str(), vec![statement])),
        }
    }
    groups
}

pub fn write_statements(
    format: OutputFormat,
    statements: &[RenderedStatement],
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            for (queue, group) in by_queue(statements) {
                let rows = group.iter().map(|s| StatementRow {
                    operation: s.operation.as_str(),
                    sql: &s.sql,
                });
                let mut table = Table::new(rows);
                table
                    .with(Style::sharp())
                    .with(Width::wrap(TABLE_WIDTH));
                writeln!(out, "queue {}", queue)?;
                writeln!(out, "{}", table)?;
            }
        }
        OutputFormat::Json => write_json(statements, out)?,
        OutputFormat::Sql => {
            for statement in statements {
                writeln!(out, "-- {}: {}", statement.queue_id, statement.operation)?;
                // PL/SQL blocks already end in `END;`.
                let terminator = if statement.sql.ends_with(';') { "" } else { ";" };
                writeln!(out, "{}{}", statement.sql, terminator)?;
            }
        }
    }
    Ok(())
}

/// Small fixed listings. `Sql` has no meaning for them and renders a table.
pub fn write_rows<T: Serialize + Tabled>(
    format: OutputFormat,
    rows: &[T],
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => write_json(rows, out),
        OutputFormat::Table | OutputFormat::Sql => {
            let mut table = Table::new(rows);
            table.with(Style::sharp());
            writeln!(out, "{}", table)?;
            Ok(())
        }
    }
}

fn write_json<T: Serialize + ?Sized>(value: &T, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbqueue::settings::{QueueLocation, QueueTableSchema};
    use dbqueue::{render_statements, DatabaseDialect};

    fn statements(dialect: DatabaseDialect) -> Vec<RenderedStatement> {
        let mut all = Vec::new();
        for queue in ["mail", "sms"] {
            let location = QueueLocation::builder()
                .with_table_name("tasks")
                .with_queue_id(queue)
                .with_id_sequence(Some("tasks_seq"))
                .build()
                .unwrap();
            all.extend(render_statements(
                dialect,
                &QueueTableSchema::default(),
                &location,
            ));
        }
        all
    }

    fn render(format: OutputFormat, dialect: DatabaseDialect) -> String {
        let mut buf = Vec::new();
        write_statements(format, &statements(dialect), &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_table_output_has_one_section_per_queue() {
        let text = render(OutputFormat::Table, DatabaseDialect::StandardSql);
        assert_eq!(text.matches("queue mail\n").count(), 1);
        assert_eq!(text.matches("queue sms\n").count(), 1);
        assert!(text.contains("pick_lock"));
        assert!(!text.contains("queue_id"));
    }

    #[test]
    fn test_json_output_lists_statements() {
        let text = render(OutputFormat::Json, DatabaseDialect::StandardSql);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["operation"], "enqueue");
        assert_eq!(parsed[0]["queue_id"], "mail");
    }

    #[test]
    fn test_sql_output_terminates_every_statement_once() {
        let text = render(OutputFormat::Sql, DatabaseDialect::LegacySequence);
        assert!(text.starts_with("-- mail: next_id\nSELECT tasks_seq.nextval FROM dual;\n"));
        assert!(text.contains("-- sms: pick_lock\n"));
        assert!(text.contains("CLOSE c; END;\n"));
        assert!(!text.contains(";;"));
    }

    #[test]
    fn test_rows_fall_back_to_table_for_sql_format() {
        #[derive(Serialize, Tabled)]
        struct Row {
            name: &'static str,
        }
        let mut buf = Vec::new();
        write_rows(OutputFormat::Sql, &[Row { name: "mssql" }], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("name"));
        assert!(text.contains("mssql"));
    }
}
