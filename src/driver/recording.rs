//! In-memory recording binding.
//!
//! [`RecordingDriver`] implements the capability traits without a database: every
//! statement is logged with its parameters, and results come from a script of
//! [`ScriptedResponse`]s consumed in order. It backs the unit tests of the DAOs for
//! engines that have no sqlx driver.

use super::{QueryOperations, TransactionOperations, TransactionScope};
use crate::error::{Error, Result};
use crate::types::{NamedParams, OutParam, ScalarKind, SqlRow, SqlValue};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Scalar,
    Update,
    Rows,
    Call,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub kind: StatementKind,
    pub sql: String,
    pub params: NamedParams,
}

/// Result handed back for the next statement.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Scalar(Option<SqlValue>),
    Updated(u64),
    Rows(Vec<SqlRow>),
    Call(SqlRow),
    /// Fail the statement with [`Error::Internal`].
    Fail(String),
}

#[derive(Debug, Default)]
struct RecordingState {
    statements: Vec<RecordedStatement>,
    script: VecDeque<ScriptedResponse>,
    commits: usize,
    rollbacks: usize,
    commit_failure: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RecordingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a response for the next unanswered statement.
    pub fn respond(&self, response: ScriptedResponse) -> &Self {
        self.state().script.push_back(response);
        self
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state().statements.clone()
    }

    pub fn last_statement(&self) -> Option<RecordedStatement> {
        self.state().statements.last().cloned()
    }

    /// Make the next commit fail with [`Error::Internal`].
    pub fn fail_next_commit<S: Into<String>>(&self, message: S) -> &Self {
        self.state().commit_failure = Some(message.into());
        self
    }

    pub fn commits(&self) -> usize {
        self.state().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state().rollbacks
    }

    /// Record a statement and take its scripted response. Unscripted statements get an
    /// empty result of the matching kind.
    fn record(&self, kind: StatementKind, sql: &str, params: &NamedParams) -> Result<ScriptedResponse> {
        tracing::trace!(?kind, sql, "recording statement");
        let mut state = self.state();
        state.statements.push(RecordedStatement {
            kind,
            sql: sql.to_string(),
            params: params.clone(),
        });
        let response = state.script.pop_front().unwrap_or(match kind {
            StatementKind::Scalar => ScriptedResponse::Scalar(None),
            StatementKind::Update => ScriptedResponse::Updated(0),
            StatementKind::Rows => ScriptedResponse::Rows(Vec::new()),
            StatementKind::Call => ScriptedResponse::Call(SqlRow::new()),
        });
        match response {
            ScriptedResponse::Fail(message) => Err(Error::Internal { message }),
            other => Ok(other),
        }
    }
}

fn mismatch(kind: StatementKind, response: &ScriptedResponse) -> Error {
    Error::Internal {
        message: format!("scripted response {:?} does not answer a {:?} statement", response, kind),
    }
}

#[async_trait]
impl QueryOperations for RecordingDriver {
    async fn query_scalar(&mut self, sql: &str, kind: ScalarKind) -> Result<Option<SqlValue>> {
        self.query_scalar_with(sql, &NamedParams::new(), kind).await
    }

    async fn query_scalar_with(
        &mut self,
        sql: &str,
        params: &NamedParams,
        _kind: ScalarKind,
    ) -> Result<Option<SqlValue>> {
        match self.record(StatementKind::Scalar, sql, params)? {
            ScriptedResponse::Scalar(value) => Ok(value),
            other => Err(mismatch(StatementKind::Scalar, &other)),
        }
    }

    async fn update(&mut self, sql: &str, params: &NamedParams) -> Result<u64> {
        match self.record(StatementKind::Update, sql, params)? {
            ScriptedResponse::Updated(count) => Ok(count),
            other => Err(mismatch(StatementKind::Update, &other)),
        }
    }

    async fn query_rows(&mut self, sql: &str, params: &NamedParams) -> Result<Vec<SqlRow>> {
        match self.record(StatementKind::Rows, sql, params)? {
            ScriptedResponse::Rows(rows) => Ok(rows),
            other => Err(mismatch(StatementKind::Rows, &other)),
        }
    }

    async fn call(
        &mut self,
        sql: &str,
        params: &NamedParams,
        _outputs: &[OutParam],
    ) -> Result<SqlRow> {
        match self.record(StatementKind::Call, sql, params)? {
            ScriptedResponse::Call(row) => Ok(row),
            other => Err(mismatch(StatementKind::Call, &other)),
        }
    }
}

struct RecordingScope {
    driver: RecordingDriver,
}

#[async_trait]
impl TransactionScope for RecordingScope {
    fn operations(&mut self) -> &mut dyn QueryOperations {
        &mut self.driver
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.driver.state();
        if let Some(message) = state.commit_failure.take() {
            return Err(Error::Internal { message });
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.driver.state().rollbacks += 1;
        Ok(())
    }
}

#[async_trait]
impl TransactionOperations for RecordingDriver {
    async fn begin(&self) -> Result<Box<dyn TransactionScope>> {
        Ok(Box::new(RecordingScope {
            driver: self.clone(),
        }))
    }

    fn driver_name(&self) -> &'static str {
        "recording"
    }
}
