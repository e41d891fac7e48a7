#![forbid(unsafe_code)]

//! Tabular client connections.
//!
//! A [`Connection`] submits formatted commands and hands back a
//! [`RowReader`] over positional field vectors. Only one reader may be open
//! on a connection at a time, and draining a reader closes the connection.

pub mod beeline;
pub mod config;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::query::ast::NamedValue;
use crate::query::formatter::QueryCommand;
use crate::query::value::Value;
use crate::types::{HiveError, Result};

pub use beeline::{BeelineConnection, DelimitedReader};
pub use config::{AuthMode, ConnectionConfig};

/// Errors raised while configuring or opening a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Configuration is unusable.
    #[error("malformed connection configuration: {0}")]
    Malformed(String),
    /// The endpoint could not be reached.
    #[error("cannot open {endpoint}: {message}")]
    Open {
        /// `host:port/database` of the target.
        endpoint: String,
        /// Failure description.
        message: String,
    },
    /// A reader is still open on the connection.
    #[error("a reader is already open on this connection")]
    ReaderBusy,
    /// The connection was used while closed.
    #[error("connection is not open")]
    NotOpen,
    /// The client process could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Executable that failed to start.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Reads the rows of one executed command.
pub trait RowReader: Send {
    /// Output column names reported by the engine.
    fn columns(&self) -> &[String];
    /// Next positional field vector, or `None` once drained.
    fn next_row(&mut self) -> Result<Option<Vec<Value>>>;
}

/// Physical connection to the query engine.
pub trait Connection: Send {
    /// Human-readable target, used in logs and errors.
    fn endpoint(&self) -> String;
    /// True while the connection is open.
    fn is_open(&self) -> bool;
    /// Opens the connection; a no-op when already open.
    fn open(&mut self) -> Result<()>;
    /// Closes the connection; a no-op when already closed.
    fn close(&mut self) -> Result<()>;
    /// Submits `command` with its parameter values.
    fn execute(
        &mut self,
        command: &QueryCommand,
        values: &[NamedValue],
    ) -> Result<Box<dyn RowReader>>;
}

/// Scripted result of one [`MemoryConnection`] execution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MemoryResult {
    /// Column names.
    pub columns: Vec<String>,
    /// Rows in order.
    pub rows: Vec<Vec<Value>>,
}

impl MemoryResult {
    /// Creates a result with the given columns and rows.
    pub fn new<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }
}

type Responder = Arc<dyn Fn(&QueryCommand, &[NamedValue]) -> Result<MemoryResult> + Send + Sync>;

#[derive(Default)]
struct MemoryState {
    open: bool,
    opens: usize,
    closes: usize,
    reader_open: bool,
    refuse_open: Option<String>,
    statements: Vec<String>,
    bindings: Vec<Vec<NamedValue>>,
    scripted: VecDeque<Result<MemoryResult>>,
    responder: Option<Responder>,
}

/// In-process connection answering from scripted results.
///
/// Clones share state, so a test can keep a handle while a provider owns
/// the connection.
#[derive(Clone, Default)]
pub struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    /// Creates a closed connection with no scripted results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a result for the next execution.
    pub fn push_result(&self, result: MemoryResult) {
        self.state.lock().scripted.push_back(Ok(result));
    }

    /// Queues an engine rejection for the next execution.
    pub fn push_failure(&self, status: i32, message: impl Into<String>) {
        self.state
            .lock()
            .scripted
            .push_back(Err(HiveError::execution(status, message)));
    }

    /// Answers executions that find no scripted result.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&QueryCommand, &[NamedValue]) -> Result<MemoryResult> + Send + Sync + 'static,
    {
        self.state.lock().responder = Some(Arc::new(responder));
    }

    /// Makes every later `open` fail with `message`.
    pub fn refuse_open(&self, message: impl Into<String>) {
        self.state.lock().refuse_open = Some(message.into());
    }

    /// Texts of every executed command, in order.
    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Parameter values passed with every executed command.
    pub fn bindings(&self) -> Vec<Vec<NamedValue>> {
        self.state.lock().bindings.clone()
    }

    /// Number of successful opens.
    pub fn opens(&self) -> usize {
        self.state.lock().opens
    }

    /// Number of closes.
    pub fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// True while a reader is open.
    pub fn reader_open(&self) -> bool {
        self.state.lock().reader_open
    }
}

impl Connection for MemoryConnection {
    fn endpoint(&self) -> String {
        "memory".to_owned()
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn open(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            return Ok(());
        }
        if let Some(message) = &state.refuse_open {
            return Err(ConnectionError::Open {
                endpoint: "memory".to_owned(),
                message: message.clone(),
            }
            .into());
        }
        state.open = true;
        state.opens += 1;
        trace!(opens = state.opens, "connection.memory.open");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.closes += 1;
            trace!(closes = state.closes, "connection.memory.close");
        }
        Ok(())
    }

    fn execute(
        &mut self,
        command: &QueryCommand,
        values: &[NamedValue],
    ) -> Result<Box<dyn RowReader>> {
        let responder = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(ConnectionError::NotOpen.into());
            }
            if state.reader_open {
                return Err(ConnectionError::ReaderBusy.into());
            }
            state.statements.push(command.text().to_owned());
            state.bindings.push(values.to_vec());
            match state.scripted.pop_front() {
                Some(scripted) => Err(scripted),
                None => Ok(state.responder.clone()),
            }
        };
        let result = match responder {
            Err(scripted) => scripted?,
            Ok(Some(responder)) => responder(command, values)?,
            Ok(None) => MemoryResult::default(),
        };
        debug!(
            rows = result.rows.len(),
            columns = result.columns.len(),
            "connection.memory.execute"
        );
        self.state.lock().reader_open = true;
        Ok(Box::new(MemoryReader {
            state: Arc::clone(&self.state),
            columns: result.columns,
            rows: result.rows.into_iter(),
            finished: false,
        }))
    }
}

struct MemoryReader {
    state: Arc<Mutex<MemoryState>>,
    columns: Vec<String>,
    rows: std::vec::IntoIter<Vec<Value>>,
    finished: bool,
}

impl MemoryReader {
    fn finish(&mut self, drained: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let mut state = self.state.lock();
        state.reader_open = false;
        if drained && state.open {
            state.open = false;
            state.closes += 1;
        }
    }
}

impl RowReader for MemoryReader {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if self.finished {
            return Ok(None);
        }
        match self.rows.next() {
            Some(row) => Ok(Some(row)),
            None => {
                self.finish(true);
                Ok(None)
            }
        }
    }
}

impl Drop for MemoryReader {
    fn drop(&mut self) {
        self.finish(false);
    }
}
