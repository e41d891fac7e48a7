//! Process-backed connection driving the `beeline` client.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use csv::{ReaderBuilder, StringRecord};
use tracing::{debug, info, warn};

use crate::connection::{AuthMode, Connection, ConnectionConfig, ConnectionError, RowReader};
use crate::query::ast::NamedValue;
use crate::query::formatter::QueryCommand;
use crate::query::value::Value;
use crate::types::{HiveError, Result};

/// Parses the engine's tab-separated output: a header row of column names
/// followed by one positional field vector per row.
pub struct DelimitedReader<R: Read> {
    reader: csv::Reader<R>,
    columns: Vec<String>,
    null_token: String,
    record: StringRecord,
}

impl DelimitedReader<Cursor<Vec<u8>>> {
    /// Reads from captured output.
    pub fn from_bytes(bytes: Vec<u8>, null_token: impl Into<String>) -> Result<Self> {
        Self::new(Cursor::new(bytes), null_token)
    }
}

impl<R: Read> DelimitedReader<R> {
    /// Reads the header from `input`.
    pub fn new(input: R, null_token: impl Into<String>) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(input);
        let columns = reader
            .headers()
            .map_err(malformed)?
            .iter()
            .map(|name| {
                // `alias.column` headers keep only the column part.
                name.rsplit_once('.')
                    .map_or(name, |(_, column)| column)
                    .to_owned()
            })
            .collect();
        Ok(Self {
            reader,
            columns,
            null_token: null_token.into(),
            record: StringRecord::new(),
        })
    }

    fn field(&self, raw: &str) -> Value {
        if raw.is_empty() || raw == self.null_token {
            Value::Null
        } else {
            Value::String(raw.to_owned())
        }
    }
}

fn malformed(err: csv::Error) -> HiveError {
    HiveError::execution(-1, format!("malformed result stream: {err}"))
}

impl<R: Read + Send> RowReader for DelimitedReader<R> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        let mut record = std::mem::take(&mut self.record);
        let more = self.reader.read_record(&mut record).map_err(malformed)?;
        let row = more.then(|| record.iter().map(|raw| self.field(raw)).collect());
        self.record = record;
        Ok(row)
    }
}

/// [`Connection`] that runs every command through a `beeline` process.
///
/// Each execution is a separate process, so opening only validates the
/// configuration and resolves the client executable.
pub struct BeelineConnection {
    config: ConnectionConfig,
    program: Option<PathBuf>,
}

impl BeelineConnection {
    /// Creates a closed connection.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            program: None,
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Client arguments for `command`, excluding the executable.
    pub fn arguments(&self, command: &QueryCommand, values: &[NamedValue]) -> Result<Vec<String>> {
        let mut args = vec!["-u".to_owned(), self.config.jdbc_url()];
        if let AuthMode::Authenticated { username, password } = self.config.auth_mode() {
            args.push("-n".to_owned());
            args.push(username);
            if let Some(password) = password {
                args.push("-p".to_owned());
                args.push(password);
            }
        }
        args.extend(
            [
                "--outputformat=tsv2",
                "--showHeader=true",
                "--silent=true",
            ]
            .map(str::to_owned),
        );
        for (key, value) in &self.config.hiveconf {
            args.push("--hiveconf".to_owned());
            args.push(format!("{key}={value}"));
        }
        for param in values {
            let text = param
                .value
                .to_plain_text()
                .map_err(|_| HiveError::Invalid("parameter value has no text form"))?;
            args.push("--hivevar".to_owned());
            args.push(format!("{}={text}", param.name));
        }
        args.push("-e".to_owned());
        args.push(command.text().to_owned());
        Ok(args)
    }
}

fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

impl Connection for BeelineConnection {
    fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    fn is_open(&self) -> bool {
        self.program.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.program.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let program = resolve_program(&self.config.beeline).ok_or_else(|| ConnectionError::Open {
            endpoint: self.config.endpoint(),
            message: format!("client executable '{}' not found", self.config.beeline),
        })?;
        info!(endpoint = %self.config.endpoint(), program = %program.display(), "connection.beeline.open");
        self.program = Some(program);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.program.take().is_some() {
            debug!(endpoint = %self.config.endpoint(), "connection.beeline.close");
        }
        Ok(())
    }

    fn execute(
        &mut self,
        command: &QueryCommand,
        values: &[NamedValue],
    ) -> Result<Box<dyn RowReader>> {
        let program = self.program.clone().ok_or(ConnectionError::NotOpen)?;
        let args = self.arguments(command, values)?;
        debug!(program = %program.display(), len = command.text().len(), "connection.beeline.execute");
        let output = Command::new(&program)
            .args(&args)
            .output()
            .map_err(|source| ConnectionError::Spawn {
                program: program.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            let status = output.status.code().unwrap_or(-1);
            let message = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            warn!(status, "connection.execute.failed");
            return Err(HiveError::execution(status, message));
        }
        let reader = DelimitedReader::from_bytes(output.stdout, self.config.null_token.clone())?;
        Ok(Box::new(reader))
    }
}
