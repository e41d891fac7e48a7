//! Streaming map/reduce through Hive `MAP ... USING` scripts.
//!
//! The generated command ships a driver executable and the target program
//! as file resources, then maps every `(key, value)` row of the input table
//! through the driver, which re-enters the named method of the target.

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use tracing::debug;

use crate::query::formatter::{check_table_name, is_identifier, QueryCommand};
use crate::query::errors::TranslationError;
use crate::types::{HiveError, Result};

/// Template of one `MAP ... USING` invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformScript {
    driver: String,
    target: String,
    type_name: String,
    method: String,
    reducer: String,
    input_table: String,
    key_column: String,
    value_column: String,
}

impl TransformScript {
    /// Describes a map of `type_name::method` in `target`, launched through
    /// `driver`, over `input_table`.
    pub fn new(
        driver: impl AsRef<str>,
        target: impl AsRef<str>,
        type_name: impl Into<String>,
        method: impl Into<String>,
        input_table: impl Into<String>,
    ) -> Self {
        Self {
            driver: normalize(driver.as_ref()),
            target: normalize(target.as_ref()),
            type_name: type_name.into(),
            method: method.into(),
            reducer: "cat".to_owned(),
            input_table: input_table.into(),
            key_column: "k".to_owned(),
            value_column: "v".to_owned(),
        }
    }

    /// Sets the reduce command.
    pub fn reducer(mut self, command: impl Into<String>) -> Self {
        self.reducer = command.into();
        self
    }

    /// Sets the input key and value columns.
    pub fn columns(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.key_column = key.into();
        self.value_column = value.into();
        self
    }

    /// Paths shipped with `add file`.
    pub fn file_resources(&self) -> Vec<&str> {
        vec![self.driver.as_str(), self.target.as_str()]
    }

    /// Base64 form of the method name as passed to the driver.
    pub fn encoded_method(&self) -> String {
        BASE64_ENGINE.encode(self.method.as_bytes())
    }

    /// Renders the Hive command.
    pub fn to_command(&self) -> Result<QueryCommand> {
        check_table_name(&self.input_table)?;
        for column in [&self.key_column, &self.value_column] {
            if !is_identifier(column) {
                return Err(TranslationError::unsupported(
                    "transform",
                    format!("'{column}' is not a plain column name"),
                )
                .into());
            }
        }
        for text in [&self.type_name, &self.reducer] {
            if text.contains('\'') {
                return Err(TranslationError::unsupported(
                    "transform",
                    format!("'{text}' cannot be quoted in a USING clause"),
                )
                .into());
            }
        }
        let text = format!(
            "add file {driver}; add file {target}; FROM ( FROM {input} MAP {k}, {v} \
             USING '{driver_file} {target_file} {type_name} {method}' AS k, v CLUSTER BY k) \
             map_output REDUCE k, v USING '{reducer}'",
            driver = self.driver,
            target = self.target,
            input = self.input_table,
            k = self.key_column,
            v = self.value_column,
            driver_file = file_name(&self.driver),
            target_file = file_name(&self.target),
            type_name = self.type_name,
            method = self.encoded_method(),
            reducer = self.reducer,
        );
        debug!(input = %self.input_table, len = text.len(), "query.transform.rendered");
        Ok(QueryCommand::statement(text))
    }
}

/// Recovers the method name passed to the driver.
pub fn decode_method(encoded: &str) -> Result<String> {
    let bytes = BASE64_ENGINE
        .decode(encoded.trim())
        .map_err(|_| HiveError::Invalid("method name is not valid base64"))?;
    String::from_utf8(bytes).map_err(|_| HiveError::Invalid("method name is not valid UTF-8"))
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
