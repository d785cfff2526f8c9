//! Response filtering with a jq-style expression.
//!
//! # Overview
//! `Filter::compile` parses an expression once; `Filter::apply` decodes a
//! JSON document, runs the expression and writes one line per result:
//! strings unquoted, everything else as compact JSON. Results are written
//! as they are produced, so output from before a mid-stream error stays
//! written.
//!
//! # Supported language
//! `.`, `.a`, `."a"`, `.[i]` (negative from the end), `.[a:b]`, `.[]`, `?`,
//! `|`, `,`, `//`, `and`, `or`, `== != < <= > >=`, literals, string
//! interpolation `"\(f)"`, `( )`, `[ ]`, `{a: f, b}`, and the builtins
//! `length keys type not empty add select map to_entries from_entries
//! with_entries sort sort_by has join tostring test`. Function arguments
//! are separated by `;`, as in `test("^prod"; "i")`.

mod eval;
mod lexer;
mod parser;

use std::io::Write;

use serde_json::Value;
use thiserror::Error;

use crate::error::ApiError;
use parser::Expr;

/// Failure inside the filter engine.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("syntax error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    #[error("input is not valid JSON")]
    Decode(#[source] serde_json::Error),

    #[error("{0}")]
    Eval(String),
}

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub struct Filter {
    expression: String,
    program: Expr,
}

impl Filter {
    pub fn compile(expression: &str) -> Result<Self, ApiError> {
        let program = parser::parse(expression).map_err(|source| ApiError::Filter {
            expression: expression.to_string(),
            source,
        })?;
        Ok(Self {
            expression: expression.to_string(),
            program,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Results of running the filter over an already decoded value.
    pub fn run(&self, input: Value) -> impl Iterator<Item = Result<Value, FilterError>> + '_ {
        self.program.run(input)
    }

    /// Decode `json`, run the filter, and write each result as a line to
    /// `out`. Returns the number of lines written.
    pub fn apply(&self, json: &[u8], out: &mut dyn Write) -> Result<usize, ApiError> {
        let input: Value = serde_json::from_slice(json).map_err(|e| self.error(FilterError::Decode(e)))?;

        let mut lines = 0;
        for result in self.run(input) {
            let value = result.map_err(|e| self.error(e))?;
            write_line(out, &value).map_err(ApiError::Output)?;
            lines += 1;
        }
        Ok(lines)
    }

    fn error(&self, source: FilterError) -> ApiError {
        ApiError::Filter {
            expression: self.expression.clone(),
            source,
        }
    }
}

/// Compile `expression` and apply it to `json` in one step.
pub fn filter(json: &[u8], expression: &str, out: &mut dyn Write) -> Result<usize, ApiError> {
    Filter::compile(expression)?.apply(json, out)
}

fn write_line(out: &mut dyn Write, value: &Value) -> std::io::Result<()> {
    match value {
        Value::String(s) => out.write_all(s.as_bytes())?,
        other => serde_json::to_writer(&mut *out, other)?,
    }
    out.write_all(b"\n")
}
