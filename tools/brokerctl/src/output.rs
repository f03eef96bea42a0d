use std::fmt;
use std::io::{self, Write};

use serde::Serialize;

/// How results are printed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// One JSON document per invocation, for scripts.
    Json,
    /// Plain text report.
    #[default]
    Human,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Human => "human",
        })
    }
}

/// Print a result on stdout.
pub fn emit<T: Serialize + fmt::Display>(format: OutputFormat, value: &T) -> io::Result<()> {
    write_value(&mut io::stdout().lock(), format, value)
}

/// Render `value` into `out` in the requested format.
pub fn write_value<W: Write, T: Serialize + fmt::Display>(
    out: &mut W,
    format: OutputFormat,
    value: &T,
) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, value)?;
            writeln!(out)
        }
        OutputFormat::Human => writeln!(out, "{value}"),
    }
}

/// Report a failure. JSON goes to stdout so callers always get a document
/// there; human text goes to stderr.
pub fn emit_error(format: OutputFormat, exit_code: u8, message: &str) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "error": message, "exit_code": exit_code }))
        }
        OutputFormat::Human => eprintln!("error: {message}"),
    }
}
