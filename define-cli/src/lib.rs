//! # Define CLI
//!
//! Load-phase tooling for the define runtime.
//!
//! ## Usage
//!
//! ```bash
//! define check defines.json
//! DEFINE_IDENTITY_TABLE=defines.json define check
//! define demo --manual
//! ```
//!
//! ## Architecture
//!
//! - `CliArgs` - Command-line arguments parsed with clap
//! - `TableReport` - Diagnostics for a serialized identity table
//! - `demo` - Scripted session printing both commit encodings

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]

pub mod demo;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use define_core::{IdentityTable, RegistryConfig};

/// Command-line arguments for `define`.
#[derive(Debug, Clone, Parser)]
#[command(name = "define")]
#[command(about = "Identity table checks and demo sessions for shared definitions")]
#[command(version)]
pub struct CliArgs {
    /// Allow re-registration under an existing name
    #[arg(
        long,
        global = true,
        env = "DEFINE_HOT_RELOAD",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub hot_reload: bool,

    /// What to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Validate a serialized identity table
    Check {
        /// Path to the `name -> id` JSON table
        #[arg(env = "DEFINE_IDENTITY_TABLE")]
        table: PathBuf,
    },
    /// Run a scripted session and print every commit
    Demo {
        /// Identity table to load instead of the built-in one
        #[arg(long, env = "DEFINE_IDENTITY_TABLE")]
        table: Option<PathBuf>,

        /// Flush with the manual scheduler instead of tokio
        #[arg(long)]
        manual: bool,
    },
}

impl CliArgs {
    /// Registry configuration implied by the flags.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::default().with_hot_reload(self.hot_reload)
    }
}

/// Read and parse an identity table file.
///
/// # Errors
///
/// Fails when the file cannot be read or is not a flat `name -> id` object.
pub fn load_table(path: &Path) -> anyhow::Result<IdentityTable> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read identity table {}", path.display()))?;
    let table = IdentityTable::from_json(&json)
        .with_context(|| format!("{} is not a name -> id table", path.display()))?;
    tracing::debug!(path = %path.display(), entries = table.len(), "loaded identity table");
    Ok(table)
}

/// Diagnostics for one identity table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    /// Number of names in the table.
    pub entries: usize,
    /// Highest id, if any.
    pub max_id: Option<u64>,
    /// Ids claimed by more than one name.
    pub shared: Vec<(u64, Vec<String>)>,
    /// Names that are not dotted identifiers.
    pub malformed: Vec<String>,
}

impl TableReport {
    /// Inspect `table`.
    #[must_use]
    pub fn from_table(table: &IdentityTable) -> Self {
        Self {
            entries: table.len(),
            max_id: table.max_id(),
            shared: table
                .shared_ids()
                .into_iter()
                .map(|(id, names)| (id, names.into_iter().map(str::to_string).collect()))
                .collect(),
            malformed: table
                .iter()
                .filter(|(name, _)| !is_dotted_name(name))
                .map(|(name, _)| name.to_string())
                .collect(),
        }
    }

    /// Whether no problems were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.shared.is_empty() && self.malformed.is_empty()
    }
}

impl fmt::Display for TableReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "entries: {}", self.entries)?;
        match self.max_id {
            Some(max) => writeln!(f, "highest id: {max}")?,
            None => writeln!(f, "highest id: none")?,
        }
        for (id, names) in &self.shared {
            writeln!(f, "id {id} shared by {}", names.join(", "))?;
        }
        for name in &self.malformed {
            writeln!(f, "{name:?}: not a dotted identifier")?;
        }
        Ok(())
    }
}

/// Whether `name` looks like `segment(.segment)*` with identifier segments.
#[must_use]
pub fn is_dotted_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
                && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_check_with_positional_table() {
        let args = CliArgs::try_parse_from(["define", "check", "defines.json"]).expect("parse");
        match args.command {
            Command::Check { table } => assert_eq!(table, PathBuf::from("defines.json")),
            Command::Demo { .. } => panic!("expected check"),
        }
        assert!(!args.hot_reload);
    }

    #[test]
    fn test_parse_demo_flags() {
        let args = CliArgs::try_parse_from(["define", "demo", "--manual", "--hot-reload"])
            .expect("parse");
        assert!(args.hot_reload);
        assert!(args.registry_config().hot_reload);
        match args.command {
            Command::Demo { table, manual } => {
                assert!(manual);
                assert!(table.is_none());
            }
            Command::Check { .. } => panic!("expected demo"),
        }
    }

    #[test]
    fn test_dotted_names() {
        assert!(is_dotted_name("app.geo.Point"));
        assert!(is_dotted_name("app.geo.Point.origin"));
        assert!(is_dotted_name("_private.$x"));
        assert!(!is_dotted_name(""));
        assert!(!is_dotted_name("app..Point"));
        assert!(!is_dotted_name("app.1st"));
        assert!(!is_dotted_name("app.geo-point"));
    }

    #[test]
    fn test_report_flags_problems() {
        let table: IdentityTable = [("app.A", 1), ("app.B", 1), ("bad name", 3)]
            .into_iter()
            .collect();
        let report = TableReport::from_table(&table);
        assert_eq!(report.entries, 3);
        assert_eq!(report.max_id, Some(3));
        assert_eq!(
            report.shared,
            vec![(1, vec!["app.A".to_string(), "app.B".to_string()])]
        );
        assert_eq!(report.malformed, vec!["bad name".to_string()]);
        assert!(!report.is_clean());

        let text = report.to_string();
        assert!(text.contains("id 1 shared by app.A, app.B"));
        assert!(text.contains("\"bad name\": not a dotted identifier"));
    }

    #[test]
    fn test_report_on_empty_table() {
        let report = TableReport::from_table(&IdentityTable::new());
        assert!(report.is_clean());
        assert_eq!(report.max_id, None);
        assert!(report.to_string().contains("highest id: none"));
    }
}
