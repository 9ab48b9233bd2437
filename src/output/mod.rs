//! Output formatting for compression results.

pub mod components;
pub mod json;
pub mod table;

use crate::bridge::CompressionResult;

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored table output (default).
    #[default]
    Table,
    /// One JSON array with every result.
    Json,
}

/// Table display options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableOptions {
    /// Use ASCII borders instead of Unicode.
    pub ascii: bool,
}

/// Print a batch of results in the chosen format.
pub fn print_results(results: &[CompressionResult], format: OutputFormat, options: TableOptions) {
    match format {
        OutputFormat::Table => {
            table::print_table(results, options);
            components::print_summary(results);
        }
        OutputFormat::Json => json::print_json(results),
    }
}
