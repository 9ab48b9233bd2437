//! JSON output for compression results.

use crate::bridge::CompressionResult;

pub fn to_json(results: &[CompressionResult]) -> String {
    serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".to_string())
}

/// Print results as a JSON array.
pub fn print_json(results: &[CompressionResult]) {
    println!("{}", to_json(results));
}
