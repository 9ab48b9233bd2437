//! Colored table output for compression results.

use crate::bridge::CompressionResult;
use crate::output::TableOptions;
use crate::output::components::{format_bytes, format_rate};
use crate::theme::{Semantic, ThemedCell};
use comfy_table::{
    Cell, ContentArrangement, Table,
    presets::{ASCII_FULL, UTF8_FULL},
};

pub fn build_table(results: &[CompressionResult], options: TableOptions) -> Table {
    let mut table = Table::new();
    if options.ascii {
        table.load_preset(ASCII_FULL);
    } else {
        table.load_preset(UTF8_FULL);
    }
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Status", "Size", "Saved", "Time", "Output / Error"]);

    for result in results {
        let row = if result.is_success() {
            let rate = if result.compress_rate > 0.0 {
                Semantic::Saved
            } else {
                Semantic::NotSaved
            };
            vec![
                Cell::new(&result.input_path).themed(Semantic::Path),
                Cell::new("ok").themed(Semantic::Success),
                Cell::new(format_bytes(result.compressed_bytes_size)).themed(Semantic::Size),
                Cell::new(format_rate(result.compress_rate)).themed(rate),
                Cell::new(format!("{} ms", result.cost_time)).themed(Semantic::Muted),
                Cell::new(&result.output_path),
            ]
        } else {
            vec![
                Cell::new(&result.input_path).themed(Semantic::Path),
                Cell::new("failed").themed(Semantic::Failed),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new(result.error_message.as_deref().unwrap_or("-")).themed(Semantic::Failed),
            ]
        };
        table.add_row(row);
    }
    table
}

/// Print results as a table.
pub fn print_table(results: &[CompressionResult], options: TableOptions) {
    if results.is_empty() {
        println!("No images found.");
        return;
    }
    println!("{}", build_table(results, options));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecOutput;
    use crate::error::PoolError;

    fn results() -> Vec<CompressionResult> {
        vec![
            CompressionResult::success(CodecOutput {
                input_path: "/img/a.png".to_string(),
                input_size: 2048,
                output_path: "/img/a_compressed.png".to_string(),
                output_size: 1024,
                output_disk_size: 4096,
                compress_rate: 50.0,
                available_compress_rate: true,
                original_temp_path: String::new(),
                hash: "00".to_string(),
                cost_time: 7,
            }),
            CompressionResult::failed("/img/b.bmp", &PoolError::UnsupportedCodec("bmp".into())),
        ]
    }

    #[test]
    fn test_table_rows() {
        let rendered = build_table(&results(), TableOptions { ascii: true }).to_string();
        assert!(rendered.contains("/img/a.png"));
        assert!(rendered.contains("50.00%"));
        assert!(rendered.contains("1.0 KiB"));
        assert!(rendered.contains("Unsupported codec: bmp"));
    }

    #[test]
    fn test_print_table_empty() {
        print_table(&[], TableOptions::default());
    }
}
