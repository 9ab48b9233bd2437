//! Shared pieces of the human-readable output.

use crate::bridge::CompressionResult;
use crate::theme::Themed;

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// `1536` -> `1.5 KiB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_rate(rate: f64) -> String {
    format!("{:.2}%", rate)
}

/// Totals of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Summary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub output_bytes: u64,
    /// Mean rate over the successful files.
    pub average_rate: f64,
}

impl Summary {
    pub fn of(results: &[CompressionResult]) -> Self {
        let ok: Vec<&CompressionResult> = results.iter().filter(|r| r.is_success()).collect();
        let average_rate = if ok.is_empty() {
            0.0
        } else {
            ok.iter().map(|r| r.compress_rate).sum::<f64>() / ok.len() as f64
        };
        Self {
            total: results.len(),
            succeeded: ok.len(),
            failed: results.len() - ok.len(),
            output_bytes: ok.iter().map(|r| r.compressed_bytes_size).sum(),
            average_rate,
        }
    }
}

/// Print the one-line batch summary.
pub fn print_summary(results: &[CompressionResult]) {
    if results.is_empty() {
        return;
    }
    let summary = Summary::of(results);
    let failed = if summary.failed > 0 {
        format!("{} failed", summary.failed).error_style()
    } else {
        "0 failed".muted()
    };
    println!(
        "{} {} of {} files, {}, {} written, {} saved on average",
        "Compressed".success(),
        summary.succeeded.count(),
        summary.total.count(),
        failed,
        format_bytes(summary.output_bytes),
        format_rate(summary.average_rate),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(12.345), "12.35%");
        assert_eq!(format_rate(-3.0), "-3.00%");
    }

    #[test]
    fn test_summary_counts() {
        let mut ok = CompressionResult::failed("/a.png", &PoolError::Codec("x".into()));
        ok.status = crate::bridge::CompressionStatus::Success;
        ok.error_message = None;
        ok.compressed_bytes_size = 100;
        ok.compress_rate = 30.0;
        let failed = CompressionResult::failed("/b.png", &PoolError::Codec("y".into()));

        let summary = Summary::of(&[ok, failed]);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.output_bytes, 100);
        assert_eq!(summary.average_rate, 30.0);
    }

    #[test]
    fn test_summary_of_nothing() {
        assert_eq!(Summary::of(&[]), Summary::default());
    }
}
