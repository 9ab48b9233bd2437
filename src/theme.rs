//! Color theming for CLI output.
//!
//! One semantic palette shared by `owo_colors` text and `comfy_table` cells.
//! Colors are disabled globally by `--no-color` or the `NO_COLOR` variable.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable colors for both text and table cells.
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

/// Semantic color categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    /// File paths.
    Path,
    Success,
    Failed,
    /// Byte sizes and durations.
    Size,
    /// Compression rate above zero.
    Saved,
    /// Compression rate at or below zero.
    NotSaved,
    Muted,
}

/// Table color for a category; `None` leaves the cell unstyled.
pub fn table_color(semantic: Semantic) -> Option<comfy_table::Color> {
    if !colors_enabled() {
        return None;
    }
    Some(match semantic {
        Semantic::Path => comfy_table::Color::Cyan,
        Semantic::Success => comfy_table::Color::Green,
        Semantic::Failed => comfy_table::Color::Red,
        Semantic::Size => comfy_table::Color::Reset,
        Semantic::Saved => comfy_table::Color::Green,
        Semantic::NotSaved => comfy_table::Color::Yellow,
        Semantic::Muted => comfy_table::Color::DarkGrey,
    })
}

pub trait ThemedCell {
    fn themed(self, semantic: Semantic) -> Self;
}

impl ThemedCell for comfy_table::Cell {
    fn themed(self, semantic: Semantic) -> Self {
        match table_color(semantic) {
            Some(color) => self.fg(color),
            None => self,
        }
    }
}

fn paint(value: &dyn Display, style: owo_colors::Style) -> String {
    if colors_enabled() {
        style.style(value).to_string()
    } else {
        value.to_string()
    }
}

/// Semantic styles for terminal text. Plain text when colors are off.
pub trait Themed: Display + Sized {
    fn path(&self) -> String {
        paint(self, owo_colors::Style::new().cyan())
    }

    fn success(&self) -> String {
        paint(self, owo_colors::Style::new().green().bold())
    }

    fn error_style(&self) -> String {
        paint(self, owo_colors::Style::new().red().bold())
    }

    fn warning(&self) -> String {
        paint(self, owo_colors::Style::new().yellow())
    }

    fn section_header(&self) -> String {
        paint(self, owo_colors::Style::new().bold().underline())
    }

    fn section_header_error(&self) -> String {
        paint(self, owo_colors::Style::new().red().bold().underline())
    }

    fn count(&self) -> String {
        paint(self, owo_colors::Style::new().cyan())
    }

    fn muted(&self) -> String {
        paint(self, owo_colors::Style::new().dimmed())
    }
}

impl Themed for String {}
impl Themed for &str {}
impl Themed for usize {}
impl Themed for u64 {}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_colors() {
        COLORS_ENABLED.store(true, Ordering::Relaxed);
        owo_colors::set_override(true);
    }

    #[test]
    #[serial(colors)]
    fn test_disable_colors() {
        reset_colors();
        assert!(colors_enabled());
        disable_colors();
        assert!(!colors_enabled());
        reset_colors();
    }

    #[test]
    #[serial(colors)]
    fn test_themed_text_with_colors() {
        reset_colors();
        let colored = "a.png".path();
        assert!(colored.contains("\x1b["));
        assert!(colored.contains("a.png"));
    }

    #[test]
    #[serial(colors)]
    fn test_themed_text_without_colors() {
        reset_colors();
        disable_colors();
        assert_eq!("x".path(), "x");
        assert_eq!("x".success(), "x");
        assert_eq!("x".error_style(), "x");
        assert_eq!("x".section_header_error(), "x");
        assert_eq!(3usize.count(), "3");
        reset_colors();
    }

    #[test]
    #[serial(colors)]
    fn test_table_color_follows_switch() {
        reset_colors();
        assert_eq!(table_color(Semantic::Failed), Some(comfy_table::Color::Red));
        assert_eq!(table_color(Semantic::Saved), Some(comfy_table::Color::Green));
        disable_colors();
        assert_eq!(table_color(Semantic::Path), None);
        let cell = comfy_table::Cell::new("a.png").themed(Semantic::Path);
        assert_eq!(cell.content(), "a.png");
        reset_colors();
    }
}
