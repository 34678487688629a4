//! Semantic color palette for terminal output.

use owo_colors::{OwoColorize, Style};

fn success_style() -> Style {
    Style::new().green().bold()
}

fn error_style() -> Style {
    Style::new().red().bold()
}

fn warning_style() -> Style {
    Style::new().yellow()
}

fn muted_style() -> Style {
    Style::new().dimmed()
}

fn header_style() -> Style {
    Style::new().bold()
}

fn code_style() -> Style {
    Style::new().blue()
}

/// Trait extension to apply semantic styles.
pub trait SemanticStyle: Sized {
    /// Green bold.
    fn success(&self) -> String;
    /// Red bold.
    fn error(&self) -> String;
    /// Yellow.
    fn warning(&self) -> String;
    /// Dimmed.
    fn muted(&self) -> String;
    /// Bold.
    fn header(&self) -> String;
    /// Blue.
    fn code(&self) -> String;
}

fn styled<T: std::fmt::Display>(value: &T, style: Style) -> String {
    if super::no_color() {
        value.to_string()
    } else {
        value.style(style).to_string()
    }
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        styled(self, success_style())
    }

    fn error(&self) -> String {
        styled(self, error_style())
    }

    fn warning(&self) -> String {
        styled(self, warning_style())
    }

    fn muted(&self) -> String {
        styled(self, muted_style())
    }

    fn header(&self) -> String {
        styled(self, header_style())
    }

    fn code(&self) -> String {
        styled(self, code_style())
    }
}
