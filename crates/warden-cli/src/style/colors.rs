//! Semantic color palette for terminal output.

use owo_colors::{OwoColorize, Style};
use warden_types::Decision;

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

/// Style for a decision: green for PERMIT, red for DENY, yellow otherwise.
pub fn decision_style(decision: Decision) -> Style {
    match decision {
        Decision::Permit => success_style(),
        Decision::Deny => error_style(),
        Decision::NotApplicable | Decision::Indeterminate => warning_style(),
    }
}

/// Trait extension to apply semantic styles.
pub trait SemanticStyle: Sized {
    fn success(&self) -> String;
    fn error(&self) -> String;
    fn warning(&self) -> String;
    fn muted(&self) -> String;
    fn header(&self) -> String;
    fn styled(&self, style: Style) -> String;
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        self.styled(success_style())
    }

    fn error(&self) -> String {
        self.styled(error_style())
    }

    fn warning(&self) -> String {
        self.styled(warning_style())
    }

    fn muted(&self) -> String {
        self.styled(muted_style())
    }

    fn header(&self) -> String {
        self.styled(header_style())
    }

    fn styled(&self, style: Style) -> String {
        if super::no_color() {
            self.to_string()
        } else {
            self.style(style).to_string()
        }
    }
}
