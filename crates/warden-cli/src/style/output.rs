//! Line-oriented report output.

use warden_types::Decision;

use super::colors::{SemanticStyle, decision_style};

/// Leading glyph of a report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Ok,
    Notice,
    Problem,
}

impl Mark {
    fn glyph(self) -> String {
        match self {
            Self::Ok => "✓".success(),
            Self::Notice => "⚠".warning(),
            Self::Problem => "✗".error(),
        }
    }
}

/// Prints one report line. Problems go to stderr.
pub fn print_mark(mark: Mark, msg: &str) {
    match mark {
        Mark::Problem => eprintln!("{} {msg}", mark.glyph()),
        Mark::Ok | Mark::Notice => println!("{} {msg}", mark.glyph()),
    }
}

/// Prints a decision on its own line, colored by outcome.
pub fn print_decision(decision: Decision) {
    println!("{}", decision.to_string().styled(decision_style(decision)));
}

pub fn print_header(msg: &str) {
    println!("{}", msg.header());
}

/// Prints an indented `key: value` line.
pub fn print_labeled(key: &str, value: &str) {
    println!("  {}: {value}", key.muted());
}

pub fn print_spacer() {
    println!();
}
