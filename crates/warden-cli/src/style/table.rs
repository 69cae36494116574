//! Policy listings rendered with comfy-table.

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use warden_abac::Policy;
use warden_types::PolicyStatus;

use super::colors::SemanticStyle;

const POLICY_COLUMNS: [&str; 7] = [
    "ID",
    "Name",
    "Status",
    "Priority",
    "Version",
    "Algorithm",
    "Rules",
];

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn status_cell(status: PolicyStatus) -> Cell {
    let cell = Cell::new(status);
    if super::no_color() {
        return cell;
    }
    match status {
        PolicyStatus::Active => cell.fg(Color::Green),
        PolicyStatus::Disabled => cell.fg(Color::Yellow),
        PolicyStatus::Draft => cell,
        PolicyStatus::Archived => cell.fg(Color::DarkGrey),
    }
}

/// One row per policy, in the order given.
pub fn policy_table<'a>(policies: impl IntoIterator<Item = &'a Policy>) -> Table {
    let mut table = base_table();
    table.set_header(POLICY_COLUMNS.iter().map(|col| {
        if super::no_color() {
            Cell::new(col)
        } else {
            Cell::new(col).add_attribute(Attribute::Bold).fg(Color::Cyan)
        }
    }));

    for p in policies {
        table.add_row(vec![
            Cell::new(p.id),
            Cell::new(&p.name),
            status_cell(p.status),
            Cell::new(p.priority),
            Cell::new(p.version),
            Cell::new(p.algorithm),
            Cell::new(p.rules.len()),
        ]);
    }
    table
}

/// Prints the policy table with a row count, or a placeholder when empty.
pub fn print_policies(policies: &[&Policy]) {
    if policies.is_empty() {
        println!("{}", "No policies defined.".muted());
        return;
    }
    println!("{}", policy_table(policies.iter().copied()));
    let noun = if policies.len() == 1 { "policy" } else { "policies" };
    println!("{}", format!("({} {noun})", policies.len()).muted());
}

/// Two-column summary of counts and settings.
pub fn print_summary(entries: &[(&str, String)]) {
    let mut table = base_table();
    for (key, value) in entries {
        let key_cell = if super::no_color() {
            Cell::new(key)
        } else {
            Cell::new(key).fg(Color::DarkGrey)
        };
        table.add_row(vec![key_cell, Cell::new(value)]);
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use warden_abac::PolicySpec;
    use warden_types::{PolicyId, RuleId};

    #[test]
    fn policy_rows_follow_input_order() {
        let a = Policy::from_spec(PolicyId::new(2), PolicySpec::new("beta"), Utc::now());
        let b = Policy::from_spec(
            PolicyId::new(1),
            PolicySpec::new("alpha").with_rule(RuleId::new(7)),
            Utc::now(),
        );
        super::super::set_no_color(true);

        let rendered = policy_table([&a, &b]).to_string();
        let beta = rendered.find("beta").unwrap();
        let alpha = rendered.find("alpha").unwrap();
        assert!(beta < alpha);
        assert!(rendered.contains("draft"));
    }
}
