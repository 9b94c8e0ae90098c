//! Terminal styling for per-item output lines.

use console::Style;

use formsync_core::workarea::{ItemState, UpdateOutcome};

/// Colour a per-item failure line red. The text itself is left as is.
pub fn error(msg: &str) -> String {
    Style::new().red().apply_to(msg).to_string()
}

/// Colour a warning line yellow.
pub fn warn(msg: &str) -> String {
    Style::new().yellow().apply_to(msg).to_string()
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

pub fn item_state(state: ItemState) -> String {
    let style = match state {
        ItemState::Clean => Style::new().dim(),
        ItemState::LocallyModified => Style::new().green(),
        ItemState::NeedsUpdate => Style::new().cyan(),
        ItemState::NeedsMerge => Style::new().yellow().bold(),
    };
    style.apply_to(state.to_string()).to_string()
}

pub fn update_outcome(outcome: &UpdateOutcome) -> String {
    let style = match outcome {
        UpdateOutcome::Unchanged => Style::new().dim(),
        UpdateOutcome::Updated | UpdateOutcome::Merged { .. } => Style::new().green(),
        UpdateOutcome::Conflict { .. } => Style::new().red().bold(),
    };
    style.apply_to(outcome.to_string()).to_string()
}
