//! Session state CLI commands.
//!
//! Commands for viewing and editing the persisted session fields without
//! talking to the backend.

use std::path::Path;

use clap::Subcommand;

use crate::session::{SessionField, SessionStore};

#[derive(Subcommand, Debug, Clone)]
pub enum StateCommand {
    /// Show all session fields and their current values
    Show,

    /// Get a single field value
    Get {
        /// Field name (threadId, runId, runStatus)
        field: String,
    },

    /// Set a field value
    Set {
        /// Field name (threadId, runId, runStatus)
        field: String,

        /// Value to set; an empty string clears the field
        value: String,
    },

    /// Reset all fields to empty
    Clear,

    /// Show the session file path
    Path,
}

/// Run a state command against the store at `path`.
pub fn run_state_command(cmd: StateCommand, path: &Path) -> anyhow::Result<()> {
    match cmd {
        StateCommand::Show => show_state(path),
        StateCommand::Get { field } => get_field(path, &field),
        StateCommand::Set { field, value } => set_field(path, &field, &value),
        StateCommand::Clear => clear_state(path),
        StateCommand::Path => show_path(path),
    }
}

fn show_state(path: &Path) -> anyhow::Result<()> {
    let store = SessionStore::open(path)?;

    println!("Session:");
    println!();
    for field in SessionField::ALL {
        let value = store.get(field);
        let display_value = if value.is_empty() { "-" } else { value.as_str() };
        println!("  {:10}  {}", field.key(), display_value);
    }

    Ok(())
}

fn get_field(path: &Path, field: &str) -> anyhow::Result<()> {
    let field: SessionField = field.parse()?;
    let store = SessionStore::open(path)?;

    println!("{}", store.get(field));
    Ok(())
}

fn set_field(path: &Path, field: &str, value: &str) -> anyhow::Result<()> {
    let field: SessionField = field.parse()?;
    let mut store = SessionStore::open(path)?;

    store.set(field, value)?;

    println!("Set {} = {}", field.key(), value);
    Ok(())
}

fn clear_state(path: &Path) -> anyhow::Result<()> {
    let mut store = SessionStore::open(path)?;
    store.clear()?;

    println!("Cleared session fields in {}", store.path().display());
    Ok(())
}

fn show_path(path: &Path) -> anyhow::Result<()> {
    println!("{}", path.display());

    if path.exists() {
        let metadata = std::fs::metadata(path)?;
        println!("  Size: {} bytes", metadata.len());
    } else {
        println!("  (not created yet)");
    }

    Ok(())
}
