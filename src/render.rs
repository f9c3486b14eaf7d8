//! Terminal rendering of the conversation.
//!
//! The transcript is printed oldest first so the newest message ends up
//! at the bottom of the terminal, which is where the eye already is.

use std::fmt::Write as _;

use crossterm::style::{Attribute, Color, Stylize};

use crate::session::{Message, Role, Session, TurnPhase};

/// Renders sessions as text, optionally with ANSI styling.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    color: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self { color: true }
    }
}

impl Renderer {
    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Full transcript followed by the suggested actions.
    pub fn transcript(&self, messages: &[Message], suggestions: &[String]) -> String {
        let mut out = String::new();

        for (i, message) in messages.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            self.write_message(&mut out, message);
        }

        if !suggestions.is_empty() {
            if !messages.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.suggestions(suggestions));
        }

        out
    }

    fn write_message(&self, out: &mut String, message: &Message) {
        for paragraph in message.paragraphs() {
            match message.role {
                Role::User => {
                    let line = format!("> {}", paragraph);
                    if self.color {
                        let styled = line.with(Color::Cyan).attribute(Attribute::Bold);
                        let _ = writeln!(out, "{}", styled);
                    } else {
                        let _ = writeln!(out, "{}", line);
                    }
                }
                Role::Assistant => {
                    let _ = writeln!(out, "{}", paragraph);
                }
            }
        }
    }

    /// Numbered suggestions, `#1` first.
    pub fn suggestions(&self, suggestions: &[String]) -> String {
        let mut out = String::new();
        let header = "Suggested actions:";
        if self.color {
            let _ = writeln!(out, "{}", header.dim());
        } else {
            let _ = writeln!(out, "{}", header);
        }
        for (i, suggestion) in suggestions.iter().enumerate() {
            let tag = format!("#{}", i + 1);
            if self.color {
                let _ = writeln!(out, "  {} {}", tag.yellow(), suggestion);
            } else {
                let _ = writeln!(out, "  {} {}", tag, suggestion);
            }
        }
        out
    }

    /// One-line progress indicator for the current phase.
    pub fn status_line(&self, session: &Session) -> String {
        let fields = &session.fields;
        let line = match session.phase {
            TurnPhase::Idle => return String::new(),
            TurnPhase::AwaitingSubmitAck => "sending...".to_string(),
            TurnPhase::Starting => format!("starting game in thread {}...", fields.thread_id),
            TurnPhase::Polling => {
                format!("waiting for run {} ({})...", fields.run_id, fields.run_status)
            }
            TurnPhase::FetchingLog => "loading conversation...".to_string(),
        };
        if self.color {
            line.dark_grey().italic().to_string()
        } else {
            line
        }
    }

    /// The three persisted fields, aligned.
    pub fn fields(&self, session: &Session) -> String {
        let fields = &session.fields;
        let rows = [
            ("threadId", fields.thread_id.as_str()),
            ("runId", fields.run_id.as_str()),
            ("runStatus", fields.run_status.as_str()),
        ];
        let mut out = String::new();
        for (key, value) in rows {
            let value = if value.is_empty() { "-" } else { value };
            let _ = writeln!(out, "  {:<10} {}", key, value);
        }
        let _ = writeln!(out, "  {:<10} {}", "phase", session.phase);
        out
    }
}
