//! Interactive prompt.
//!
//! Plain lines are submitted as turns, `#n` submits suggested action `n`,
//! and lines starting with `/` are local commands. While a turn is in
//! flight the prompt is not shown, which is the terminal's version of a
//! disabled input field.

use std::path::PathBuf;

use crossterm::style::Stylize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

use crate::controller::ControllerHandle;
use crate::error::SessionError;
use crate::render::Renderer;
use crate::session::{Message, Session, SessionField};

use super::describe_turn_end;

const PROMPT: &str = "> ";

const COMMANDS: &[&str] = &["/new", "/fetch", "/resume", "/state", "/set", "/help", "/quit"];

/// Slash-command completion and hints.
struct ReplHelper;

impl Helper for ReplHelper {}

impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let line = &line[..pos];
        if !line.starts_with('/') || line.contains(' ') {
            return Ok((0, Vec::new()));
        }

        let candidates = COMMANDS
            .iter()
            .filter(|cmd| cmd.starts_with(line))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();
        Ok((0, candidates))
    }
}

impl Hinter for ReplHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Option<String> {
        let line = &line[..pos];
        if !line.starts_with('/') || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|cmd| cmd.starts_with(line) && cmd.len() > line.len())
            .map(|cmd| cmd[line.len()..].to_string())
    }
}

impl Highlighter for ReplHelper {}

impl Validator for ReplHelper {}

/// What one input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Say(String),
    Suggestion(usize),
    NewGame,
    Fetch,
    Resume,
    ShowState,
    Set { field: String, value: String },
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    if let Some(n) = line.strip_prefix('#').and_then(|n| n.trim().parse::<usize>().ok()) {
        return Input::Suggestion(n);
    }

    let Some(command) = line.strip_prefix('/') else {
        return Input::Say(line.to_string());
    };

    let mut parts = command.splitn(3, char::is_whitespace);
    match parts.next().unwrap_or_default() {
        "new" => Input::NewGame,
        "fetch" => Input::Fetch,
        "resume" => Input::Resume,
        "state" => Input::ShowState,
        "set" => match (parts.next(), parts.next()) {
            (Some(field), value) => Input::Set {
                field: field.to_string(),
                value: value.unwrap_or_default().trim().to_string(),
            },
            (None, _) => Input::Unknown("/set needs a field name".to_string()),
        },
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        other => Input::Unknown(format!("Unknown command /{}", other)),
    }
}

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("questline").join("history.txt"))
}

/// Run the prompt until `/quit` or end of input.
pub async fn run_repl(handle: &ControllerHandle, renderer: Renderer) -> anyhow::Result<()> {
    let mut rl: Editor<ReplHelper, DefaultHistory> = Editor::new()?;
    rl.set_helper(Some(ReplHelper));

    let history = history_path();
    if let Some(path) = &history {
        // Missing on first run.
        let _ = rl.load_history(path);
    }

    let mut shown = Transcript::default();
    // Text of a turn the backend never accepted, offered again at the prompt.
    let mut prefill: Option<String> = None;

    println!("{}", "questline, type /help for commands".dim());
    let session = settle(handle, &renderer).await?;
    shown.print_new(&session, &renderer);
    report(&session);
    if !session.fields.has_conversation() {
        println!("No game in progress. Type /new to start one.");
    }

    loop {
        let initial = prefill.take();
        let readline = tokio::task::block_in_place(|| match &initial {
            Some(text) => rl.readline_with_initial(PROMPT, (text.as_str(), "")),
            None => rl.readline(PROMPT),
        });

        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        let input = parse_input(&line);
        let submits = matches!(input, Input::Say(_) | Input::Suggestion(_));
        if submits {
            let _ = rl.add_history_entry(line.trim());
        }

        let result = match input {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => {
                print_help();
                continue;
            }
            Input::Unknown(message) => {
                println!("{}", message.red());
                continue;
            }
            Input::ShowState => {
                print!("{}", renderer.fields(&handle.snapshot()));
                continue;
            }
            Input::Set { field, value } => match field.parse::<SessionField>() {
                Ok(field) => handle.set_field(field, value).await,
                Err(e) => Err(e.into()),
            },
            Input::Say(text) => handle.submit_turn(text).await.map(|_| ()),
            Input::Suggestion(n) => match suggestion(&handle.snapshot(), n) {
                Some(text) => {
                    println!("{}", format!("{}{}", PROMPT, text).dim());
                    handle.submit_turn(text).await.map(|_| ())
                }
                None => {
                    println!("{}", format!("No suggested action #{}", n).red());
                    continue;
                }
            },
            Input::NewGame => {
                shown = Transcript::default();
                handle.start_new_game().await
            }
            Input::Fetch => handle.fetch_log().await,
            Input::Resume => handle.resume_polling().await.map(|_| ()),
        };

        if let Err(e) = result {
            println!("{}", e.to_string().red());
        }

        let session = settle(handle, &renderer).await?;
        shown.print_new(&session, &renderer);
        report(&session);
        prefill = unsent_turn(submits, &session);
    }

    if let Some(path) = &history {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Err(e) = rl.save_history(path) {
            tracing::debug!("Could not save history to {}: {}", path.display(), e);
        }
    }

    Ok(())
}

/// Print progress until the controller is idle again.
async fn settle(handle: &ControllerHandle, renderer: &Renderer) -> Result<Session, SessionError> {
    let mut state = handle.subscribe();
    let mut last_line = String::new();

    loop {
        let session = state.borrow_and_update().clone();
        if session.phase.accepts_input() {
            return Ok(session);
        }

        let line = renderer.status_line(&session);
        if line != last_line {
            println!("{}", line);
            last_line = line;
        }

        state
            .changed()
            .await
            .map_err(|_| SessionError::ControllerGone)?;
    }
}

fn report(session: &Session) {
    if let Some(end) = session.failure() {
        println!("{}", describe_turn_end(end).yellow());
    }
}

/// The text to offer again after `submitted` input, if the submit failed.
fn unsent_turn(submitted: bool, session: &Session) -> Option<String> {
    if submitted && !session.pending_input.is_empty() {
        Some(session.pending_input.clone())
    } else {
        None
    }
}

fn suggestion(session: &Session, n: usize) -> Option<String> {
    n.checked_sub(1)
        .and_then(|i| session.suggestions.get(i))
        .cloned()
}

/// Tracks what has been printed so only new messages are shown.
#[derive(Default)]
struct Transcript {
    printed: Vec<Message>,
    suggestions: Vec<String>,
}

impl Transcript {
    fn print_new(&mut self, session: &Session, renderer: &Renderer) {
        let start = if session.messages.starts_with(&self.printed) {
            self.printed.len()
        } else {
            0
        };
        let fresh = &session.messages[start..];
        let suggestions_changed = session.suggestions != self.suggestions;

        if fresh.is_empty() && !suggestions_changed {
            return;
        }

        let suggestions: &[String] = if suggestions_changed {
            &session.suggestions
        } else {
            &[]
        };
        let text = renderer.transcript(fresh, suggestions);
        if !text.is_empty() {
            println!();
            print!("{}", text);
            println!();
        }

        self.printed = session.messages.clone();
        self.suggestions = session.suggestions.clone();
    }
}

fn print_help() {
    println!("Type what your character does and press Enter.");
    println!("  #N                  take suggested action N");
    println!("  /new                start a new game");
    println!("  /fetch              reload the conversation");
    println!("  /resume             keep waiting on a stalled turn");
    println!("  /state              show session fields");
    println!("  /set FIELD VALUE    edit threadId, runId or runStatus");
    println!("  /quit               exit");
}
