//! Operator REPL
//!
//! Inspect and edit the pose library, arm or disarm cooldown mode.

use crate::pose::SharedLibrary;
use crate::router::SharedRouter;
use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Parsed REPL command
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Status,
    Labels,
    Label { slot: usize, name: String },
    Clear(Option<usize>),
    Snapshots,
    Snapshot(Option<String>),
    Restore(String),
    Export,
    Arm,
    Disarm,
    Help,
    Quit,
}

impl ReplCommand {
    /// Parse one input line; `Ok(None)` for a blank line
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = words.collect();

        let command = match head.to_ascii_lowercase().as_str() {
            "status" => Self::Status,
            "labels" => Self::Labels,
            "label" => {
                let (slot, name) = rest.split_first().ok_or("usage: label <slot> <name>")?;
                if name.is_empty() {
                    return Err("usage: label <slot> <name>".into());
                }
                Self::Label {
                    slot: parse_slot(slot)?,
                    name: name.join(" "),
                }
            }
            "clear" => match rest.first() {
                Some(&"all") => Self::Clear(None),
                Some(slot) => Self::Clear(Some(parse_slot(slot)?)),
                None => return Err("usage: clear <slot|all>".into()),
            },
            "snapshots" => Self::Snapshots,
            "snapshot" => Self::Snapshot((!rest.is_empty()).then(|| rest.join(" "))),
            "restore" => Self::Restore(rest.first().ok_or("usage: restore <id>")?.to_string()),
            "export" => Self::Export,
            "arm" => Self::Arm,
            "disarm" => Self::Disarm,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

fn parse_slot(raw: &str) -> Result<usize, String> {
    raw.parse().map_err(|_| format!("invalid slot '{}'", raw))
}

/// Library and router handles the REPL operates on
pub struct Repl {
    library: SharedLibrary,
    router: SharedRouter,
}

impl Repl {
    pub fn new(library: SharedLibrary, router: SharedRouter) -> Self {
        Self { library, router }
    }

    /// Run one command and return the text to print
    pub fn execute(&self, command: &ReplCommand) -> String {
        match command {
            ReplCommand::Status => self.status(),
            ReplCommand::Labels => self.labels(),
            ReplCommand::Label { slot, name } => match self.library.write().set_slot_label(*slot, name) {
                Ok(label) => format!("Slot {} is now {}", slot, label.green()),
                Err(e) => e.to_string().red().to_string(),
            },
            ReplCommand::Clear(None) => {
                self.library.write().clear_all();
                "Cleared all slots".to_string()
            }
            ReplCommand::Clear(Some(slot)) => match self.library.write().clear_slot(*slot) {
                Ok(()) => format!("Cleared slot {}", slot),
                Err(e) => e.to_string().red().to_string(),
            },
            ReplCommand::Snapshots => self.snapshots(),
            ReplCommand::Snapshot(reason) => {
                let reason = reason.as_deref().unwrap_or("manual");
                let id = self.library.write().capture_snapshot(reason, true);
                format!("Snapshot {} created", id.cyan())
            }
            ReplCommand::Restore(id) => match self.library.write().restore_snapshot(id) {
                Ok(_) => format!("Restored {}", id.cyan()),
                Err(e) => e.to_string().red().to_string(),
            },
            ReplCommand::Export => {
                let state = self.library.read().export_state();
                serde_json::to_string_pretty(&state).unwrap_or_else(|e| e.to_string())
            }
            ReplCommand::Arm => {
                self.router.set_armed(true);
                "Cooldown mode armed".yellow().to_string()
            }
            ReplCommand::Disarm => {
                self.router.set_armed(false);
                "Cooldown mode disarmed".to_string()
            }
            ReplCommand::Help => help_text(),
            ReplCommand::Quit => String::new(),
        }
    }

    fn status(&self) -> String {
        let settings = self.router.settings();
        let session = &settings.remote_bridge.session_id;
        let bridge = self.router.broker().status(Some(session));
        let counts = self.library.read().sample_counts();

        let armed = if settings.armed { "yes".green() } else { "no".normal() };
        let busy = if self.router.is_in_flight() { "yes".yellow() } else { "no".normal() };
        format!(
            "{} {:?}\n{} {}\n{} {}\n{} {} ({} helper(s), {} pending)\n{} {:?}",
            "Safety mode:".bold(),
            settings.safety_mode,
            "Armed:".bold(),
            armed,
            "Action running:".bold(),
            busy,
            "Remote session:".bold(),
            session,
            bridge.helpers_connected,
            bridge.pending_commands,
            "Samples per slot:".bold(),
            counts
        )
    }

    fn labels(&self) -> String {
        let library = self.library.read();
        let counts = library.sample_counts();
        library
            .labels()
            .iter()
            .enumerate()
            .map(|(slot, label)| {
                let mapped = self.router.settings().action_for(slot);
                format!(
                    "  [{}] {} ({} samples) -> {}",
                    slot,
                    label.bright_white(),
                    counts.get(slot).copied().unwrap_or(0),
                    mapped.to_string().cyan()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn snapshots(&self) -> String {
        let list = self.library.read().list_snapshots();
        if list.is_empty() {
            return "No snapshots".to_string();
        }
        list.iter()
            .map(|snapshot| {
                format!(
                    "  {} {} {:?}",
                    snapshot.id.cyan(),
                    snapshot.reason,
                    snapshot.sample_counts
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn help_text() -> String {
    [
        "status                 router, bridge and library summary",
        "labels                 slot labels, sample counts and mapped actions",
        "label <slot> <name>    rename a slot",
        "clear <slot|all>       remove samples",
        "snapshots              list library snapshots",
        "snapshot [reason]      take a snapshot now",
        "restore <id>           restore a snapshot",
        "export                 print the library document",
        "arm | disarm           toggle cooldown mode",
        "quit                   exit",
    ]
    .join("\n")
}

/// Blocking read-eval-print loop; returns on `quit`, EOF or Ctrl-C
pub fn run_repl(repl: Repl) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "Gesture bridge REPL. Type 'help' for commands.".bold().cyan());

    loop {
        let line = match rl.readline("gesture> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let _ = rl.add_history_entry(line.as_str());

        match ReplCommand::parse(&line) {
            Ok(None) => {}
            Ok(Some(ReplCommand::Quit)) => break,
            Ok(Some(command)) => println!("{}", repl.execute(&command)),
            Err(message) => println!("{}", message.red()),
        }
    }

    Ok(())
}
