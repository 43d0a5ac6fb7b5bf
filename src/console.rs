//! Line-oriented operator console over stdin/stdout.

use crate::session::{SessionManager, SessionStatus};
use crate::utils::log_sink::LogLevel;
use crate::utils::path_utils::resolve_working_dir;
use anyhow::Result;
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

const HELP: &str = "\
Commands:
  <shell command>   run it in the current directory and stream its output
  /stop <name>      kill every process whose command line contains <name>
  /kill <pid>       kill one tracked process tree
  /killall          kill every tracked process
  /ps               list tracked processes
  /logs             print the session log
  /cd <dir>         change the directory used for new commands
  /help             show this message
  /quit             leave the console (running processes keep running)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Run(String),
    Stop(String),
    Kill(u32),
    KillAll,
    List,
    Logs,
    ChangeDir(String),
    Help,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err("empty input".to_string());
        }
        if !line.starts_with('/') {
            return Ok(ConsoleCommand::Run(line.to_string()));
        }

        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        match verb {
            "/stop" if !rest.is_empty() => Ok(ConsoleCommand::Stop(rest.to_string())),
            "/stop" => Err("usage: /stop <name>".to_string()),
            "/kill" => rest
                .parse::<u32>()
                .map(ConsoleCommand::Kill)
                .map_err(|_| "usage: /kill <pid>".to_string()),
            "/killall" => Ok(ConsoleCommand::KillAll),
            "/ps" => Ok(ConsoleCommand::List),
            "/logs" => Ok(ConsoleCommand::Logs),
            "/cd" if !rest.is_empty() => Ok(ConsoleCommand::ChangeDir(rest.to_string())),
            "/cd" => Err("usage: /cd <dir>".to_string()),
            "/help" => Ok(ConsoleCommand::Help),
            "/quit" | "/exit" => Ok(ConsoleCommand::Quit),
            // Unknown slash words run as shell commands, e.g. absolute paths.
            _ => Ok(ConsoleCommand::Run(line.to_string())),
        }
    }
}

async fn print(text: &str) {
    let mut stdout = tokio::io::stdout();
    if let Err(e) = stdout.write_all(text.as_bytes()).await {
        warn!(error = %e, "Failed to write to stdout");
    }
    if let Err(e) = stdout.flush().await {
        warn!(error = %e, "Failed to flush stdout");
    }
}

/// Drains one command in the background so the console stays responsive.
async fn run_in_background(manager: &SessionManager, command: String, cwd: &Path) {
    match manager.spawn(&command, cwd) {
        Ok(mut streamer) => {
            tokio::spawn(async move {
                let pid = streamer.pid();
                while let Some(line) = streamer.next_line().await {
                    print(&format!("[{}] {}\n", pid, line)).await;
                    if line.is_trailer() {
                        debug!(pid, "Background command drained");
                    }
                }
            });
        }
        Err(e) => print(&format!("Error: {}\n", e)).await,
    }
}

fn render_processes(manager: &SessionManager) -> String {
    let snapshots = manager.list_active();
    if snapshots.is_empty() {
        return "No tracked processes\n".to_string();
    }
    let mut out = String::new();
    for snapshot in snapshots {
        let started = snapshot
            .started_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        let status = match snapshot.status {
            SessionStatus::Running => "running",
            SessionStatus::Dead => "dead",
        };
        out.push_str(&format!(
            "{:>7}  {:<7}  {:<11}  {}  {}\n",
            snapshot.id,
            status,
            format!("{:?}", snapshot.classification).to_lowercase(),
            started,
            snapshot.command_line
        ));
    }
    out
}

pub async fn run(manager: SessionManager) -> Result<()> {
    let mut cwd = manager.config().working_dir.clone();
    manager.log().append(LogLevel::System, "Console session started");
    print(&format!("Working directory: {}\nType /help for commands.\n", cwd.display())).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match line.parse::<ConsoleCommand>() {
            Ok(command) => command,
            Err(e) if e == "empty input" => continue,
            Err(e) => {
                print(&format!("{}\n", e)).await;
                continue;
            }
        };
        debug!(?command, "Console command");

        match command {
            ConsoleCommand::Run(command) => run_in_background(&manager, command, &cwd).await,
            ConsoleCommand::Stop(name) => {
                let m = manager.clone();
                let ids = tokio::task::spawn_blocking(move || m.terminate_by_command_substring(&name)).await?;
                if ids.is_empty() {
                    print("No matching process\n").await;
                } else {
                    print(&format!("Stopped {} process(es): {:?}\n", ids.len(), ids)).await;
                }
            }
            ConsoleCommand::Kill(pid) => {
                let m = manager.clone();
                let killed = tokio::task::spawn_blocking(move || m.terminate_by_id(pid)).await?;
                print(if killed { "Killed\n" } else { "Not a tracked process\n" }).await;
            }
            ConsoleCommand::KillAll => {
                let m = manager.clone();
                let swept = tokio::task::spawn_blocking(move || m.terminate_all()).await?;
                print(&format!("Killed {} process(es)\n", swept.len())).await;
            }
            ConsoleCommand::List => {
                let m = manager.clone();
                let table = tokio::task::spawn_blocking(move || render_processes(&m)).await?;
                print(&table).await;
            }
            ConsoleCommand::Logs => print(&format!("{}\n", manager.log().render())).await,
            ConsoleCommand::ChangeDir(dir) => match resolve_working_dir(Some(&dir), &cwd) {
                Ok(resolved) => {
                    cwd = resolved;
                    print(&format!("Working directory: {}\n", cwd.display())).await;
                }
                Err(e) => print(&format!("Error: {}\n", e)).await,
            },
            ConsoleCommand::Help => print(&format!("{}\n", HELP)).await,
            ConsoleCommand::Quit => {
                let registry = manager.registry();
                if !registry.is_empty() {
                    print(&format!("Leaving {} tracked process(es) running\n", registry.len())).await;
                }
                break;
            }
        }
    }

    manager.log().append(LogLevel::System, "Console session ended");
    Ok(())
}
