use crate::config::Config;
use crate::error::AppError;
use crate::session::policy::{AllowAll, BlockList, CommandPolicy};
use crate::session::registry::{Classification, ProcessRecord, ProcessRegistry};
use crate::session::streamer::{MergedOutput, OutputStreamer};
use crate::session::tree_killer::ProcessTreeKiller;
use crate::utils::log_sink::{LogLevel, LogSink};
use crate::utils::path_utils::resolve_working_dir;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Stdio as StdProcessStdio;
use std::sync::Arc;
use tokio::process::Command as TokioCommand;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Dead,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSnapshot {
    pub id: u32,
    pub command_line: String,
    pub status: SessionStatus,
    /// OS-reported start time; unknown once the process is gone.
    pub started_at: Option<DateTime<Utc>>,
    pub classification: Classification,
}

/// Spawns shell commands, tracks them in the registry, and terminates them on request.
#[derive(Debug, Clone)]
pub struct SessionManager {
    config: Arc<Config>,
    registry: ProcessRegistry,
    killer: Arc<ProcessTreeKiller>,
    log: LogSink,
    policy: Arc<dyn CommandPolicy>,
}

impl SessionManager {
    /// Builds a manager whose policy comes from `BLOCKED_COMMANDS`.
    pub fn new(config: Arc<Config>, log: LogSink) -> Result<Self, AppError> {
        let policy: Arc<dyn CommandPolicy> = if config.blocked_commands.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(BlockList::new(&config.blocked_commands)?)
        };
        Ok(Self::with_policy(config, log, policy))
    }

    pub fn with_policy(config: Arc<Config>, log: LogSink, policy: Arc<dyn CommandPolicy>) -> Self {
        Self {
            config,
            registry: ProcessRegistry::new(),
            killer: Arc::new(ProcessTreeKiller::new()),
            log,
            policy,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    fn shell_command(&self, command: &str) -> TokioCommand {
        let shell = self.config.default_shell.as_str();
        let mut cmd = TokioCommand::new(shell);
        let lowered = shell.to_lowercase();
        if lowered.contains("powershell") || lowered.contains("pwsh") {
            cmd.arg("-Command");
        } else if lowered.ends_with("cmd") || lowered.ends_with("cmd.exe") {
            cmd.arg("/C");
        } else {
            cmd.arg("-c");
        }
        cmd.arg(command);
        cmd
    }

    fn reject(&self, command: &str, err: AppError) -> AppError {
        error!(command = %command, error = %err, "Command rejected before spawn");
        self.log.append(LogLevel::Error, format!("{}", err));
        err
    }

    /// Resolves `cwd` against the configured working directory, then spawns.
    pub fn execute(&self, command: &str, cwd: Option<&str>) -> Result<OutputStreamer, AppError> {
        let working_dir = resolve_working_dir(cwd, &self.config.working_dir)
            .map_err(|e| self.reject(command, AppError::spawn_failure(command, e)))?;
        self.spawn(command, &working_dir)
    }

    /// Launches `command` through the shell in `working_dir` with stderr merged
    /// into the returned stream. Must be called from within a Tokio runtime.
    #[instrument(skip(self), fields(cwd = %working_dir.display()))]
    pub fn spawn(&self, command: &str, working_dir: &Path) -> Result<OutputStreamer, AppError> {
        if command.trim().is_empty() {
            return Err(AppError::InvalidInputArgument("Command must not be empty".to_string()));
        }
        self.policy
            .check(command)
            .map_err(|e| self.reject(command, e))?;
        if !working_dir.is_dir() {
            return Err(self.reject(
                command,
                AppError::spawn_failure(command, format!("working directory {} does not exist", working_dir.display())),
            ));
        }

        let (output, stdout, stderr) = MergedOutput::open()
            .map_err(|e| self.reject(command, AppError::spawn_failure(command, e)))?;
        let mut shell_cmd = self.shell_command(command);
        shell_cmd
            .current_dir(working_dir)
            .stdin(StdProcessStdio::null())
            .stdout(stdout)
            .stderr(stderr);

        debug!(shell = %self.config.default_shell, command = %command, "Spawning command");
        let spawned = shell_cmd.spawn();
        // Releases the parent's copies of the pipe's write end.
        drop(shell_cmd);
        let child = spawned.map_err(|e| self.reject(command, AppError::spawn_failure(command, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| self.reject(command, AppError::spawn_failure(command, "process exited before a pid was assigned")))?;

        let record = ProcessRecord {
            id: pid,
            seq: self.registry.next_seq(),
            command_line: command.to_string(),
            classification: Classification::from_command(command, &self.config.interpreter_tokens),
            started_at: Utc::now(),
        };
        info!(pid, command = %command, classification = ?record.classification, "Command started");
        self.log.append(
            LogLevel::Command,
            format!("[{}] {} (pid {})", working_dir.display(), command, pid),
        );
        let streamer = OutputStreamer::attach(&record, child, output, self.registry.clone(), self.log.clone());
        self.registry.insert(record);
        Ok(streamer)
    }

    /// Kills one registered tree. Returns whether the root signal went out.
    /// Entries whose process already vanished are dropped from the registry.
    fn terminate_record(&self, record: &ProcessRecord) -> bool {
        let report = self.killer.kill_tree(record.id);
        if report.root_signalled || !report.root_found {
            self.registry.remove(record.id, record.seq);
        }
        if report.root_signalled {
            info!(
                pid = record.id,
                descendants = report.descendants_signalled.len(),
                "Terminated process tree"
            );
        } else if report.root_found {
            warn!(pid = record.id, "Root process refused the kill signal");
        } else {
            debug!(pid = record.id, "Process had already exited");
        }
        report.root_signalled
    }

    #[instrument(skip(self))]
    pub fn terminate_by_command_substring(&self, needle: &str) -> BTreeSet<u32> {
        let terminated: BTreeSet<u32> = self
            .registry
            .matching(needle)
            .iter()
            .filter(|record| self.terminate_record(record))
            .map(|record| record.id)
            .collect();

        if terminated.is_empty() {
            self.log.append(LogLevel::Info, format!("No running process matches '{}'", needle));
        } else {
            self.log.append(
                LogLevel::Process,
                format!("Stopped {} process(es) matching '{}': {:?}", terminated.len(), needle, terminated),
            );
        }
        terminated
    }

    #[instrument(skip(self))]
    pub fn terminate_by_id(&self, id: u32) -> bool {
        let record = match self.registry.get(id) {
            Some(record) => record,
            None => {
                debug!(pid = id, "Termination requested for untracked pid");
                return false;
            }
        };
        let terminated = self.terminate_record(&record);
        if terminated {
            self.log.append(
                LogLevel::Process,
                format!("Killed process {}: {}", id, record.command_line),
            );
        }
        terminated
    }

    /// Sweeps the whole registry. Every swept entry is removed even when its
    /// kill raced with a natural exit.
    #[instrument(skip(self))]
    pub fn terminate_all(&self) -> BTreeSet<u32> {
        let mut swept = BTreeSet::new();
        for record in self.registry.snapshot() {
            if !self.terminate_record(&record) {
                debug!(pid = record.id, "Sweep could not signal process, dropping entry");
            }
            self.registry.remove(record.id, record.seq);
            swept.insert(record.id);
        }
        self.log.append(
            LogLevel::System,
            format!("Killed all tracked processes ({})", swept.len()),
        );
        swept
    }

    /// Read-only view of the registry joined with a best-effort liveness probe.
    pub fn list_active(&self) -> Vec<ProcessSnapshot> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|record| {
                let probed = self.killer.probe(record.id);
                ProcessSnapshot {
                    id: record.id,
                    command_line: record.command_line,
                    status: if probed.is_some() {
                        SessionStatus::Running
                    } else {
                        SessionStatus::Dead
                    },
                    started_at: probed,
                    classification: record.classification,
                }
            })
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.list_active()
            .iter()
            .filter(|snapshot| snapshot.status == SessionStatus::Running)
            .count()
    }
}
