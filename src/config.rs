use crate::utils::path_utils::expand_tilde_path_buf;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct Config {
    pub working_dir: PathBuf,
    pub default_shell: String,
    pub interpreter_tokens: Vec<String>,
    pub blocked_commands: Vec<String>,
    pub log_level: String,
    pub log_capacity: usize,
    pub transport_mode: TransportMode,
    pub http_host: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportMode {
    Stdio,
    Http,
}

impl FromStr for TransportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdio" => Ok(TransportMode::Stdio),
            "http" => Ok(TransportMode::Http),
            _ => Err(anyhow::anyhow!("Invalid transport mode: {}", s)),
        }
    }
}

fn platform_default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "sh"
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup; `load` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let working_dir = match var("WORKING_DIR") {
            Some(raw) => {
                let expanded = expand_tilde_path_buf(&raw);
                dunce::canonicalize(&expanded)
                    .context(format!("Failed to canonicalize WORKING_DIR: {}", raw))?
            }
            None => std::env::current_dir().context("Failed to read the current directory")?,
        };
        if !working_dir.is_dir() {
            anyhow::bail!("WORKING_DIR is not a valid directory: {:?}", working_dir);
        }

        let default_shell = var("DEFAULT_SHELL").unwrap_or_else(|| platform_default_shell().to_string());

        let interpreter_tokens = split_list(&var("INTERPRETER_TOKENS").unwrap_or_else(|| "python".to_string()));

        // Empty by default: every command is allowed unless an operator opts in.
        let blocked_commands = split_list(&var("BLOCKED_COMMANDS").unwrap_or_default());

        let log_level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_capacity = var("LOG_CAPACITY")
            .unwrap_or_else(|| DEFAULT_LOG_CAPACITY.to_string())
            .parse::<usize>()
            .context("Invalid LOG_CAPACITY")?;
        if log_capacity == 0 {
            anyhow::bail!("LOG_CAPACITY must be greater than zero");
        }

        let transport_mode_str = var("SESSION_TRANSPORT").unwrap_or_else(|| "http".to_string());
        let transport_mode = TransportMode::from_str(&transport_mode_str)?;

        let http_host = var("HTTP_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let http_port = var("HTTP_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .context("Invalid HTTP_PORT")?;

        Ok(Config {
            working_dir,
            default_shell,
            interpreter_tokens,
            blocked_commands,
            log_level,
            log_capacity,
            transport_mode,
            http_host,
            http_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.transport_mode, TransportMode::Http);
        assert_eq!(config.http_host, "127.0.0.1");
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
        assert_eq!(config.interpreter_tokens, vec!["python".to_string()]);
        assert!(config.blocked_commands.is_empty());
        assert!(config.working_dir.is_dir());
    }

    #[test]
    fn working_dir_expands_tilde() {
        let config = config_from(&[("WORKING_DIR", "~")]).unwrap();
        let home = dunce::canonicalize(shellexpand::tilde("~").as_ref()).unwrap();
        assert_eq!(config.working_dir, home);
    }

    #[test]
    fn lists_are_trimmed_and_empty_entries_dropped() {
        let config = config_from(&[
            ("INTERPRETER_TOKENS", " python , node ,,"),
            ("BLOCKED_COMMANDS", "shutdown, reboot"),
        ])
        .unwrap();
        assert_eq!(config.interpreter_tokens, vec!["python", "node"]);
        assert_eq!(config.blocked_commands, vec!["shutdown", "reboot"]);
    }

    #[test]
    fn working_dir_is_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().to_string_lossy().to_string();
        let config = config_from(&[("WORKING_DIR", raw.as_str())]).unwrap();
        assert_eq!(config.working_dir, dunce::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("SESSION_TRANSPORT", "sse")]).is_err());
        assert!(config_from(&[("HTTP_PORT", "not-a-port")]).is_err());
        assert!(config_from(&[("LOG_CAPACITY", "0")]).is_err());
        assert!(config_from(&[("WORKING_DIR", "/definitely/not/here")]).is_err());
    }

    #[test]
    fn transport_mode_parses_case_insensitively() {
        assert_eq!("STDIO".parse::<TransportMode>().unwrap(), TransportMode::Stdio);
        assert_eq!("Http".parse::<TransportMode>().unwrap(), TransportMode::Http);
    }
}
