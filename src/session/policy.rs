use crate::error::AppError;
use anyhow::Context;
use regex::Regex;
use std::fmt::Debug;

/// Hook consulted before every spawn.
pub trait CommandPolicy: Send + Sync + Debug {
    fn check(&self, command: &str) -> Result<(), AppError>;
}

/// Runs anything the operator submits.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CommandPolicy for AllowAll {
    fn check(&self, _command: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Rejects commands whose first word (after `VAR=value` prefixes) is listed.
#[derive(Debug, Clone)]
pub struct BlockList {
    patterns: Vec<Regex>,
}

impl BlockList {
    pub fn new(blocked: &[String]) -> Result<Self, AppError> {
        let patterns = blocked
            .iter()
            .map(|name| {
                Regex::new(&format!(r"^{}$", regex::escape(name)))
                    .context(format!("Invalid regex for blocked command: {}", name))
            })
            .collect::<anyhow::Result<Vec<Regex>>>()?;
        Ok(Self { patterns })
    }
}

impl CommandPolicy for BlockList {
    fn check(&self, command: &str) -> Result<(), AppError> {
        let effective_command = command
            .split_whitespace()
            .find(|s| !s.contains('='))
            .unwrap_or("");
        if self.patterns.iter().any(|regex| regex.is_match(effective_command)) {
            return Err(AppError::CommandBlocked(command.to_string()));
        }
        Ok(())
    }
}
