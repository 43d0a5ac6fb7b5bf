use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ExecuteParams {
    pub command: String,
    /// Relative paths resolve against WORKING_DIR.
    #[serde(default)]
    pub cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StopParams {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct StopResult {
    pub success: bool,
    pub count: usize,
    pub ids: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct KillProcessResult {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct KillAllResult {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResult {
    pub running: usize,
    /// Registry entries, including ones whose process has already died.
    pub tracked: usize,
    pub logs: usize,
}
