//! Project settings and project-root discovery.
//!
//! A project is any directory holding a `bmtlab.toml` marker file. The file
//! doubles as the settings file; every section is optional and an empty file
//! yields the defaults below.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::BmtError;

/// Marker file used to locate the project root.
pub const MARKER_FILE: &str = "bmtlab.toml";

/// Walk upward from `start` until a directory containing [`MARKER_FILE`] is found.
pub fn find_project_root(start: &Path) -> Result<PathBuf, BmtError> {
    start
        .ancestors()
        .find(|dir| dir.join(MARKER_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| BmtError::ProjectRootNotFound {
            marker: MARKER_FILE.to_string(),
            start: start.to_path_buf(),
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub scripts: PathBuf,
    pub plugins: PathBuf,
    /// Prepended to the children's module search path.
    pub source: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            scripts: PathBuf::from("scripts"),
            plugins: PathBuf::from("plugins"),
            source: PathBuf::from("src"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    pub extensions: Vec<String>,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            interpreter: None,
            extensions: vec!["py".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebcamSettings {
    pub default_camera: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub fps: u32,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        Self {
            default_camera: 0,
            frame_width: 640,
            frame_height: 480,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub max_commits: u32,
    pub exclude_patterns: Vec<String>,
    pub summaries_dir: PathBuf,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            max_commits: 10,
            exclude_patterns: vec!["*.log".into(), "*.tmp".into(), "__pycache__".into()],
            summaries_dir: PathBuf::from("__dev_logs__").join("commit_summaries"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Name of the environment variable holding the LLM API key.
    pub api_key_env: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

/// Python packages reported by `check-dependencies`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySettings {
    pub required: Vec<String>,
    /// Optional packages keyed by feature group.
    pub optional: BTreeMap<String, Vec<String>>,
}

impl Default for DependencySettings {
    fn default() -> Self {
        let names = |packages: &[&str]| packages.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        Self {
            required: names(&["opencv-python", "numpy", "rich", "click", "python-dotenv"]),
            optional: BTreeMap::from([
                ("agents".to_string(), names(&["pyautogen"])),
                ("hardware".to_string(), names(&["pyautogui"])),
                ("dev".to_string(), names(&["pytest", "black", "isort", "mypy", "bandit"])),
            ]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub scripts: ScriptSettings,
    pub webcam: WebcamSettings,
    pub git: GitSettings,
    pub agents: AgentSettings,
    pub dependencies: DependencySettings,
}

impl Settings {
    pub fn parse(content: &str) -> Result<Self, BmtError> {
        toml::from_str(content).map_err(|e| BmtError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }

    /// Problems that would stop scripts or agents from working.
    ///
    /// `lookup` resolves environment variables so tests do not need to touch
    /// the process environment.
    pub fn validate_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut problems = vec![];

        match lookup(&self.agents.api_key_env) {
            Some(value) if !value.trim().is_empty() => {}
            _ => problems.push(format!("{} is not set", self.agents.api_key_env)),
        }

        let webcam = &self.webcam;
        if webcam.frame_width == 0 || webcam.frame_height == 0 {
            problems.push(format!(
                "webcam frame size must be non-zero (got {}x{})",
                webcam.frame_width, webcam.frame_height
            ));
        }
        if webcam.fps == 0 {
            problems.push("webcam fps must be non-zero".to_string());
        }

        if !(0.0..=2.0).contains(&self.agents.temperature) {
            problems.push(format!(
                "agents temperature must be between 0 and 2 (got {})",
                self.agents.temperature
            ));
        }
        if self.scripts.extensions.is_empty() {
            problems.push("scripts.extensions must name at least one extension".to_string());
        }

        problems
    }

    pub fn validate(&self) -> Vec<String> {
        self.validate_with(|key| env::var(key).ok())
    }
}

/// A discovered project: its root directory and the settings read from its marker file.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub settings: Settings,
}

impl Project {
    pub fn discover(start: &Path) -> Result<Self> {
        let root = find_project_root(start)?;
        let settings = Settings::load(&root.join(MARKER_FILE))?;
        Ok(Self { root, settings })
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(&self.settings.paths.scripts)
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.root.join(&self.settings.paths.plugins)
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(&self.settings.paths.source)
    }
}
