//! Resolving `category.name` identifiers to script files and running them.
//!
//! Scripts live in `<scripts-root>/<category>/<name>.<ext>`. Every
//! subdirectory of the scripts root is a category; there is no allow-list.

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::config::Project;
use crate::error::BmtError;
use crate::process::{detect_python_interpreter, LaunchSpec, ProcessLauncher};

/// Package marker files are never listed or resolved as scripts.
pub const PACKAGE_MARKER: &str = "__init__.py";
pub const NO_DESCRIPTION: &str = "No description";
/// Module search path of the child interpreter.
pub const SEARCH_PATH_ENV: &str = "PYTHONPATH";
pub const PROJECT_ROOT_ENV: &str = "BMTLAB_PROJECT_ROOT";
pub const CONFIG_ENV: &str = "BMTLAB_CONFIG";

/// A parsed `category.name` token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptIdentifier {
    pub category: String,
    pub name: String,
}

impl ScriptIdentifier {
    pub fn parse(identifier: &str) -> Result<Self, BmtError> {
        match identifier.split('.').collect::<Vec<_>>().as_slice() {
            [category, name] if !category.is_empty() && !name.is_empty() => Ok(Self {
                category: category.to_string(),
                name: name.to_string(),
            }),
            _ => Err(BmtError::MalformedIdentifier(identifier.to_string())),
        }
    }
}

impl FromStr for ScriptIdentifier {
    type Err = BmtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ScriptIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.name)
    }
}

/// One row of the script listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptEntry {
    pub category: String,
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

impl ScriptEntry {
    pub fn identifier(&self) -> String {
        format!("{}.{}", self.category, self.name)
    }
}

pub struct ScriptResolver<'a> {
    scripts_root: PathBuf,
    project_root: Option<PathBuf>,
    source_root: Option<PathBuf>,
    config_file: Option<PathBuf>,
    interpreter: Option<String>,
    extensions: Vec<String>,
    launcher: &'a dyn ProcessLauncher,
}

impl<'a> ScriptResolver<'a> {
    pub fn new(scripts_root: impl Into<PathBuf>, launcher: &'a dyn ProcessLauncher) -> Self {
        Self {
            scripts_root: scripts_root.into(),
            project_root: None,
            source_root: None,
            config_file: None,
            interpreter: None,
            extensions: vec!["py".to_string()],
            launcher,
        }
    }

    pub fn for_project(project: &Project, launcher: &'a dyn ProcessLauncher) -> Self {
        let mut resolver = Self::new(project.scripts_dir(), launcher)
            .with_source_root(project.source_dir())
            .with_extensions(project.settings.scripts.extensions.clone());
        resolver.project_root = Some(project.root.clone());
        resolver.config_file = Some(project.config_file());
        resolver.interpreter = project.settings.scripts.interpreter.clone();
        resolver
    }

    pub fn with_source_root(mut self, source_root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(source_root.into());
        self
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn scripts_root(&self) -> &Path {
        &self.scripts_root
    }

    /// Find `<root>/<category>/<name>.<ext>`, looking only directly inside the
    /// category directory. An exact stem match wins; otherwise `-` and `_`
    /// are treated as equal so `git.commit-summary` finds `commit_summary.py`.
    pub fn resolve(&self, category: &str, name: &str) -> Option<PathBuf> {
        if !is_single_component(category) {
            return None;
        }
        let category_dir = self.scripts_root.join(category);
        if !category_dir.is_dir() {
            return None;
        }

        let files = self.script_files(&category_dir);
        files
            .iter()
            .find(|path| file_stem(path) == name)
            .or_else(|| {
                let wanted = normalize_name(name);
                files
                    .iter()
                    .find(|path| normalize_name(&file_stem(path)) == wanted)
            })
            .cloned()
    }

    /// Every script in every category, sorted by category then name.
    /// Missing directories are skipped rather than reported.
    pub fn list_all(&self) -> Vec<ScriptEntry> {
        let mut entries = vec![];

        for category_dir in sorted_subdirectories(&self.scripts_root) {
            let category = file_name(&category_dir);
            for path in self.script_files(&category_dir) {
                entries.push(ScriptEntry {
                    category: category.clone(),
                    name: file_stem(&path),
                    description: read_description(&path),
                    path,
                });
            }
        }

        entries
    }

    /// Parse, resolve and execute in one go.
    pub fn run(&self, identifier: &str, args: &[String]) -> Result<()> {
        let id = ScriptIdentifier::parse(identifier)?;
        let path = self
            .resolve(&id.category, &id.name)
            .ok_or_else(|| BmtError::ScriptNotFound(id.to_string()))?;
        self.execute(&path, &id, args)
    }

    /// Launch the script and wait for it. A non-zero exit becomes
    /// [`BmtError::ScriptExecutionFailed`]; there is no retry.
    pub fn execute(&self, path: &Path, id: &ScriptIdentifier, args: &[String]) -> Result<()> {
        let spec = self.launch_spec(path, args)?;
        tracing::debug!("Executing {} with {}", id, spec.display());

        match self.launcher.run(&spec)? {
            Some(0) => Ok(()),
            code => Err(BmtError::ScriptExecutionFailed {
                script: id.to_string(),
                code,
            }
            .into()),
        }
    }

    /// Command line and environment overrides for a script.
    pub fn launch_spec(&self, path: &Path, args: &[String]) -> Result<LaunchSpec> {
        let interpreter = self.interpreter()?;
        let mut spec = LaunchSpec::new(interpreter)
            .arg(path.to_string_lossy())
            .args(args.iter().cloned());

        if let Some(source_root) = &self.source_root {
            let value = prepend_search_path(source_root, env::var_os(SEARCH_PATH_ENV))?;
            spec = spec.env(SEARCH_PATH_ENV, value);
        }
        if let Some(root) = &self.project_root {
            spec = spec
                .env(PROJECT_ROOT_ENV, root.as_os_str())
                .current_dir(root);
        }
        if let Some(config) = &self.config_file {
            spec = spec.env(CONFIG_ENV, config.as_os_str());
        }
        Ok(spec)
    }

    fn interpreter(&self) -> Result<String> {
        match &self.interpreter {
            Some(interpreter) => Ok(interpreter.clone()),
            None => detect_python_interpreter(self.launcher).context(
                "No Python interpreter found. Install Python 3 or set scripts.interpreter in bmtlab.toml",
            ),
        }
    }

    fn script_files(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .filter(|path| self.has_script_extension(path))
                .filter(|path| file_name(path) != PACKAGE_MARKER)
                .collect(),
            Err(e) => {
                tracing::debug!("Skipping {}: {}", dir.display(), e);
                vec![]
            }
        };
        files.sort();
        files
    }

    fn has_script_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.extensions.iter().any(|known| ext == known.as_str()))
            .unwrap_or(false)
    }
}

/// `source_root` followed by the existing entries, joined with the platform separator.
pub fn prepend_search_path(source_root: &Path, existing: Option<OsString>) -> Result<OsString> {
    let mut paths = vec![source_root.to_path_buf()];
    if let Some(existing) = existing.filter(|value| !value.is_empty()) {
        paths.extend(env::split_paths(&existing));
    }
    env::join_paths(paths)
        .with_context(|| format!("Invalid search path entry: {}", source_root.display()))
}

/// First line of the script's leading documentation, or [`NO_DESCRIPTION`].
pub fn read_description(path: &Path) -> String {
    fs::read_to_string(path)
        .ok()
        .and_then(|content| extract_description(&content))
        .unwrap_or_else(|| NO_DESCRIPTION.to_string())
}

/// Look at the top of a script for a docstring (`"""` or `'''`), falling back
/// to the first `#` comment that is not a shebang or encoding declaration.
pub fn extract_description(content: &str) -> Option<String> {
    let mut lines = content.lines();
    let mut comment = None;

    while let Some(line) = lines.next() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("#!") {
            continue;
        }
        if let Some(text) = trimmed.strip_prefix('#') {
            let text = text.trim();
            if comment.is_none() && !text.is_empty() && !is_encoding_declaration(text) {
                comment = Some(text.to_string());
            }
            continue;
        }
        for quote in ["\"\"\"", "'''"] {
            if let Some(rest) = trimmed.strip_prefix(quote) {
                return docstring_first_line(rest, quote, &mut lines).or(comment);
            }
        }
        break;
    }

    comment
}

fn docstring_first_line<'c>(
    opening: &'c str,
    quote: &str,
    rest: &mut impl Iterator<Item = &'c str>,
) -> Option<String> {
    for line in std::iter::once(opening).chain(rest) {
        let (text, closed) = match line.find(quote) {
            Some(end) => (&line[..end], true),
            None => (line, false),
        };
        let text = text.trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
        if closed {
            return None;
        }
    }
    None
}

fn is_encoding_declaration(comment: &str) -> bool {
    comment.contains("coding:") || comment.contains("coding=")
}

fn sorted_subdirectories(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter(|path| {
                let name = file_name(path);
                !name.starts_with('.') && name != "__pycache__"
            })
            .collect(),
        Err(_) => vec![],
    };
    dirs.sort();
    dirs
}

fn is_single_component(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn normalize_name(name: &str) -> String {
    name.replace('-', "_")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
