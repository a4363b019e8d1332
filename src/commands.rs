//! Handlers behind each CLI subcommand.

use std::env::consts::{ARCH, OS};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use indicatif::ProgressBar;

use crate::config::{find_project_root, Project, Settings, MARKER_FILE};
use crate::deps;
use crate::error::BmtError;
use crate::git::{self, Git};
use crate::plugin::{default_roots, LoadReport, PluginManager};
use crate::process::{detect_python_interpreter, ProcessLauncher};
use crate::python::{self, PythonLoader};
use crate::script::{ScriptIdentifier, ScriptResolver};
use crate::utils::display::{print_banner, row, table};
use crate::utils::Console;

/// State shared by every command of one invocation.
pub struct Session<'a> {
    pub cwd: PathBuf,
    pub project: Option<Project>,
    pub plugins: PluginManager,
    config_error: Option<String>,
    launcher: &'a dyn ProcessLauncher,
}

impl<'a> Session<'a> {
    /// Discover the project around `cwd` and load plugins eagerly.
    pub fn open(cwd: PathBuf, launcher: &'a dyn ProcessLauncher) -> Self {
        let (project, config_error) = match find_project_root(&cwd) {
            Ok(root) => match Settings::load(&root.join(MARKER_FILE)) {
                Ok(settings) => (Some(Project { root, settings }), None),
                Err(e) => {
                    tracing::warn!("Ignoring {}: {:#}", MARKER_FILE, e);
                    (None, Some(format!("{:#}", e)))
                }
            },
            Err(e) => {
                tracing::debug!("{}", e);
                (None, None)
            }
        };

        let loader = PythonLoader::new(
            project.as_ref().map(|p| p.root.clone()),
            project.as_ref().map(Project::source_dir),
        );

        let bar = ProgressBar::new_spinner();
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message("Loading plugins...");
        let (plugins, _) = PluginManager::load_from(default_roots(project.as_ref()), Box::new(loader));
        bar.finish_and_clear();

        Self::with_parts(cwd, project, plugins, launcher).with_config_error(config_error)
    }

    pub fn with_parts(
        cwd: PathBuf,
        project: Option<Project>,
        plugins: PluginManager,
        launcher: &'a dyn ProcessLauncher,
    ) -> Self {
        Self {
            cwd,
            project,
            plugins,
            config_error: None,
            launcher,
        }
    }

    fn with_config_error(mut self, config_error: Option<String>) -> Self {
        self.config_error = config_error;
        self
    }

    /// The discovered project, or the reason there is none.
    pub fn project(&self) -> Result<&Project, BmtError> {
        match (&self.project, &self.config_error) {
            (Some(project), _) => Ok(project),
            (None, Some(message)) => Err(BmtError::Config(message.clone())),
            (None, None) => Err(BmtError::ProjectRootNotFound {
                marker: MARKER_FILE.to_string(),
                start: self.cwd.clone(),
            }),
        }
    }

    fn resolver(&self) -> Result<ScriptResolver<'a>> {
        Ok(ScriptResolver::for_project(self.project()?, self.launcher))
    }

    fn settings(&self) -> Settings {
        self.project
            .as_ref()
            .map(|p| p.settings.clone())
            .unwrap_or_default()
    }
}

pub fn cmd_version(session: &Session, console: &mut dyn Console) {
    let version = env!("CARGO_PKG_VERSION");
    print_banner(console, version);

    let interpreter = session
        .project
        .as_ref()
        .and_then(|p| p.settings.scripts.interpreter.clone())
        .or_else(|| detect_python_interpreter(session.launcher))
        .unwrap_or_else(|| "not found".to_string());
    let project = session
        .project
        .as_ref()
        .map(|p| p.root.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut info = table(&["item", "value"]);
    info.add_row(row("bmtlab", &[version]));
    info.add_row(row("Operating system", &[OS]));
    info.add_row(row("Architecture", &[ARCH]));
    info.add_row(row("Embedded Python", &[python::embedded_version().as_str()]));
    info.add_row(row("Script interpreter", &[interpreter.as_str()]));
    info.add_row(row("Project root", &[project.as_str()]));
    console.plain(&info.to_string());
}

pub fn cmd_list(session: &Session, console: &mut dyn Console) -> Result<()> {
    let resolver = session.resolver()?;
    let entries = resolver.list_all();

    if entries.is_empty() {
        console.warning(&format!(
            "No scripts found in {}",
            resolver.scripts_root().display()
        ));
        return Ok(());
    }

    console.bold("Available scripts:");
    let mut scripts = table(&["category", "script", "description"]);
    for entry in &entries {
        scripts.add_row(row(&entry.category, &[entry.name.as_str(), entry.description.as_str()]));
    }
    console.plain(&scripts.to_string());

    console.bold("Usage:");
    console.info("  bmtlab run -s category.script-name [-- args...]");
    Ok(())
}

pub fn cmd_run(
    session: &Session,
    console: &mut dyn Console,
    script: Option<&str>,
    args: &[String],
) -> Result<()> {
    let Some(script) = script else {
        return cmd_list(session, console);
    };

    let id = ScriptIdentifier::parse(script)?;
    let resolver = session.resolver()?;
    let path = resolver
        .resolve(&id.category, &id.name)
        .ok_or_else(|| BmtError::ScriptNotFound(id.to_string()))?;

    console.success(&format!("Running script: {}", id));
    resolver.execute(&path, &id, args)
}

pub fn cmd_plugins(session: &mut Session, console: &mut dyn Console, reload: bool) {
    if reload {
        let report = session.plugins.reload();
        print_report(console, &report);
    }

    let plugins = session.plugins.plugins();
    if plugins.is_empty() {
        console.warning("No plugins installed");
        return;
    }

    console.bold("Installed plugins:");
    let mut listing = table(&["plugin", "commands", "entry"]);
    for plugin in plugins {
        let commands = if plugin.commands.is_empty() {
            "-".to_string()
        } else {
            plugin
                .commands
                .iter()
                .map(|name| describe_command(&session.plugins, name))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let entry = plugin.entry.display().to_string();
        listing.add_row(row(&plugin.name, &[commands.as_str(), entry.as_str()]));
    }
    console.plain(&listing.to_string());
}

/// `name: help text`, or just the name when the plugin gave no help.
fn describe_command(plugins: &PluginManager, name: &str) -> String {
    match plugins.find_command(name).map(|command| command.about().trim()) {
        Some(about) if !about.is_empty() => format!("{}: {}", name, about),
        _ => name.to_string(),
    }
}

fn print_report(console: &mut dyn Console, report: &LoadReport) {
    console.info(&format!("Reloaded {} plugin(s)", report.loaded.len()));
    for warning in &report.warnings {
        console.warning(warning);
    }
    for failure in &report.failures {
        console.error(failure);
    }
}

pub fn cmd_config_show(session: &Session, console: &mut dyn Console) -> Result<()> {
    let project = session.project()?;
    console.bold(&format!("# {}", project.config_file().display()));
    console.plain(&project.settings.to_toml()?);
    Ok(())
}

pub fn cmd_config_validate(session: &Session, console: &mut dyn Console) -> Result<()> {
    let project = session.project()?;
    let problems = project.settings.validate();
    if problems.is_empty() {
        console.success("Configuration is valid");
        return Ok(());
    }
    for problem in &problems {
        console.warning(&format!("- {}", problem));
    }
    Err(BmtError::Config(format!("{} problem(s) found", problems.len())).into())
}

/// Options of `git commit-summary`.
#[derive(Debug, Default)]
pub struct SummaryOptions {
    pub summary_file: Option<PathBuf>,
    pub prompt_only: bool,
}

pub fn cmd_commit_summary(
    session: &Session,
    console: &mut dyn Console,
    options: &SummaryOptions,
    input: &mut dyn Read,
) -> Result<Option<PathBuf>> {
    let settings = session.settings();
    let git = Git::new(session.launcher).in_dir(&session.cwd);

    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message("Analyzing git repository...");
    let commit = git.current_commit();
    let files = git::filter_excluded(git.staged_files(), &settings.git.exclude_patterns);
    let recent = git.recent_commits(settings.git.max_commits);
    bar.finish_and_clear();
    let commit = commit?;

    console.info(&format!("Creating a summary for commit {}", commit.hash));
    console.info("Ask your AI assistant to analyze the following request:");
    console.plain("");
    console.plain(&git::render_prompt(&commit, &files, &recent));
    console.plain("");

    if options.prompt_only {
        return Ok(None);
    }

    let summary = match &options.summary_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read summary from {}", path.display()))?,
        None => {
            console.info("Paste the summary from your assistant, then press Ctrl+D:");
            let mut summary = String::new();
            input
                .read_to_string(&mut summary)
                .context("Failed to read summary from stdin")?;
            summary
        }
    };

    if summary.trim().is_empty() {
        bail!("No summary provided, nothing saved");
    }

    let dir = resolve_against(&session.cwd, &settings.git.summaries_dir);
    let path = git::save_summary(&dir, Local::now().date_naive(), &summary, &commit, &files)?;
    console.success(&format!("Commit summary saved to: {}", path.display()));
    Ok(Some(path))
}

/// Run a command that is not built in. `args[0]` is the command name.
///
/// Plugin commands win. Otherwise `bmtlab <category> <script> [args...]` is
/// the short form of `bmtlab run -s category.script -- args...`.
pub fn cmd_external(session: &Session, console: &mut dyn Console, args: &[String]) -> Result<()> {
    let Some((name, rest)) = args.split_first() else {
        bail!("No command given");
    };
    if let Some(command) = session.plugins.find_command(name) {
        tracing::debug!("Dispatching '{}' to plugin {}", name, command.plugin);
        return command.run(rest);
    }

    if let Some((script, script_args)) = rest.split_first() {
        let id = ScriptIdentifier::parse(&format!("{}.{}", name, script));
        if let (Ok(id), Ok(resolver)) = (id, session.resolver()) {
            if let Some(path) = resolver.resolve(&id.category, &id.name) {
                console.success(&format!("Running script: {}", id));
                return resolver.execute(&path, &id, script_args);
            }
        }
    }

    bail!(
        "Unknown command '{}'. Run 'bmtlab --help', 'bmtlab list' or 'bmtlab plugins'",
        name
    )
}

/// Show which of the configured Python packages are installed.
pub fn cmd_check_dependencies(session: &Session, console: &mut dyn Console) -> Result<()> {
    let settings = session.settings();
    let interpreter = settings
        .scripts
        .interpreter
        .clone()
        .or_else(|| detect_python_interpreter(session.launcher))
        .context("No Python interpreter found. Install Python 3 or set scripts.interpreter in bmtlab.toml")?;

    let bar = ProgressBar::new_spinner();
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_message("Checking installed packages...");
    let statuses = deps::check_packages(session.launcher, &interpreter, &settings.dependencies);
    bar.finish_and_clear();

    console.bold(&format!("Package status for {}:", interpreter));
    let mut packages = table(&["package", "version", "status"]);
    for status in &statuses {
        let version = status.version.as_deref().unwrap_or("N/A");
        let state = if status.is_installed() { "installed" } else { "missing" };
        packages.add_row(row(&status.label(), &[version, state]));
    }
    console.plain(&packages.to_string());

    let missing = |required: bool| {
        statuses
            .iter()
            .filter(|s| s.is_required() == required && !s.is_installed())
            .map(|s| s.package.as_str())
            .collect::<Vec<_>>()
    };
    let missing_required = missing(true);
    let missing_optional = missing(false);

    if missing_required.is_empty() && missing_optional.is_empty() {
        console.success("All packages are installed");
        return Ok(());
    }
    if !missing_required.is_empty() {
        console.warning(&format!("Missing required packages: {}", missing_required.join(", ")));
        console.info(&format!("  {} -m pip install {}", interpreter, missing_required.join(" ")));
    }
    if !missing_optional.is_empty() {
        console.info(&format!("Optional packages not installed: {}", missing_optional.join(", ")));
    }
    Ok(())
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
