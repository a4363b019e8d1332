//! Plugin discovery and command registration.
//!
//! Each plugin is a directory under a plugin root holding one entry file.
//! The [`PluginLoader`] turns that file into a [`Plugin`], whose `register`
//! hook receives a [`PluginHost`] and may add commands to the CLI. A plugin
//! that fails to load is logged and skipped; the others still load.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use homedir::my_home;

use crate::config::Project;
use crate::error::BmtError;

/// Subcommands owned by the CLI itself. Plugins cannot shadow them.
pub const BUILTIN_COMMANDS: &[&str] = &["version", "list", "run", "plugins", "config", "git", "check-dependencies", "help"];

/// A command contributed by a plugin.
pub trait PluginCommand {
    fn name(&self) -> &str;
    fn about(&self) -> &str;
    fn run(&self, args: &[String]) -> Result<()>;
}

/// A loaded plugin entry file.
pub trait Plugin {
    /// Called once per load with the registration host.
    fn register(&self, host: &mut PluginHost<'_>) -> Result<()>;
}

pub trait PluginLoader {
    /// File name looked up inside each plugin directory.
    fn entry_file(&self) -> &str;

    /// Load the entry file. `Ok(None)` means the file has no registration
    /// function and the plugin should be skipped.
    fn load(&self, name: &str, entry: &Path) -> Result<Option<Box<dyn Plugin>>>;
}

/// The only capability a plugin gets during registration.
pub struct PluginHost<'m> {
    plugin: &'m str,
    existing: &'m [RegisteredCommand],
    pending: Vec<RegisteredCommand>,
    warnings: Vec<String>,
}

impl<'m> PluginHost<'m> {
    fn new(plugin: &'m str, existing: &'m [RegisteredCommand]) -> Self {
        Self {
            plugin,
            existing,
            pending: vec![],
            warnings: vec![],
        }
    }

    /// Add a command to the CLI. Returns `false` (and records a warning) when
    /// the name is taken by a built-in or another plugin command.
    pub fn add_command(&mut self, handler: Box<dyn PluginCommand>) -> bool {
        let name = handler.name().to_string();
        let owner = if BUILTIN_COMMANDS.contains(&name.as_str()) {
            Some("bmtlab".to_string())
        } else {
            self.existing
                .iter()
                .chain(self.pending.iter())
                .find(|cmd| cmd.name() == name)
                .map(|cmd| format!("plugin '{}'", cmd.plugin))
        };

        if let Some(owner) = owner {
            self.warnings.push(format!(
                "Plugin '{}' tried to register command '{}', already provided by {}",
                self.plugin, name, owner
            ));
            return false;
        }

        self.pending.push(RegisteredCommand {
            plugin: self.plugin.to_string(),
            handler,
        });
        true
    }
}

pub struct RegisteredCommand {
    pub plugin: String,
    handler: Box<dyn PluginCommand>,
}

impl RegisteredCommand {
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    pub fn about(&self) -> &str {
        self.handler.about()
    }

    pub fn run(&self, args: &[String]) -> Result<()> {
        self.handler.run(args)
    }
}

pub struct LoadedPlugin {
    pub name: String,
    pub directory: PathBuf,
    pub entry: PathBuf,
    /// Names of the commands this plugin registered.
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Empty,
    Loading,
    Loaded,
}

/// Outcome of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub warnings: Vec<String>,
    pub failures: Vec<String>,
}

impl LoadReport {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    fn fail(&mut self, plugin: &str, error: anyhow::Error) {
        let error = BmtError::PluginLoad {
            plugin: plugin.to_string(),
            reason: format!("{:#}", error),
        };
        tracing::error!("{}", error);
        self.failures.push(error.to_string());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PluginRoot {
    pub path: PathBuf,
    /// Project roots are created empty when missing; user roots are not.
    pub create_if_missing: bool,
}

impl PluginRoot {
    pub fn project(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_if_missing: true,
        }
    }

    pub fn user(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create_if_missing: false,
        }
    }
}

/// Project plugins first, then `~/.bmtlab/plugins`.
pub fn default_roots(project: Option<&Project>) -> Vec<PluginRoot> {
    let mut roots = vec![];
    if let Some(project) = project {
        roots.push(PluginRoot::project(project.plugins_dir()));
    }
    if let Some(home) = my_home().ok().flatten() {
        roots.push(PluginRoot::user(home.join(".bmtlab").join("plugins")));
    }
    roots
}

pub struct PluginManager {
    roots: Vec<PluginRoot>,
    loader: Box<dyn PluginLoader>,
    plugins: Vec<LoadedPlugin>,
    commands: Vec<RegisteredCommand>,
    state: LoadState,
}

impl PluginManager {
    pub fn new(roots: Vec<PluginRoot>, loader: Box<dyn PluginLoader>) -> Self {
        Self {
            roots,
            loader,
            plugins: vec![],
            commands: vec![],
            state: LoadState::Empty,
        }
    }

    /// Construct and load eagerly.
    pub fn load_from(roots: Vec<PluginRoot>, loader: Box<dyn PluginLoader>) -> (Self, LoadReport) {
        let mut manager = Self::new(roots, loader);
        let report = manager.load();
        (manager, report)
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Scan every root and load the plugins found there.
    pub fn load(&mut self) -> LoadReport {
        self.state = LoadState::Loading;
        let mut report = LoadReport::default();

        for root in self.roots.clone() {
            for dir in plugin_directories(&root, &mut report) {
                self.load_plugin(&dir, &mut report);
            }
        }

        tracing::debug!(
            "Loaded {} plugin(s), {} warning(s), {} failure(s)",
            report.loaded.len(),
            report.warnings.len(),
            report.failures.len()
        );
        self.state = LoadState::Loaded;
        report
    }

    /// Forget everything and scan again.
    pub fn reload(&mut self) -> LoadReport {
        self.plugins.clear();
        self.commands.clear();
        self.state = LoadState::Empty;
        self.load()
    }

    fn load_plugin(&mut self, dir: &Path, report: &mut LoadReport) {
        let name = dir_name(dir);
        let entry = dir.join(self.loader.entry_file());

        if !entry.is_file() {
            report.warn(format!(
                "Plugin '{}' has no {} file, skipping",
                name,
                self.loader.entry_file()
            ));
            return;
        }
        if self.get_plugin(&name).is_some() {
            report.warn(format!(
                "Plugin '{}' in {} is shadowed by an already loaded plugin of the same name",
                name,
                dir.display()
            ));
            return;
        }

        let handle = match self.loader.load(&name, &entry) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                report.warn(format!(
                    "Plugin '{}' has no register function, skipping",
                    name
                ));
                return;
            }
            Err(e) => {
                report.fail(&name, e);
                return;
            }
        };

        let mut host = PluginHost::new(&name, &self.commands);
        if let Err(e) = handle.register(&mut host) {
            report.fail(&name, e);
            return;
        }
        let PluginHost {
            pending, warnings, ..
        } = host;

        for warning in warnings {
            report.warn(warning);
        }
        let commands: Vec<String> = pending.iter().map(|cmd| cmd.name().to_string()).collect();
        self.commands.extend(pending);

        tracing::info!("Loaded plugin {} ({} command(s))", name, commands.len());
        report.loaded.push(name.clone());
        self.plugins.push(LoadedPlugin {
            name,
            directory: dir.to_path_buf(),
            entry,
            commands,
        });
    }

    /// Plugin names in discovery order.
    pub fn list_plugins(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn get_plugin(&self, name: &str) -> Option<&LoadedPlugin> {
        self.plugins.iter().find(|p| p.name == name)
    }

    pub fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    pub fn commands(&self) -> &[RegisteredCommand] {
        &self.commands
    }

    pub fn find_command(&self, name: &str) -> Option<&RegisteredCommand> {
        self.commands.iter().find(|cmd| cmd.name() == name)
    }
}

/// Immediate subdirectories of a root, sorted by name. Creates project roots
/// that do not exist yet.
fn plugin_directories(root: &PluginRoot, report: &mut LoadReport) -> Vec<PathBuf> {
    if !root.path.is_dir() {
        if root.create_if_missing {
            match fs::create_dir_all(&root.path) {
                Ok(()) => tracing::debug!("Created plugin directory {}", root.path.display()),
                Err(e) => report.warn(format!(
                    "Could not create plugin directory {}: {}",
                    root.path.display(),
                    e
                )),
            }
        }
        return vec![];
    }

    let entries = match fs::read_dir(&root.path) {
        Ok(entries) => entries,
        Err(e) => {
            report.warn(format!(
                "Could not read plugin directory {}: {}",
                root.path.display(),
                e
            ));
            return vec![];
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            let name = dir_name(path);
            !name.starts_with('.') && name != "__pycache__"
        })
        .collect();
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Interprets the entry file line by line:
    /// `fail-load`, `no-register`, `fail-register`, `command <name>`.
    struct FakeLoader;

    struct FakePlugin {
        commands: Vec<String>,
        fail_register: bool,
    }

    struct FakeCommand(String);

    impl PluginCommand for FakeCommand {
        fn name(&self) -> &str {
            &self.0
        }

        fn about(&self) -> &str {
            "fake command"
        }

        fn run(&self, args: &[String]) -> Result<()> {
            if args.iter().any(|a| a == "fail") {
                anyhow::bail!("{} failed", self.0);
            }
            Ok(())
        }
    }

    impl Plugin for FakePlugin {
        fn register(&self, host: &mut PluginHost<'_>) -> Result<()> {
            for name in &self.commands {
                host.add_command(Box::new(FakeCommand(name.clone())));
            }
            if self.fail_register {
                anyhow::bail!("register raised");
            }
            Ok(())
        }
    }

    impl PluginLoader for FakeLoader {
        fn entry_file(&self) -> &str {
            "main.py"
        }

        fn load(&self, _name: &str, entry: &Path) -> Result<Option<Box<dyn Plugin>>> {
            let content = fs::read_to_string(entry)?;
            let mut plugin = FakePlugin {
                commands: vec![],
                fail_register: false,
            };
            for line in content.lines() {
                match line.split_whitespace().collect::<Vec<_>>().as_slice() {
                    ["fail-load"] => anyhow::bail!("syntax error in entry file"),
                    ["no-register"] => return Ok(None),
                    ["fail-register"] => plugin.fail_register = true,
                    ["command", name] => plugin.commands.push(name.to_string()),
                    _ => {}
                }
            }
            Ok(Some(Box::new(plugin)))
        }
    }

    fn write_plugin(root: &Path, name: &str, entry: Option<&str>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        if let Some(content) = entry {
            fs::write(dir.join("main.py"), content).unwrap();
        }
    }

    fn manager(root: &Path) -> (PluginManager, LoadReport) {
        PluginManager::load_from(vec![PluginRoot::project(root)], Box::new(FakeLoader))
    }

    #[test]
    fn test_valid_and_entryless_plugins() {
        let dir = tempdir().unwrap();
        write_plugin(dir.path(), "example", Some("command example"));
        write_plugin(dir.path(), "broken", None);

        let (manager, report) = manager(dir.path());

        assert_eq!(manager.list_plugins(), vec!["example"]);
        assert_eq!(report.loaded, vec!["example"]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("broken"));
        assert!(manager.get_plugin("broken").is_none());
        assert_eq!(manager.state(), LoadState::Loaded);
    }

    #[test]
    fn test_missing_register_function_is_skipped() {
        let dir = tempdir().unwrap();
        write_plugin(dir.path(), "quiet", Some("no-register"));

        let (manager, report) = manager(dir.path());

        assert!(manager.list_plugins().is_empty());
        assert!(report.warnings[0].contains("register"));
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_failures_are_isolated_per_plugin() {
        let dir = tempdir().unwrap();
        write_plugin(dir.path(), "a_bad_load", Some("fail-load"));
        write_plugin(dir.path(), "b_bad_register", Some("command half\nfail-register"));
        write_plugin(dir.path(), "c_good", Some("command hello"));

        let (manager, report) = manager(dir.path());

        assert_eq!(manager.list_plugins(), vec!["c_good"]);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures[0].contains("a_bad_load"));
        assert!(report.failures[0].contains("syntax error"));
        // Commands from a plugin whose register failed are discarded.
        assert!(manager.find_command("half").is_none());
        assert!(manager.find_command("hello").is_some());
    }

    #[test]
    fn test_missing_project_root_is_created() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("plugins");

        let (manager, report) = manager(&root);

        assert!(root.is_dir());
        assert!(manager.list_plugins().is_empty());
        assert_eq!(report, LoadReport::default());
    }

    #[test]
    fn test_missing_user_root_is_not_created() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("user-plugins");

        let (manager, _) =
            PluginManager::load_from(vec![PluginRoot::user(&root)], Box::new(FakeLoader));

        assert!(!root.exists());
        assert!(manager.list_plugins().is_empty());
    }

    #[test]
    fn test_reload_drops_deleted_plugins() {
        let dir = tempdir().unwrap();
        write_plugin(dir.path(), "example", Some("command example"));
        write_plugin(dir.path(), "other", Some("command other"));

        let (mut manager, _) = manager(dir.path());
        assert_eq!(manager.list_plugins(), vec!["example", "other"]);

        fs::remove_dir_all(dir.path().join("example")).unwrap();
        let report = manager.reload();

        assert_eq!(manager.list_plugins(), vec!["other"]);
        assert_eq!(report.loaded, vec!["other"]);
        assert!(manager.find_command("example").is_none());
        assert!(manager.find_command("other").is_some());
    }

    #[test]
    fn test_command_name_collisions() {
        let dir = tempdir().unwrap();
        write_plugin(dir.path(), "first", Some("command greet\ncommand run"));
        write_plugin(dir.path(), "second", Some("command greet\ncommand wave"));

        let (manager, report) = manager(dir.path());

        assert_eq!(manager.list_plugins(), vec!["first", "second"]);
        assert_eq!(manager.get_plugin("first").unwrap().commands, vec!["greet"]);
        assert_eq!(manager.get_plugin("second").unwrap().commands, vec!["wave"]);
        assert_eq!(manager.find_command("greet").unwrap().plugin, "first");
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().any(|w| w.contains("'run'")));
    }

    #[test]
    fn test_project_plugin_shadows_user_plugin() {
        let project = tempdir().unwrap();
        let user = tempdir().unwrap();
        write_plugin(project.path(), "example", Some("command from-project"));
        write_plugin(user.path(), "example", Some("command from-user"));
        write_plugin(user.path(), "extra", Some("command extra"));

        let (manager, report) = PluginManager::load_from(
            vec![PluginRoot::project(project.path()), PluginRoot::user(user.path())],
            Box::new(FakeLoader),
        );

        assert_eq!(manager.list_plugins(), vec!["example", "extra"]);
        assert_eq!(
            manager.get_plugin("example").unwrap().directory,
            project.path().join("example")
        );
        assert!(manager.find_command("from-user").is_none());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_registered_command_runs() {
        let dir = tempdir().unwrap();
        write_plugin(dir.path(), "example", Some("command example"));
        let (manager, _) = manager(dir.path());

        let command = manager.find_command("example").unwrap();
        assert_eq!(command.about(), "fake command");
        assert!(command.run(&[]).is_ok());
        assert!(command.run(&["fail".to_string()]).is_err());
    }

    #[test]
    fn test_state_before_loading() {
        let dir = tempdir().unwrap();
        let manager = PluginManager::new(vec![PluginRoot::project(dir.path())], Box::new(FakeLoader));
        assert_eq!(manager.state(), LoadState::Empty);
        assert!(manager.list_plugins().is_empty());
    }
}
