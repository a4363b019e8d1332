//! Python plugins, executed in an embedded interpreter.
//!
//! A plugin's `main.py` must define `register(api)`. The `api` object lets the
//! plugin add commands:
//!
//! ```python
//! def register(api):
//!     @api.command("hello", help="Say hello")
//!     def hello(args):
//!         print("hello", *args)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pyo3::prelude::*;
use pyo3::types::PyList;

use crate::plugin::{Plugin, PluginCommand, PluginHost, PluginLoader};

pub const ENTRY_FILE: &str = "main.py";
const REGISTER_FUNCTION: &str = "register";

/// Registration object handed to `register(api)`. Commands are only collected
/// here; the host decides which ones are accepted.
const PLUGIN_API: &str = r#"
class PluginApi:
    def __init__(self, name, project_root):
        self.name = name
        self.project_root = project_root
        self._commands = []

    def command(self, name, callback=None, help=""):
        def add(fn):
            lines = (fn.__doc__ or "").strip().splitlines()
            text = help or (lines[0] if lines else "")
            self._commands.append((str(name), fn, str(text)))
            return fn

        if callback is None:
            return add
        return add(callback)
"#;

pub struct PythonLoader {
    project_root: Option<PathBuf>,
    source_root: Option<PathBuf>,
}

impl PythonLoader {
    pub fn new(project_root: Option<PathBuf>, source_root: Option<PathBuf>) -> Self {
        Self {
            project_root,
            source_root,
        }
    }

    /// Make the plugin's own directory and the project sources importable.
    fn extend_sys_path(&self, py: Python<'_>, plugin_dir: &Path) -> Result<()> {
        let sys = PyModule::import(py, "sys")?;
        let path = sys.getattr("path")?.extract::<&PyList>()?;

        let mut wanted = vec![plugin_dir.to_path_buf()];
        if let Some(source_root) = &self.source_root {
            wanted.push(source_root.clone());
        }
        for dir in wanted.into_iter().rev() {
            let dir = dir.to_string_lossy().to_string();
            if !path.contains(&dir)? {
                path.insert(0, &dir)?;
            }
        }
        Ok(())
    }
}

impl PluginLoader for PythonLoader {
    fn entry_file(&self) -> &str {
        ENTRY_FILE
    }

    fn load(&self, name: &str, entry: &Path) -> Result<Option<Box<dyn Plugin>>> {
        let code = fs::read_to_string(entry)
            .with_context(|| format!("Failed to read {}", entry.display()))?;
        let plugin_dir = entry.parent().unwrap_or(Path::new("."));
        let file_name = entry.to_string_lossy().to_string();

        Python::with_gil(|py| {
            self.extend_sys_path(py, plugin_dir)?;

            let module = PyModule::from_code(py, &code, &file_name, &format!("bmtlab_plugin_{}", name))?;
            if !module.hasattr(REGISTER_FUNCTION)? {
                return Ok(None);
            }
            let register = module.getattr(REGISTER_FUNCTION)?;
            if !register.is_callable() {
                return Ok(None);
            }
            tracing::debug!("Loaded Python module for plugin {}", name);

            let plugin: Box<dyn Plugin> = Box::new(PythonPlugin {
                name: name.to_string(),
                project_root: self.project_root.clone(),
                register: register.into(),
            });
            Ok(Some(plugin))
        })
    }
}

/// A loaded `main.py` and its `register` function.
pub struct PythonPlugin {
    name: String,
    project_root: Option<PathBuf>,
    register: PyObject,
}

impl Plugin for PythonPlugin {
    fn register(&self, host: &mut PluginHost<'_>) -> Result<()> {
        let collected: Vec<(String, PyObject, String)> = Python::with_gil(|py| -> Result<_> {
            let api_module = PyModule::from_code(py, PLUGIN_API, "bmtlab_plugin_api.py", "bmtlab_plugin_api")?;
            let project_root = self
                .project_root
                .as_ref()
                .map(|root| root.to_string_lossy().to_string());
            let api = api_module
                .getattr("PluginApi")?
                .call1((self.name.as_str(), project_root))?;

            self.register.call1(py, (api,))?;

            Ok(api.getattr("_commands")?.extract()?)
        })?;

        for (name, callback, about) in collected {
            host.add_command(Box::new(PythonCommand {
                name,
                about,
                callback,
            }));
        }
        Ok(())
    }
}

/// A command whose body is a Python callable taking the argument list.
pub struct PythonCommand {
    name: String,
    about: String,
    callback: PyObject,
}

impl PluginCommand for PythonCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn about(&self) -> &str {
        &self.about
    }

    fn run(&self, args: &[String]) -> Result<()> {
        Python::with_gil(|py| {
            let args = PyList::new(py, args);
            let result = self.callback.call1(py, (args,));
            // The interpreter is never finalized, so buffered output must be pushed out here.
            if let Err(e) = flush_stdio(py) {
                tracing::debug!("Flushing Python output failed: {}", e);
            }
            result.with_context(|| format!("Command '{}' raised an exception", self.name))?;
            Ok(())
        })
    }
}

fn flush_stdio(py: Python<'_>) -> PyResult<()> {
    let sys = PyModule::import(py, "sys")?;
    for stream in ["stdout", "stderr"] {
        sys.getattr(stream)?.call_method0("flush")?;
    }
    Ok(())
}

/// Version of the embedded interpreter.
pub fn embedded_version() -> String {
    Python::with_gil(|py| py.version().split_whitespace().next().unwrap_or_default().to_string())
}
