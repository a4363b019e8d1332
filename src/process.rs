//! Child process spawning behind a trait so callers can be tested without
//! actually running anything.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// What to launch. `env` only carries overrides; everything else is
/// inherited from the parent process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, OsString>,
    pub current_dir: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering for log output.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output of a child whose stdout/stderr were captured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captured {
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait ProcessLauncher {
    /// Run with inherited stdio and block until the child exits.
    /// Returns the exit code, `None` if the child was killed by a signal.
    fn run(&self, spec: &LaunchSpec) -> Result<Option<i32>>;

    /// Run with captured output and block until the child exits.
    fn capture(&self, spec: &LaunchSpec) -> Result<Captured>;
}

/// Spawns real processes with `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    fn command(spec: &LaunchSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args).envs(&spec.env);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl ProcessLauncher for SystemLauncher {
    fn run(&self, spec: &LaunchSpec) -> Result<Option<i32>> {
        tracing::debug!("Running: {}", spec.display());
        let status = Self::command(spec)
            .status()
            .with_context(|| format!("Failed to start '{}'", spec.program))?;
        Ok(status.code())
    }

    fn capture(&self, spec: &LaunchSpec) -> Result<Captured> {
        tracing::debug!("Capturing: {}", spec.display());
        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to start '{}'", spec.program))?;
        Ok(Captured {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Find a Python interpreter on `PATH`, preferring `python3`.
pub fn detect_python_interpreter(launcher: &dyn ProcessLauncher) -> Option<String> {
    ["python3", "python"].into_iter().find_map(|candidate| {
        match launcher.capture(&LaunchSpec::new(candidate).arg("--version")) {
            Ok(output) if output.success() => Some(candidate.to_string()),
            _ => None,
        }
    })
}


#[cfg(test)]
mod tests {
    use super::testing::FakeLauncher;
    use super::*;

    #[test]
    fn test_detect_prefers_python3() {
        let launcher = FakeLauncher::default();
        launcher.push_output(0, "Python 3.12.1");
        assert_eq!(detect_python_interpreter(&launcher).as_deref(), Some("python3"));
        assert_eq!(launcher.last().args, vec!["--version".to_string()]);
    }

    #[test]
    fn test_detect_falls_back_to_python() {
        let launcher = FakeLauncher::default();
        launcher.push_spawn_failure("not found");
        launcher.push_output(0, "Python 3.8.10");
        assert_eq!(detect_python_interpreter(&launcher).as_deref(), Some("python"));
    }

    #[test]
    fn test_detect_none_available() {
        let launcher = FakeLauncher::default();
        launcher.push_spawn_failure("not found");
        launcher.push_spawn_failure("not found");
        assert_eq!(detect_python_interpreter(&launcher), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_launcher_reports_exit_code() {
        let spec = LaunchSpec::new("sh").args(["-c", "exit 3"]);
        assert_eq!(SystemLauncher.run(&spec).unwrap(), Some(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_launcher_passes_env_overrides() {
        let spec = LaunchSpec::new("sh")
            .args(["-c", "printf %s \"$BMTLAB_TEST_VALUE\""])
            .env("BMTLAB_TEST_VALUE", "hello");
        let output = SystemLauncher.capture(&spec).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "hello");
    }
}
