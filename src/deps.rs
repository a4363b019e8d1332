//! Installed-version lookups for the project's Python packages.

use crate::config::DependencySettings;
use crate::process::{LaunchSpec, ProcessLauncher};

/// Prints the installed version of the distribution named in `argv[1]`, or
/// exits non-zero when it is not installed.
const VERSION_QUERY: &str = "import sys\nfrom importlib.metadata import version\nprint(version(sys.argv[1]))";

#[derive(Debug, Clone, PartialEq)]
pub struct PackageStatus {
    pub package: String,
    /// Feature group for optional packages, `None` for required ones.
    pub group: Option<String>,
    pub version: Option<String>,
}

impl PackageStatus {
    pub fn label(&self) -> String {
        match &self.group {
            Some(group) => format!("{} ({})", self.package, group),
            None => self.package.clone(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.version.is_some()
    }

    pub fn is_required(&self) -> bool {
        self.group.is_none()
    }
}

pub fn installed_version(
    launcher: &dyn ProcessLauncher,
    interpreter: &str,
    package: &str,
) -> Option<String> {
    let spec = LaunchSpec::new(interpreter).args(["-c", VERSION_QUERY, package]);
    match launcher.capture(&spec) {
        Ok(output) if output.success() => {
            let version = output.stdout.trim();
            (!version.is_empty()).then(|| version.to_string())
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Version lookup for {} failed: {:#}", package, e);
            None
        }
    }
}

/// Required packages first, then each optional group in name order.
pub fn check_packages(
    launcher: &dyn ProcessLauncher,
    interpreter: &str,
    packages: &DependencySettings,
) -> Vec<PackageStatus> {
    let required = packages.required.iter().map(|package| (package, None));
    let optional = packages
        .optional
        .iter()
        .flat_map(|(group, list)| list.iter().map(move |package| (package, Some(group.clone()))));

    required
        .chain(optional)
        .map(|(package, group)| PackageStatus {
            package: package.clone(),
            version: installed_version(launcher, interpreter, package),
            group,
        })
        .collect()
}
