use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced to the user by the CLI.
///
/// Each variant aborts the current command, except `PluginLoad`, which is
/// logged by the plugin manager and only skips the offending plugin.
#[derive(Error, Debug)]
pub enum BmtError {
    #[error("invalid script name '{0}', expected 'category.script-name'")]
    MalformedIdentifier(String),

    #[error("script '{0}' not found")]
    ScriptNotFound(String),

    #[error("{}", execution_failed_message(.script, .code))]
    ScriptExecutionFailed { script: String, code: Option<i32> },

    #[error("project root not found: no {marker} in {} or any parent directory", .start.display())]
    ProjectRootNotFound { marker: String, start: PathBuf },

    #[error("failed to load plugin '{plugin}': {reason}")]
    PluginLoad { plugin: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("git: {0}")]
    Git(String),
}

fn execution_failed_message(script: &str, code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("script '{}' failed with exit status {}", script, code),
        None => format!("script '{}' was terminated by a signal", script),
    }
}

impl BmtError {
    /// Process exit code the CLI should use for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            BmtError::ScriptExecutionFailed {
                code: Some(code), ..
            } => u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_failed_propagates_status() {
        let err = BmtError::ScriptExecutionFailed {
            script: "webcam.show".into(),
            code: Some(3),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.to_string(),
            "script 'webcam.show' failed with exit status 3"
        );
    }

    #[test]
    fn test_out_of_range_status_maps_to_one() {
        let err = BmtError::ScriptExecutionFailed {
            script: "a.b".into(),
            code: Some(-1),
        };
        assert_eq!(err.exit_code(), 1);

        let err = BmtError::ScriptExecutionFailed {
            script: "a.b".into(),
            code: None,
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("signal"));
    }
}
