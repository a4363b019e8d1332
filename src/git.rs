//! Commit summaries: collect details about `HEAD`, build a prompt for an AI
//! assistant and store the summary it produces as markdown.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::error::BmtError;
use crate::process::{Captured, LaunchSpec, ProcessLauncher};

const FIELD_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
}

/// Thin wrapper over the `git` command line.
pub struct Git<'a> {
    launcher: &'a dyn ProcessLauncher,
    repo: Option<PathBuf>,
}

impl<'a> Git<'a> {
    pub fn new(launcher: &'a dyn ProcessLauncher) -> Self {
        Self {
            launcher,
            repo: None,
        }
    }

    pub fn in_dir(mut self, repo: impl Into<PathBuf>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    fn git(&self, args: &[&str]) -> Result<Captured> {
        let mut spec = LaunchSpec::new("git").args(args.iter().copied());
        if let Some(repo) = &self.repo {
            spec = spec.current_dir(repo);
        }
        self.launcher.capture(&spec)
    }

    fn succeeds(&self, args: &[&str]) -> bool {
        matches!(self.git(args), Ok(output) if output.success())
    }

    pub fn is_repository(&self) -> bool {
        self.succeeds(&["rev-parse", "--is-inside-work-tree"])
    }

    pub fn has_commits(&self) -> bool {
        self.succeeds(&["rev-parse", "HEAD"])
    }

    pub fn current_commit(&self) -> Result<CommitInfo> {
        if !self.is_repository() {
            return Err(BmtError::Git("not inside a git repository".into()).into());
        }
        if !self.has_commits() {
            return Err(BmtError::Git("the repository has no commits yet".into()).into());
        }

        let output = self.git(&["log", "-1", "--pretty=format:%H%x1f%an%x1f%ad%x1f%B"])?;
        if !output.success() {
            return Err(BmtError::Git(format!("git log failed: {}", output.stderr.trim())).into());
        }

        let mut fields = output.stdout.splitn(4, FIELD_SEPARATOR);
        let mut next = || fields.next().unwrap_or_default().trim().to_string();
        let commit = CommitInfo {
            hash: next(),
            author: next(),
            date: next(),
            message: next(),
        };
        if commit.hash.is_empty() {
            return Err(BmtError::Git("git log returned no commit".into()).into());
        }
        Ok(commit)
    }

    /// One-line `<short hash> <subject>` entries for up to `limit` commits
    /// before `HEAD`, newest first. Empty when git fails.
    pub fn recent_commits(&self, limit: u32) -> Vec<String> {
        if limit == 0 {
            return vec![];
        }
        let limit = limit.to_string();
        match self.git(&["log", "--skip=1", "-n", &limit, "--pretty=format:%h %s"]) {
            Ok(output) if output.success() => non_empty_lines(&output.stdout),
            Ok(output) => {
                tracing::debug!("git log failed: {}", output.stderr.trim());
                vec![]
            }
            Err(e) => {
                tracing::debug!("git log failed: {:#}", e);
                vec![]
            }
        }
    }

    /// Files in the staging area. Empty when git fails.
    pub fn staged_files(&self) -> Vec<String> {
        match self.git(&["diff", "--cached", "--name-only"]) {
            Ok(output) if output.success() => non_empty_lines(&output.stdout),
            Ok(output) => {
                tracing::debug!("git diff failed: {}", output.stderr.trim());
                vec![]
            }
            Err(e) => {
                tracing::debug!("git diff failed: {:#}", e);
                vec![]
            }
        }
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Drop files matching any exclude pattern. `*.ext` matches the file name
/// suffix; any other pattern matches a whole path component.
pub fn filter_excluded(files: Vec<String>, patterns: &[String]) -> Vec<String> {
    files
        .into_iter()
        .filter(|file| !patterns.iter().any(|pattern| matches_pattern(file, pattern)))
        .collect()
}

fn matches_pattern(file: &str, pattern: &str) -> bool {
    match pattern.strip_prefix('*') {
        Some(suffix) => file
            .rsplit('/')
            .next()
            .map(|name| name.ends_with(suffix))
            .unwrap_or(false),
        None => file.split('/').any(|component| component == pattern),
    }
}

fn bullet_list(files: &[String]) -> String {
    if files.is_empty() {
        return "- (no staged files)".to_string();
    }
    files
        .iter()
        .map(|file| format!("- {}", file))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for the assistant. `recent` adds earlier commits as context and is
/// left out when empty.
pub fn render_prompt(commit: &CommitInfo, files: &[String], recent: &[String]) -> String {
    let history = if recent.is_empty() {
        String::new()
    } else {
        format!("\n\nEarlier commits, for context:\n{}", bullet_list(recent))
    };
    format!(
        "Please write a detailed summary of the following commit:

Commit Hash: {}
Author: {}
Date: {}
Message: {}

Changed files:
{}{}

Please include:
1. A concise summary of the changes
2. The important edits in each file
3. The likely impact of these changes
4. Any breaking changes or important notes",
        commit.hash,
        commit.author,
        commit.date,
        commit.message,
        bullet_list(files),
        history
    )
}

pub fn render_summary(summary: &str, commit: &CommitInfo, files: &[String]) -> String {
    format!(
        "# Commit Summary

## Commit Details
- **Hash:** {}
- **Author:** {}
- **Date:** {}
- **Message:** {}

## AI Generated Summary
{}

## Changed Files
{}
",
        commit.hash,
        commit.author,
        commit.date,
        commit.message,
        summary.trim(),
        bullet_list(files)
    )
}

/// Write `<dir>/<date>_<hash>.md`, creating `dir` when needed.
pub fn save_summary(
    dir: &Path,
    date: NaiveDate,
    summary: &str,
    commit: &CommitInfo,
    files: &[String],
) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}_{}.md", date.format("%Y-%m-%d"), commit.hash));
    fs::write(&path, render_summary(summary, commit, files))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::FakeLauncher;
    use tempfile::tempdir;

    fn commit() -> CommitInfo {
        CommitInfo {
            hash: "abc123".into(),
            author: "Jane Doe".into(),
            date: "2024-04-29".into(),
            message: "Test commit message".into(),
        }
    }

    #[test]
    fn test_is_repository() {
        let launcher = FakeLauncher::default();
        launcher.push_output(0, "true");
        assert!(Git::new(&launcher).is_repository());
        assert_eq!(
            launcher.last().args,
            vec!["rev-parse".to_string(), "--is-inside-work-tree".to_string()]
        );

        let launcher = FakeLauncher::default();
        launcher.push_output(128, "");
        assert!(!Git::new(&launcher).is_repository());

        let launcher = FakeLauncher::default();
        launcher.push_spawn_failure("git not installed");
        assert!(!Git::new(&launcher).is_repository());
    }

    #[test]
    fn test_has_commits() {
        let launcher = FakeLauncher::default();
        launcher.push_output(0, "abc123");
        assert!(Git::new(&launcher).has_commits());

        let launcher = FakeLauncher::default();
        launcher.push_output(128, "");
        assert!(!Git::new(&launcher).has_commits());
    }

    #[test]
    fn test_current_commit() {
        let launcher = FakeLauncher::default();
        launcher.push_output(0, "true");
        launcher.push_output(0, "abc123");
        launcher.push_output(
            0,
            "abc123\u{1f}Jane Doe\u{1f}2024-04-29\u{1f}Test commit message\n\nBody line\n",
        );

        let info = Git::new(&launcher).in_dir("/repo").current_commit().unwrap();
        assert_eq!(info.hash, "abc123");
        assert_eq!(info.author, "Jane Doe");
        assert_eq!(info.date, "2024-04-29");
        assert_eq!(info.message, "Test commit message\n\nBody line");
        assert_eq!(launcher.last().current_dir, Some(PathBuf::from("/repo")));
    }

    #[test]
    fn test_current_commit_outside_repository() {
        let launcher = FakeLauncher::default();
        launcher.push_output(128, "");
        let err = Git::new(&launcher).current_commit().unwrap_err();
        assert!(matches!(err.downcast_ref::<BmtError>(), Some(BmtError::Git(_))));
    }

    #[test]
    fn test_current_commit_without_commits() {
        let launcher = FakeLauncher::default();
        launcher.push_output(0, "true");
        launcher.push_output(128, "");
        let err = Git::new(&launcher).current_commit().unwrap_err();
        assert!(err.to_string().contains("no commits"));
    }

    #[test]
    fn test_staged_files() {
        let launcher = FakeLauncher::default();
        launcher.push_output(0, "file1.py\nfile2.py\n");
        assert_eq!(Git::new(&launcher).staged_files(), vec!["file1.py", "file2.py"]);

        let launcher = FakeLauncher::default();
        launcher.push_output(1, "");
        assert!(Git::new(&launcher).staged_files().is_empty());
    }

    #[test]
    fn test_recent_commits() {
        let launcher = FakeLauncher::default();
        launcher.push_output(0, "def4567 Fix typo\n9876abc Initial commit\n");
        let recent = Git::new(&launcher).recent_commits(5);
        assert_eq!(recent, vec!["def4567 Fix typo", "9876abc Initial commit"]);
        assert_eq!(
            launcher.last().args,
            vec!["log", "--skip=1", "-n", "5", "--pretty=format:%h %s"]
        );

        let launcher = FakeLauncher::default();
        assert!(Git::new(&launcher).recent_commits(0).is_empty());
        assert!(launcher.launched.borrow().is_empty());
    }

    #[test]
    fn test_filter_excluded() {
        let files = vec![
            "src/app.py".to_string(),
            "logs/run.log".to_string(),
            "src/__pycache__/app.cpython-312.pyc".to_string(),
            "notes.tmp".to_string(),
        ];
        let patterns = vec!["*.log".to_string(), "*.tmp".to_string(), "__pycache__".to_string()];
        assert_eq!(filter_excluded(files, &patterns), vec!["src/app.py"]);
    }

    #[test]
    fn test_render_prompt() {
        let files = vec!["file1.py".to_string(), "file2.py".to_string()];
        let prompt = render_prompt(&commit(), &files, &[]);
        for needle in ["abc123", "Jane Doe", "2024-04-29", "Test commit message", "- file1.py", "- file2.py"] {
            assert!(prompt.contains(needle), "missing {}", needle);
        }
        assert!(!prompt.contains("Earlier commits"));

        let prompt = render_prompt(&commit(), &files, &["def4567 Fix typo".to_string()]);
        assert!(prompt.contains("Earlier commits, for context:\n- def4567 Fix typo"));
    }

    #[test]
    fn test_save_summary() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("__dev_logs__").join("commit_summaries");
        let files = vec!["file1.py".to_string()];
        let date = NaiveDate::from_ymd_opt(2024, 4, 29).unwrap();

        let path = save_summary(&target, date, "Test summary\n", &commit(), &files).unwrap();

        assert_eq!(path, target.join("2024-04-29_abc123.md"));
        let content = fs::read_to_string(&path).unwrap();
        for needle in ["abc123", "Jane Doe", "Test commit message", "Test summary", "- file1.py"] {
            assert!(content.contains(needle), "missing {}", needle);
        }
    }
}
