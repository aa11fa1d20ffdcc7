// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::util::normalize_whitespace;

/// Analyzer name used for synthetic issues emitted by the pipeline itself
/// (missing artifacts, parse failures, erroneous tasks).
pub const PIPELINE_ANALYZER: &str = "pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

impl Level {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Warning => "warning",
            Level::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Level> {
        match value {
            "warning" => Some(Level::Warning),
            "error" => Some(Level::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single static-analysis finding, unified across all analyzer formats.
///
/// `line` of `None` means the issue applies to the whole file. The derived
/// flags (`in_patch`, `new_for_revision`) and the `hash` fingerprint are
/// filled in by the pipeline's classification stage; parsers leave them at
/// their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub analyzer: String,
    pub check: Option<String>,
    pub path: String,
    pub line: Option<u32>,
    pub nb_lines: u32,
    pub column: Option<u32>,
    pub level: Level,
    pub message: String,
    /// Optional multi-line body (eg. compiler output) shown in digests.
    pub body: Option<String>,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub in_patch: bool,
    #[serde(default = "default_new")]
    pub new_for_revision: bool,
}

fn default_new() -> bool {
    true
}

impl Issue {
    #[must_use]
    pub fn new(
        analyzer: impl Into<String>,
        check: Option<String>,
        path: impl Into<String>,
        line: Option<u32>,
        nb_lines: u32,
        level: Level,
        message: impl Into<String>,
    ) -> Issue {
        Issue {
            analyzer: analyzer.into(),
            check,
            path: path.into(),
            line,
            nb_lines: nb_lines.max(1),
            column: None,
            level,
            message: message.into(),
            body: None,
            hash: String::new(),
            in_patch: false,
            new_for_revision: true,
        }
    }

    /// Synthetic pipeline issue; always an error so it is always publishable.
    #[must_use]
    pub fn pipeline_error(check: &str, path: impl Into<String>, message: impl Into<String>) -> Issue {
        Issue::new(
            PIPELINE_ANALYZER,
            Some(String::from(check)),
            path,
            None,
            1,
            Level::Error,
            message,
        )
    }

    #[must_use]
    pub fn is_build_error(&self) -> bool {
        self.analyzer == PIPELINE_ANALYZER && self.level == Level::Error
    }

    /// The publication rule: errors always publish, warnings only when they
    /// are new for the revision and land inside the patch under review.
    #[must_use]
    pub fn publishable(&self) -> bool {
        self.level == Level::Error || (self.in_patch && self.new_for_revision)
    }

    /// Inclusive line range affected by this issue, when it has one.
    #[must_use]
    pub fn line_range(&self) -> Option<(u32, u32)> {
        self.line.map(|line| (line, line + self.nb_lines - 1))
    }

    /// Identity used when collapsing duplicates across a task group.
    #[must_use]
    pub fn dedup_key(&self) -> (String, String, Option<u32>, String, Option<String>) {
        (
            self.hash.clone(),
            self.path.clone(),
            self.line,
            self.analyzer.clone(),
            self.check.clone(),
        )
    }

    /// Deterministic reporting order.
    #[must_use]
    pub fn sort_key(&self) -> (String, Option<u32>, String, Option<String>, String) {
        (
            self.path.clone(),
            self.line,
            self.analyzer.clone(),
            self.check.clone(),
            self.hash.clone(),
        )
    }

    /// One-line rendering used in summaries and log output.
    #[must_use]
    pub fn as_text(&self) -> String {
        let check = self.check.as_deref().unwrap_or("-");
        match self.line {
            Some(line) => format!(
                "{}: {} [{} {}:{}]",
                capitalize(self.level.as_str()),
                self.message,
                check,
                self.path,
                line
            ),
            None => format!(
                "{}: {} [{} {}]",
                capitalize(self.level.as_str()),
                self.message,
                check,
                self.path
            ),
        }
    }

    /// Markdown block used by the mail digest and the debug report.
    #[must_use]
    pub fn as_markdown(&self) -> String {
        let mut block = format!(
            "## issue {analyzer}\n\n\
             - **Path**: {path}\n\
             - **Level**: {level}\n\
             - **Check**: {check}\n\
             - **Line**: {line}\n\
             - **Publishable**: {publishable}\n\n\
             ```\n{message}\n```\n",
            analyzer = self.analyzer,
            path = self.path,
            level = self.level,
            check = self.check.as_deref().unwrap_or("-"),
            line = self
                .line
                .map_or_else(|| String::from("full file"), |l| l.to_string()),
            publishable = if self.publishable() { "yes" } else { "no" },
            message = self.message,
        );
        if let Some(ref body) = self.body {
            block.push_str(&format!("\n```\n{body}\n```\n"));
        }
        block
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} issue {}@{} {}",
            self.analyzer,
            self.check.as_deref().unwrap_or("-"),
            self.level,
            self.path
        )?;
        match self.line {
            Some(line) => write!(f, " line {line}"),
            None => write!(f, " full file"),
        }
    }
}

/// Stable content fingerprint of an issue.
///
/// The buffer hashes the analyzer, check, repository slug, path, the trimmed
/// source line content (not its number, so the hash survives line drift) and
/// the whitespace-normalized message. Fields are NUL-joined so adjacent
/// fields cannot collide. `source_line` of `None` omits the component
/// entirely (whole-file issues); an empty lookup should pass `Some("-")`.
#[must_use]
pub fn fingerprint(
    analyzer: &str,
    check: Option<&str>,
    repository: &str,
    path: &str,
    source_line: Option<&str>,
    message: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(analyzer.as_bytes());
    hasher.update(b"\0");
    hasher.update(check.unwrap_or("-").as_bytes());
    hasher.update(b"\0");
    hasher.update(repository.as_bytes());
    hasher.update(b"\0");
    hasher.update(path.as_bytes());
    hasher.update(b"\0");
    if let Some(line) = source_line {
        hasher.update(line.trim().as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(normalize_whitespace(message).as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Collapse duplicates by `(hash, path, line, analyzer, check)` keeping the
/// earliest observation, then sort deterministically for reporting.
#[must_use]
pub fn aggregate(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen = std::collections::HashSet::new();
    let mut merged: Vec<Issue> = Vec::with_capacity(issues.len());
    for issue in issues {
        if seen.insert(issue.dedup_key()) {
            merged.push(issue);
        }
    }
    merged.sort_by_key(Issue::sort_key);
    merged
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warning(path: &str, line: Option<u32>) -> Issue {
        Issue::new("eslint", Some(String::from("no-var")), path, line, 1, Level::Warning, "Unexpected var.")
    }

    #[test]
    fn publishable_is_pure_in_level_and_flags() {
        // The law: publishable ⇔ error ∨ (in_patch ∧ new_for_revision)
        for level in [Level::Warning, Level::Error] {
            for in_patch in [false, true] {
                for new_for_revision in [false, true] {
                    let mut issue = warning("a.js", Some(3));
                    issue.level = level;
                    issue.in_patch = in_patch;
                    issue.new_for_revision = new_for_revision;
                    let expected = level == Level::Error || (in_patch && new_for_revision);
                    assert_eq!(issue.publishable(), expected);
                }
            }
        }
    }

    #[test]
    fn pipeline_issues_always_publish() {
        let mut issue = Issue::pipeline_error("artifact-missing", "", "404 on issues.json");
        issue.in_patch = false;
        issue.new_for_revision = false;
        assert!(issue.publishable());
        assert!(issue.is_build_error());
    }

    #[test]
    fn fingerprint_ignores_line_numbers() {
        // Same logical issue at different line numbers hashes identically as
        // long as the source line content matches.
        let a = fingerprint("eslint", Some("no-var"), "repo", "a.js", Some("var x = 1;"), "Unexpected var.");
        let b = fingerprint("eslint", Some("no-var"), "repo", "a.js", Some("  var x = 1;  "), "Unexpected  var.");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_distinguishes_fields() {
        let base = fingerprint("eslint", Some("no-var"), "repo", "a.js", Some("x"), "m");
        assert_ne!(base, fingerprint("eslint", None, "repo", "a.js", Some("x"), "m"));
        assert_ne!(base, fingerprint("eslint", Some("no-var"), "repo", "b.js", Some("x"), "m"));
        assert_ne!(base, fingerprint("eslint", Some("no-var"), "repo", "a.js", None, "m"));
        // NUL separation: shifting a character between fields changes the hash
        assert_ne!(
            fingerprint("ab", Some("c"), "r", "p", None, "m"),
            fingerprint("a", Some("bc"), "r", "p", None, "m"),
        );
    }

    #[test]
    fn aggregate_dedups_and_sorts() {
        let mut first = warning("b.js", Some(10));
        first.hash = String::from("h1");
        let mut dup = warning("b.js", Some(10));
        dup.hash = String::from("h1");
        dup.message = String::from("later observation");
        let mut other = warning("a.js", Some(2));
        other.hash = String::from("h2");

        let merged = aggregate(vec![first, dup, other]);
        assert_eq!(merged.len(), 2);
        // Sorted by path first
        assert_eq!(merged[0].path, "a.js");
        assert_eq!(merged[1].path, "b.js");
        // Earliest observation wins
        assert_eq!(merged[1].message, "Unexpected var.");
    }

    #[test]
    fn display_renders_file_level() {
        let issue = warning("src/a.js", None);
        assert_eq!(
            issue.to_string(),
            "eslint issue no-var@warning src/a.js full file"
        );
    }
}
