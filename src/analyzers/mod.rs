// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use enum_dispatch::enum_dispatch;
use log::warn;
use thiserror::Error;

use crate::{ci::TaskRecord, issues::Issue, revision::Revision};

pub mod clang_format;
pub mod clang_tidy;
pub mod default_format;
pub mod mozlint;
pub mod zero_coverage;

use clang_format::ClangFormatAnalyzer;
use clang_tidy::ClangTidyAnalyzer;
use default_format::DefaultAnalyzer;
use mozlint::MozLintAnalyzer;
use zero_coverage::ZeroCoverageAnalyzer;

/// Canonical artifact path used by the default format; any task declaring it
/// is treated as an analyzer regardless of its name.
pub const DEFAULT_ARTIFACT: &str = "public/code-review/issues.json";

/// Error decoding a whole artifact. Individual malformed records never raise
/// this: they are skipped with a diagnostic inside the parser.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("artifact is not valid JSON: `{0}`")]
    Json(#[from] serde_json::Error),

    #[error("artifact is not valid UTF-8")]
    Utf8,

    #[error("artifact has an unexpected shape: {0}")]
    Shape(String),
}

/// A family of analyzer tasks sharing one artifact format.
#[enum_dispatch]
pub trait AnalyzerParser {
    /// Analyzer id stamped on issues when the record carries none.
    fn name(&self) -> String;

    /// Artifact paths the analyzer declares, probed in order.
    fn artifacts(&self) -> Vec<&'static str>;

    /// Convert one artifact into issues. Total over malformed records.
    fn parse(
        &self,
        artifact: &[u8],
        task: &TaskRecord,
        revision: &Revision,
    ) -> Result<Vec<Issue>, ParseError>;
}

/// Tagged dispatch over the supported analyzer families. Legacy formats keep
/// dedicated variants; new analyzers use the default format only.
#[enum_dispatch(AnalyzerParser)]
#[derive(Debug, Clone)]
pub enum AnalyzerKind {
    ClangTidy(ClangTidyAnalyzer),
    ClangFormat(ClangFormatAnalyzer),
    MozLint(MozLintAnalyzer),
    ZeroCoverage(ZeroCoverageAnalyzer),
    Default(DefaultAnalyzer),
}

/// Pick the analyzer family for a task, by task-name prefix or by the
/// declared artifact paths. `None` means the task is not an analyzer task.
#[must_use]
pub fn detect(task_name: &str, artifact_names: &[String]) -> Option<AnalyzerKind> {
    // The default format wins whenever the canonical artifact is declared, so
    // analyzers can migrate off their legacy formats one task at a time.
    if artifact_names.iter().any(|name| name == DEFAULT_ARTIFACT) {
        return Some(AnalyzerKind::Default(DefaultAnalyzer::new(task_name)));
    }
    if artifact_names
        .iter()
        .any(|name| name == zero_coverage::ZERO_COVERAGE_ARTIFACT)
    {
        return Some(AnalyzerKind::ZeroCoverage(ZeroCoverageAnalyzer));
    }
    if let Some(linter) = task_name.strip_prefix("source-test-mozlint-") {
        return Some(AnalyzerKind::MozLint(MozLintAnalyzer::new(linter)));
    }
    match task_name {
        "source-test-clang-tidy" => Some(AnalyzerKind::ClangTidy(ClangTidyAnalyzer)),
        "source-test-clang-format" => Some(AnalyzerKind::ClangFormat(ClangFormatAnalyzer)),
        _ => {
            if task_name.starts_with("source-test-") {
                warn!("unsupported analyzer task `{task_name}` declares no default-format artifact");
            }
            None
        }
    }
}

/// Repo-relative path for an issue record; absolute paths are rewritten with
/// a diagnostic rather than rejected.
#[must_use]
pub fn clean_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix('/') {
        warn!("issue path `{path}` is absolute, stripping to repo-relative");
        String::from(stripped.trim_start_matches('/'))
    } else {
        String::from(path)
    }
}

/// Normalize a raw line number: `0`, negative or absent values mean the whole
/// file (`None`), everything else is `≥ 1`.
#[must_use]
pub fn clean_line(line: Option<i64>) -> Option<u32> {
    match line {
        Some(value) if value >= 1 => u32::try_from(value).ok(),
        Some(value) => {
            if value != 0 {
                warn!("issue line {value} is out of range, treating as whole-file");
            }
            None
        }
        None => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use crate::{
        ci::{TaskRecord, TaskState},
        patch::PatchAnalysis,
        revision::{Provider, Revision},
    };

    pub fn task(name: &str) -> TaskRecord {
        TaskRecord {
            task_id: format!("task-{name}"),
            name: String::from(name),
            tags: HashMap::new(),
            state: TaskState::Completed,
            run_id: 0,
        }
    }

    pub fn test_revision() -> Revision {
        revision_with_patch("")
    }

    pub fn revision_with_patch(patch: &str) -> Revision {
        Revision {
            provider: Provider::Review,
            provider_id: String::from("PHID-DREV-42"),
            id: 42,
            diff_id: 420,
            title: String::from("test revision"),
            bugzilla_id: None,
            author_email: None,
            base_repository: String::from("test-repo"),
            head_repository: String::from("test-try"),
            commit_hash: String::from("0123456789abcdef0123456789abcdef01234567"),
            review_task_id: String::from("review-task"),
            build_id: None,
            patch: PatchAnalysis::parse(patch),
        }
    }
}
