// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use serde::Deserialize;

use super::{AnalyzerParser, ParseError};
use crate::{
    ci::TaskRecord,
    issues::{Issue, Level},
    revision::Revision,
};

/// Index route of the coverage cron job publishing the latest report.
pub const ZERO_COVERAGE_ROUTE: &str = "project.relman.code-coverage.production.cron.latest";
pub const ZERO_COVERAGE_ARTIFACT: &str = "public/zero_coverage_report.json";

/// Synthetic analyzer: one file-level warning per file that the patch
/// modifies and the latest coverage report lists as fully uncovered.
///
/// Unlike the other analyzer families, its artifact comes from the coverage
/// cron's index route rather than a task of the review's group; the parsing
/// still flows through the shared dispatch table.
#[derive(Debug, Clone)]
pub struct ZeroCoverageAnalyzer;

#[derive(Deserialize)]
struct Report {
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct FileEntry {
    name: String,
    #[serde(default)]
    uncovered: bool,
}

impl AnalyzerParser for ZeroCoverageAnalyzer {
    fn name(&self) -> String {
        String::from("coverage")
    }

    fn artifacts(&self) -> Vec<&'static str> {
        vec![ZERO_COVERAGE_ARTIFACT]
    }

    fn parse(
        &self,
        artifact: &[u8],
        _task: &TaskRecord,
        revision: &Revision,
    ) -> Result<Vec<Issue>, ParseError> {
        let report: Report = serde_json::from_slice(artifact)?;
        let uncovered: std::collections::HashSet<&str> = report
            .files
            .iter()
            .filter(|file| file.uncovered)
            .map(|file| file.name.as_str())
            .collect();

        Ok(revision
            .patch
            .files()
            .filter(|path| uncovered.contains(path))
            .map(|path| {
                Issue::new(
                    "coverage",
                    Some(String::from("no-coverage")),
                    path,
                    None,
                    1,
                    Level::Warning,
                    "This file is uncovered",
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{revision_with_patch, task};

    #[test]
    fn reports_only_modified_uncovered_files() {
        let revision = revision_with_patch(
            "--- a/src/a.js\n+++ b/src/a.js\n@@ -1,0 +1,1 @@\n+x\n--- a/src/b.js\n+++ b/src/b.js\n@@ -1,0 +1,1 @@\n+y\n",
        );
        let report = br#"{
            "files": [
                {"name": "src/a.js", "uncovered": true},
                {"name": "src/c.js", "uncovered": true},
                {"name": "src/b.js", "uncovered": false}
            ]
        }"#;
        let issues = ZeroCoverageAnalyzer
            .parse(report, &task("zero-coverage"), &revision)
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "src/a.js");
        assert_eq!(issues[0].line, None);
        assert_eq!(issues[0].check.as_deref(), Some("no-coverage"));
    }

    #[test]
    fn bad_report_is_a_parse_error() {
        let revision = revision_with_patch("");
        let result = ZeroCoverageAnalyzer.parse(b"[]", &task("zero-coverage"), &revision);
        assert!(result.is_err());
    }
}
