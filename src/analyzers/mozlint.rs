// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;

use log::warn;
use serde::Deserialize;

use super::{AnalyzerParser, ParseError, clean_line, clean_path};
use crate::{ci::TaskRecord, issues::Issue, issues::Level, revision::Revision};

const MOZLINT_ARTIFACT: &str = "public/code-review/mozlint.json";

/// Legacy mozlint format: JSON keyed by relative paths, one record per
/// finding. The linter name (eslint, flake8, ...) becomes the analyzer id.
#[derive(Debug, Clone)]
pub struct MozLintAnalyzer {
    linter: String,
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    rule: Option<String>,
    level: Level,
    message: String,
    // Legacy artifacts mix both spellings; accept either and normalize.
    #[serde(alias = "lineno")]
    line: Option<i64>,
    #[serde(alias = "char")]
    column: Option<u32>,
    #[serde(default)]
    linter: Option<String>,
    /// Records carrying a replacement diff are published through a patch
    /// instead of an inline finding; the issue body keeps the diff.
    #[serde(default)]
    diff: Option<String>,
}

impl MozLintAnalyzer {
    #[must_use]
    pub fn new(linter: &str) -> MozLintAnalyzer {
        MozLintAnalyzer {
            linter: String::from(linter),
        }
    }
}

impl AnalyzerParser for MozLintAnalyzer {
    fn name(&self) -> String {
        self.linter.clone()
    }

    fn artifacts(&self) -> Vec<&'static str> {
        vec![MOZLINT_ARTIFACT]
    }

    fn parse(
        &self,
        artifact: &[u8],
        task: &TaskRecord,
        _revision: &Revision,
    ) -> Result<Vec<Issue>, ParseError> {
        let by_path: BTreeMap<String, Vec<serde_json::Value>> = serde_json::from_slice(artifact)?;

        let mut issues = Vec::new();
        for (path, records) in by_path {
            for record in records {
                let record = match serde_json::from_value::<RawRecord>(record) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("skipping malformed mozlint record in {}: {e}", task.name);
                        continue;
                    }
                };
                let nb_lines = record
                    .diff
                    .as_deref()
                    .map_or(1, |diff| u32::try_from(diff.lines().count()).unwrap_or(1))
                    .max(1);
                let mut issue = Issue::new(
                    record.linter.unwrap_or_else(|| self.linter.clone()),
                    record.rule,
                    clean_path(&path),
                    clean_line(record.line),
                    nb_lines,
                    record.level,
                    record.message,
                );
                issue.column = record.column;
                issue.body = record.diff;
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{task, test_revision};

    #[test]
    fn parses_eslint_records() {
        let analyzer = MozLintAnalyzer::new("eslint");
        let artifact = br#"{
            "src/a.js": [
                {"path": "src/a.js", "line": 10, "column": 1, "rule": "no-var", "level": "error", "message": "Unexpected var.", "linter": "eslint"}
            ]
        }"#;
        let issues = analyzer
            .parse(artifact, &task("source-test-mozlint-eslint"), &test_revision())
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].analyzer, "eslint");
        assert_eq!(issues[0].check.as_deref(), Some("no-var"));
        assert_eq!(issues[0].line, Some(10));
        assert_eq!(issues[0].level, Level::Error);
    }

    #[test]
    fn accepts_legacy_key_spellings() {
        let analyzer = MozLintAnalyzer::new("flake8");
        let artifact = br#"{
            "tools/x.py": [
                {"lineno": 7, "char": 3, "rule": "E501", "level": "warning", "message": "line too long"}
            ]
        }"#;
        let issues = analyzer
            .parse(artifact, &task("source-test-mozlint-flake8"), &test_revision())
            .unwrap();
        assert_eq!(issues[0].line, Some(7));
        assert_eq!(issues[0].column, Some(3));
        assert_eq!(issues[0].analyzer, "flake8");
    }

    #[test]
    fn zero_line_means_whole_file() {
        let analyzer = MozLintAnalyzer::new("license");
        let artifact = br#"{
            "a.c": [ {"lineno": 0, "level": "error", "message": "missing license header"} ]
        }"#;
        let issues = analyzer
            .parse(artifact, &task("source-test-mozlint-license"), &test_revision())
            .unwrap();
        assert_eq!(issues[0].line, None);
    }
}
