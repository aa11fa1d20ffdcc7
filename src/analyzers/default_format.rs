// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;

use log::warn;
use serde::Deserialize;

use super::{AnalyzerParser, DEFAULT_ARTIFACT, ParseError, clean_line, clean_path};
use crate::{ci::TaskRecord, issues::Issue, issues::Level, revision::Revision};

/// The canonical issue format: a JSON object keyed by relative paths, each
/// holding an array of issue records. New analyzers only need to emit this.
#[derive(Debug, Clone)]
pub struct DefaultAnalyzer {
    task_name: String,
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    path: Option<String>,
    line: Option<i64>,
    nb_lines: Option<u32>,
    #[serde(alias = "char")]
    column: Option<u32>,
    check: Option<String>,
    level: Level,
    message: String,
    analyzer: Option<String>,
}

impl DefaultAnalyzer {
    #[must_use]
    pub fn new(task_name: &str) -> DefaultAnalyzer {
        DefaultAnalyzer {
            task_name: String::from(task_name),
        }
    }
}

impl AnalyzerParser for DefaultAnalyzer {
    fn name(&self) -> String {
        self.task_name.clone()
    }

    fn artifacts(&self) -> Vec<&'static str> {
        vec![DEFAULT_ARTIFACT]
    }

    fn parse(
        &self,
        artifact: &[u8],
        task: &TaskRecord,
        _revision: &Revision,
    ) -> Result<Vec<Issue>, ParseError> {
        // BTreeMap for deterministic path order before the global sort.
        let by_path: BTreeMap<String, Vec<serde_json::Value>> = serde_json::from_slice(artifact)?;

        let mut issues = Vec::new();
        for (path, records) in by_path {
            for record in records {
                let record = match serde_json::from_value::<RawRecord>(record) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("skipping malformed issue record in {}: {e}", task.name);
                        continue;
                    }
                };
                let analyzer = record.analyzer.unwrap_or_else(|| self.task_name.clone());
                // Single-rule analyzers omit the check; fall back to the
                // analyzer name so the triple stays total.
                let check = record.check.or_else(|| Some(analyzer.clone()));
                let mut issue = Issue::new(
                    analyzer,
                    check,
                    clean_path(record.path.as_deref().unwrap_or(&path)),
                    clean_line(record.line),
                    record.nb_lines.unwrap_or(1).max(1),
                    record.level,
                    record.message,
                );
                issue.column = record.column;
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
    fn parses_canonical_records() {
        let analyzer = DefaultAnalyzer::new("source-test-tokei");
        let artifact = br#"{
            "src/lib.rs": [
                {"path": "src/lib.rs", "line": 12, "column": 4, "check": "unused", "level": "warning", "message": "unused symbol"},
                {"path": "src/lib.rs", "line": null, "level": "error", "message": "file too large", "analyzer": "size-check"}
            ]
        }"#;
        let issues = analyzer
            .parse(artifact, &task("source-test-tokei"), &test_revision())
            .unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].analyzer, "source-test-tokei");
        assert_eq!(issues[0].check.as_deref(), Some("unused"));
        assert_eq!(issues[0].line, Some(12));
        assert_eq!(issues[0].nb_lines, 1);
        // analyzer override + check defaulting to the analyzer name
        assert_eq!(issues[1].analyzer, "size-check");
        assert_eq!(issues[1].check.as_deref(), Some("size-check"));
        assert_eq!(issues[1].line, None);
    }

    #[test]
    fn malformed_records_are_skipped_not_raised() {
        let analyzer = DefaultAnalyzer::new("t");
        let artifact = br#"{
            "a.rs": [
                {"level": "nonsense", "message": "bad level"},
                {"line": 1, "level": "warning", "message": "good"}
            ]
        }"#;
        let issues = analyzer.parse(artifact, &task("t"), &test_revision()).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].message, "good");
    }

    #[test]
    fn garbage_artifact_is_a_parse_error() {
        let analyzer = DefaultAnalyzer::new("t");
        let result = analyzer.parse(b"not json", &task("t"), &test_revision());
        assert!(matches!(result, Err(ParseError::Json(_))));
    }
}
