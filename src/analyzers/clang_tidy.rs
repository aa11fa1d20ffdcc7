// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::BTreeMap;

use log::warn;
use serde::Deserialize;

use super::{AnalyzerParser, ParseError, clean_line, clean_path};
use crate::{ci::TaskRecord, issues::Issue, issues::Level, revision::Revision};

const CLANG_TIDY_ARTIFACT: &str = "public/code-review/clang-tidy.json";

/// Legacy clang-tidy format: JSON keyed by relative paths; records carry the
/// clang check id and optionally the header chain the diagnostic came from.
#[derive(Debug, Clone)]
pub struct ClangTidyAnalyzer;

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    path: Option<String>,
    #[serde(alias = "lineno")]
    line: Option<i64>,
    #[serde(alias = "char")]
    column: Option<u32>,
    check: String,
    #[serde(default)]
    header: Option<String>,
    message: String,
    #[serde(default)]
    level: Option<Level>,
    /// Whether the check is on the publishable list; informational only, the
    /// publication decision belongs to classification.
    #[serde(default)]
    publishable_source: Option<bool>,
}

impl AnalyzerParser for ClangTidyAnalyzer {
    fn name(&self) -> String {
        String::from("clang-tidy")
    }

    fn artifacts(&self) -> Vec<&'static str> {
        vec![CLANG_TIDY_ARTIFACT]
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
                        warn!("skipping malformed clang-tidy record in {}: {e}", task.name);
                        continue;
                    }
                };
                let mut issue = Issue::new(
                    "clang-tidy",
                    Some(record.check),
                    clean_path(record.path.as_deref().unwrap_or(&path)),
                    clean_line(record.line),
                    1,
                    record.level.unwrap_or(Level::Warning),
                    record.message,
                );
                issue.column = record.column;
                issue.body = record.header;
                let _ = record.publishable_source;
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}
