// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use super::{AnalyzerParser, ParseError};
use crate::{
    ci::TaskRecord,
    issues::{Issue, Level},
    patch,
    revision::Revision,
};

const CLANG_FORMAT_ARTIFACT: &str = "public/code-review/clang-format.diff";

const MESSAGE: &str = "The change does not follow the C/C++ coding style, please reformat";

/// Hunks closer than this many lines are reported as one issue.
const MERGE_DISTANCE: u32 = 2;

/// Legacy clang-format output: a unified diff of the reformatting the tool
/// would apply. Every hunk becomes one warning; neighboring hunks merge.
#[derive(Debug, Clone)]
pub struct ClangFormatAnalyzer;

impl AnalyzerParser for ClangFormatAnalyzer {
    fn name(&self) -> String {
        String::from("clang-format")
    }

    fn artifacts(&self) -> Vec<&'static str> {
        vec![CLANG_FORMAT_ARTIFACT]
    }

    fn parse(
        &self,
        artifact: &[u8],
        _task: &TaskRecord,
        _revision: &Revision,
    ) -> Result<Vec<Issue>, ParseError> {
        let text = std::str::from_utf8(artifact).map_err(|_| ParseError::Utf8)?;

        let mut issues = Vec::new();
        for file in patch::parse_files(text) {
            let mut pending: Option<Issue> = None;
            let mut hunks = file.hunks;
            hunks.sort_by_key(|hunk| hunk.new_start);
            for hunk in hunks {
                let mode = hunk.mode();
                // Delete hunks have no after-image extent; anchor them on the
                // line that replaces the removal.
                let line = hunk.new_start.max(1);
                let nb_lines = hunk.new_lines.max(1);

                match pending.as_mut() {
                    Some(previous)
                        if line.saturating_sub(
                            previous.line.unwrap_or(1) + previous.nb_lines - 1,
                        ) <= MERGE_DISTANCE =>
                    {
                        // Extend the previous issue over this hunk.
                        let start = previous.line.unwrap_or(1);
                        previous.nb_lines = (line + nb_lines - 1).saturating_sub(start) + 1;
                    }
                    _ => {
                        if let Some(done) = pending.take() {
                            issues.push(done);
                        }
                        let mut issue = Issue::new(
                            "clang-format",
                            Some(String::from("invalid-styling")),
                            file.path.clone(),
                            Some(line),
                            nb_lines,
                            Level::Warning,
                            MESSAGE,
                        );
                        issue.body = Some(format!(
                            "{} lines {}-{} (was {}-{})",
                            mode.as_str(),
                            line,
                            line + nb_lines - 1,
                            hunk.old_start,
                            hunk.old_start + hunk.old_lines.max(1) - 1,
                        ));
                        pending = Some(issue);
                    }
                }
            }
            if let Some(done) = pending.take() {
                issues.push(done);
            }
        }
        Ok(issues)
    }
}
