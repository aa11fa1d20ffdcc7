// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::{BTreeSet, HashMap};

use log::warn;

/// One `@@ -a,b +c,d @@` block of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// Added lines as `(new line number, content)`.
    pub added: Vec<(u32, String)>,
}

impl Hunk {
    /// How the hunk transforms the file, from its line counts.
    #[must_use]
    pub fn mode(&self) -> HunkMode {
        if self.old_lines == 0 {
            HunkMode::Insert
        } else if self.new_lines == 0 {
            HunkMode::Delete
        } else {
            HunkMode::Replace
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkMode {
    Replace,
    Insert,
    Delete,
}

impl HunkMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HunkMode::Replace => "replace",
            HunkMode::Insert => "insert",
            HunkMode::Delete => "delete",
        }
    }
}

/// All hunks of a unified diff touching one file.
#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub hunks: Vec<Hunk>,
}

/// Pre-analyzed unified patch: per-file added line numbers plus the
/// after-image content of those lines, so classification and hashing never
/// have to re-read the repository.
#[derive(Debug, Clone, Default)]
pub struct PatchAnalysis {
    lines: HashMap<String, BTreeSet<u32>>,
    content: HashMap<String, HashMap<u32, String>>,
}

impl PatchAnalysis {
    #[must_use]
    pub fn parse(patch: &str) -> PatchAnalysis {
        let mut analysis = PatchAnalysis::default();
        for file in parse_files(patch) {
            let lines = analysis.lines.entry(file.path.clone()).or_default();
            let content = analysis.content.entry(file.path.clone()).or_default();
            for hunk in file.hunks {
                for (line, text) in hunk.added {
                    lines.insert(line);
                    content.insert(line, text);
                }
            }
        }
        analysis
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn has_file(&self, path: &str) -> bool {
        self.lines.contains_key(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.lines.keys().map(String::as_str)
    }

    #[must_use]
    pub fn added_lines(&self, path: &str) -> Option<&BTreeSet<u32>> {
        self.lines.get(path)
    }

    /// True when any line of `[start, end]` was added in `path`.
    #[must_use]
    pub fn intersects(&self, path: &str, start: u32, end: u32) -> bool {
        self.added_lines(path)
            .is_some_and(|lines| lines.range(start..=end).next().is_some())
    }

    /// After-image content of an added line, when the patch carries it.
    #[must_use]
    pub fn line_content(&self, path: &str, line: u32) -> Option<&str> {
        self.content
            .get(path)
            .and_then(|lines| lines.get(&line))
            .map(String::as_str)
    }
}

/// Parse a unified diff into per-file hunks.
///
/// Malformed hunk headers are diagnostics, not errors: the rest of the diff
/// is still used.
#[must_use]
pub fn parse_files(patch: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    // Set while scanning past the hunks of a deleted file (+++ /dev/null).
    let mut skipping_file = false;

    let mut lines = patch.lines().peekable();
    while let Some(line) = lines.next() {
        if let Some(target) = line.strip_prefix("+++ ") {
            let path = clean_target_path(target);
            if let Some(file) = current.take() {
                files.push(file);
            }
            skipping_file = path.is_none();
            current = path.map(|path| FileDiff {
                path,
                hunks: Vec::new(),
            });
        } else if line.starts_with("@@") {
            let Some(file) = current.as_mut() else {
                if !skipping_file {
                    warn!("hunk header outside of any file block: {line}");
                }
                continue;
            };
            let Some((old_start, old_lines, new_start, new_lines)) = parse_hunk_header(line) else {
                warn!("skipping malformed hunk header: {line}");
                continue;
            };
            let mut added = Vec::new();
            let mut new_line = new_start;
            // Consume hunk body: context, removals and additions.
            while let Some(&body) = lines.peek() {
                match body.as_bytes().first() {
                    Some(b'+') if !body.starts_with("+++") => {
                        added.push((new_line, String::from(&body[1..])));
                        new_line += 1;
                        lines.next();
                    }
                    Some(b'-') if !body.starts_with("---") => {
                        lines.next();
                    }
                    Some(b' ') => {
                        new_line += 1;
                        lines.next();
                    }
                    Some(b'\\') => {
                        // "\ No newline at end of file"
                        lines.next();
                    }
                    _ => break,
                }
            }
            file.hunks.push(Hunk {
                old_start,
                old_lines,
                new_start,
                new_lines,
                added,
            });
        }
    }
    if let Some(file) = current.take() {
        files.push(file);
    }
    files
}

/// Strip the `b/` prefix and any timestamp suffix from a `+++` target; a
/// `/dev/null` target (file deletion) yields `None`.
fn clean_target_path(target: &str) -> Option<String> {
    let path = target.split('\t').next().unwrap_or(target).trim();
    if path == "/dev/null" {
        return None;
    }
    let path = path.strip_prefix("b/").unwrap_or(path);
    Some(String::from(path))
}

fn parse_hunk_header(line: &str) -> Option<(u32, u32, u32, u32)> {
    // "@@ -12,3 +14,4 @@ optional context"
    let inner = line.strip_prefix("@@ ")?;
    let end = inner.find(" @@")?;
    let mut parts = inner[..end].split(' ');
    let old = parts.next()?.strip_prefix('-')?;
    let new = parts.next()?.strip_prefix('+')?;
    let (old_start, old_lines) = parse_range(old)?;
    let (new_start, new_lines) = parse_range(new)?;
    Some((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = "\
--- a/src/a.js
+++ b/src/a.js
@@ -7,4 +8,5 @@ function f() {
 context
+var x = 1;
+var y = 2;
 more context
+var z = 3;
--- a/gone.c
+++ /dev/null
@@ -1,3 +0,0 @@
-int a;
-int b;
-int c;
--- /dev/null
+++ b/fresh.c
@@ -0,0 +1,2 @@
+int d;
+int e;
";

    #[test]
    fn added_lines_and_content() {
        let analysis = PatchAnalysis::parse(PATCH);
        assert!(analysis.has_file("src/a.js"));
        let lines: Vec<u32> = analysis.added_lines("src/a.js").unwrap().iter().copied().collect();
        assert_eq!(lines, vec![9, 10, 12]);
        assert_eq!(analysis.line_content("src/a.js", 9), Some("var x = 1;"));
        assert_eq!(analysis.line_content("src/a.js", 12), Some("var z = 3;"));
    }

    #[test]
    fn deleted_files_are_not_tracked() {
        let analysis = PatchAnalysis::parse(PATCH);
        assert!(!analysis.has_file("gone.c"));
        assert!(analysis.has_file("fresh.c"));
        assert_eq!(
            analysis.added_lines("fresh.c").unwrap().iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn intersects_ranges() {
        let analysis = PatchAnalysis::parse(PATCH);
        assert!(analysis.intersects("src/a.js", 8, 12));
        assert!(analysis.intersects("src/a.js", 12, 12));
        assert!(!analysis.intersects("src/a.js", 13, 100));
        assert!(!analysis.intersects("missing.js", 1, 100));
    }

    #[test]
    fn hunk_modes() {
        let files = parse_files(PATCH);
        let fresh = files.iter().find(|f| f.path == "fresh.c").unwrap();
        assert_eq!(fresh.hunks[0].mode(), HunkMode::Insert);

        let replace = Hunk {
            old_start: 5,
            old_lines: 2,
            new_start: 5,
            new_lines: 2,
            added: vec![],
        };
        assert_eq!(replace.mode(), HunkMode::Replace);
    }

    #[test]
    fn malformed_hunk_header_is_skipped() {
        let patch = "--- a/x\n+++ b/x\n@@ bogus @@\n@@ -1 +1,2 @@\n+ok\n+ok2\n";
        let files = parse_files(patch);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].hunks.len(), 1);
        assert_eq!(files[0].hunks[0].added.len(), 2);
    }
}
