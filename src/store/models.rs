// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use serde::{Deserialize, Serialize};

use crate::issues::{Issue, Level};

/// Number of rows per API page.
pub const PAGE_SIZE: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryRecord {
    pub id: i32,
    pub slug: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub id: i64,
    pub provider: String,
    pub provider_id: String,
    pub title: String,
    pub bugzilla_id: Option<u32>,
    /// Base repository slug.
    pub repository: String,
    pub created: String,
    pub diffs_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffRecord {
    pub id: i64,
    pub revision_id: i64,
    pub commit_hash: String,
    pub review_task_id: String,
    /// Head/try repository slug the analysis ran on.
    pub repository: String,
    pub created: String,
    pub issues_url: String,
}

/// One stored issue together with the link flags for the requested diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: String,
    pub hash: String,
    pub analyzer: String,
    pub check: Option<String>,
    pub path: String,
    pub line: Option<u32>,
    pub nb_lines: u32,
    #[serde(rename = "char")]
    pub column: Option<u32>,
    pub level: Level,
    pub message: String,
    pub in_patch: bool,
    pub new_for_revision: bool,
    pub publishable: bool,
    pub created: String,
}

/// Wire payload for issue publication; flags the client computed locally.
/// The store recomputes `new_for_revision` against its own history so that
/// retried runs converge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuePayload {
    pub hash: String,
    pub analyzer: String,
    pub check: Option<String>,
    pub path: String,
    pub line: Option<u32>,
    pub nb_lines: u32,
    #[serde(rename = "char")]
    pub column: Option<u32>,
    pub level: Level,
    pub message: String,
    pub in_patch: bool,
}

impl IssuePayload {
    #[must_use]
    pub fn from_issue(issue: &Issue) -> IssuePayload {
        IssuePayload {
            hash: issue.hash.clone(),
            analyzer: issue.analyzer.clone(),
            check: issue.check.clone(),
            path: issue.path.clone(),
            line: issue.line,
            nb_lines: issue.nb_lines,
            column: issue.column,
            level: issue.level,
            message: issue.message.clone(),
            in_patch: issue.in_patch,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionPayload {
    pub id: i64,
    pub provider: String,
    pub provider_id: String,
    pub title: String,
    pub bugzilla_id: Option<u32>,
    pub repository: String,
}

impl RevisionPayload {
    #[must_use]
    pub fn from_revision(revision: &crate::revision::Revision) -> RevisionPayload {
        RevisionPayload {
            id: revision.id,
            provider: String::from(revision.provider.as_str()),
            provider_id: revision.provider_id.clone(),
            title: revision.title.clone(),
            bugzilla_id: revision.bugzilla_id,
            repository: revision.base_repository.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffPayload {
    pub id: i64,
    pub commit_hash: String,
    pub review_task_id: String,
    pub repository: String,
}

impl DiffPayload {
    #[must_use]
    pub fn from_revision(revision: &crate::revision::Revision) -> DiffPayload {
        DiffPayload {
            id: revision.diff_id,
            commit_hash: revision.commit_hash.clone(),
            review_task_id: revision.review_task_id.clone(),
            repository: revision.head_repository.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryPayload {
    pub slug: String,
    pub url: String,
}

/// Bulk issue publication body for one diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueBulkPayload {
    pub diff_id: i64,
    pub issues: Vec<IssuePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueBulkResponse {
    pub issues: Vec<IssueRecord>,
}

/// Pagination envelope shared by every listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Paginated<T> {
    /// Build a page envelope out of the full ordered result set.
    #[must_use]
    pub fn slice(items: Vec<T>, page: u64, path: &str) -> Paginated<T> {
        let count = items.len() as u64;
        let page = page.max(1);
        let start = usize::try_from((page - 1) * PAGE_SIZE).unwrap_or(usize::MAX);
        let results: Vec<T> = items
            .into_iter()
            .skip(start)
            .take(usize::try_from(PAGE_SIZE).unwrap_or(usize::MAX))
            .collect();
        let next = (page * PAGE_SIZE < count).then(|| format!("{path}?page={}", page + 1));
        let previous = (page > 1).then(|| format!("{path}?page={}", page - 1));
        Paginated {
            count,
            next,
            previous,
            results,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuesFilter {
    No,
    Any,
    Publishable,
}

impl IssuesFilter {
    #[must_use]
    pub fn parse(value: &str) -> Option<IssuesFilter> {
        match value {
            "no" => Some(IssuesFilter::No),
            "any" => Some(IssuesFilter::Any),
            "publishable" => Some(IssuesFilter::Publishable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiffFilters {
    /// Substring match on revision title or commit hash.
    pub search: Option<String>,
    /// Head repository slug.
    pub repository: Option<String>,
    pub issues: Option<IssuesFilter>,
}

/// Aggregated counters for one `(repository, analyzer, check)` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStats {
    pub repository: String,
    pub analyzer: String,
    pub check: String,
    pub total: u64,
    pub publishable: u64,
}

/// One day of a check's detection time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: String,
    pub total: u64,
}
