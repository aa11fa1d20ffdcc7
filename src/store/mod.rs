// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::HashSet, env, fmt};

use enum_dispatch::enum_dispatch;
use log::error;
use thiserror::Error;

use crate::{issues::Issue, revision::Revision};

pub mod models;
mod rest;
mod sqlite;

pub use rest::RestStore;
pub use sqlite::SqliteStore;

use models::{
    CheckStats, DiffFilters, DiffPayload, DiffRecord, HistoryPoint, IssuePayload, IssueRecord,
    Paginated, RepositoryRecord, RevisionPayload, RevisionRecord,
};

#[derive(Error, Debug)]
pub enum CreateStoreError {
    #[error("unsupported store url: `{0}`")]
    UnsupportedUrl(String),
    #[error("error with invalid configuration: `{0}`")]
    InvalidConfiguration(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store error: `{0}`")]
    StoreError(String),
    #[error("JSON deserialize error: `{0}`")]
    DeserializeError(#[from] serde_json::Error),
    #[error("data parsing error: `{0}`")]
    ParsingError(String),
    #[error("unknown repository: `{0}`")]
    UnknownRepository(String),
}

/// A `StoreError` enriched with the operation that produced it.
#[derive(Error, Debug)]
pub struct StoreDetailedError {
    pub error: StoreError,
    pub context: Option<String>,
}

impl fmt::Display for StoreDetailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.error, context),
            None => write!(f, "{}", self.error),
        }
    }
}

impl StoreDetailedError {
    fn context(self, context: &str) -> StoreDetailedError {
        StoreDetailedError {
            error: self.error,
            context: Some(String::from(context)),
        }
    }
}

impl From<StoreError> for StoreDetailedError {
    fn from(value: StoreError) -> Self {
        StoreDetailedError {
            error: value,
            context: None,
        }
    }
}

impl From<serde_json::Error> for StoreDetailedError {
    fn from(value: serde_json::Error) -> Self {
        StoreDetailedError {
            error: StoreError::DeserializeError(value),
            context: None,
        }
    }
}

pub(crate) trait ResultWithContext<T> {
    fn context(self, context: &str) -> Result<T, StoreDetailedError>;
}

impl<T> ResultWithContext<T> for Result<T, StoreDetailedError> {
    fn context(self, context: &str) -> Result<T, StoreDetailedError> {
        self.map_err(|e| e.context(context))
    }
}

impl<Res, Err> ResultWithContext<Res> for Result<Res, Err>
where
    Err: Into<StoreError>,
{
    fn context(self, context: &str) -> Result<Res, StoreDetailedError> {
        self.map_err(|e| StoreDetailedError {
            error: e.into(),
            context: Some(String::from(context)),
        })
    }
}

/// The backend system of record for analyses and their issues.
///
/// Every write is idempotent on natural keys (repository slug, revision id,
/// diff id, issue hash) so retried runs converge to the same state.
#[enum_dispatch]
#[allow(async_fn_in_trait)] // should be fine to the extent that this is only used internally to this project
pub trait IssueStore {
    async fn ensure_repository(
        &self,
        slug: &str,
        url: &str,
    ) -> Result<RepositoryRecord, StoreDetailedError>;

    /// Create-or-identity on the revision id; title and bugzilla id are the
    /// only mutable fields.
    async fn create_revision(
        &self,
        payload: &RevisionPayload,
    ) -> Result<RevisionRecord, StoreDetailedError>;

    /// Create-or-identity on the diff id; diffs are immutable once created.
    async fn create_diff(
        &self,
        revision_id: i64,
        payload: &DiffPayload,
    ) -> Result<DiffRecord, StoreDetailedError>;

    /// Insert the full issue set of one diff, transactionally: issues by hash
    /// (conflict = keep), links per `(issue, diff)` (conflict = replace
    /// flags). `new_for_revision` is recomputed store-side from prior diffs.
    async fn create_issues(
        &self,
        diff_id: i64,
        issues: &[IssuePayload],
    ) -> Result<Vec<IssueRecord>, StoreDetailedError>;

    async fn publish_revision(
        &self,
        revision: &Revision,
    ) -> Result<RevisionRecord, StoreDetailedError> {
        self.create_revision(&RevisionPayload::from_revision(revision))
            .await
    }

    async fn publish_diff(&self, revision: &Revision) -> Result<DiffRecord, StoreDetailedError> {
        self.create_diff(revision.id, &DiffPayload::from_revision(revision))
            .await
    }

    async fn publish_issues(
        &self,
        revision: &Revision,
        issues: &[Issue],
    ) -> Result<Vec<IssueRecord>, StoreDetailedError> {
        let payloads: Vec<IssuePayload> = issues.iter().map(IssuePayload::from_issue).collect();
        self.create_issues(revision.diff_id, &payloads).await
    }

    /// Issue hashes observed on diffs of `revision_id` older than
    /// `before_diff_id`; the input to the `new_for_revision` rule.
    async fn known_hashes(
        &self,
        revision_id: i64,
        before_diff_id: i64,
    ) -> Result<HashSet<String>, StoreDetailedError>;

    async fn repositories(&self) -> Result<Vec<RepositoryRecord>, StoreDetailedError>;

    async fn diffs(
        &self,
        filters: &DiffFilters,
        page: u64,
    ) -> Result<Paginated<DiffRecord>, StoreDetailedError>;

    async fn diff(&self, id: i64) -> Result<Option<DiffRecord>, StoreDetailedError>;

    async fn diff_issues(
        &self,
        diff_id: i64,
        page: u64,
    ) -> Result<Paginated<IssueRecord>, StoreDetailedError>;

    async fn revision(&self, id: i64) -> Result<Option<RevisionRecord>, StoreDetailedError>;

    async fn revision_diffs(
        &self,
        revision_id: i64,
        page: u64,
    ) -> Result<Paginated<DiffRecord>, StoreDetailedError>;

    async fn check_issues(
        &self,
        repository: &str,
        analyzer: &str,
        check: &str,
        publishable: Option<bool>,
        page: u64,
    ) -> Result<Paginated<IssueRecord>, StoreDetailedError>;

    async fn check_stats(&self, since: Option<&str>) -> Result<Vec<CheckStats>, StoreDetailedError>;

    async fn check_history(
        &self,
        repository: Option<&str>,
        analyzer: Option<&str>,
        check: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<HistoryPoint>, StoreDetailedError>;
}

#[enum_dispatch(IssueStore)]
pub enum IssueStoreDispatch {
    Sqlite(SqliteStore),
    Rest(RestStore),
}

/// Select a store implementation from a URL: `file://` / `:memory:` are
/// local SQLite databases, `http(s)://` is the remote backend API.
pub fn create_store(
    url: &str,
    token: Option<&str>,
) -> Result<IssueStoreDispatch, CreateStoreError> {
    if let Some(path) = url.strip_prefix("file://") {
        Ok(SqliteStore::new(String::from(path)).into())
    } else if url.starts_with(":memory:") {
        Ok(SqliteStore::new(String::from(url)).into())
    } else if url.starts_with("http://") || url.starts_with("https://") {
        Ok(RestStore::new(url, token)
            .map_err(|e| CreateStoreError::InvalidConfiguration(e.to_string()))?
            .into())
    } else {
        Err(CreateStoreError::UnsupportedUrl(String::from(url)))
    }
}

/// Store from the environment override, for local development and tooling.
pub fn create_store_from_env() -> Result<IssueStoreDispatch, CreateStoreError> {
    match env::var("REVIEWBOT_DATABASE_URL") {
        Ok(url) => create_store(&url, None),
        Err(_) => Err(CreateStoreError::InvalidConfiguration(String::from(
            "REVIEWBOT_DATABASE_URL is not set",
        ))),
    }
}

#[must_use]
pub fn create_test_store() -> IssueStoreDispatch {
    SqliteStore::new(String::from(":memory:")).into()
}

#[must_use]
pub fn create_store_infallible(url: &str, token: Option<&str>) -> IssueStoreDispatch {
    match create_store(url, token) {
        Ok(store) => store,
        Err(e) => {
            error!("Unable to create issue store: {e:?}");
            panic!("Unable to create issue store: {e:?}");
        }
    }
}
