// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{collections::HashSet, sync::Arc, time::Duration};

use dashmap::DashMap;
use log::{debug, warn};
use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use url::Url;

use crate::{
    ci::http_client,
    issues::Issue,
    revision::Revision,
};

use super::{
    CreateStoreError, IssueStore, ResultWithContext, StoreDetailedError, StoreError,
    models::{
        CheckStats, DiffFilters, DiffPayload, DiffRecord, HistoryPoint, IssueBulkPayload,
        IssueBulkResponse, IssuePayload, IssueRecord, Paginated, RepositoryPayload,
        RepositoryRecord, RevisionPayload, RevisionRecord,
    },
};

impl From<reqwest::Error> for StoreError {
    fn from(value: reqwest::Error) -> Self {
        StoreError::StoreError(value.to_string())
    }
}

impl From<url::ParseError> for StoreError {
    fn from(value: url::ParseError) -> Self {
        StoreError::StoreError(value.to_string())
    }
}

/// Remote implementation of the issue store, talking to the backend HTTP
/// surface with a bearer credential.
///
/// Writes for one revision are serialized client-side (one in-flight write
/// per revision id); different revisions proceed in parallel.
pub struct RestStore {
    api_url: Url,
    token: Option<String>,
    revision_write_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl RestStore {
    pub fn new(api_url: &str, token: Option<&str>) -> Result<RestStore, CreateStoreError> {
        let mut url = Url::parse(api_url)
            .map_err(|e| CreateStoreError::InvalidConfiguration(format!("backend URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| {
                CreateStoreError::InvalidConfiguration(String::from(
                    "backend URL is bad; cannot append segments",
                ))
            })?
            .push("v1");
        Ok(RestStore {
            api_url: url,
            token: token.map(String::from),
            revision_write_locks: DashMap::new(),
        })
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, StoreDetailedError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::ParsingError(String::from("backend URL is bad")))
            .context("building backend URL")?
            .extend(segments)
            // Django-style endpoints end with a slash.
            .push("");
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn write_lock(&self, revision_id: i64) -> Arc<Mutex<()>> {
        self.revision_write_locks
            .entry(revision_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// One JSON request with a small retry loop on server errors.
    async fn request<B: Serialize, R: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        context: &'static str,
    ) -> Result<Option<R>, StoreDetailedError> {
        let client = http_client();
        let mut retries_available: u8 = 3;
        loop {
            debug!("HTTP request {method} {url}");
            let mut request = client.request(method.clone(), url.clone());
            if let Some(ref token) = self.token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            let request = request.build().context(context)?;
            let response = client.execute(request).await.context(context)?;

            debug!("HTTP response: {response:?}");
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if response.status().is_server_error() && retries_available > 0 {
                // slight wait... this is pretty unsophisticated retry but it's better than nothing
                warn!(
                    "HTTP response {} received from backend; retrying in 2 seconds",
                    response.status()
                );
                retries_available -= 1;
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
            if !response.status().is_success() {
                return Err(StoreError::StoreError(format!(
                    "backend returned unexpected status {}",
                    response.status()
                )))
                .context(context);
            }
            return Ok(Some(response.json::<R>().await.context(context)?));
        }
    }

    async fn get<R: DeserializeOwned>(
        &self,
        url: Url,
        context: &'static str,
    ) -> Result<Option<R>, StoreDetailedError> {
        self.request::<(), R>(Method::GET, url, None, context).await
    }

    /// Collect every result of a paginated listing by following `next`.
    async fn paginate_all<R: DeserializeOwned>(
        &self,
        first: Url,
        context: &'static str,
    ) -> Result<Vec<R>, StoreDetailedError> {
        let mut out = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let Some(page) = self.get::<Paginated<R>>(url.clone(), context).await? else {
                break;
            };
            out.extend(page.results);
            if let Some(ref next_path) = page.next {
                next = Some(url.join(next_path).context(context)?);
            }
        }
        Ok(out)
    }
}

impl IssueStore for RestStore {
    async fn ensure_repository(
        &self,
        slug: &str,
        url: &str,
    ) -> Result<RepositoryRecord, StoreDetailedError> {
        let endpoint = self.endpoint(&["repository"], &[])?;
        let payload = RepositoryPayload {
            slug: String::from(slug),
            url: String::from(url),
        };
        self.request(Method::POST, endpoint, Some(&payload), "creating repository")
            .await?
            .ok_or_else(|| {
                StoreError::StoreError(String::from("backend dropped repository creation")).into()
            })
    }

    async fn create_revision(
        &self,
        payload: &RevisionPayload,
    ) -> Result<RevisionRecord, StoreDetailedError> {
        // Create-or-identity: probe first, create on miss.
        let id = payload.id.to_string();
        let probe = self.endpoint(&["revision", &id], &[])?;
        if let Some(existing) = self
            .get::<RevisionRecord>(probe, "reading revision")
            .await?
        {
            debug!("revision {} already known to backend", payload.id);
            return Ok(existing);
        }

        let endpoint = self.endpoint(&["revision"], &[])?;
        self.request(Method::POST, endpoint, Some(payload), "creating revision")
            .await?
            .ok_or_else(|| {
                StoreError::StoreError(String::from("backend dropped revision creation")).into()
            })
    }

    async fn create_diff(
        &self,
        revision_id: i64,
        payload: &DiffPayload,
    ) -> Result<DiffRecord, StoreDetailedError> {
        let id = payload.id.to_string();
        let probe = self.endpoint(&["diff", &id], &[])?;
        if let Some(existing) = self.get::<DiffRecord>(probe, "reading diff").await? {
            debug!("diff {} already known to backend", payload.id);
            return Ok(existing);
        }

        let revision_id = revision_id.to_string();
        let endpoint = self.endpoint(&["revision", &revision_id, "diffs"], &[])?;
        self.request(Method::POST, endpoint, Some(payload), "creating diff")
            .await?
            .ok_or_else(|| {
                StoreError::StoreError(String::from("backend dropped diff creation")).into()
            })
    }

    async fn create_issues(
        &self,
        diff_id: i64,
        issues: &[IssuePayload],
    ) -> Result<Vec<IssueRecord>, StoreDetailedError> {
        let id = diff_id.to_string();
        let endpoint = self.endpoint(&["diff", &id, "issues"], &[])?;
        let payload = IssueBulkPayload {
            diff_id,
            issues: issues.to_vec(),
        };
        let response: IssueBulkResponse = self
            .request(Method::POST, endpoint, Some(&payload), "publishing issues")
            .await?
            .ok_or_else(|| -> StoreDetailedError {
                StoreError::StoreError(String::from("backend dropped issue publication")).into()
            })?;
        Ok(response.issues)
    }

    async fn publish_revision(
        &self,
        revision: &Revision,
    ) -> Result<RevisionRecord, StoreDetailedError> {
        let _guard = self.write_lock(revision.id).await.lock_owned().await;
        self.create_revision(&RevisionPayload::from_revision(revision))
            .await
    }

    async fn publish_diff(&self, revision: &Revision) -> Result<DiffRecord, StoreDetailedError> {
        let _guard = self.write_lock(revision.id).await.lock_owned().await;
        self.create_diff(revision.id, &DiffPayload::from_revision(revision))
            .await
    }

    async fn publish_issues(
        &self,
        revision: &Revision,
        issues: &[Issue],
    ) -> Result<Vec<IssueRecord>, StoreDetailedError> {
        let _guard = self.write_lock(revision.id).await.lock_owned().await;
        let payloads: Vec<IssuePayload> = issues.iter().map(IssuePayload::from_issue).collect();
        self.create_issues(revision.diff_id, &payloads).await
    }

    async fn known_hashes(
        &self,
        revision_id: i64,
        before_diff_id: i64,
    ) -> Result<HashSet<String>, StoreDetailedError> {
        let id = revision_id.to_string();
        let endpoint = self.endpoint(&["revision", &id, "diffs"], &[])?;
        let diffs: Vec<DiffRecord> = self
            .paginate_all(endpoint, "listing revision diffs")
            .await?;

        let mut hashes = HashSet::new();
        for diff in diffs.into_iter().filter(|d| d.id < before_diff_id) {
            let diff_id = diff.id.to_string();
            let endpoint = self.endpoint(&["diff", &diff_id, "issues"], &[])?;
            let issues: Vec<IssueRecord> =
                self.paginate_all(endpoint, "listing diff issues").await?;
            hashes.extend(issues.into_iter().map(|issue| issue.hash));
        }
        Ok(hashes)
    }

    async fn repositories(&self) -> Result<Vec<RepositoryRecord>, StoreDetailedError> {
        let endpoint = self.endpoint(&["repository"], &[])?;
        self.paginate_all(endpoint, "listing repositories").await
    }

    async fn diffs(
        &self,
        filters: &DiffFilters,
        page: u64,
    ) -> Result<Paginated<DiffRecord>, StoreDetailedError> {
        let page = page.to_string();
        let mut query: Vec<(&str, &str)> = vec![("page", &page)];
        if let Some(ref search) = filters.search {
            query.push(("search", search));
        }
        if let Some(ref repository) = filters.repository {
            query.push(("repository", repository));
        }
        let issues_value;
        if let Some(issues) = filters.issues {
            issues_value = match issues {
                super::models::IssuesFilter::No => "no",
                super::models::IssuesFilter::Any => "any",
                super::models::IssuesFilter::Publishable => "publishable",
            };
            query.push(("issues", issues_value));
        }
        let endpoint = self.endpoint(&["diff"], &query)?;
        self.get(endpoint, "listing diffs").await?.ok_or_else(|| {
            StoreError::StoreError(String::from("diff listing endpoint vanished")).into()
        })
    }

    async fn diff(&self, id: i64) -> Result<Option<DiffRecord>, StoreDetailedError> {
        let id = id.to_string();
        let endpoint = self.endpoint(&["diff", &id], &[])?;
        self.get(endpoint, "reading diff").await
    }

    async fn diff_issues(
        &self,
        diff_id: i64,
        page: u64,
    ) -> Result<Paginated<IssueRecord>, StoreDetailedError> {
        let id = diff_id.to_string();
        let page = page.to_string();
        let endpoint = self.endpoint(&["diff", &id, "issues"], &[("page", &page)])?;
        self.get(endpoint, "listing diff issues")
            .await?
            .ok_or_else(|| {
                StoreError::StoreError(format!("diff {diff_id} has no issues endpoint")).into()
            })
    }

    async fn revision(&self, id: i64) -> Result<Option<RevisionRecord>, StoreDetailedError> {
        let id = id.to_string();
        let endpoint = self.endpoint(&["revision", &id], &[])?;
        self.get(endpoint, "reading revision").await
    }

    async fn revision_diffs(
        &self,
        revision_id: i64,
        page: u64,
    ) -> Result<Paginated<DiffRecord>, StoreDetailedError> {
        let id = revision_id.to_string();
        let page = page.to_string();
        let endpoint = self.endpoint(&["revision", &id, "diffs"], &[("page", &page)])?;
        self.get(endpoint, "listing revision diffs")
            .await?
            .ok_or_else(|| {
                StoreError::StoreError(format!("revision {revision_id} has no diffs endpoint"))
                    .into()
            })
    }

    async fn check_issues(
        &self,
        repository: &str,
        analyzer: &str,
        check: &str,
        publishable: Option<bool>,
        page: u64,
    ) -> Result<Paginated<IssueRecord>, StoreDetailedError> {
        let page = page.to_string();
        let mut query: Vec<(&str, &str)> = vec![("page", &page)];
        let flag;
        if let Some(publishable) = publishable {
            flag = if publishable { "true" } else { "false" };
            query.push(("publishable", flag));
        }
        let endpoint = self.endpoint(&["check", repository, analyzer, check], &query)?;
        self.get(endpoint, "listing check issues")
            .await?
            .ok_or_else(|| {
                StoreError::StoreError(String::from("check endpoint vanished")).into()
            })
    }

    async fn check_stats(
        &self,
        since: Option<&str>,
    ) -> Result<Vec<CheckStats>, StoreDetailedError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(since) = since {
            query.push(("since", since));
        }
        let endpoint = self.endpoint(&["check", "stats"], &query)?;
        self.get(endpoint, "reading check stats").await?.ok_or_else(|| {
            StoreError::StoreError(String::from("check stats endpoint vanished")).into()
        })
    }

    async fn check_history(
        &self,
        repository: Option<&str>,
        analyzer: Option<&str>,
        check: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<HistoryPoint>, StoreDetailedError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(repository) = repository {
            query.push(("repository", repository));
        }
        if let Some(analyzer) = analyzer {
            query.push(("analyzer", analyzer));
        }
        if let Some(check) = check {
            query.push(("check", check));
        }
        if let Some(since) = since {
            query.push(("since", since));
        }
        let endpoint = self.endpoint(&["check", "history"], &query)?;
        self.get(endpoint, "reading check history").await?.ok_or_else(|| {
            StoreError::StoreError(String::from("check history endpoint vanished")).into()
        })
    }
}
