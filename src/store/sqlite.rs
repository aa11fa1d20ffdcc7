// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::{HashMap, HashSet};

use diesel::{
    connection::{Instrumentation, SimpleConnection as _},
    prelude::*,
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::trace;
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use uuid::Uuid;

use crate::{
    issues::Level,
    util::{date_of, now_rfc3339},
};

use super::{
    IssueStore, ResultWithContext, StoreDetailedError, StoreError,
    models::{
        CheckStats, DiffFilters, DiffPayload, DiffRecord, HistoryPoint, IssuePayload, IssueRecord,
        Paginated, RepositoryRecord, RevisionPayload, RevisionRecord,
    },
};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("db/sqlite/migrations");

struct DbLogger;

impl Instrumentation for DbLogger {
    fn on_connection_event(&mut self, event: diesel::connection::InstrumentationEvent<'_>) {
        trace!("DB event: {:?}", event);
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        StoreError::StoreError(value.to_string())
    }
}

impl From<diesel::result::Error> for StoreDetailedError {
    fn from(value: diesel::result::Error) -> Self {
        StoreDetailedError {
            error: StoreError::StoreError(value.to_string()),
            context: None,
        }
    }
}

impl From<diesel::ConnectionError> for StoreError {
    fn from(value: diesel::ConnectionError) -> Self {
        StoreError::StoreError(value.to_string())
    }
}

/// Local SQLite implementation of the issue store; also what the API server
/// serves from.
pub struct SqliteStore {
    database_url: String,
    connection: OnceCell<Mutex<SqliteConnection>>,
}

#[derive(Queryable, Selectable, Clone)]
#[diesel(table_name = crate::schema::repository)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct RepositoryRow {
    id: i32,
    slug: String,
    url: String,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = crate::schema::revision)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct RevisionRow {
    id: i64,
    provider: String,
    provider_id: String,
    title: String,
    bugzilla_id: Option<i32>,
    repository_id: i32,
    created: String,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = crate::schema::diff)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct DiffRow {
    id: i64,
    revision_id: i64,
    commit_hash: String,
    review_task_id: String,
    repository_id: i32,
    created: String,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = crate::schema::issue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct IssueRow {
    id: String,
    hash: String,
    analyzer: String,
    check: Option<String>,
    path: String,
    line: Option<i32>,
    nb_lines: i32,
    char_index: Option<i32>,
    level: String,
    message: String,
    created: String,
}

#[derive(Queryable, Selectable, Insertable, Clone)]
#[diesel(table_name = crate::schema::issue_link)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct LinkRow {
    id: String,
    issue_id: String,
    diff_id: i64,
    revision_id: i64,
    in_patch: bool,
    new_for_revision: bool,
    publishable: bool,
}

fn issue_record(issue: &IssueRow, link: &LinkRow) -> IssueRecord {
    IssueRecord {
        id: issue.id.clone(),
        hash: issue.hash.clone(),
        analyzer: issue.analyzer.clone(),
        check: issue.check.clone(),
        path: issue.path.clone(),
        line: issue.line.and_then(|l| u32::try_from(l).ok()),
        nb_lines: u32::try_from(issue.nb_lines).unwrap_or(1),
        column: issue.char_index.and_then(|c| u32::try_from(c).ok()),
        level: Level::parse(&issue.level).unwrap_or(Level::Warning),
        message: issue.message.clone(),
        in_patch: link.in_patch,
        new_for_revision: link.new_for_revision,
        publishable: link.publishable,
        created: issue.created.clone(),
    }
}

fn revision_record(row: &RevisionRow, repository_slug: &str) -> RevisionRecord {
    RevisionRecord {
        id: row.id,
        provider: row.provider.clone(),
        provider_id: row.provider_id.clone(),
        title: row.title.clone(),
        bugzilla_id: row.bugzilla_id.and_then(|id| u32::try_from(id).ok()),
        repository: String::from(repository_slug),
        created: row.created.clone(),
        diffs_url: format!("/v1/revision/{}/diffs/", row.id),
    }
}

fn diff_record(row: &DiffRow, repository_slug: &str) -> DiffRecord {
    DiffRecord {
        id: row.id,
        revision_id: row.revision_id,
        commit_hash: row.commit_hash.clone(),
        review_task_id: row.review_task_id.clone(),
        repository: String::from(repository_slug),
        created: row.created.clone(),
        issues_url: format!("/v1/diff/{}/issues/", row.id),
    }
}

impl SqliteStore {
    #[must_use]
    pub fn new(database_url: String) -> SqliteStore {
        SqliteStore {
            database_url,
            connection: OnceCell::new(),
        }
    }

    async fn get_connection(
        &self,
    ) -> Result<MutexGuard<'_, SqliteConnection>, StoreDetailedError> {
        Ok(self
            .connection
            .get_or_try_init(|| async {
                let mut connection = SqliteConnection::establish(&self.database_url)
                    .context("connecting to the database")?;
                connection.set_instrumentation(DbLogger {});

                connection.batch_execute(
                    "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = OFF; -- don't fsync; let OS handle it
                PRAGMA wal_autocheckpoint = 1000;
                PRAGMA foreign_keys = ON;
                ",
                )?;
                connection
                    .run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StoreError::StoreError(e.to_string()))
                    .context("running schema migrations")?;
                Ok::<_, StoreDetailedError>(Mutex::new(connection))
            })
            .await?
            .lock()
            .await)
    }

    fn repository_by_slug(
        conn: &mut SqliteConnection,
        target: &str,
    ) -> Result<Option<RepositoryRow>, StoreDetailedError> {
        use crate::schema::repository::dsl::{repository, slug};
        Ok(repository
            .filter(slug.eq(target))
            .select(RepositoryRow::as_select())
            .first(conn)
            .optional()
            .context("selecting repository by slug")?)
    }

    fn repository_slugs(
        conn: &mut SqliteConnection,
    ) -> Result<HashMap<i32, String>, StoreDetailedError> {
        use crate::schema::repository::dsl::repository;
        let rows: Vec<RepositoryRow> = repository
            .select(RepositoryRow::as_select())
            .load(conn)
            .context("listing repositories")?;
        Ok(rows.into_iter().map(|row| (row.id, row.slug)).collect())
    }

    /// Hashes already linked to older diffs of a revision; used both by
    /// `known_hashes` and by the store-side `new_for_revision` recompute.
    fn prior_hashes(
        conn: &mut SqliteConnection,
        for_revision: i64,
        before_diff: i64,
    ) -> Result<HashSet<String>, StoreDetailedError> {
        use crate::schema::{issue, issue_link};
        let hashes: Vec<String> = issue_link::table
            .inner_join(issue::table)
            .filter(issue_link::revision_id.eq(for_revision))
            .filter(issue_link::diff_id.lt(before_diff))
            .select(issue::hash)
            .load(conn)
            .context("selecting prior issue hashes")?;
        Ok(hashes.into_iter().collect())
    }

    fn load_diff(
        conn: &mut SqliteConnection,
        diff_id: i64,
    ) -> Result<Option<DiffRow>, StoreDetailedError> {
        use crate::schema::diff::dsl::{diff, id};
        Ok(diff
            .filter(id.eq(diff_id))
            .select(DiffRow::as_select())
            .first(conn)
            .optional()
            .context("selecting diff")?)
    }
}

impl IssueStore for SqliteStore {
    async fn ensure_repository(
        &self,
        target_slug: &str,
        target_url: &str,
    ) -> Result<RepositoryRecord, StoreDetailedError> {
        use crate::schema::repository::dsl::{repository, slug, url};
        let mut conn = self.get_connection().await?;

        diesel::insert_into(repository)
            .values((slug.eq(target_slug), url.eq(target_url)))
            .on_conflict(slug)
            .do_nothing()
            .execute(&mut *conn)
            .context("inserting repository")?;

        let row = Self::repository_by_slug(&mut conn, target_slug)?
            .ok_or_else(|| StoreError::UnknownRepository(String::from(target_slug)))?;
        Ok(RepositoryRecord {
            id: row.id,
            slug: row.slug,
            url: row.url,
        })
    }

    async fn create_revision(
        &self,
        payload: &RevisionPayload,
    ) -> Result<RevisionRecord, StoreDetailedError> {
        use crate::schema::revision::dsl as rev;
        let mut conn = self.get_connection().await?;

        let repository = Self::repository_by_slug(&mut conn, &payload.repository)?
            .ok_or_else(|| StoreError::UnknownRepository(payload.repository.clone()))?;

        let row = RevisionRow {
            id: payload.id,
            provider: payload.provider.clone(),
            provider_id: payload.provider_id.clone(),
            title: payload.title.clone(),
            bugzilla_id: payload.bugzilla_id.and_then(|id| i32::try_from(id).ok()),
            repository_id: repository.id,
            created: now_rfc3339(),
        };
        // Ids are immutable; only the display title and bug id may move.
        diesel::insert_into(rev::revision)
            .values(&row)
            .on_conflict(rev::id)
            .do_update()
            .set((
                rev::title.eq(&row.title),
                rev::bugzilla_id.eq(row.bugzilla_id),
            ))
            .execute(&mut *conn)
            .context("upserting revision")?;

        let stored: RevisionRow = rev::revision
            .filter(rev::id.eq(payload.id))
            .select(RevisionRow::as_select())
            .first(&mut *conn)
            .context("selecting revision after upsert")?;
        Ok(revision_record(&stored, &repository.slug))
    }

    async fn create_diff(
        &self,
        revision_id: i64,
        payload: &DiffPayload,
    ) -> Result<DiffRecord, StoreDetailedError> {
        use crate::schema::diff::dsl as diff_dsl;
        let mut conn = self.get_connection().await?;

        let repository = Self::repository_by_slug(&mut conn, &payload.repository)?
            .ok_or_else(|| StoreError::UnknownRepository(payload.repository.clone()))?;

        let row = DiffRow {
            id: payload.id,
            revision_id,
            commit_hash: payload.commit_hash.clone(),
            review_task_id: payload.review_task_id.clone(),
            repository_id: repository.id,
            created: now_rfc3339(),
        };
        diesel::insert_into(diff_dsl::diff)
            .values(&row)
            .on_conflict(diff_dsl::id)
            .do_nothing()
            .execute(&mut *conn)
            .context("inserting diff")?;

        let stored = Self::load_diff(&mut conn, payload.id)?
            .ok_or_else(|| StoreError::StoreError(String::from("diff vanished after insert")))?;
        Ok(diff_record(&stored, &repository.slug))
    }

    async fn create_issues(
        &self,
        for_diff: i64,
        issues: &[IssuePayload],
    ) -> Result<Vec<IssueRecord>, StoreDetailedError> {
        use crate::schema::{issue as issue_t, issue_link as link_t};
        let mut conn = self.get_connection().await?;

        let diff = Self::load_diff(&mut conn, for_diff)?
            .ok_or_else(|| StoreError::StoreError(format!("unknown diff {for_diff}")))?;
        let prior = Self::prior_hashes(&mut conn, diff.revision_id, for_diff)?;

        // One transaction per diff: either the full issue set lands, or none
        // of it does.
        let records = conn.transaction::<Vec<IssueRecord>, StoreDetailedError, _>(|conn| {
            let mut records = Vec::with_capacity(issues.len());
            for item in issues {
                let row = IssueRow {
                    id: Uuid::new_v4().to_string(),
                    hash: item.hash.clone(),
                    analyzer: item.analyzer.clone(),
                    check: item.check.clone(),
                    path: item.path.clone(),
                    line: item.line.and_then(|l| i32::try_from(l).ok()),
                    nb_lines: i32::try_from(item.nb_lines).unwrap_or(1),
                    char_index: item.column.and_then(|c| i32::try_from(c).ok()),
                    level: String::from(item.level.as_str()),
                    message: item.message.clone(),
                    created: now_rfc3339(),
                };
                diesel::insert_into(issue_t::table)
                    .values(&row)
                    .on_conflict(issue_t::hash)
                    .do_nothing()
                    .execute(conn)
                    .context("inserting issue")?;

                let stored: IssueRow = issue_t::table
                    .filter(issue_t::hash.eq(&item.hash))
                    .select(IssueRow::as_select())
                    .first(conn)
                    .context("selecting issue after insert")?;

                let new_for_revision = !prior.contains(&item.hash);
                let publishable =
                    item.level == Level::Error || (item.in_patch && new_for_revision);
                let link = LinkRow {
                    id: Uuid::new_v4().to_string(),
                    issue_id: stored.id.clone(),
                    diff_id: for_diff,
                    revision_id: diff.revision_id,
                    in_patch: item.in_patch,
                    new_for_revision,
                    publishable,
                };
                diesel::insert_into(link_t::table)
                    .values(&link)
                    .on_conflict((link_t::issue_id, link_t::diff_id))
                    .do_update()
                    .set((
                        link_t::in_patch.eq(link.in_patch),
                        link_t::new_for_revision.eq(link.new_for_revision),
                        link_t::publishable.eq(link.publishable),
                    ))
                    .execute(conn)
                    .context("upserting issue link")?;

                records.push(issue_record(&stored, &link));
            }
            Ok(records)
        })?;

        Ok(records)
    }

    async fn known_hashes(
        &self,
        revision_id: i64,
        before_diff_id: i64,
    ) -> Result<HashSet<String>, StoreDetailedError> {
        let mut conn = self.get_connection().await?;
        Self::prior_hashes(&mut conn, revision_id, before_diff_id)
    }

    async fn repositories(&self) -> Result<Vec<RepositoryRecord>, StoreDetailedError> {
        use crate::schema::repository::dsl::{repository, slug};
        let mut conn = self.get_connection().await?;
        let rows: Vec<RepositoryRow> = repository
            .order(slug.asc())
            .select(RepositoryRow::as_select())
            .load(&mut *conn)
            .context("listing repositories")?;
        Ok(rows
            .into_iter()
            .map(|row| RepositoryRecord {
                id: row.id,
                slug: row.slug,
                url: row.url,
            })
            .collect())
    }

    async fn diffs(
        &self,
        filters: &DiffFilters,
        page: u64,
    ) -> Result<Paginated<DiffRecord>, StoreDetailedError> {
        use crate::schema::{diff, issue_link, revision};
        let mut conn = self.get_connection().await?;

        let slugs = Self::repository_slugs(&mut conn)?;
        let rows: Vec<(DiffRow, RevisionRow)> = diff::table
            .inner_join(revision::table)
            .order(diff::id.desc())
            .select((DiffRow::as_select(), RevisionRow::as_select()))
            .load(&mut *conn)
            .context("listing diffs")?;

        // Link flags per diff, for the `issues=` filter.
        let links: Vec<(i64, bool)> = issue_link::table
            .select((issue_link::diff_id, issue_link::publishable))
            .load(&mut *conn)
            .context("listing issue links")?;
        let mut any: HashSet<i64> = HashSet::new();
        let mut any_publishable: HashSet<i64> = HashSet::new();
        for (diff_id, publishable) in links {
            any.insert(diff_id);
            if publishable {
                any_publishable.insert(diff_id);
            }
        }

        let results: Vec<DiffRecord> = rows
            .into_iter()
            .filter(|(row, rev_row)| {
                if let Some(ref search) = filters.search {
                    let needle = search.to_lowercase();
                    if !rev_row.title.to_lowercase().contains(&needle)
                        && !row.commit_hash.contains(&needle)
                    {
                        return false;
                    }
                }
                if let Some(ref repo) = filters.repository {
                    if slugs.get(&row.repository_id) != Some(repo) {
                        return false;
                    }
                }
                match filters.issues {
                    Some(super::models::IssuesFilter::No) => !any.contains(&row.id),
                    Some(super::models::IssuesFilter::Any) => any.contains(&row.id),
                    Some(super::models::IssuesFilter::Publishable) => {
                        any_publishable.contains(&row.id)
                    }
                    None => true,
                }
            })
            .map(|(row, _)| {
                let slug = slugs.get(&row.repository_id).cloned().unwrap_or_default();
                diff_record(&row, &slug)
            })
            .collect();

        Ok(Paginated::slice(results, page, "/v1/diff/"))
    }

    async fn diff(&self, id: i64) -> Result<Option<DiffRecord>, StoreDetailedError> {
        let mut conn = self.get_connection().await?;
        let slugs = Self::repository_slugs(&mut conn)?;
        Ok(Self::load_diff(&mut conn, id)?.map(|row| {
            let slug = slugs.get(&row.repository_id).cloned().unwrap_or_default();
            diff_record(&row, &slug)
        }))
    }

    async fn diff_issues(
        &self,
        for_diff: i64,
        page: u64,
    ) -> Result<Paginated<IssueRecord>, StoreDetailedError> {
        use crate::schema::{issue, issue_link};
        let mut conn = self.get_connection().await?;
        let rows: Vec<(LinkRow, IssueRow)> = issue_link::table
            .inner_join(issue::table)
            .filter(issue_link::diff_id.eq(for_diff))
            .select((LinkRow::as_select(), IssueRow::as_select()))
            .load(&mut *conn)
            .context("listing diff issues")?;

        let mut results: Vec<IssueRecord> = rows
            .iter()
            .map(|(link, issue)| issue_record(issue, link))
            .collect();
        results.sort_by(|a, b| {
            (&a.path, a.line, &a.analyzer, &a.check, &a.hash).cmp(&(
                &b.path, b.line, &b.analyzer, &b.check, &b.hash,
            ))
        });
        Ok(Paginated::slice(
            results,
            page,
            &format!("/v1/diff/{for_diff}/issues/"),
        ))
    }

    async fn revision(&self, id: i64) -> Result<Option<RevisionRecord>, StoreDetailedError> {
        use crate::schema::revision::dsl as rev;
        let mut conn = self.get_connection().await?;
        let slugs = Self::repository_slugs(&mut conn)?;
        let row: Option<RevisionRow> = rev::revision
            .filter(rev::id.eq(id))
            .select(RevisionRow::as_select())
            .first(&mut *conn)
            .optional()
            .context("selecting revision")?;
        Ok(row.map(|row| {
            let slug = slugs.get(&row.repository_id).cloned().unwrap_or_default();
            revision_record(&row, &slug)
        }))
    }

    async fn revision_diffs(
        &self,
        for_revision: i64,
        page: u64,
    ) -> Result<Paginated<DiffRecord>, StoreDetailedError> {
        use crate::schema::diff::dsl as diff_dsl;
        let mut conn = self.get_connection().await?;
        let slugs = Self::repository_slugs(&mut conn)?;
        let rows: Vec<DiffRow> = diff_dsl::diff
            .filter(diff_dsl::revision_id.eq(for_revision))
            .order(diff_dsl::id.asc())
            .select(DiffRow::as_select())
            .load(&mut *conn)
            .context("listing revision diffs")?;
        let results = rows
            .into_iter()
            .map(|row| {
                let slug = slugs.get(&row.repository_id).cloned().unwrap_or_default();
                diff_record(&row, &slug)
            })
            .collect();
        Ok(Paginated::slice(
            results,
            page,
            &format!("/v1/revision/{for_revision}/diffs/"),
        ))
    }

    async fn check_issues(
        &self,
        repository: &str,
        analyzer: &str,
        check: &str,
        publishable: Option<bool>,
        page: u64,
    ) -> Result<Paginated<IssueRecord>, StoreDetailedError> {
        use crate::schema::{diff, issue, issue_link};
        let mut conn = self.get_connection().await?;
        let slugs = Self::repository_slugs(&mut conn)?;

        let rows: Vec<(LinkRow, IssueRow, DiffRow)> = issue_link::table
            .inner_join(issue::table)
            .inner_join(diff::table)
            .filter(issue::analyzer.eq(analyzer))
            .filter(issue::check.eq(check))
            .select((
                LinkRow::as_select(),
                IssueRow::as_select(),
                DiffRow::as_select(),
            ))
            .load(&mut *conn)
            .context("listing check issues")?;

        let mut results: Vec<IssueRecord> = rows
            .iter()
            .filter(|(link, _, diff_row)| {
                slugs.get(&diff_row.repository_id).map(String::as_str) == Some(repository)
                    && publishable.is_none_or(|wanted| link.publishable == wanted)
            })
            .map(|(link, issue, _)| issue_record(issue, link))
            .collect();
        results.sort_by(|a, b| a.created.cmp(&b.created));
        Ok(Paginated::slice(
            results,
            page,
            &format!("/v1/check/{repository}/{analyzer}/{check}/"),
        ))
    }

    async fn check_stats(
        &self,
        since: Option<&str>,
    ) -> Result<Vec<CheckStats>, StoreDetailedError> {
        use crate::schema::{diff, issue, issue_link};
        let mut conn = self.get_connection().await?;
        let slugs = Self::repository_slugs(&mut conn)?;

        let rows: Vec<(LinkRow, IssueRow, DiffRow)> = issue_link::table
            .inner_join(issue::table)
            .inner_join(diff::table)
            .select((
                LinkRow::as_select(),
                IssueRow::as_select(),
                DiffRow::as_select(),
            ))
            .load(&mut *conn)
            .context("loading issue links for stats")?;

        let mut stats: HashMap<(String, String, String), (u64, u64)> = HashMap::new();
        for (link, issue, diff_row) in rows {
            if since.is_some_and(|cutoff| date_of(&issue.created) < cutoff) {
                continue;
            }
            let repository = slugs
                .get(&diff_row.repository_id)
                .cloned()
                .unwrap_or_default();
            let check = issue.check.clone().unwrap_or_else(|| issue.analyzer.clone());
            let entry = stats
                .entry((repository, issue.analyzer.clone(), check))
                .or_insert((0, 0));
            entry.0 += 1;
            if link.publishable {
                entry.1 += 1;
            }
        }

        let mut out: Vec<CheckStats> = stats
            .into_iter()
            .map(|((repository, analyzer, check), (total, publishable))| CheckStats {
                repository,
                analyzer,
                check,
                total,
                publishable,
            })
            .collect();
        // Most detected first, stable tie-break on the triple
        out.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then_with(|| (&a.repository, &a.analyzer, &a.check).cmp(&(
                    &b.repository, &b.analyzer, &b.check,
                )))
        });
        Ok(out)
    }

    async fn check_history(
        &self,
        repository: Option<&str>,
        analyzer: Option<&str>,
        check: Option<&str>,
        since: Option<&str>,
    ) -> Result<Vec<HistoryPoint>, StoreDetailedError> {
        use crate::schema::{diff, issue, issue_link};
        let mut conn = self.get_connection().await?;
        let slugs = Self::repository_slugs(&mut conn)?;

        let rows: Vec<(LinkRow, IssueRow, DiffRow)> = issue_link::table
            .inner_join(issue::table)
            .inner_join(diff::table)
            .select((
                LinkRow::as_select(),
                IssueRow::as_select(),
                DiffRow::as_select(),
            ))
            .load(&mut *conn)
            .context("loading issue links for history")?;

        let mut days: HashMap<String, u64> = HashMap::new();
        for (_, issue, diff_row) in rows {
            let date = date_of(&issue.created);
            if since.is_some_and(|cutoff| date < cutoff) {
                continue;
            }
            if repository
                .is_some_and(|r| slugs.get(&diff_row.repository_id).map(String::as_str) != Some(r))
            {
                continue;
            }
            if analyzer.is_some_and(|a| issue.analyzer != a) {
                continue;
            }
            if check.is_some_and(|c| issue.check.as_deref() != Some(c)) {
                continue;
            }
            *days.entry(String::from(date)).or_insert(0) += 1;
        }

        let mut out: Vec<HistoryPoint> = days
            .into_iter()
            .map(|(date, total)| HistoryPoint { date, total })
            .collect();
        out.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::store::store_tests;

    use super::SqliteStore;

    fn create_test_store() -> SqliteStore {
        SqliteStore::new(String::from(":memory:"))
    }

    #[tokio::test]
    async fn publish_roundtrip() {
        store_tests::publish_roundtrip(create_test_store()).await;
    }

    #[tokio::test]
    async fn idempotent_republication() {
        store_tests::idempotent_republication(create_test_store()).await;
    }

    #[tokio::test]
    async fn cross_diff_new_for_revision() {
        store_tests::cross_diff_new_for_revision(create_test_store()).await;
    }

    #[tokio::test]
    async fn diff_listing_filters() {
        store_tests::diff_listing_filters(create_test_store()).await;
    }

    #[tokio::test]
    async fn check_endpoints() {
        store_tests::check_endpoints(create_test_store()).await;
    }

    #[tokio::test]
    async fn unknown_repository_is_rejected() {
        store_tests::unknown_repository_is_rejected(create_test_store()).await;
    }
}
