// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use actix_web::{HttpResponse, http::StatusCode, web};
use serde::Deserialize;

use crate::store::{
    IssueStore as _, IssueStoreDispatch, StoreDetailedError, StoreError,
    models::{
        DiffFilters, DiffPayload, IssueBulkPayload, IssueBulkResponse, IssuesFilter, Paginated,
        RepositoryPayload, RevisionPayload,
    },
};

impl actix_web::ResponseError for StoreDetailedError {
    fn status_code(&self) -> StatusCode {
        match self.error {
            StoreError::UnknownRepository(_) => StatusCode::BAD_REQUEST,
            StoreError::StoreError(ref message) if message.starts_with("unknown diff") => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    page: Option<u64>,
}

impl PageQuery {
    fn page(&self) -> u64 {
        self.page.unwrap_or(1)
    }
}

#[derive(Deserialize)]
struct DiffQuery {
    #[serde(default)]
    page: Option<u64>,
    search: Option<String>,
    repository: Option<String>,
    issues: Option<String>,
}

#[derive(Deserialize)]
struct CheckQuery {
    #[serde(default)]
    page: Option<u64>,
    publishable: Option<bool>,
}

#[derive(Deserialize)]
struct StatsQuery {
    since: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    repository: Option<String>,
    analyzer: Option<String>,
    check: Option<String>,
    since: Option<String>,
}

type Store = web::Data<IssueStoreDispatch>;
type ApiResult = Result<HttpResponse, StoreDetailedError>;

async fn list_repositories(store: Store, query: web::Query<PageQuery>) -> ApiResult {
    let repositories = store.repositories().await?;
    Ok(HttpResponse::Ok().json(Paginated::slice(
        repositories,
        query.page(),
        "/v1/repository/",
    )))
}

async fn create_repository(store: Store, payload: web::Json<RepositoryPayload>) -> ApiResult {
    let record = store
        .ensure_repository(&payload.slug, &payload.url)
        .await?;
    Ok(HttpResponse::Ok().json(record))
}

async fn list_diffs(store: Store, query: web::Query<DiffQuery>) -> ApiResult {
    let filters = DiffFilters {
        search: query.search.clone(),
        repository: query.repository.clone(),
        issues: query.issues.as_deref().and_then(IssuesFilter::parse),
    };
    let page = store.diffs(&filters, query.page.unwrap_or(1)).await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn get_diff(store: Store, path: web::Path<i64>) -> ApiResult {
    match store.diff(path.into_inner()).await? {
        Some(record) => Ok(HttpResponse::Ok().json(record)),
        None => Ok(HttpResponse::NotFound().finish()),
    }
}

async fn list_diff_issues(
    store: Store,
    path: web::Path<i64>,
    query: web::Query<PageQuery>,
) -> ApiResult {
    let page = store.diff_issues(path.into_inner(), query.page()).await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn create_diff_issues(
    store: Store,
    path: web::Path<i64>,
    payload: web::Json<IssueBulkPayload>,
) -> ApiResult {
    let issues = store
        .create_issues(path.into_inner(), &payload.issues)
        .await?;
    Ok(HttpResponse::Ok().json(IssueBulkResponse { issues }))
}

async fn get_revision(store: Store, path: web::Path<i64>) -> ApiResult {
    match store.revision(path.into_inner()).await? {
        Some(record) => Ok(HttpResponse::Ok().json(record)),
        None => Ok(HttpResponse::NotFound().finish()),
    }
}

async fn create_revision(store: Store, payload: web::Json<RevisionPayload>) -> ApiResult {
    let record = store.create_revision(&payload).await?;
    Ok(HttpResponse::Ok().json(record))
}

async fn list_revision_diffs(
    store: Store,
    path: web::Path<i64>,
    query: web::Query<PageQuery>,
) -> ApiResult {
    let page = store
        .revision_diffs(path.into_inner(), query.page())
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn create_revision_diff(
    store: Store,
    path: web::Path<i64>,
    payload: web::Json<DiffPayload>,
) -> ApiResult {
    let record = store.create_diff(path.into_inner(), &payload).await?;
    Ok(HttpResponse::Ok().json(record))
}

async fn check_issues(
    store: Store,
    path: web::Path<(String, String, String)>,
    query: web::Query<CheckQuery>,
) -> ApiResult {
    let (repository, analyzer, check) = path.into_inner();
    let page = store
        .check_issues(
            &repository,
            &analyzer,
            &check,
            query.publishable,
            query.page.unwrap_or(1),
        )
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

async fn check_stats(store: Store, query: web::Query<StatsQuery>) -> ApiResult {
    let stats = store.check_stats(query.since.as_deref()).await?;
    Ok(HttpResponse::Ok().json(stats))
}

async fn check_history(store: Store, query: web::Query<HistoryQuery>) -> ApiResult {
    let history = store
        .check_history(
            query.repository.as_deref(),
            query.analyzer.as_deref(),
            query.check.as_deref(),
            query.since.as_deref(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(history))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/repository/", web::get().to(list_repositories))
        .route("/repository/", web::post().to(create_repository))
        .route("/diff/", web::get().to(list_diffs))
        .route("/diff/{id}/", web::get().to(get_diff))
        .route("/diff/{id}/issues/", web::get().to(list_diff_issues))
        .route("/diff/{id}/issues/", web::post().to(create_diff_issues))
        .route("/revision/", web::post().to(create_revision))
        .route("/revision/{id}/", web::get().to(get_revision))
        .route("/revision/{id}/diffs/", web::get().to(list_revision_diffs))
        .route("/revision/{id}/diffs/", web::post().to(create_revision_diff))
        .route("/check/stats/", web::get().to(check_stats))
        .route("/check/history/", web::get().to(check_history))
        .route(
            "/check/{repository}/{analyzer}/{check}/",
            web::get().to(check_issues),
        );
}

#[cfg(test)]
mod tests {
    use actix_test::TestServer;
    use actix_web::{App, middleware, web};

    use crate::store::{RestStore, SqliteStore, store_tests};

    use super::configure;

    fn create_test_server() -> TestServer {
        let store = web::Data::new(crate::store::IssueStoreDispatch::from(SqliteStore::new(
            String::from(":memory:"),
        )));
        actix_test::start(move || {
            App::new()
                .wrap(middleware::Compress::default())
                .app_data(store.clone())
                .service(web::scope("/v1").configure(configure))
        })
    }

    fn create_rest_store(srv: &TestServer) -> RestStore {
        RestStore::new(&srv.url("/"), Some("test-token")).expect("init must succeed")
    }

    // The REST store is exercised against a live API server with the same
    // suite as the SQLite store, so both stay in behavioral lockstep.

    #[tokio::test]
    async fn publish_roundtrip() {
        let srv = create_test_server();
        store_tests::publish_roundtrip(create_rest_store(&srv)).await;
    }

    #[tokio::test]
    async fn idempotent_republication() {
        let srv = create_test_server();
        store_tests::idempotent_republication(create_rest_store(&srv)).await;
    }

    #[tokio::test]
    async fn cross_diff_new_for_revision() {
        let srv = create_test_server();
        store_tests::cross_diff_new_for_revision(create_rest_store(&srv)).await;
    }

    #[tokio::test]
    async fn diff_listing_filters() {
        let srv = create_test_server();
        store_tests::diff_listing_filters(create_rest_store(&srv)).await;
    }

    #[tokio::test]
    async fn check_endpoints() {
        let srv = create_test_server();
        store_tests::check_endpoints(create_rest_store(&srv)).await;
    }
}
