// SPDX-FileCopyrightText: 2024 Mathieu Fenniak <mathieu@fenniak.net>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::net::ToSocketAddrs;

use actix_web::{App, HttpRequest, HttpServer, get, middleware, web};
use anyhow::{Context as _, Result};
use log::{info, trace};

use crate::{
    config::RepositoryConfig,
    store::{IssueStore as _, IssueStoreDispatch, create_store_from_env, create_test_store},
};

pub mod api;

#[get("/")]
async fn index(req: HttpRequest) -> &'static str {
    trace!("REQ: {req:?}");
    "reviewbot backend\r\n"
}

/// Seed the configured repositories; they are immutable afterwards.
async fn seed_repositories(store: &IssueStoreDispatch, repositories: &[RepositoryConfig]) {
    for repository in repositories {
        if let Err(e) = store.ensure_repository(&repository.slug, &repository.url).await {
            log::warn!("unable to seed repository {}: {e}", repository.slug);
        }
        // The try tree is its own repository row; diffs reference it as their
        // head tree.
        if let Some(ref try_url) = repository.try_url {
            let try_slug = format!("{}-try", repository.slug);
            if let Err(e) = store.ensure_repository(&try_slug, try_url).await {
                log::warn!("unable to seed repository {try_slug}: {e}");
            }
        }
    }
}

pub async fn cli(socket_addrs: impl ToSocketAddrs, repositories: Vec<RepositoryConfig>) {
    run_server(socket_addrs, repositories)
        .await
        .expect("run_server failure");
}

async fn run_server(
    socket_addrs: impl ToSocketAddrs,
    repositories: Vec<RepositoryConfig>,
) -> Result<()> {
    let store = match create_store_from_env() {
        Ok(store) => store,
        Err(e) => {
            log::warn!("no usable REVIEWBOT_DATABASE_URL ({e}); serving an in-memory store");
            create_test_store()
        }
    };
    seed_repositories(&store, &repositories).await;
    let store = web::Data::new(store);

    info!("serving the issue store API");
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .app_data(store.clone())
            .service(index)
            .service(web::scope("/v1").configure(api::configure))
    })
    .bind(socket_addrs)
    .context("binding the server socket")?
    .run()
    .await
    .context("running the issue store server")
}
