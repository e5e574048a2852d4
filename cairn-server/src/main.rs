use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use cairn_api::{AuthToken, Uuid};
use std::net::SocketAddr;

mod db;
mod error;
mod extractors;
mod feeds;
mod handlers;

#[cfg(test)]
mod fuzz;

use error::Error;
use extractors::{ApiMode, AppState, PgPool};
use feeds::UserFeeds;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(structopt::StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(short, long, default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Refuse every write, answering 503 to comment operations
    #[structopt(long)]
    read_only: bool,
}

pub async fn create_sqlx_pool(db_url: &str) -> anyhow::Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(8)
        .connect(db_url)
        .await
        .with_context(|| format!("Error opening database {:?}", db_url))
}

pub async fn app(db: sqlx::PgPool, admin_token: Option<AuthToken>, read_only: bool) -> Router {
    let feeds = UserFeeds::new();
    let notifier = feeds::spawn_dispatcher(feeds.clone());
    let state = AppState {
        db: PgPool::new(db),
        feeds,
        notifier,
        admin_token,
        mode: ApiMode { read_only },
    };

    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route(
            "/api/admin/create-session",
            post(handlers::admin_create_session),
        )
        .route(
            "/api/admin/create-changeset",
            post(handlers::admin_create_changeset),
        )
        .route("/api/0.6/changeset/:id", get(handlers::fetch_changeset))
        .route(
            "/api/0.6/changeset/:id/comment",
            post(handlers::create_comment),
        )
        .route(
            "/api/0.6/changeset/comment/:id/hide",
            post(handlers::hide_comment),
        )
        .route(
            "/api/0.6/changeset/comment/:id/unhide",
            post(handlers::restore_comment),
        )
        .route("/api/feed", get(handlers::notification_feed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn admin_token() -> anyhow::Result<Option<AuthToken>> {
    match std::env::var("ADMIN_TOKEN") {
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).context("retrieving ADMIN_TOKEN environment variable"),
        Ok(tok) => Ok(Some(AuthToken(
            Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?,
        ))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let admin_token = admin_token()?;
    if admin_token.is_none() {
        tracing::warn!("no ADMIN_TOKEN set, admin endpoints will be disabled");
    }

    let db_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = create_sqlx_pool(&db_url).await?;
    MIGRATOR
        .run(&db)
        .await
        .context("running pending migrations")?;

    if opt.read_only {
        tracing::warn!("api is in read-only mode, comment operations will be refused");
    }
    let app = app(db, admin_token, opt.read_only).await;

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
