use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use phreddit_api::{AuthToken, Uuid};
use structopt::StructOpt;
use tower_http::trace::TraceLayer;

mod db;
mod error;
mod extractors;
mod fuzz;
mod handlers;

use error::Error;
use extractors::*;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

#[derive(Debug, StructOpt)]
#[structopt(name = "phreddit-server", about = "Phreddit forum server")]
struct Opt {
    /// PostgreSQL connection string
    #[structopt(long, env = "DATABASE_URL")]
    database_url: String,

    /// Address to listen on
    #[structopt(long, env = "PHREDDIT_LISTEN", default_value = "127.0.0.1:8000")]
    listen: SocketAddr,

    /// Token granting access to the admin endpoints, which stay disabled
    /// when it is not set
    #[structopt(long, env = "ADMIN_TOKEN")]
    admin_token: Option<Uuid>,

    /// Maximum number of connections to the database
    #[structopt(long, default_value = "16")]
    max_connections: u32,
}

pub async fn create_sqlx_pool(db_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    Ok(PgPool::new(
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await
            .with_context(|| format!("Error opening database {:?}", db_url))?,
    ))
}

pub async fn app(db: PgPool, admin_token: Option<AuthToken>) -> Router {
    let state = AppState { db, admin_token };
    Router::new()
        .route("/api/admin/create-user", post(handlers::admin_create_user))
        .route("/api/register", post(handlers::register))
        .route("/api/auth", post(handlers::auth))
        .route("/api/unauth", post(handlers::unauth))
        .route("/api/whoami", get(handlers::whoami))
        .route("/api/users", get(handlers::fetch_users))
        .route(
            "/api/users/:id",
            get(handlers::fetch_user).delete(handlers::delete_user),
        )
        .route(
            "/api/users/:id/communities",
            get(handlers::user_communities),
        )
        .route("/api/users/:id/posts", get(handlers::user_posts))
        .route("/api/users/:id/comments", get(handlers::user_comments))
        .route(
            "/api/communities",
            get(handlers::fetch_communities).post(handlers::create_community),
        )
        .route(
            "/api/communities/:id",
            get(handlers::fetch_community)
                .patch(handlers::edit_community)
                .delete(handlers::delete_community),
        )
        .route("/api/communities/:id/join", post(handlers::join_community))
        .route(
            "/api/communities/:id/leave",
            post(handlers::leave_community),
        )
        .route(
            "/api/posts",
            get(handlers::fetch_posts).post(handlers::create_post),
        )
        .route(
            "/api/posts/:id",
            get(handlers::fetch_post)
                .patch(handlers::edit_post)
                .delete(handlers::delete_post),
        )
        .route("/api/posts/:id/views", post(handlers::view_post))
        .route(
            "/api/posts/:id/comments",
            get(handlers::comment_tree).post(handlers::create_comment),
        )
        .route("/api/posts/:id/stats", get(handlers::post_stats))
        .route("/api/posts/:id/upvote", post(handlers::upvote_post))
        .route("/api/posts/:id/downvote", post(handlers::downvote_post))
        .route(
            "/api/comments/:id",
            get(handlers::fetch_comment)
                .patch(handlers::edit_comment)
                .delete(handlers::delete_comment),
        )
        .route("/api/comments/:id/upvote", post(handlers::upvote_comment))
        .route(
            "/api/comments/:id/downvote",
            post(handlers::downvote_comment),
        )
        .route(
            "/api/flairs",
            get(handlers::fetch_flairs).post(handlers::create_flair),
        )
        .route("/api/search", get(handlers::search))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let opt = Opt::from_args();

    let pool = create_sqlx_pool(&opt.database_url, opt.max_connections).await?;
    MIGRATOR
        .run(&mut *pool.acquire().await?)
        .await
        .context("running pending migrations")?;

    let app = app(pool, opt.admin_token.map(AuthToken)).await;

    tracing::info!("listening on {}", opt.listen);
    axum::Server::bind(&opt.listen)
        .serve(app.into_make_service())
        .await
        .context("serving axum webserver")
}
