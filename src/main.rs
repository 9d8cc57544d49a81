use std::sync::Arc;

use axum::{middleware, Router};
use log::info;
use tower_http::{cors::CorsLayer, services::ServeDir};

mod config;
mod db_client;
mod error;
mod image_store;
mod routes;
mod sanitize;
mod session;

use config::Config;
use db_client::DbClient;
use image_store::ImageStore;
use session::SessionStore;

pub struct AppState {
    pub db: DbClient,
    pub sessions: SessionStore,
    pub images: ImageStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::load();
    let state = Arc::new(AppState {
        db: DbClient::connect(&config)?,
        sessions: SessionStore::default(),
        images: ImageStore::new(&config.image_dir)?,
    });

    let app = Router::new()
        .merge(routes::basic::router())
        .merge(routes::users::router())
        .merge(routes::listings::router())
        .nest_service("/images", ServeDir::new(&config.image_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::session_layer,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server is up on port {}", config.port);
    axum::serve(listener, app).await?;
    Ok(())
}
