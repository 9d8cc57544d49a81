use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Extension, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use postgres_from_row::FromRow;

use crate::{error::AppError, routes::render, session::SessionId, AppState};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/home", get(home))
        .route("/about", get(about))
        .route("/logout", get(logout))
}

#[derive(FromRow)]
pub struct HomeCard {
    pub fname: String,
    pub lname: String,
    pub seats: i32,
    pub state: i32,
    pub location: String,
    pub manufacturer: String,
    pub model: String,
    pub car_year: i32,
    pub picture: String,
}

#[derive(Template)]
#[template(path = "main.html")]
struct HomeTemplate {
    logged_in: bool,
    results: Vec<HomeCard>,
}

#[derive(Template)]
#[template(path = "about.html")]
pub struct AboutTemplate {
    pub logged_in: bool,
    pub users: i64,
    pub listings: i64,
    pub cars: i64,
    pub error_message: Option<String>,
    pub success_message: Option<String>,
}

/// Loads the platform counts; also the render target for checkout results.
pub async fn about_page(
    state: &AppState,
    logged_in: bool,
    error_message: Option<String>,
    success_message: Option<String>,
) -> Result<AboutTemplate, AppError> {
    let row = state
        .db
        .query_one(
            "SELECT (SELECT COUNT(*) FROM accounts) AS users, \
                    (SELECT COUNT(*) FROM listings) AS listings, \
                    (SELECT COUNT(*) FROM listing_car) AS cars",
            &[],
        )
        .await?;
    Ok(AboutTemplate {
        logged_in,
        users: row.get("users"),
        listings: row.get("listings"),
        cars: row.get("cars"),
        error_message,
        success_message,
    })
}

async fn index() -> Redirect {
    Redirect::to("/home")
}

async fn home(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    let rows = state
        .db
        .query(
            "SELECT fname, lname, seats, state, location, manufacturer, model, car_year, picture \
             FROM listings \
             JOIN listing_car ON listings.listing_id = listing_car.listing_id \
             JOIN accounts ON listings.host_id = accounts.id \
             ORDER BY datecreated DESC LIMIT 6",
            &[],
        )
        .await?;
    let results = rows
        .iter()
        .map(HomeCard::try_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(render(HomeTemplate {
        logged_in: session.logged_in,
        results,
    })?
    .into_response())
}

async fn about(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    let page = about_page(&state, session.logged_in, None, None).await?;
    Ok(render(page)?.into_response())
}

async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Redirect {
    state.sessions.destroy(sid).await;
    Redirect::to("/")
}
