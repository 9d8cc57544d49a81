use axum::response::{IntoResponse, Redirect, Response};
use hyper::StatusCode;
use thiserror::Error;

/// Failure kinds for the whole request path. Validation problems on forms
/// are rendered inline by the handlers and never reach this type; the
/// `Validation` variant covers malformed input that escapes form context.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("login required")]
    AuthRequired,

    #[error("database error: {0}")]
    Persistence(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("{step} failed after a prior side effect: {source}")]
    PartialWrite {
        step: &'static str,
        #[source]
        source: Box<AppError>,
    },

    #[error("template error: {0}")]
    Render(#[from] askama::Error),

    #[error("upload error: {0}")]
    Upload(#[from] axum::extract::multipart::MultipartError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("password hash error: {0}")]
    PasswordHash(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::AuthRequired => Redirect::to("/login").into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            other => {
                log::error!("request failed: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "There was a problem handling your request",
                )
                    .into_response()
            }
        }
    }
}
