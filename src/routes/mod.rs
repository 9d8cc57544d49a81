use askama::Template;
use axum::response::Html;

use crate::error::AppError;

pub mod basic;
pub mod listings;
pub mod users;

pub fn render<T: Template>(template: T) -> Result<Html<String>, AppError> {
    Ok(Html(template.render()?))
}
