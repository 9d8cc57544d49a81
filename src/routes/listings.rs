use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Extension, Form, Multipart, Path, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use log::{error, warn};
use postgres_from_row::FromRow;
use serde::Deserialize;

use crate::{
    db_client::DbClient,
    error::AppError,
    routes::{basic::about_page, render},
    sanitize::title_case,
    session::{BookingWindow, SessionId},
    AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/listings", get(listings))
        .route("/listings/add", get(add_page).post(add))
        .route("/search", post(search))
        .route("/listings/:id", get(detail).post(select_dates))
        .route("/listings/:id/checkout", post(checkout))
}

#[derive(FromRow)]
pub struct ListingCard {
    pub listing_id: i32,
    pub location: String,
    pub available_start: String,
    pub available_end: String,
    pub manufacturer: String,
    pub model: String,
    pub car_year: i32,
    pub fname: String,
    pub lname: String,
    pub datecreated: String,
    pub seats: i32,
    pub state: i32,
    pub price: f64,
    pub picture: String,
}

#[derive(FromRow)]
struct ListingDates {
    start_date: String,
    end_date: String,
    end_raw: NaiveDate,
}

#[derive(FromRow)]
pub struct ListingDetail {
    pub picture: String,
    pub listing_id: i32,
    pub datecreated: String,
    pub email: String,
    pub fname: String,
    pub lname: String,
    pub price: f64,
    pub location: String,
    pub manufacturer: String,
    pub model: String,
    pub car_year: i32,
    pub state: i32,
    pub seats: i32,
}

/// Already-booked pickup/dropoff ranges, serialized for the date picker.
#[derive(FromRow, serde::Serialize)]
struct BookedRange {
    from: String,
    to: String,
}

#[derive(FromRow)]
pub struct BookingSummary {
    pub car_id: i32,
    pub manufacturer: String,
    pub model: String,
    pub car_year: i32,
    pub seats: i32,
    pub state: i32,
    pub price: f64,
    pub location: String,
    pub picture: String,
}

#[derive(Template)]
#[template(path = "listings.html")]
struct ListingsTemplate {
    logged_in: bool,
    is_seller: bool,
    results: Vec<ListingCard>,
}

#[derive(Template)]
#[template(path = "listings_add.html")]
struct ListingsAddTemplate {
    logged_in: bool,
    error_message: Option<String>,
}

#[derive(Template)]
#[template(path = "carlistings.html")]
struct CarListingsTemplate {
    logged_in: bool,
    results: Vec<ListingCard>,
}

#[derive(Template)]
#[template(path = "product.html")]
struct ProductTemplate {
    logged_in: bool,
    start_date: String,
    end_date: String,
    expired: bool,
    disabled: String,
    result: ListingDetail,
}

#[derive(Template)]
#[template(path = "checkout.html")]
struct CheckoutTemplate {
    logged_in: bool,
    listing_id: i32,
    from: String,
    to: String,
    days: i64,
    price: String,
    result: BookingSummary,
}

#[derive(Deserialize)]
struct SearchForm {
    #[serde(rename = "locationSearch", default)]
    location_search: String,
    #[serde(rename = "seatSearch", default)]
    seat_search: String,
}

#[derive(Deserialize)]
struct CalendarForm {
    #[serde(default)]
    calendar: String,
}

/// Multipart fields of the add-listing form, collected as submitted.
#[derive(Default)]
struct ListingForm {
    manufacturer: String,
    model: String,
    country: String,
    seats: String,
    condition: String,
    datestart: String,
    dateend: String,
    price: String,
    year: String,
    image_type: String,
    image: Bytes,
}

#[derive(Debug, PartialEq)]
struct ValidListing {
    manufacturer: String,
    model: String,
    country: String,
    seats: i32,
    condition: i32,
    start: NaiveDate,
    end: NaiveDate,
    price: f64,
    year: i32,
}

impl ListingForm {
    /// The submission ladder, first failing check wins.
    fn validate(&self, today: NaiveDate) -> Result<ValidListing, &'static str> {
        if self.manufacturer.is_empty()
            || self.model.is_empty()
            || self.country.is_empty()
            || self.country == "None"
            || self.seats.is_empty()
            || self.condition.is_empty()
            || self.datestart.is_empty()
            || self.dateend.is_empty()
            || self.price.is_empty()
            || self.year.is_empty()
            || self.image.is_empty()
        {
            return Err("All input fields must be filled in");
        }
        let start = NaiveDate::parse_from_str(&self.datestart, "%Y-%m-%d");
        let end = NaiveDate::parse_from_str(&self.dateend, "%Y-%m-%d");
        let (Ok(start), Ok(end)) = (start, end) else {
            return Err("The end date must be set to a later date, a date later than the start date");
        };
        if end <= start {
            return Err("The end date must be set to a later date, a date later than the start date");
        }
        if start < today {
            return Err(
                "The start date must at least start after today, so begin your listing starting tomorrow",
            );
        }
        let condition: i32 = self
            .condition
            .trim()
            .parse()
            .map_err(|_| "The condition input field is not an acceptable value")?;
        if !(1..=10).contains(&condition) {
            return Err("The condition input field is not an acceptable value");
        }
        let seats: i32 = self
            .seats
            .trim()
            .parse()
            .map_err(|_| "The car capacity should qualify as a consumer vehicle")?;
        if !(1..=10).contains(&seats) {
            return Err("The car capacity should qualify as a consumer vehicle");
        }
        let price: f64 = self
            .price
            .trim()
            .parse()
            .map_err(|_| "The price must be an acceptable value")?;
        if price < 0.0 {
            return Err("The price must be an acceptable value");
        }
        let year: i32 = self
            .year
            .trim()
            .parse()
            .map_err(|_| "The car year must be at least from 2010")?;
        if year < 2010 {
            return Err("The car year must be at least from 2010");
        }
        Ok(ValidListing {
            manufacturer: title_case(&self.manufacturer),
            model: title_case(&self.model),
            country: self.country.clone(),
            seats,
            condition,
            start,
            end,
            price: (price * 100.0).round() / 100.0,
            year,
        })
    }
}

/// A calendar submission is either one date or "A to B".
fn parse_date_selection(calendar: &str) -> Option<(NaiveDate, NaiveDate)> {
    let mut parts = calendar.splitn(2, " to ");
    let first = NaiveDate::parse_from_str(parts.next()?.trim(), "%Y-%m-%d").ok()?;
    match parts.next() {
        Some(second) => {
            let second = NaiveDate::parse_from_str(second.trim(), "%Y-%m-%d").ok()?;
            Some((first, second))
        }
        None => Some((first, first)),
    }
}

// Inclusive on both ends: a single day rents for one day.
fn rental_days(pickup: NaiveDate, dropoff: NaiveDate) -> i64 {
    (dropoff - pickup).num_days() + 1
}

async fn is_seller(state: &AppState, email: &str) -> Result<bool, AppError> {
    Ok(state
        .db
        .query_opt(
            "SELECT is_seller FROM verified_accounts \
             JOIN accounts ON verified_accounts.user_id = accounts.id \
             WHERE accounts.email=$1",
            &[&email],
        )
        .await?
        .is_some())
}

async fn listings(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    let session = state.sessions.require_login(sid).await?;
    let rows = state
        .db
        .query(
            "SELECT listings.listing_id, listings.location, \
                    to_char(listings.available_start, 'YYYY/MM/DD') AS available_start, \
                    to_char(listings.available_end, 'YYYY/MM/DD') AS available_end, \
                    listing_car.manufacturer, listing_car.model, listing_car.car_year, \
                    accounts.fname, accounts.lname, \
                    to_char(listings.datecreated, 'YYYY/MM/DD') AS datecreated, \
                    listing_car.seats, listing_car.state, listings.price, listings.picture \
             FROM listings \
             JOIN listing_car ON listings.listing_id = listing_car.listing_id \
             JOIN accounts ON listings.host_id = accounts.id \
             WHERE listings.location=$1",
            &[&session.country],
        )
        .await?;
    let results = rows
        .iter()
        .map(ListingCard::try_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let is_seller = is_seller(&state, &session.username).await?;
    Ok(render(ListingsTemplate {
        logged_in: true,
        is_seller,
        results,
    })?
    .into_response())
}

async fn add_page(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    state.sessions.require_login(sid).await?;
    Ok(render(ListingsAddTemplate {
        logged_in: true,
        error_message: None,
    })?
    .into_response())
}

async fn add(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let session = state.sessions.require_login(sid).await?;

    let mut form = ListingForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "manufacturer" => form.manufacturer = field.text().await?,
            "model" => form.model = field.text().await?,
            "country" => form.country = field.text().await?,
            "seats" => form.seats = field.text().await?,
            "condition" => form.condition = field.text().await?,
            "datestart" => form.datestart = field.text().await?,
            "dateend" => form.dateend = field.text().await?,
            "price" => form.price = field.text().await?,
            "year" => form.year = field.text().await?,
            "imageFile" => {
                form.image_type = field.content_type().unwrap_or("image/png").to_string();
                form.image = field.bytes().await?;
            }
            _ => {}
        }
    }

    let listing = match form.validate(Utc::now().date_naive()) {
        Ok(listing) => listing,
        Err(msg) => {
            return Ok(render(ListingsAddTemplate {
                logged_in: session.logged_in,
                error_message: Some(msg.to_string()),
            })?
            .into_response());
        }
    };

    let picture = match state.images.save(&form.image_type, &form.image) {
        Ok(name) => name,
        Err(e) => {
            warn!("image upload failed: {}", e);
            return Ok(render(ListingsAddTemplate {
                logged_in: session.logged_in,
                error_message: Some("There was a problem uploading your image".to_string()),
            })?
            .into_response());
        }
    };

    // the picture is already on disk, so a failed insert is a partial write
    if let Err(err) = insert_listing(&state.db, session.user_id, &listing, &picture).await {
        state.images.remove(&picture);
        return Err(AppError::PartialWrite {
            step: "listing insert",
            source: Box::new(err),
        });
    }
    Ok(Redirect::to("/listings").into_response())
}

/// The listing row and its car land together or not at all.
async fn insert_listing(
    db: &DbClient,
    host_id: i32,
    listing: &ValidListing,
    picture: &str,
) -> Result<(), AppError> {
    let mut conn = db.conn().await?;
    let tx = conn.transaction().await?;
    let row = tx
        .query_one(
            "INSERT INTO listings(host_id, price, picture, available_start, available_end, location) \
             VALUES($1,$2,$3,$4,$5,$6) RETURNING listing_id",
            &[
                &host_id,
                &listing.price,
                &picture,
                &listing.start,
                &listing.end,
                &listing.country,
            ],
        )
        .await?;
    let listing_id: i32 = row.get("listing_id");
    tx.execute(
        "INSERT INTO listing_car(listing_id, manufacturer, model, car_year, seats, state) \
         VALUES($1,$2,$3,$4,$5,$6)",
        &[
            &listing_id,
            &listing.manufacturer,
            &listing.model,
            &listing.year,
            &listing.seats,
            &listing.condition,
        ],
    )
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn search(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<SearchForm>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    let seats: i32 = form.seat_search.trim().parse().unwrap_or(0);
    let rows = state
        .db
        .query(
            "SELECT listings.listing_id, listings.location, \
                    to_char(listings.available_start, 'YYYY/MM/DD') AS available_start, \
                    to_char(listings.available_end, 'YYYY/MM/DD') AS available_end, \
                    listing_car.manufacturer, listing_car.model, listing_car.car_year, \
                    accounts.fname, accounts.lname, \
                    to_char(listings.datecreated, 'YYYY/MM/DD') AS datecreated, \
                    listing_car.seats, listing_car.state, listings.price, listings.picture \
             FROM listings \
             JOIN listing_car ON listings.listing_id = listing_car.listing_id \
             JOIN accounts ON listings.host_id = accounts.id \
             WHERE listings.location=$1 AND listing_car.seats=$2",
            &[&form.location_search, &seats],
        )
        .await?;
    let results = rows
        .iter()
        .map(ListingCard::try_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(render(CarListingsTemplate {
        logged_in: session.logged_in,
        results,
    })?
    .into_response())
}

async fn detail(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Path(id): Path<i32>,
) -> Result<Response, AppError> {
    state.sessions.require_login(sid).await?;
    let conn = state.db.conn().await?;

    let Some(dates_row) = conn
        .query_opt(
            "SELECT to_char(available_start, 'YYYY-MM-DD') AS start_date, \
                    to_char(available_end, 'YYYY-MM-DD') AS end_date, \
                    available_end AS end_raw \
             FROM listings WHERE listing_id=$1",
            &[&id],
        )
        .await?
    else {
        return Ok(Redirect::to("/listings").into_response());
    };
    let dates = ListingDates::try_from_row(&dates_row)?;

    let result = ListingDetail::try_from_row(
        &conn
            .query_one(
                "SELECT listings.picture, listings.listing_id, \
                        to_char(listings.datecreated, 'YYYY-MM-DD') AS datecreated, \
                        accounts.email, accounts.fname, accounts.lname, \
                        listings.price, listings.location, \
                        listing_car.manufacturer, listing_car.model, listing_car.car_year, \
                        listing_car.state, listing_car.seats \
                 FROM listings \
                 JOIN listing_car ON listings.listing_id = listing_car.listing_id \
                 JOIN accounts ON accounts.id = listings.host_id \
                 WHERE listings.listing_id=$1",
                &[&id],
            )
            .await?,
    )?;

    let booked = conn
        .query(
            "SELECT to_char(pickup, 'YYYY-MM-DD') AS \"from\", \
                    to_char(dropoff, 'YYYY-MM-DD') AS \"to\" \
             FROM rented_cars WHERE listing_id=$1",
            &[&id],
        )
        .await?
        .iter()
        .map(BookedRange::try_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(render(ProductTemplate {
        logged_in: true,
        start_date: dates.start_date,
        end_date: dates.end_date,
        expired: dates.end_raw <= Utc::now().date_naive(),
        disabled: serde_json::to_string(&booked).unwrap_or_else(|_| "[]".to_string()),
        result,
    })?
    .into_response())
}

async fn select_dates(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Path(id): Path<i32>,
    Form(form): Form<CalendarForm>,
) -> Result<Response, AppError> {
    state.sessions.require_login(sid).await?;
    if form.calendar.is_empty() {
        return Ok(Redirect::to(&format!("/listings/{id}")).into_response());
    }
    let Some((pickup, dropoff)) = parse_date_selection(&form.calendar) else {
        return Ok(Redirect::to(&format!("/listings/{id}")).into_response());
    };

    let Some(row) = state
        .db
        .query_opt(
            "SELECT listing_car.car_id, listing_car.manufacturer, listing_car.model, \
                    listing_car.car_year, listing_car.seats, listing_car.state, \
                    listings.price, listings.location, listings.picture \
             FROM listings \
             JOIN listing_car ON listings.listing_id = listing_car.listing_id \
             WHERE listings.listing_id=$1",
            &[&id],
        )
        .await?
    else {
        return Ok(Redirect::to("/listings").into_response());
    };
    let summary = BookingSummary::try_from_row(&row)?;

    let days = rental_days(pickup, dropoff);
    let price = days as f64 * summary.price;
    state
        .sessions
        .update(sid, |s| {
            s.bookings.insert(
                id,
                BookingWindow {
                    car_id: summary.car_id,
                    pickup,
                    dropoff,
                    price,
                    location: summary.location.clone(),
                },
            );
        })
        .await;

    Ok(render(CheckoutTemplate {
        logged_in: true,
        listing_id: id,
        from: pickup.format("%Y-%m-%d").to_string(),
        to: dropoff.format("%Y-%m-%d").to_string(),
        days,
        price: format!("{price:.2}"),
        result: summary,
    })?
    .into_response())
}

async fn checkout(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Path(id): Path<i32>,
) -> Result<Response, AppError> {
    let session = state.sessions.require_login(sid).await?;
    let Some(window) = session.bookings.get(&id) else {
        let page = about_page(
            &state,
            true,
            Some("There was a problem with your order, try again later".to_string()),
            None,
        )
        .await?;
        return Ok(render(page)?.into_response());
    };

    let inserted = state
        .db
        .execute(
            "INSERT INTO rented_cars(listing_id, car_id, buyer_id, pickup, dropoff, location, price) \
             VALUES($1,$2,$3,$4,$5,$6,$7)",
            &[
                &id,
                &window.car_id,
                &session.user_id,
                &window.pickup,
                &window.dropoff,
                &window.location,
                &window.price,
            ],
        )
        .await;

    match inserted {
        Ok(_) => {
            // only this listing's window is cleared; other selections survive
            state
                .sessions
                .update(sid, |s| {
                    s.bookings.remove(&id);
                })
                .await;
            let page = about_page(
                &state,
                true,
                None,
                Some("Your order has been successfully made".to_string()),
            )
            .await?;
            Ok(render(page)?.into_response())
        }
        Err(err) => {
            error!("order insert failed: {err}");
            let page = about_page(
                &state,
                true,
                Some("There was a problem with your order, try again later".to_string()),
                None,
            )
            .await?;
            Ok(render(page)?.into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn form() -> ListingForm {
        ListingForm {
            manufacturer: "toyota".to_string(),
            model: "corolla".to_string(),
            country: "Canada".to_string(),
            seats: "5".to_string(),
            condition: "8".to_string(),
            datestart: "2026-09-01".to_string(),
            dateend: "2026-09-10".to_string(),
            price: "49.99".to_string(),
            year: "2019".to_string(),
            image_type: "image/png".to_string(),
            image: Bytes::from_static(b"not empty"),
        }
    }

    const TODAY: &str = "2026-08-07";

    #[test]
    fn accepts_a_valid_submission() {
        let listing = form().validate(date(TODAY)).unwrap();
        assert_eq!(listing.manufacturer, "Toyota");
        assert_eq!(listing.model, "Corolla");
        assert_eq!(listing.seats, 5);
        assert_eq!(listing.price, 49.99);
    }

    #[test]
    fn missing_image_fails_the_presence_check() {
        let mut f = form();
        f.image = Bytes::new();
        assert_eq!(
            f.validate(date(TODAY)),
            Err("All input fields must be filled in")
        );
    }

    #[test]
    fn end_date_must_follow_start_date() {
        let mut f = form();
        f.dateend = "2026-09-01".to_string(); // equal to start
        assert_eq!(
            f.validate(date(TODAY)),
            Err("The end date must be set to a later date, a date later than the start date")
        );
    }

    #[test]
    fn date_order_is_checked_before_the_other_bounds() {
        let mut f = form();
        f.dateend = "2026-08-20".to_string();
        f.datestart = "2026-08-25".to_string();
        f.seats = "99".to_string();
        assert_eq!(
            f.validate(date(TODAY)),
            Err("The end date must be set to a later date, a date later than the start date")
        );
    }

    #[test]
    fn start_date_cannot_be_in_the_past() {
        let mut f = form();
        f.datestart = "2026-08-01".to_string();
        assert_eq!(
            f.validate(date(TODAY)),
            Err("The start date must at least start after today, so begin your listing starting tomorrow")
        );
    }

    #[test]
    fn start_today_is_allowed() {
        let mut f = form();
        f.datestart = TODAY.to_string();
        assert!(f.validate(date(TODAY)).is_ok());
    }

    #[test]
    fn condition_bounds() {
        for bad in ["0", "11", "junk"] {
            let mut f = form();
            f.condition = bad.to_string();
            assert_eq!(
                f.validate(date(TODAY)),
                Err("The condition input field is not an acceptable value")
            );
        }
    }

    #[test]
    fn seat_bounds() {
        for bad in ["0", "11"] {
            let mut f = form();
            f.seats = bad.to_string();
            assert_eq!(
                f.validate(date(TODAY)),
                Err("The car capacity should qualify as a consumer vehicle")
            );
        }
    }

    #[test]
    fn negative_price_rejected() {
        let mut f = form();
        f.price = "-1".to_string();
        assert_eq!(
            f.validate(date(TODAY)),
            Err("The price must be an acceptable value")
        );
    }

    #[test]
    fn price_is_rounded_to_cents() {
        let mut f = form();
        f.price = "10.556".to_string();
        assert_eq!(f.validate(date(TODAY)).unwrap().price, 10.56);
    }

    #[test]
    fn year_floor_is_2010() {
        let mut f = form();
        f.year = "2009".to_string();
        assert_eq!(
            f.validate(date(TODAY)),
            Err("The car year must be at least from 2010")
        );
        f.year = "2010".to_string();
        assert!(f.validate(date(TODAY)).is_ok());
    }

    #[test]
    fn single_date_selection_is_one_day() {
        let (pickup, dropoff) = parse_date_selection("2024-01-01").unwrap();
        assert_eq!(pickup, dropoff);
        assert_eq!(rental_days(pickup, dropoff), 1);
    }

    #[test]
    fn range_selection_counts_both_ends() {
        let (pickup, dropoff) = parse_date_selection("2024-01-01 to 2024-01-03").unwrap();
        assert_eq!(rental_days(pickup, dropoff), 3);
    }

    #[test]
    fn garbage_selection_is_rejected() {
        assert!(parse_date_selection("tomorrow").is_none());
        assert!(parse_date_selection("2024-01-01 to eventually").is_none());
    }

    #[test]
    fn total_price_scales_with_days() {
        let (pickup, dropoff) = parse_date_selection("2024-01-01 to 2024-01-03").unwrap();
        let total = rental_days(pickup, dropoff) as f64 * 49.99;
        assert_eq!(format!("{total:.2}"), "149.97");
    }
}
