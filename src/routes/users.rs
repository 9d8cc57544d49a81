use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use askama::Template;
use axum::{
    extract::{Extension, Form, Path, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use chrono::{NaiveDate, Utc};
use log::info;
use postgres_from_row::FromRow;
use serde::Deserialize;

use crate::{
    error::AppError, routes::render, sanitize::title_case, session::SessionId, AppState,
};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/register", get(register_page).post(register))
        .route("/seller", get(seller_page).post(register_seller))
        .route("/account", get(account).post(update_account))
        .route("/account/:id", get(delete_listing))
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub logged_in: bool,
    pub error_message: Option<String>,
    pub success_message: Option<String>,
}

#[derive(Template)]
#[template(path = "register.html")]
struct RegisterTemplate {
    logged_in: bool,
    error_message: Option<String>,
}

#[derive(Template)]
#[template(path = "register_seller.html")]
struct RegisterSellerTemplate {
    logged_in: bool,
    error_message: Option<String>,
}

#[derive(Template)]
#[template(path = "account.html")]
struct AccountTemplate {
    logged_in: bool,
    details: AccountDetails,
    registered_seller: bool,
    listings: Vec<HostedListing>,
    orders: Vec<PlacedOrder>,
    fulfilled: Vec<FulfilledOrder>,
}

#[derive(Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct RegisterForm {
    #[serde(default)]
    fname: String,
    #[serde(default)]
    lname: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    confirm: String,
    // seller form only
    #[serde(default)]
    phone: String,
    #[serde(default)]
    license: String,
}

#[derive(Deserialize)]
struct AccountForm {
    #[serde(rename = "changeLocation", default)]
    change_location: String,
}

#[derive(FromRow)]
struct AccountDetails {
    fname: String,
    lname: String,
    country: String,
    email: String,
    birthdate: String,
}

#[derive(FromRow)]
struct HostedListing {
    listing_id: i32,
    price: f64,
    picture: String,
    state: i32,
    manufacturer: String,
    model: String,
    car_year: i32,
    datecreated: String,
    start_date: String,
    end_date: String,
    location: String,
}

#[derive(FromRow)]
struct PlacedOrder {
    datecreated: String,
    order_id: i32,
    pickup: String,
    dropoff: String,
    manufacturer: String,
    model: String,
    car_year: i32,
    location: String,
    email: String,
    fname: String,
    lname: String,
    picture: String,
    price: f64,
    total: f64,
}

#[derive(FromRow)]
struct FulfilledOrder {
    purchase_date: String,
    price: f64,
    order_id: i32,
    pickup: String,
    dropoff: String,
    manufacturer: String,
    model: String,
    car_year: i32,
    email: String,
    fname: String,
    lname: String,
    state: i32,
    location: String,
}

fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::PasswordHash(e.to_string()))
}

fn verify_password(stored: &str, password: &str) -> Result<bool, AppError> {
    let parsed = PasswordHash::new(stored).map_err(|e| AppError::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn is_adult(birthdate: NaiveDate, today: NaiveDate) -> bool {
    today.years_since(birthdate).map_or(false, |years| years >= 18)
}

fn fields_present(form: &RegisterForm, seller: bool) -> bool {
    let base = !form.fname.is_empty()
        && !form.lname.is_empty()
        && !form.country.is_empty()
        && form.country != "None"
        && !form.date.is_empty()
        && !form.email.is_empty()
        && !form.password.is_empty()
        && !form.confirm.is_empty();
    base && (!seller || (!form.phone.is_empty() && !form.license.is_empty()))
}

/// The checks that do not need the database, in contract order. Returns
/// the parsed birthdate on success.
fn validate_credentials(
    form: &RegisterForm,
    logged_in: bool,
    today: NaiveDate,
) -> Result<NaiveDate, &'static str> {
    if form.password != form.confirm {
        return Err("The passwords don't match, please try again");
    }
    if form.password.len() < 8 || form.confirm.len() < 8 {
        return Err("Chosen password must be at least 8 characters");
    }
    let birthdate = NaiveDate::parse_from_str(&form.date, "%Y-%m-%d")
        .map_err(|_| "You need to be at least 18 years old to make an account")?;
    if !is_adult(birthdate, today) {
        return Err("You need to be at least 18 years old to make an account");
    }
    if logged_in {
        return Err("You are already logged in, please logout before proceeding");
    }
    Ok(birthdate)
}

/// Runs the full registration ladder and inserts the account (plus the
/// verified_accounts row for sellers, in one transaction). Returns the
/// inline form message when the submission is rejected.
async fn register_account(
    state: &AppState,
    form: &RegisterForm,
    seller: bool,
    logged_in: bool,
) -> Result<Option<&'static str>, AppError> {
    if !fields_present(form, seller) {
        return Ok(Some("All input fields must be filled in"));
    }
    let taken = state
        .db
        .query_opt("SELECT id FROM accounts WHERE email=$1", &[&form.email])
        .await?
        .is_some();
    if taken {
        return Ok(Some("The email is already taken, try another one"));
    }
    let birthdate = match validate_credentials(form, logged_in, Utc::now().date_naive()) {
        Ok(date) => date,
        Err(msg) => return Ok(Some(msg)),
    };
    let hash = hash_password(&form.password)?;

    if seller {
        let mut conn = state.db.conn().await?;
        let tx = conn.transaction().await?;
        let row = tx
            .query_one(
                "INSERT INTO accounts(fname, lname, email, country, birthdate, password) \
                 VALUES($1,$2,$3,$4,$5,$6) RETURNING id",
                &[
                    &title_case(&form.fname),
                    &title_case(&form.lname),
                    &form.email,
                    &form.country,
                    &birthdate,
                    &hash,
                ],
            )
            .await?;
        let user_id: i32 = row.get("id");
        tx.execute(
            "INSERT INTO verified_accounts(user_id, license, phone, is_seller, demerit) \
             VALUES($1,$2,$3,$4,$5)",
            &[&user_id, &form.license, &form.phone, &true, &0i32],
        )
        .await?;
        tx.commit().await?;
    } else {
        state
            .db
            .execute(
                "INSERT INTO accounts(fname, lname, email, country, birthdate, password) \
                 VALUES($1,$2,$3,$4,$5,$6)",
                &[
                    &title_case(&form.fname),
                    &title_case(&form.lname),
                    &form.email,
                    &form.country,
                    &birthdate,
                    &hash,
                ],
            )
            .await?;
    }
    info!("registered {}account for {}", if seller { "seller " } else { "" }, form.email);
    Ok(None)
}

async fn login_page(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    if session.logged_in {
        return Ok(Redirect::to("/account").into_response());
    }
    Ok(render(LoginTemplate {
        logged_in: false,
        error_message: None,
        success_message: None,
    })?
    .into_response())
}

async fn login(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    if form.username.is_empty() || form.password.is_empty() {
        return Ok(render(LoginTemplate {
            logged_in: session.logged_in,
            error_message: Some("Please fill in all login details".to_string()),
            success_message: None,
        })?
        .into_response());
    }

    let row = state
        .db
        .query_opt(
            "SELECT id, password, country FROM accounts WHERE email=$1",
            &[&form.username],
        )
        .await?;
    let matched = match &row {
        Some(row) => verify_password(row.get("password"), &form.password)?,
        None => false,
    };
    let Some(row) = row.filter(|_| matched) else {
        return Ok(render(LoginTemplate {
            logged_in: session.logged_in,
            error_message: Some("No account can be found matching your credentials".to_string()),
            success_message: None,
        })?
        .into_response());
    };

    state
        .sessions
        .update(sid, |s| {
            s.logged_in = true;
            s.user_id = row.get("id");
            s.username = form.username.clone();
            s.country = row.get("country");
        })
        .await;
    Ok(Redirect::to("/").into_response())
}

async fn register_page(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    if session.logged_in {
        return Ok(Redirect::to("/account").into_response());
    }
    Ok(render(RegisterTemplate {
        logged_in: false,
        error_message: None,
    })?
    .into_response())
}

async fn register(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    match register_account(&state, &form, false, session.logged_in).await? {
        None => Ok(render(LoginTemplate {
            logged_in: session.logged_in,
            error_message: None,
            success_message: Some(
                "Congratulations, you have registered. Log in below".to_string(),
            ),
        })?
        .into_response()),
        Some(msg) => Ok(render(RegisterTemplate {
            logged_in: session.logged_in,
            error_message: Some(msg.to_string()),
        })?
        .into_response()),
    }
}

async fn seller_page(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    if session.logged_in {
        return Ok(Redirect::to("/account").into_response());
    }
    Ok(render(RegisterSellerTemplate {
        logged_in: false,
        error_message: None,
    })?
    .into_response())
}

async fn register_seller(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    let session = state.sessions.get(sid).await;
    match register_account(&state, &form, true, session.logged_in).await? {
        None => Ok(render(LoginTemplate {
            logged_in: session.logged_in,
            error_message: None,
            success_message: Some(
                "Congratulations, you have registered as a seller. Log in below".to_string(),
            ),
        })?
        .into_response()),
        Some(msg) => Ok(render(RegisterSellerTemplate {
            logged_in: session.logged_in,
            error_message: Some(msg.to_string()),
        })?
        .into_response()),
    }
}

async fn account(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
) -> Result<Response, AppError> {
    let session = state.sessions.require_login(sid).await?;
    let conn = state.db.conn().await?;

    let details = AccountDetails::try_from_row(
        &conn
            .query_one(
                "SELECT fname, lname, country, email, \
                        to_char(birthdate, 'YYYY/MM/DD') AS birthdate \
                 FROM accounts WHERE email=$1",
                &[&session.username],
            )
            .await?,
    )?;

    let registered_seller = conn
        .query_opt(
            "SELECT is_seller FROM verified_accounts \
             JOIN accounts ON verified_accounts.user_id = accounts.id \
             WHERE accounts.email=$1",
            &[&session.username],
        )
        .await?
        .is_some();

    let listings = conn
        .query(
            "SELECT listings.listing_id, listings.price, listings.picture, \
                    listing_car.state, listing_car.manufacturer, listing_car.model, \
                    listing_car.car_year, \
                    to_char(listings.datecreated, 'YYYY/MM/DD') AS datecreated, \
                    to_char(listings.available_start, 'YYYY/MM/DD') AS start_date, \
                    to_char(listings.available_end, 'YYYY/MM/DD') AS end_date, \
                    listings.location \
             FROM listings \
             JOIN listing_car ON listings.listing_id = listing_car.listing_id \
             WHERE listings.host_id = $1",
            &[&session.user_id],
        )
        .await?
        .iter()
        .map(HostedListing::try_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let orders = conn
        .query(
            "SELECT to_char(rented_cars.datecreated, 'YYYY/MM/DD') AS datecreated, \
                    rented_cars.order_id, \
                    to_char(rented_cars.pickup, 'YYYY/MM/DD') AS pickup, \
                    to_char(rented_cars.dropoff, 'YYYY/MM/DD') AS dropoff, \
                    listing_car.manufacturer, listing_car.model, listing_car.car_year, \
                    rented_cars.location, \
                    accounts.email, accounts.fname, accounts.lname, \
                    listings.picture AS picture, listings.price, \
                    rented_cars.price AS total \
             FROM listings \
             JOIN rented_cars ON rented_cars.listing_id = listings.listing_id \
             JOIN accounts ON accounts.id = listings.host_id \
             JOIN listing_car ON listing_car.car_id = rented_cars.car_id \
             WHERE rented_cars.buyer_id=$1",
            &[&session.user_id],
        )
        .await?
        .iter()
        .map(PlacedOrder::try_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let fulfilled = conn
        .query(
            "SELECT to_char(rented_cars.datecreated, 'YYYY/MM/DD') AS purchase_date, \
                    rented_cars.price, rented_cars.order_id, \
                    to_char(rented_cars.pickup, 'YYYY/MM/DD') AS pickup, \
                    to_char(rented_cars.dropoff, 'YYYY/MM/DD') AS dropoff, \
                    listing_car.manufacturer, listing_car.model, listing_car.car_year, \
                    accounts.email, accounts.fname, accounts.lname, \
                    listing_car.state, rented_cars.location \
             FROM rented_cars \
             JOIN listing_car ON rented_cars.listing_id = listing_car.listing_id \
             JOIN accounts ON rented_cars.buyer_id = accounts.id \
             WHERE rented_cars.listing_id IN \
                   (SELECT listing_id FROM listings WHERE listings.host_id = $1) \
             ORDER BY rented_cars.order_id DESC",
            &[&session.user_id],
        )
        .await?
        .iter()
        .map(FulfilledOrder::try_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(render(AccountTemplate {
        logged_in: true,
        details,
        registered_seller,
        listings,
        orders,
        fulfilled,
    })?
    .into_response())
}

async fn update_account(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Form(form): Form<AccountForm>,
) -> Result<Response, AppError> {
    let session = state.sessions.require_login(sid).await?;
    if !form.change_location.is_empty() && form.change_location != "None" {
        state
            .db
            .execute(
                "UPDATE accounts SET country=$1 WHERE id=$2",
                &[&form.change_location, &session.user_id],
            )
            .await?;
        state
            .sessions
            .update(sid, |s| s.country = form.change_location.clone())
            .await;
    }
    Ok(Redirect::to("/account").into_response())
}

/// Removes a hosted listing and its car in one transaction. Orders that
/// reference the listing are left in place.
async fn delete_listing(
    State(state): State<Arc<AppState>>,
    Extension(sid): Extension<SessionId>,
    Path(id): Path<i32>,
) -> Result<Response, AppError> {
    state.sessions.require_login(sid).await?;
    let mut conn = state.db.conn().await?;
    let tx = conn.transaction().await?;
    tx.execute("DELETE FROM listing_car WHERE listing_id=$1", &[&id])
        .await?;
    tx.execute("DELETE FROM listings WHERE listing_id=$1", &[&id])
        .await?;
    tx.commit().await?;
    Ok(Redirect::to("/account").into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn form() -> RegisterForm {
        RegisterForm {
            fname: "john".to_string(),
            lname: "doe".to_string(),
            country: "Canada".to_string(),
            date: "1990-05-20".to_string(),
            email: "john@doe.com".to_string(),
            password: "longenough".to_string(),
            confirm: "longenough".to_string(),
            phone: "5551234".to_string(),
            license: "DL-778".to_string(),
        }
    }

    #[test]
    fn presence_check_covers_the_country_placeholder() {
        let mut f = form();
        assert!(fields_present(&f, false));
        f.country = "None".to_string();
        assert!(!fields_present(&f, false));
    }

    #[test]
    fn seller_form_also_needs_phone_and_license() {
        let mut f = form();
        f.phone.clear();
        assert!(fields_present(&f, false));
        assert!(!fields_present(&f, true));
    }

    #[test]
    fn mismatched_passwords_rejected_first() {
        let mut f = form();
        f.confirm = "different1".to_string();
        // short password too, but the mismatch message wins
        f.password = "short".to_string();
        assert_eq!(
            validate_credentials(&f, false, date("2026-08-07")),
            Err("The passwords don't match, please try again")
        );
    }

    #[test]
    fn short_passwords_rejected() {
        let mut f = form();
        f.password = "short".to_string();
        f.confirm = "short".to_string();
        assert_eq!(
            validate_credentials(&f, false, date("2026-08-07")),
            Err("Chosen password must be at least 8 characters")
        );
    }

    #[test]
    fn minors_rejected() {
        let mut f = form();
        f.date = "2010-01-01".to_string();
        assert_eq!(
            validate_credentials(&f, false, date("2026-08-07")),
            Err("You need to be at least 18 years old to make an account")
        );
    }

    #[test]
    fn eighteenth_birthday_is_old_enough() {
        assert!(is_adult(date("2008-08-07"), date("2026-08-07")));
        assert!(!is_adult(date("2008-08-08"), date("2026-08-07")));
    }

    #[test]
    fn logged_in_visitors_cannot_register_again() {
        let f = form();
        assert_eq!(
            validate_credentials(&f, true, date("2026-08-07")),
            Err("You are already logged in, please logout before proceeding")
        );
    }

    #[test]
    fn valid_submission_parses_the_birthdate() {
        let f = form();
        assert_eq!(
            validate_credentials(&f, false, date("2026-08-07")),
            Ok(date("1990-05-20"))
        );
    }

    #[test]
    fn password_hashes_verify_and_salt() {
        let first = hash_password("hunter2hunter2").unwrap();
        let second = hash_password("hunter2hunter2").unwrap();
        assert_ne!(first, second);
        assert!(verify_password(&first, "hunter2hunter2").unwrap());
        assert!(!verify_password(&first, "wrong password").unwrap());
    }
}
