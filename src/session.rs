use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Request, State},
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{error::AppError, AppState};

pub const SESSION_COOKIE: &str = "sid";

/// One unconfirmed date/price selection, held between date selection and
/// checkout. Stored per listing id so a selection on another listing does
/// not clobber it.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingWindow {
    pub car_id: i32,
    pub pickup: NaiveDate,
    pub dropoff: NaiveDate,
    pub price: f64,
    pub location: String,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub logged_in: bool,
    pub user_id: i32,
    pub username: String,
    pub country: String,
    pub bookings: HashMap<i32, BookingWindow>,
}

/// Injected into request extensions by `session_layer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionId(pub Uuid);

/// In-process session map keyed by the `sid` cookie. No expiry: entries
/// live until `/logout` or process exit.
#[derive(Clone, Default)]
pub struct SessionStore(Arc<RwLock<HashMap<Uuid, Session>>>);

impl SessionStore {
    pub async fn get(&self, id: SessionId) -> Session {
        self.0.read().await.get(&id.0).cloned().unwrap_or_default()
    }

    pub async fn update<F>(&self, id: SessionId, f: F)
    where
        F: FnOnce(&mut Session),
    {
        let mut map = self.0.write().await;
        f(map.entry(id.0).or_default());
    }

    pub async fn destroy(&self, id: SessionId) {
        self.0.write().await.remove(&id.0);
    }

    /// Auth gate: hands the session back only when the visitor is logged
    /// in, otherwise the error renders as a redirect to the login page.
    pub async fn require_login(&self, id: SessionId) -> Result<Session, AppError> {
        let session = self.get(id).await;
        if session.logged_in {
            Ok(session)
        } else {
            Err(AppError::AuthRequired)
        }
    }

    async fn contains(&self, id: Uuid) -> bool {
        self.0.read().await.contains_key(&id)
    }

    async fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.0.write().await.insert(id, Session::default());
        id
    }
}

/// Resolves the visitor's session from the `sid` cookie, creating one on
/// first contact, and injects the id into request extensions. The cookie
/// is only set on responses that minted a new session.
pub async fn session_layer(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(cookie_value)
        .and_then(|v| Uuid::parse_str(v).ok());

    let sid = match presented {
        Some(id) if state.sessions.contains(id).await => id,
        _ => state.sessions.create().await,
    };

    req.extensions_mut().insert(SessionId(sid));
    let mut res = next.run(req).await;

    if presented != Some(sid) {
        let cookie = format!("{}={}; Path=/; HttpOnly", SESSION_COOKIE, sid);
        if let Ok(value) = cookie.parse::<HeaderValue>() {
            res.headers_mut().append(SET_COOKIE, value);
        }
    }
    res
}

fn cookie_value(header: &str) -> Option<&str> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix("sid="))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn window(car_id: i32, price: f64) -> BookingWindow {
        BookingWindow {
            car_id,
            pickup: date("2026-09-01"),
            dropoff: date("2026-09-03"),
            price,
            location: "Canada".to_string(),
        }
    }

    #[test]
    fn cookie_value_finds_sid_among_other_cookies() {
        assert_eq!(cookie_value("theme=dark; sid=abc; lang=en"), Some("abc"));
        assert_eq!(cookie_value("sid=abc"), Some("abc"));
        assert_eq!(cookie_value("theme=dark"), None);
        assert_eq!(cookie_value(""), None);
    }

    #[tokio::test]
    async fn login_state_round_trips() {
        let store = SessionStore::default();
        let id = SessionId(store.create().await);

        store
            .update(id, |s| {
                s.logged_in = true;
                s.user_id = 7;
                s.username = "a@b.com".to_string();
                s.country = "Canada".to_string();
            })
            .await;

        let session = store.require_login(id).await.unwrap();
        assert_eq!(session.user_id, 7);
        assert_eq!(session.username, "a@b.com");
    }

    #[tokio::test]
    async fn require_login_rejects_fresh_sessions() {
        let store = SessionStore::default();
        let id = SessionId(store.create().await);
        assert!(matches!(
            store.require_login(id).await,
            Err(AppError::AuthRequired)
        ));
    }

    #[tokio::test]
    async fn booking_windows_are_kept_per_listing() {
        let store = SessionStore::default();
        let id = SessionId(store.create().await);

        store
            .update(id, |s| {
                s.bookings.insert(1, window(10, 100.0));
                s.bookings.insert(2, window(20, 250.0));
            })
            .await;

        // a second selection on listing 1 replaces only listing 1
        store
            .update(id, |s| {
                s.bookings.insert(1, window(10, 300.0));
            })
            .await;

        let session = store.get(id).await;
        assert_eq!(session.bookings[&1].price, 300.0);
        assert_eq!(session.bookings[&2].price, 250.0);

        // checkout success clears only the confirmed listing
        store
            .update(id, |s| {
                s.bookings.remove(&1);
            })
            .await;
        let session = store.get(id).await;
        assert!(!session.bookings.contains_key(&1));
        assert!(session.bookings.contains_key(&2));
    }

    #[tokio::test]
    async fn destroy_forgets_the_session() {
        let store = SessionStore::default();
        let id = SessionId(store.create().await);
        store.update(id, |s| s.logged_in = true).await;
        store.destroy(id).await;
        assert!(!store.get(id).await.logged_in);
    }
}
