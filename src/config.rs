use std::{env, fmt::Display, str::FromStr};

use log::info;

pub struct Config {
    pub port: u16,
    pub db_host: String,
    pub db_user: String,
    pub db_pass: String,
    pub db_name: String,
    pub image_dir: String,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", "3000"),
            db_host: try_load("DB_HOST", "localhost"),
            db_user: try_load("DB_USER", "postgres"),
            db_pass: try_load("DB_PASS", "postgres"),
            db_name: try_load("DB_DATABASE", "car_server"),
            image_dir: try_load("IMAGE_DIR", "public/images"),
        }
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            log::error!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default() {
        let port: u16 = try_load("CAR_SERVER_TEST_UNSET", "3000");
        assert_eq!(port, 3000);
    }
}
