use axum::http::{header::COOKIE, HeaderMap};
use cookie::{Cookie, SameSite};

use crate::config::CookieConfig;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn build<'c>(cfg: &CookieConfig, name: &'c str, value: &'c str, max_age: time::Duration) -> Cookie<'c> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(cfg.secure)
        .same_site(SameSite::Strict)
        .max_age(max_age)
        .build()
}

/// `Set-Cookie` value for a session cookie.
pub fn session_cookie(cfg: &CookieConfig, name: &str, value: &str) -> String {
    let max_age = time::Duration::seconds(cfg.max_age.as_secs() as i64);
    build(cfg, name, value, max_age).to_string()
}

/// `Set-Cookie` value that makes the browser drop `name`.
pub fn expired_cookie(cfg: &CookieConfig, name: &str) -> String {
    build(cfg, name, "", time::Duration::ZERO).to_string()
}

/// First non-empty value of `name` across the request `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| Cookie::split_parse(v))
        .filter_map(Result::ok)
        .find(|c| c.name() == name && !c.value().is_empty())
        .map(|c| c.value().to_string())
}
