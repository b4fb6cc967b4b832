//! Cookie access on request and response headers.
//!
//! The affinity core only needs to look up one named request cookie and to
//! append one `Set-Cookie` line. These traits keep it independent from the
//! concrete header types of the proxy framework.

use cookie::Cookie;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use pingora_http::{RequestHeader, ResponseHeader};

use super::AffinityError;

/// Something that exposes named request cookies.
pub trait CookieSource {
    /// Returns the value of the first cookie called `name`.
    ///
    /// `Ok(None)` means the cookie is absent. An error means the named
    /// cookie is present but its bytes could not be read.
    fn cookie(&self, name: &str) -> Result<Option<String>, AffinityError>;
}

/// Something that accepts response cookies.
pub trait CookieSink {
    /// Appends one `Set-Cookie` header, leaving existing ones untouched.
    fn set_cookie(&mut self, cookie: &Cookie<'_>);
}

/// Scans every `Cookie` header line in order for `name`.
///
/// Lines are split into pairs at the byte level. Pairs that fail to parse
/// are skipped, and so are other cookies carrying non-ASCII or invalid
/// UTF-8 bytes. Only the named cookie's own bytes can produce an error.
pub fn find_cookie(headers: &HeaderMap, name: &str) -> Result<Option<String>, AffinityError> {
    for value in headers.get_all(COOKIE) {
        for pair in value.as_bytes().split(|b| *b == b';') {
            let Some(eq) = pair.iter().position(|b| *b == b'=') else {
                continue;
            };
            if pair[..eq].trim_ascii() != name.as_bytes() {
                continue;
            }
            let text = std::str::from_utf8(pair.trim_ascii())?;
            if let Ok(cookie) = Cookie::parse(text) {
                return Ok(Some(cookie.value().to_string()));
            }
        }
    }
    Ok(None)
}

/// Renders a cookie as a `Set-Cookie` header value.
///
/// The cookie name is validated when the session is built and the value is
/// always hex, so this only fails on misconfigured attributes such as a
/// domain holding control characters.
fn set_cookie_value(cookie: &Cookie<'_>) -> Option<HeaderValue> {
    match HeaderValue::from_str(&cookie.to_string()) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(
                cookie = cookie.name(),
                error = %e,
                "dropping unencodable affinity cookie"
            );
            None
        }
    }
}

impl CookieSource for HeaderMap {
    fn cookie(&self, name: &str) -> Result<Option<String>, AffinityError> {
        find_cookie(self, name)
    }
}

impl CookieSource for http::request::Parts {
    fn cookie(&self, name: &str) -> Result<Option<String>, AffinityError> {
        find_cookie(&self.headers, name)
    }
}

impl CookieSource for RequestHeader {
    fn cookie(&self, name: &str) -> Result<Option<String>, AffinityError> {
        find_cookie(&self.headers, name)
    }
}

impl CookieSink for HeaderMap {
    fn set_cookie(&mut self, cookie: &Cookie<'_>) {
        if let Some(value) = set_cookie_value(cookie) {
            self.append(SET_COOKIE, value);
        }
    }
}

impl CookieSink for http::response::Parts {
    fn set_cookie(&mut self, cookie: &Cookie<'_>) {
        self.headers.set_cookie(cookie);
    }
}

impl CookieSink for ResponseHeader {
    fn set_cookie(&mut self, cookie: &Cookie<'_>) {
        if let Some(value) = set_cookie_value(cookie) {
            if let Err(e) = self.append_header(SET_COOKIE, value) {
                tracing::warn!(error = %e, "failed to append affinity cookie");
            }
        }
    }
}
