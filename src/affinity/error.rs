use thiserror::Error;

/// Errors surfaced by the session affinity layer.
///
/// Absence of a cookie, a stale token and a malformed legacy value are not
/// errors; they all resolve to "no affinity".
#[derive(Debug, Error)]
pub enum AffinityError {
    /// The affinity cookie's own bytes are not valid UTF-8.
    #[error("unreadable affinity cookie: {0}")]
    CookieHeader(#[from] std::str::Utf8Error),

    /// The configured cookie name is not a valid cookie token.
    #[error("invalid affinity cookie name '{0}'")]
    InvalidCookieName(String),
}
