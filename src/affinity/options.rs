//! Attributes applied to every affinity cookie.

pub use cookie::SameSite;
use time::OffsetDateTime;

/// Passthrough attributes for the affinity cookie.
///
/// `max_age` follows the classic cookie convention: `0` leaves the attribute
/// out, a negative value expires the cookie immediately (`Max-Age=0`), and a
/// positive value is emitted as-is in seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    /// Defaults to `/` when unset or empty.
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<OffsetDateTime>,
    pub max_age: i64,
    pub same_site: Option<SameSite>,
}

impl CookieOptions {
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_expires(mut self, expires: OffsetDateTime) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Cookie path, falling back to `/`.
    pub fn effective_path(&self) -> &str {
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => "/",
        }
    }

    /// `Max-Age` to emit, if any.
    pub fn effective_max_age(&self) -> Option<time::Duration> {
        match self.max_age {
            0 => None,
            n if n < 0 => Some(time::Duration::ZERO),
            n => Some(time::Duration::seconds(n)),
        }
    }
}
