//! Cookie-based session affinity.
//!
//! [`StickySession`] resolves an incoming request to the backend named by its
//! affinity cookie and stamps responses with the token of whichever backend
//! finally served them. It keeps no state between calls: every lookup scans
//! the pool snapshot it is handed, so backends added or removed by an
//! operator are picked up on the next request.

use cookie::Cookie;
use url::Url;

use super::cookies::{CookieSink, CookieSource};
use super::identity::token_for;
use super::options::CookieOptions;
use super::token::AffinityToken;
use super::{AffinityError, BackendAddress};

/// Outcome of looking up a request's affinity cookie.
///
/// Everything except a cookie read error is represented here; none of these
/// outcomes is a failure.
#[derive(Debug)]
pub enum Resolution<'a, B> {
    /// No affinity cookie on the request.
    NoCookie,
    /// A legacy raw-address cookie matched a pool member.
    LegacyMatch(&'a B),
    /// A legacy cookie was unparsable or named no pool member.
    LegacyNoMatch,
    /// A hashed token matched a pool member.
    HashedMatch(&'a B),
    /// A hashed token named no pool member.
    HashedNoMatch,
}

impl<'a, B> Resolution<'a, B> {
    /// The matched backend, if any.
    pub fn backend(&self) -> Option<&'a B> {
        match *self {
            Resolution::LegacyMatch(b) | Resolution::HashedMatch(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_match(&self) -> bool {
        self.backend().is_some()
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Resolution::NoCookie => "no_cookie",
            Resolution::LegacyMatch(_) => "legacy_match",
            Resolution::LegacyNoMatch => "legacy_no_match",
            Resolution::HashedMatch(_) => "hashed_match",
            Resolution::HashedNoMatch => "hashed_no_match",
        }
    }
}

/// Layer 7 session affinity driven by a single named cookie.
#[derive(Debug, Clone)]
pub struct StickySession {
    cookie_name: String,
    options: CookieOptions,
}

impl StickySession {
    /// Creates a session with default cookie attributes.
    pub fn new(cookie_name: impl Into<String>) -> Result<Self, AffinityError> {
        Self::with_options(cookie_name, CookieOptions::default())
    }

    /// Creates a session whose cookie carries the given attributes.
    ///
    /// The name must be a valid cookie token so that stamping never fails.
    pub fn with_options(
        cookie_name: impl Into<String>,
        options: CookieOptions,
    ) -> Result<Self, AffinityError> {
        let cookie_name = cookie_name.into();
        if !is_cookie_token(&cookie_name) {
            return Err(AffinityError::InvalidCookieName(cookie_name));
        }
        Ok(Self {
            cookie_name,
            options,
        })
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    pub fn options(&self) -> &CookieOptions {
        &self.options
    }

    /// Returns the pool member named by the request's affinity cookie.
    ///
    /// `Ok(None)` covers every benign miss: no cookie, a stale token, a
    /// malformed legacy value or an empty pool. Only a cookie read failure
    /// is an error.
    pub fn get_backend<'a, R, B>(
        &self,
        request: &R,
        pool: &'a [B],
    ) -> Result<Option<&'a B>, AffinityError>
    where
        R: CookieSource + ?Sized,
        B: BackendAddress,
    {
        Ok(self.resolve(request, pool)?.backend())
    }

    /// Like [`get_backend`](Self::get_backend) but reports which kind of
    /// match or miss occurred.
    pub fn resolve<'a, R, B>(
        &self,
        request: &R,
        pool: &'a [B],
    ) -> Result<Resolution<'a, B>, AffinityError>
    where
        R: CookieSource + ?Sized,
        B: BackendAddress,
    {
        let Some(value) = request.cookie(&self.cookie_name)? else {
            return Ok(Resolution::NoCookie);
        };

        let resolution = match AffinityToken::decode(&value) {
            None => Resolution::LegacyNoMatch,
            Some(token) => {
                let found = pool
                    .iter()
                    .find(|candidate| token.matches(candidate.address()));
                match (token.is_legacy(), found) {
                    (true, Some(b)) => Resolution::LegacyMatch(b),
                    (true, None) => Resolution::LegacyNoMatch,
                    (false, Some(b)) => Resolution::HashedMatch(b),
                    (false, None) => Resolution::HashedNoMatch,
                }
            }
        };

        tracing::debug!(
            cookie = %self.cookie_name,
            outcome = resolution.label(),
            pool_size = pool.len(),
            "resolved session affinity"
        );
        Ok(resolution)
    }

    /// Builds the affinity cookie for `backend`.
    pub fn affinity_cookie(&self, backend: &Url) -> Cookie<'static> {
        let opts = &self.options;
        let mut builder = Cookie::build((self.cookie_name.clone(), token_for(backend)))
            .path(opts.effective_path().to_string())
            .http_only(opts.http_only)
            .secure(opts.secure);

        if let Some(domain) = opts.domain.as_deref().filter(|d| !d.is_empty()) {
            builder = builder.domain(domain.to_string());
        }
        if let Some(expires) = opts.expires {
            builder = builder.expires(expires);
        }
        if let Some(max_age) = opts.effective_max_age() {
            builder = builder.max_age(max_age);
        }
        if let Some(same_site) = opts.same_site {
            builder = builder.same_site(same_site);
        }

        builder.build()
    }

    /// Writes the affinity cookie for `backend` onto the response.
    ///
    /// Called for every served request, whether the backend came from the
    /// cookie or from fallback selection, so stale cookies heal themselves.
    pub fn stick_backend<S>(&self, backend: &Url, response: &mut S)
    where
        S: CookieSink + ?Sized,
    {
        response.set_cookie(&self.affinity_cookie(backend));
    }
}

/// RFC 6265 cookie-name token: visible ASCII without separators.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic()
                && !matches!(
                    b,
                    b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':' | b'\\' | b'"'
                        | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}'
                )
        })
}
