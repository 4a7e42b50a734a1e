//! Moving the session token between client and server in a cookie.

use crate::{Error, Result, SessionCookie};
use chrono::{DateTime, Utc};
use cookie::Cookie;
use http::header::{CACHE_CONTROL, COOKIE, SET_COOKIE, VARY};
use http::{HeaderMap, HeaderValue};
use time::OffsetDateTime;

/// Read the value of the cookie called `name` from the `Cookie` headers of a request.
/// Malformed cookies are skipped.
pub(crate) fn read_token(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| Cookie::split_parse(header))
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_owned())
}

/// The cookie carrying `token` to the client.
///
/// A persistent cookie expires with the session, rounded up to the next full second.
/// Otherwise it lives as long as the browser session.
pub(crate) fn session_cookie(
    config: &SessionCookie,
    token: &str,
    expiry: DateTime<Utc>,
    persist: bool,
    now: DateTime<Utc>,
) -> Cookie<'static> {
    let mut cookie = base_cookie(config, token.to_owned());
    if persist {
        let expires_at = if expiry.timestamp_subsec_nanos() > 0 {
            expiry.timestamp() + 1
        } else {
            expiry.timestamp()
        };
        if let Ok(expires) = OffsetDateTime::from_unix_timestamp(expires_at) {
            cookie.set_expires(expires);
        }

        let remaining_millis = (expiry - now).num_milliseconds().max(0);
        let max_age = (remaining_millis + 999) / 1000;
        cookie.set_max_age(time::Duration::seconds(max_age));
    }
    cookie
}

/// The cookie instructing the client to delete its session cookie.
pub(crate) fn removal_cookie(config: &SessionCookie) -> Cookie<'static> {
    let mut cookie = base_cookie(config, String::new());
    cookie.set_expires(OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(1));
    cookie.set_max_age(time::Duration::seconds(-1));
    cookie
}

fn base_cookie(config: &SessionCookie, value: String) -> Cookie<'static> {
    let mut builder = Cookie::build((config.name.clone(), value))
        .path(config.path.clone())
        .http_only(config.http_only)
        .secure(config.secure)
        .same_site(config.same_site.into())
        .partitioned(config.partitioned);
    if let Some(domain) = &config.domain {
        builder = builder.domain(domain.clone());
    }
    builder.build()
}

/// Append `cookie` as a `Set-Cookie` header, and keep caches from storing the response.
pub(crate) fn append_set_cookie(headers: &mut HeaderMap, cookie: &Cookie<'_>) -> Result {
    let value = HeaderValue::from_str(&cookie.to_string()).map_err(Error::InvalidCookie)?;
    headers.append(SET_COOKIE, value);
    headers.append(VARY, HeaderValue::from_static("Cookie"));
    headers.append(
        CACHE_CONTROL,
        HeaderValue::from_static(r#"no-cache="Set-Cookie""#),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SameSite;
    use chrono::TimeZone;

    #[test]
    fn reads_the_named_cookie() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; session=abc"));
        headers.append(COOKIE, HeaderValue::from_static("other=1"));

        assert_eq!(read_token(&headers, "session"), Some("abc".to_owned()));
        assert_eq!(read_token(&headers, "other"), Some("1".to_owned()));
        assert_eq!(read_token(&headers, "missing"), None);
    }

    #[test]
    fn persistent_cookies_round_expiry_up() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let expiry = now + chrono::Duration::milliseconds(10_500);
        let cookie = session_cookie(&SessionCookie::default(), "token", expiry, true, now);

        assert_eq!(cookie.value(), "token");
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(11)));
        assert_eq!(
            cookie.expires_datetime().map(|expires| expires.unix_timestamp()),
            Some(now.timestamp() + 11)
        );
    }

    #[test]
    fn browser_session_cookies_have_no_expiry() {
        let now = Utc::now();
        let cookie = session_cookie(
            &SessionCookie::default(),
            "token",
            now + chrono::Duration::hours(1),
            false,
            now,
        );
        assert_eq!(cookie.max_age(), None);
        assert!(cookie.expires().is_none());
    }

    #[test]
    fn attributes_follow_the_config() {
        let config = SessionCookie::default()
            .with_name("sid")
            .with_domain("example.com")
            .with_path("/app")
            .with_secure(true)
            .with_http_only(false)
            .with_same_site(SameSite::Strict);
        let built = session_cookie(&config, "token", Utc::now(), false, Utc::now());

        assert_eq!(built.name(), "sid");
        assert_eq!(built.domain(), Some("example.com"));
        assert_eq!(built.path(), Some("/app"));
        assert_eq!(built.secure(), Some(true));
        assert_eq!(built.http_only(), Some(false));
        assert_eq!(built.same_site(), Some(cookie::SameSite::Strict));
    }

    #[test]
    fn removal_cookie_lies_in_the_past() {
        let cookie = removal_cookie(&SessionCookie::default());
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(-1)));
        assert_eq!(
            cookie.expires_datetime().map(|expires| expires.unix_timestamp()),
            Some(1)
        );

        let header = cookie.to_string();
        assert!(header.contains("Max-Age=-1"), "{header}");
    }

    #[test]
    fn set_cookie_disables_caching() {
        let mut headers = HeaderMap::new();
        let cookie = removal_cookie(&SessionCookie::default());
        append_set_cookie(&mut headers, &cookie).unwrap();

        assert!(headers[SET_COOKIE].to_str().unwrap().starts_with("session="));
        assert_eq!(headers[VARY], "Cookie");
        assert_eq!(headers[CACHE_CONTROL], r#"no-cache="Set-Cookie""#);
    }
}
