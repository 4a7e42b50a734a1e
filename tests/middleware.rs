use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::header::{CACHE_CONTROL, COOKIE, SET_COOKIE, VARY};
use http::{Request, Response, StatusCode};
use request_session::{
    Error, LoadAndSaveLayer, MemoryStore, Session, SessionConfig, SessionCookie, SessionManager,
    Store,
};
use std::convert::Infallible;
use tower::{service_fn, Layer, ServiceExt};

fn session(request: &Request<String>) -> Session {
    request
        .extensions()
        .get::<Session>()
        .cloned()
        .expect("the layer inserts the session")
}

async fn count_visits(request: Request<String>) -> Result<Response<String>, Infallible> {
    let session = session(&request);
    let visits = session.get_int("visits").unwrap() + 1;
    session.put("visits", visits);
    Ok(Response::new(visits.to_string()))
}

async fn read_visits(request: Request<String>) -> Result<Response<String>, Infallible> {
    let visits = session(&request).get_int("visits").unwrap();
    Ok(Response::new(visits.to_string()))
}

async fn log_out(request: Request<String>) -> Result<Response<String>, Infallible> {
    session(&request).destroy().await.unwrap();
    Ok(Response::new(String::new()))
}

async fn write_early(request: Request<String>) -> Result<Response<String>, Infallible> {
    let session = session(&request);
    session.put("streamed", true);
    let mut response = Response::new(String::new());
    session.write_response(response.headers_mut()).await.unwrap();
    Ok(response)
}

fn request(cookie: Option<&str>) -> Request<String> {
    let mut builder = Request::builder().uri("/");
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    builder.body(String::new()).unwrap()
}

fn set_cookies(response: &Response<String>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_owned())
        .collect()
}

/// Returns the `name=value` part of the only `Set-Cookie` header.
fn session_cookie(response: &Response<String>) -> String {
    let cookies = set_cookies(response);
    assert_eq!(cookies.len(), 1, "{cookies:?}");
    cookies[0].split(';').next().unwrap().to_owned()
}

#[async_std::test]
async fn modified_sessions_set_the_cookie() {
    let store = MemoryStore::new();
    let layer = LoadAndSaveLayer::new(SessionManager::new(store.clone()));

    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "1");
    assert_eq!(response.headers()[VARY], "Cookie");
    assert_eq!(response.headers()[CACHE_CONTROL], "no-cache=\"Set-Cookie\"");
    let header = &set_cookies(&response)[0];
    assert!(header.contains("HttpOnly"), "{header}");
    assert!(header.contains("SameSite=Lax"), "{header}");
    assert!(header.contains("Path=/"), "{header}");
    assert_eq!(store.len(), 1);

    let cookie = session_cookie(&response);
    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.body(), "2");
    assert_eq!(session_cookie(&response), cookie);
    assert_eq!(store.len(), 1);
}

/// Requests that only read the session do not touch the store or the cookie.
#[async_std::test]
async fn unmodified_sessions_set_no_cookie() {
    let store = MemoryStore::new();
    let layer = LoadAndSaveLayer::new(SessionManager::new(store.clone()));

    let response = layer
        .layer(service_fn(read_visits))
        .oneshot(request(None))
        .await
        .unwrap();
    assert_eq!(response.body(), "0");
    assert!(set_cookies(&response).is_empty());
    assert!(store.is_empty());

    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(None))
        .await
        .unwrap();
    let cookie = session_cookie(&response);
    let response = layer
        .layer(service_fn(read_visits))
        .oneshot(request(Some(&format!("theme=dark; {cookie}"))))
        .await
        .unwrap();
    assert_eq!(response.body(), "1");
    assert!(set_cookies(&response).is_empty());
}

#[async_std::test]
async fn destroyed_sessions_remove_the_cookie() {
    let store = MemoryStore::new();
    let layer = LoadAndSaveLayer::new(SessionManager::new(store.clone()));

    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(None))
        .await
        .unwrap();
    let cookie = session_cookie(&response);

    let response = layer
        .layer(service_fn(log_out))
        .oneshot(request(Some(&cookie)))
        .await
        .unwrap();
    let header = &set_cookies(&response)[0];
    assert!(header.starts_with("session=;"), "{header}");
    assert!(header.contains("Max-Age=-1"), "{header}");
    assert!(store.is_empty());

    let response = layer
        .layer(service_fn(read_visits))
        .oneshot(request(Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.body(), "0");
}

/// Forged tokens get a new session, never the error path.
#[async_std::test]
async fn unknown_tokens_start_a_new_session() {
    let layer = LoadAndSaveLayer::new(SessionManager::new(MemoryStore::new()));
    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(Some("session=forged")))
        .await
        .unwrap();
    assert_eq!(response.body(), "1");
    assert_ne!(session_cookie(&response), "session=forged");
}

/// Sessions written by the handler are not written a second time.
#[async_std::test]
async fn handlers_may_write_the_session_themselves() {
    let layer = LoadAndSaveLayer::new(SessionManager::new(MemoryStore::new()));
    let response = layer
        .layer(service_fn(write_early))
        .oneshot(request(None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookies(&response).len(), 1);
}

#[async_std::test]
async fn cookie_configuration_is_applied() {
    let config = SessionConfig::default().with_cookie(
        SessionCookie::default()
            .with_name("id")
            .with_domain("example.com")
            .with_secure(true)
            .with_persist(false),
    );
    let layer = LoadAndSaveLayer::new(SessionManager::new(MemoryStore::new()).with_config(config));

    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(None))
        .await
        .unwrap();
    let header = &set_cookies(&response)[0];
    assert!(header.starts_with("id="), "{header}");
    assert!(header.contains("Domain=example.com"), "{header}");
    assert!(header.contains("Secure"), "{header}");
    assert!(!header.contains("Max-Age"), "{header}");

    let cookie = session_cookie(&response);
    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(Some(&cookie)))
        .await
        .unwrap();
    assert_eq!(response.body(), "2");
}

/// A store that is always down.
#[derive(Debug, Clone, Copy)]
struct BrokenStore;

#[async_trait]
impl Store for BrokenStore {
    async fn find(&self, _token: &str) -> anyhow::Result<Option<Vec<u8>>> {
        anyhow::bail!("store is down")
    }

    async fn commit(
        &self,
        _token: &str,
        _blob: &[u8],
        _expiry: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("store is down")
    }

    async fn delete(&self, _token: &str) -> anyhow::Result<()> {
        anyhow::bail!("store is down")
    }
}

#[async_std::test]
async fn store_failures_become_error_responses() {
    let layer = LoadAndSaveLayer::new(SessionManager::new(BrokenStore));

    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.body().is_empty());
    assert!(set_cookies(&response).is_empty());

    let response = layer
        .layer(service_fn(read_visits))
        .oneshot(request(Some("session=anything")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[async_std::test]
async fn error_handler_decides_the_status() {
    let layer = LoadAndSaveLayer::new(SessionManager::new(BrokenStore)).with_error_handler(
        |error: &Error| match error {
            Error::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
    );

    let response = layer
        .layer(service_fn(count_visits))
        .oneshot(request(None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
