use crate::{Error, SessionManager};
use futures::future::BoxFuture;
use http::{Request, Response, StatusCode};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Decides the status code of the response when loading or saving a session fails.
pub type ErrorHandler = Arc<dyn Fn(&Error) -> StatusCode + Send + Sync>;

/// A [`Layer`] that loads the session of every request and saves it before the response is sent.
///
/// See [`LoadAndSave`] for details.
#[derive(Clone)]
pub struct LoadAndSaveLayer {
    manager: SessionManager,
    error_handler: ErrorHandler,
}

/// Loads the session of every request and saves it before the response is sent.
///
/// 1. The token is read from the session cookie, and the session is loaded with [`SessionManager::load`].
/// 2. The [`Session`](crate::Session) is inserted into the request extensions, where handlers find it.
/// 3. After the inner service produced the response, but before its head is sent,
///    the session is committed or destroyed as needed and the `Set-Cookie` header is added
///    (see [`Session::write_response`](crate::Session::write_response)).
///    Sessions the handler already wrote itself are left alone.
///
/// If loading or saving fails, the error is passed to the [`ErrorHandler`],
/// and an empty response with the returned status code is sent instead.
/// The default handler logs the error and answers `500 Internal Server Error`.
#[derive(Clone)]
pub struct LoadAndSave<S> {
    inner: S,
    manager: SessionManager,
    error_handler: ErrorHandler,
}

impl LoadAndSaveLayer {
    /// Create a layer loading and saving sessions with `manager`.
    pub fn new(manager: SessionManager) -> Self {
        Self {
            manager,
            error_handler: Arc::new(default_error_handler),
        }
    }

    /// Replace the handler deciding the response status when loading or saving a session fails.
    pub fn with_error_handler(
        mut self,
        error_handler: impl Fn(&Error) -> StatusCode + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Arc::new(error_handler);
        self
    }
}

fn default_error_handler(error: &Error) -> StatusCode {
    log::error!("Failed to load or save session: {error}");
    StatusCode::INTERNAL_SERVER_ERROR
}

impl<S> Layer<S> for LoadAndSaveLayer {
    type Service = LoadAndSave<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadAndSave {
            inner,
            manager: self.manager.clone(),
            error_handler: self.error_handler.clone(),
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for LoadAndSave<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        // The clone may not be ready, so call the instance that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let manager = self.manager.clone();
        let error_handler = self.error_handler.clone();

        Box::pin(async move {
            let token = manager
                .token_from_headers(request.headers())
                .unwrap_or_default();
            let session = match manager.load(&token).await {
                Ok(session) => session,
                Err(error) => return Ok(error_response(&error_handler, &error)),
            };
            request.extensions_mut().insert(session.clone());

            let mut response = inner.call(request).await?;
            if !session.is_written() {
                if let Err(error) = session.write_response(response.headers_mut()).await {
                    return Ok(error_response(&error_handler, &error));
                }
            }
            Ok(response)
        })
    }
}

fn error_response<ResBody: Default>(
    error_handler: &ErrorHandler,
    error: &Error,
) -> Response<ResBody> {
    let mut response = Response::new(ResBody::default());
    *response.status_mut() = error_handler(error);
    response
}

impl Debug for LoadAndSaveLayer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadAndSaveLayer")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl<S: Debug> Debug for LoadAndSave<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadAndSave")
            .field("inner", &self.inner)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}
