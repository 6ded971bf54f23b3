//! Request handlers: turn a parsed request into a response.

use super::message::{Request, Response};

/// Produces the response for one request. Called synchronously on the
/// session's task, so it must not block.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: &Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: &Request) -> Response {
        self(request)
    }
}

/// Answers every request with a fixed `404` page, mirroring the request's
/// version and keep-alive semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

impl Handler for NotFoundHandler {
    fn handle(&self, request: &Request) -> Response {
        Response::new(404, request.version)
            .content_type("text/html")
            .body("Hello, world")
            .keep_alive(request.keep_alive())
    }
}
