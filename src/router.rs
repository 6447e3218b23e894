//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. The router also carries
//! the setup that belongs to the application rather than to the listener:
//! user middleware, templates, and the static asset route.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::assets::{self, Manifest};
use crate::error::Error;
use crate::handler::{self, BoxedEndpoint, Handler};
use crate::middleware::{BoxedMiddleware, Middleware};
use crate::request::Request;
use crate::templates::{TemplateConfig, Templates};

/// One entry of a route table passed to [`Router::setup_routes`].
pub struct Route {
    endpoint: String,
    method: Method,
    handler: BoxedEndpoint,
}

impl Route {
    /// A `GET` route. Use [`Route::method`] for anything else.
    pub fn new(endpoint: impl Into<String>, handler: impl Handler) -> Self {
        Self { endpoint: endpoint.into(), method: Method::GET, handler: handler::endpoint(handler) }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }
}

/// The application router.
///
/// Build it once at startup and pass it to [`Server::serve`](crate::Server::serve),
/// which adds the built-in `/ping` and `/api` routes.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedEndpoint>>,
    layers: Vec<BoxedMiddleware>,
    templates: Option<Arc<Templates>>,
    manifest: Option<Arc<Manifest>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), layers: Vec::new(), templates: None, manifest: None }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax, catch-alls `{*name}`:
    ///
    /// ```rust,no_run
    /// # use http::Method;
    /// # use tsu_rpc::{Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn delete_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,    "/users/{id}", get_user)
    ///     .on(Method::DELETE, "/users/{id}", delete_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or conflicts with a route already
    /// registered for `method`. Routes are fixed at startup, so this is a
    /// programming error.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.add(method, path, handler::endpoint(handler))
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    /// Registers a whole route table, in order.
    pub fn setup_routes(self, routes: impl IntoIterator<Item = Route>) -> Self {
        routes.into_iter()
            .fold(self, |router, route| router.add(route.method, &route.endpoint, route.handler))
    }

    /// Appends a middleware layer. See [`middleware`](crate::middleware).
    pub fn layer(mut self, middleware: impl Middleware) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Loads templates and, when `static_assets_path` is set, hashes the
    /// asset tree and serves it under `/assets/`.
    ///
    /// Fails if the asset root cannot be read or the template glob matches
    /// nothing.
    pub fn setup_templates(mut self, cfg: TemplateConfig) -> Result<Self, Error> {
        let manifest = match &cfg.static_assets_path {
            Some(root) => Some(Arc::new(Manifest::build(root)?)),
            None => None,
        };

        let templates = Templates::load(&cfg, manifest.clone())?;

        if let (Some(root), Some(manifest)) = (&cfg.static_assets_path, &manifest) {
            let root = Arc::new(root.clone());
            let manifest_for_route = Arc::clone(manifest);
            self = self.get(assets::ROUTE, move |req: Request| {
                assets::serve(Arc::clone(&root), Arc::clone(&manifest_for_route), req)
            });
        }

        self.templates = Some(Arc::new(templates));
        self.manifest = manifest;
        Ok(self)
    }

    /// The asset manifest built by [`Router::setup_templates`], if any.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_deref()
    }

    fn add(mut self, method: Method, path: &str, handler: BoxedEndpoint) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedEndpoint, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    pub(crate) fn take_layers(&mut self) -> Arc<[BoxedMiddleware]> {
        Arc::from(std::mem::take(&mut self.layers))
    }

    pub(crate) fn templates(&self) -> Option<&Arc<Templates>> {
        self.templates.as_ref()
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::test_request;

    async fn hello(_req: Request) -> &'static str {
        "hello"
    }

    async fn user(req: Request) -> String {
        req.param("id").unwrap_or("?").to_owned()
    }

    #[tokio::test]
    async fn lookup_matches_method_and_path() {
        let router = Router::new().get("/hello", hello).post("/users/{id}", user);

        assert!(router.lookup(&Method::GET, "/hello").is_some());
        assert!(router.lookup(&Method::POST, "/hello").is_none());
        assert!(router.lookup(&Method::GET, "/nope").is_none());

        let (handler, params) = router.lookup(&Method::POST, "/users/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
        let mut req = test_request(Method::POST, "/users/42", b"");
        req.params = params;
        assert_eq!(handler.serve(req).await.body(), b"42");
    }

    #[test]
    fn route_table_defaults_to_get() {
        let router = Router::new().setup_routes([
            Route::new("/a", hello),
            Route::new("/b", hello).method(Method::PUT),
        ]);

        assert!(router.lookup(&Method::GET, "/a").is_some());
        assert!(router.lookup(&Method::PUT, "/b").is_some());
        assert!(router.lookup(&Method::GET, "/b").is_none());
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_routes_panic() {
        let _ = Router::new().get("/a", hello).get("/a", hello);
    }
}
