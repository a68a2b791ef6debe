//! Route table.
//!
//! The introspection result is served through a fixed set of concrete
//! routes: the root shortcuts, `/auth`, `/new/{model}`, `/openapi`, and a
//! catch-all per verb. Preflight always answers 204 and every response
//! carries permissive CORS headers.

use axum::Router;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::ServerContext;
use crate::dispatch;

pub fn router(ctx: ServerContext) -> Router {
    Router::new()
        .route(
            "/",
            get(dispatch::root_dispatcher)
                .put(dispatch::root_updater)
                .options(dispatch::generic_options),
        )
        .route(
            "/auth",
            post(dispatch::auth_login).options(dispatch::generic_options),
        )
        .route(
            "/new/{model}",
            post(dispatch::root_factory).options(dispatch::generic_options),
        )
        .route(
            "/openapi",
            get(dispatch::openapi_doc).options(dispatch::generic_options),
        )
        .route(
            "/{*path}",
            get(dispatch::path_dispatcher)
                .put(dispatch::path_updater)
                .delete(dispatch::path_remover)
                .post(dispatch::path_factory)
                .options(dispatch::generic_options),
        )
        .layer(axum::middleware::map_response(allow_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn allow_origin(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static(
            "Access-Control-Allow-Origin, Access-Control-Allow-Headers, Origin, \
             X-Requested-With, Content-Type, Authorization",
        ),
    );
    response
}
