//! Calcol Server - calculated columns over HTTP with SSE change notifications
//!
//! Hosts one `CalculationManager` over a data file and exposes its
//! calculations as REST endpoints. Subscribers are told which calculated
//! columns changed after every edit or execution.
//!
//! # Features
//!
//! - `file-watcher` - Automatic row reloading when the data file changes
//! - `full` - All features enabled
//!
//! # Example
//!
//! ```ignore
//! use calcol::{Dataset, Row};
//! use calcol_server::{ServerCore, build_router};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dataset = Dataset::new(vec![Row::new(1).with_field("value", 100.0)]);
//!     let core = Arc::new(ServerCore::from_dataset(dataset));
//!
//!     let router = build_router(core);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod core;
pub mod error;
pub mod formulas;
pub mod http;
pub mod loader;
pub mod sse;
pub mod state;

#[cfg(feature = "file-watcher")]
pub mod watcher;

// Re-exports for convenience
pub use core::ServerCore;
pub use error::{AppError, ServerError};
pub use state::SharedState;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        http::parse_formula,
        http::list_calculations,
        http::add_calculation,
        http::get_calculation,
        http::update_calculation,
        http::remove_calculation,
        http::execute,
        http::refresh,
        http::list_columns,
        http::virtual_columns,
        sse::subscribe,
    ),
    components(schemas(
        state::ErrorResponse,
        state::ParseRequest,
        state::ParseResponse,
        state::NewCalculation,
        state::CalculationUpdate,
        state::CalculationResponse,
        state::CalculationsResponse,
        state::RowFailureResponse,
        state::ExecutionResponse,
        state::ColumnsResponse,
        state::VirtualColumnsResponse,
    ))
)]
struct ApiDoc;

pub fn openapi_spec() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the axum router with all endpoints
pub fn build_router(core: Arc<ServerCore>) -> Router {
    Router::new()
        .route("/parse", post(http::parse_formula))
        .route(
            "/calculations",
            get(http::list_calculations).post(http::add_calculation),
        )
        .route(
            "/calculations/{column}",
            get(http::get_calculation)
                .patch(http::update_calculation)
                .delete(http::remove_calculation),
        )
        .route("/execute", post(http::execute))
        .route("/refresh", post(http::refresh))
        .route("/columns", get(http::list_columns))
        .route("/virtual-columns", get(http::virtual_columns))
        .route("/subscribe", get(sse::subscribe))
        .with_state(core)
}

/// Build the router with OpenAPI documentation and permissive CORS
pub fn build_router_with_docs(core: Arc<ServerCore>) -> Router {
    use utoipa_swagger_ui::SwaggerUi;

    build_router(core)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi_spec()))
        .layer(CorsLayer::permissive())
}
