//! HTTP plumbing shared by the Farmstand services.
//!
//! Handlers stay thin: they pull what they need out of the request, send an
//! action to the checkout store, and translate the outcome into a response.
//! Failures travel as [`AppError`], which renders the `{code, message}` body
//! every endpoint uses. Every request gets an `x-correlation-id`
//! ([`correlation_id_layer`]) that handlers can read back through the
//! [`CorrelationId`] extractor for their log lines.
//!
//! ```ignore
//! use farmstand_web::{AppError, CorrelationId, WebResult};
//!
//! async fn get_product(
//!     State(state): State<AppState>,
//!     CorrelationId(request_id): CorrelationId,
//!     Path(id): Path<Uuid>,
//! ) -> WebResult<Json<ProductResponse>> {
//!     tracing::debug!(%request_id, product_id = %id, "Product lookup");
//!     catalog::get_product(&state.store, ProductId::from_uuid(id))
//!         .await
//!         .map(|p| Json(p.into()))
//!         .ok_or_else(|| AppError::not_found("Product", id))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::{ClientIp, CorrelationId, UserAgent};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};

/// Handler result.
pub type WebResult<T> = Result<T, AppError>;
