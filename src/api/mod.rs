//! REST surface of the store.
//!
//! Handlers answer through the [`HttpOutput`] state machine over a buffered
//! stream; the captured response is handed to the embedded HTTP server.
//! Index work is blocking (one exclusive lock around SQLite), so handlers
//! dispatch it off the async workers.

mod changes;
mod modify;
mod resources;

use std::sync::Arc;

use axum::middleware;
use axum::response::Response;
use axum::Router;
use serde_json::Value as Json;

use crate::context::ServerContext;
use crate::error::{self, ApiError};
use crate::http::output::{BufferedStream, HttpOutput};
use crate::types::ResourceType;

pub type AppState = Arc<ServerContext>;

pub fn routes(context: AppState) -> Router {
	Router::new()
		.merge(resources::routes())
		.merge(changes::routes())
		.merge(modify::routes())
		.layer(middleware::from_fn(error::error_context))
		.with_state(context)
}

/// Runs one blocking unit of index/storage work off the async workers.
pub async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
	F: FnOnce() -> Result<T, ApiError> + Send + 'static,
	T: Send + 'static,
{
	tokio::task::spawn_blocking(work)
		.await
		.map_err(|err| ApiError::Internal(format!("blocking task failed: {err}")))?
}

/// Resolves the collection segment of a URI ("patients", "studies", ...).
pub fn parse_kind(segment: &str) -> Result<ResourceType, ApiError> {
	segment
		.parse()
		.map_err(|()| ApiError::InexistentItem(format!("unknown resource collection: {segment}")))
}

/// Parses a JSON request body, mapping malformed payloads to a 400.
pub fn parse_json_body(body: &[u8]) -> Result<Json, ApiError> {
	serde_json::from_slice(body)
		.map_err(|err| ApiError::BadRequest(format!("invalid JSON body: {err}")))
}

/// Encodes a JSON payload through the response state machine.
pub fn answer_json(value: &Json) -> Result<Response, ApiError> {
	let body = serde_json::to_vec(value)
		.map_err(|err| ApiError::Internal(format!("cannot serialise the response: {err}")))?;

	let mut output = HttpOutput::new(BufferedStream::default(), true);
	output.set_content_type(mime::APPLICATION_JSON.as_ref())?;
	output.set_content_length(body.len() as u64)?;
	output.send_body(&body)?;
	Ok(output.finish().into_response())
}

/// Encodes a DICOM payload through the response state machine.
pub fn answer_dicom(bytes: &[u8], filename: &str) -> Result<Response, ApiError> {
	let mut output = HttpOutput::new(BufferedStream::default(), true);
	output.set_content_type("application/dicom")?;
	output.set_content_filename(filename)?;
	output.set_content_length(bytes.len() as u64)?;
	output.send_body(bytes)?;
	Ok(output.finish().into_response())
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn collection_segments_resolve() {
		assert_eq!(parse_kind("patients").unwrap(), ResourceType::Patient);
		assert_eq!(parse_kind("instances").unwrap(), ResourceType::Instance);
		assert!(matches!(
			parse_kind("archives"),
			Err(ApiError::InexistentItem(_))
		));
	}

	#[test]
	fn malformed_json_is_a_bad_request() {
		assert!(matches!(
			parse_json_body(b"{ not json"),
			Err(ApiError::BadRequest(_))
		));
		assert_eq!(parse_json_body(b"{\"A\":1}").unwrap(), json!({"A": 1}));
	}

	#[test]
	fn answer_json_sets_the_content_type() {
		let response = answer_json(&json!({"ID": "x"})).unwrap();
		assert_eq!(response.status(), axum::http::StatusCode::OK);
		assert_eq!(
			response.headers().get("content-type").unwrap(),
			mime::APPLICATION_JSON.as_ref()
		);
	}
}
