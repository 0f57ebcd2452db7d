//! Crate-wide error type and its HTTP mapping.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
	#[error("{0}")]
	BadRequest(String),
	/// Violation of an ordering contract, e.g. touching response headers
	/// after the body started. Programmer errors; never caught.
	#[error("bad sequence of calls: {0}")]
	BadSequenceOfCalls(&'static str),
	#[error("{0}")]
	ParameterOutOfRange(String),
	#[error("unknown resource: {0}")]
	InexistentItem(String),
	#[error("{0}")]
	Internal(String),
	#[error("database error: {0}")]
	Database(#[from] rusqlite::Error),
	#[error("not implemented: {0}")]
	NotImplemented(&'static str),
}

impl ApiError {
	pub fn status(&self) -> StatusCode {
		match self {
			Self::BadRequest(_) | Self::BadSequenceOfCalls(_) | Self::ParameterOutOfRange(_) => {
				StatusCode::BAD_REQUEST
			}
			Self::InexistentItem(_) => StatusCode::NOT_FOUND,
			Self::Internal(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
			Self::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
		}
	}
}

/// JSON body attached to every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
	#[serde(rename = "HttpError")]
	pub http_error: String,
	#[serde(rename = "HttpStatus")]
	pub http_status: u16,
	#[serde(rename = "Message")]
	pub message: String,
	#[serde(rename = "Method")]
	pub method: String,
	#[serde(rename = "Uri")]
	pub uri: String,
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let status = self.status();
		if status.is_server_error() {
			error!("{self}");
		}

		let body = ErrorBody {
			http_error: status.canonical_reason().unwrap_or("Unknown").to_owned(),
			http_status: status.as_u16(),
			message: self.to_string(),
			method: String::new(),
			uri: String::new(),
		};

		let mut response = (status, Json(body.clone())).into_response();
		// Picked up by `error_context` to fill in Method/Uri.
		response.extensions_mut().insert(body);
		response
	}
}

/// Middleware completing error bodies with the request method and URI,
/// which are not in scope when `IntoResponse` runs.
pub async fn error_context(request: Request, next: Next) -> Response {
	let method = request.method().to_string();
	let uri = request.uri().to_string();

	let response = next.run(request).await;

	match response.extensions().get::<ErrorBody>().cloned() {
		Some(mut body) => {
			body.method = method;
			body.uri = uri;
			let status = StatusCode::from_u16(body.http_status)
				.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
			(status, Json(body)).into_response()
		}
		None => response,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_kinds_map_to_http_codes() {
		assert_eq!(
			ApiError::BadRequest("x".into()).status(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			ApiError::BadSequenceOfCalls("x").status(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			ApiError::ParameterOutOfRange("x".into()).status(),
			StatusCode::BAD_REQUEST
		);
		assert_eq!(
			ApiError::InexistentItem("x".into()).status(),
			StatusCode::NOT_FOUND
		);
		assert_eq!(
			ApiError::Internal("x".into()).status(),
			StatusCode::INTERNAL_SERVER_ERROR
		);
		assert_eq!(
			ApiError::NotImplemented("x").status(),
			StatusCode::NOT_IMPLEMENTED
		);
	}
}
