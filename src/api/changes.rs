//! Paging views over the append-only change feed and export log.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::instrument;

use crate::api::{answer_json, blocking, parse_json_body, AppState};
use crate::error::ApiError;

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/changes", get(changes))
		.route("/exports", get(exports))
		.route("/modalities/:modality/export", post(log_export))
}

#[derive(Debug, Deserialize)]
struct PagingParameters {
	#[serde(default)]
	since: i64,
	#[serde(default = "default_limit")]
	limit: u64,
	/// Present (with any value) to fetch only the latest entry.
	last: Option<String>,
}

fn default_limit() -> u64 {
	100
}

#[instrument(skip(state))]
async fn changes(
	State(state): State<AppState>,
	Query(parameters): Query<PagingParameters>,
) -> Result<Response, ApiError> {
	let feed = blocking(move || {
		if parameters.last.is_some() {
			state.index().get_last_change()
		} else {
			state.index().get_changes(parameters.since, parameters.limit)
		}
	})
	.await?;
	answer_json(&feed)
}

#[instrument(skip(state))]
async fn exports(
	State(state): State<AppState>,
	Query(parameters): Query<PagingParameters>,
) -> Result<Response, ApiError> {
	let log = blocking(move || {
		if parameters.last.is_some() {
			state.index().get_last_exported_resource()
		} else {
			state
				.index()
				.get_exported_resources(parameters.since, parameters.limit)
		}
	})
	.await?;
	answer_json(&log)
}

/// Records that a resource was sent to a remote modality. The DICOM
/// network client performing the transfer lives outside this crate; this
/// endpoint is its write-back into the export log. Body:
/// `{"Resource": "<public id>"}`.
#[instrument(skip(state, body))]
async fn log_export(
	State(state): State<AppState>,
	Path(modality): Path<String>,
	body: axum::body::Bytes,
) -> Result<Response, ApiError> {
	let request = parse_json_body(&body)?;
	let resource = request["Resource"]
		.as_str()
		.ok_or_else(|| ApiError::BadRequest("missing `Resource` field".into()))?
		.to_owned();

	blocking(move || state.index().log_exported_resource(&resource, &modality)).await?;
	answer_json(&serde_json::json!({}))
}
