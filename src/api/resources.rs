//! Resource browsing: collection listings, per-resource descriptors,
//! cascading deletes, attachment download and store-wide statistics.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tracing::instrument;

use crate::api::{answer_dicom, answer_json, blocking, parse_kind, AppState};
use crate::error::ApiError;
use crate::types::{base_path, FileContentType, ResourceType, StoreStatus};

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/statistics", get(statistics))
		.route("/instances", post(upload_instance))
		.route("/instances/:id/file", get(instance_file))
		.route("/:kind", get(list_resources))
		.route("/:kind/:id", get(lookup_resource).delete(delete_resource))
}

/// Ingests one fully-buffered DICOM instance.
#[instrument(skip(state, body))]
async fn upload_instance(
	State(state): State<AppState>,
	body: Bytes,
) -> Result<Response, ApiError> {
	let result = blocking(move || {
		let object = crate::dicom::from_bytes(&body)?;
		let (status, instance_id) = state.store(&object, "", &[])?;
		if status == StoreStatus::Failure {
			return Err(ApiError::Internal("error while storing the instance".into()));
		}
		Ok(json!({
			"ID": &instance_id,
			"Path": base_path(ResourceType::Instance, &instance_id),
			"Status": status.as_str(),
		}))
	})
	.await?;
	answer_json(&result)
}

#[instrument(skip(state))]
async fn list_resources(
	State(state): State<AppState>,
	Path(kind): Path<String>,
) -> Result<Response, ApiError> {
	let kind = parse_kind(&kind)?;
	let ids = blocking(move || state.index().get_all_uuids(kind)).await?;
	answer_json(&json!(ids))
}

#[instrument(skip(state))]
async fn lookup_resource(
	State(state): State<AppState>,
	Path((kind, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
	let kind = parse_kind(&kind)?;
	let resource = blocking(move || state.index().lookup_resource(&id, kind)).await?;
	answer_json(&resource)
}

#[instrument(skip(state))]
async fn delete_resource(
	State(state): State<AppState>,
	Path((kind, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
	let kind = parse_kind(&kind)?;
	let remaining = blocking(move || state.index().delete_resource(&id, kind)).await?;

	let remaining_json = match remaining {
		Some(ancestor) => json!({
			"Type": ancestor.resource_type.as_str(),
			"ID": &ancestor.public_id,
			"Path": base_path(ancestor.resource_type, &ancestor.public_id),
		}),
		None => serde_json::Value::Null,
	};
	answer_json(&json!({ "RemainingAncestor": remaining_json }))
}

#[instrument(skip(state))]
async fn instance_file(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Response, ApiError> {
	let (bytes, filename) = blocking(move || {
		let attachment = state
			.index()
			.lookup_attachment(&id, FileContentType::Dicom)?
			.ok_or_else(|| ApiError::InexistentItem(format!("Instance {id}")))?;
		let bytes = state.read_attachment(&attachment)?;
		Ok((bytes, format!("{id}.dcm")))
	})
	.await?;

	answer_dicom(&bytes, &filename)
}

#[instrument(skip(state))]
async fn statistics(State(state): State<AppState>) -> Result<Response, ApiError> {
	let statistics = blocking(move || state.index().compute_statistics()).await?;
	answer_json(&statistics)
}
