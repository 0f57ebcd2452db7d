//! Modification and anonymization of stored instances, and manual DICOM
//! creation.
//!
//! Single instances are rewritten and answered directly; patient, study
//! and series resources are rewritten instance by instance and re-ingested
//! through the store, recording `ModifiedFrom`/`AnonymizedFrom` parentage
//! for every hierarchy level whose public id changed.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use dicom::dictionary_std::tags;
use serde_json::{json, Value as Json};
use tracing::{info, instrument, trace};

use crate::api::{
	answer_dicom, answer_json, blocking, parse_json_body, parse_kind, AppState,
};
use crate::context::ServerContext;
use crate::dicom::modification::DicomModification;
use crate::dicom::{
	embed_image, new_secondary_capture, parse_tag, string_element, to_bytes, with_file_meta,
	DicomSummary,
};
use crate::error::ApiError;
use crate::index::MetadataOverlay;
use crate::types::{base_path, ChangeType, GlobalProperty, MetadataType, ResourceType, StoreStatus};

pub fn routes() -> Router<AppState> {
	Router::new()
		.route("/:kind/:id/modify", post(modify))
		.route("/:kind/:id/anonymize", post(anonymize))
		.route("/tools/create-dicom", post(create_dicom))
}

// ----------------------------------------------------------- body parsing

enum TagOperation {
	Keep,
	Remove,
}

fn parse_tag_list(
	modification: &mut DicomModification,
	list: &Json,
	operation: TagOperation,
) -> Result<(), ApiError> {
	let items = list
		.as_array()
		.ok_or_else(|| ApiError::BadRequest("expected an array of tag names".into()))?;

	for item in items {
		let name = item
			.as_str()
			.ok_or_else(|| ApiError::BadRequest("tag names must be strings".into()))?;
		let tag = parse_tag(name)?;

		match operation {
			TagOperation::Keep => {
				trace!("keep: {name} {tag}");
				modification.keep(tag);
			}
			TagOperation::Remove => {
				trace!("remove: {name} {tag}");
				modification.remove(tag);
			}
		}
	}
	Ok(())
}

fn parse_replacements(
	modification: &mut DicomModification,
	replacements: &Json,
) -> Result<(), ApiError> {
	let entries = replacements
		.as_object()
		.ok_or_else(|| ApiError::BadRequest("`Replace` must be an object".into()))?;

	for (name, value) in entries {
		let value = match value {
			Json::String(text) => text.clone(),
			Json::Number(number) => number.to_string(),
			Json::Bool(boolean) => boolean.to_string(),
			_ => {
				return Err(ApiError::BadRequest(format!(
					"unsupported replacement value for {name}"
				)))
			}
		};

		let tag = parse_tag(name)?;
		trace!("replace: {name} {tag} == {value}");
		modification.replace(tag, value, false)?;
	}
	Ok(())
}

fn parse_modify_request(
	modification: &mut DicomModification,
	request: &Json,
) -> Result<(), ApiError> {
	let object = request
		.as_object()
		.ok_or_else(|| ApiError::BadRequest("the request body must be a JSON object".into()))?;

	if object.contains_key("RemovePrivateTags") {
		modification.set_remove_private_tags(true);
	}
	if let Some(list) = object.get("Remove") {
		parse_tag_list(modification, list, TagOperation::Remove)?;
	}
	if let Some(replacements) = object.get("Replace") {
		parse_replacements(modification, replacements)?;
	}
	Ok(())
}

fn parse_anonymization_request(
	modification: &mut DicomModification,
	request: &Json,
	context: &ServerContext,
) -> Result<(), ApiError> {
	modification.setup_anonymization();
	let preset_name = modification
		.replacement(tags::PATIENT_NAME)
		.unwrap_or_default()
		.to_owned();

	let object = request
		.as_object()
		.ok_or_else(|| ApiError::BadRequest("the request body must be a JSON object".into()))?;

	if object.contains_key("KeepPrivateTags") {
		modification.set_remove_private_tags(false);
	}
	if let Some(list) = object.get("Remove") {
		parse_tag_list(modification, list, TagOperation::Remove)?;
	}
	if let Some(replacements) = object.get("Replace") {
		parse_replacements(modification, replacements)?;
	}
	if let Some(list) = object.get("Keep") {
		parse_tag_list(modification, list, TagOperation::Keep)?;
	}

	if modification.replacement(tags::PATIENT_NAME) == Some(preset_name.as_str()) {
		// Overwrite the preset's random patient name by a friendlier one,
		// provided the user did not choose one
		let sequence = context
			.index()
			.increment_global_sequence(GlobalProperty::AnonymizationSequence)?;
		modification.replace(tags::PATIENT_NAME, format!("Anonymized{sequence}"), true)?;
	}

	Ok(())
}

/// A modification touching an identifier is authorised at the level of
/// that identifier; everything else stays instance-local.
fn infer_modification_level(modification: &DicomModification) -> ResourceType {
	if modification.is_replaced(tags::PATIENT_ID) {
		ResourceType::Patient
	} else if modification.is_replaced(tags::STUDY_INSTANCE_UID) {
		ResourceType::Study
	} else if modification.is_replaced(tags::SERIES_INSTANCE_UID) {
		ResourceType::Series
	} else {
		ResourceType::Instance
	}
}

const fn modification_change(resource_type: ResourceType) -> ChangeType {
	match resource_type {
		ResourceType::Patient => ChangeType::ModifiedPatient,
		ResourceType::Study => ChangeType::ModifiedStudy,
		_ => ChangeType::ModifiedSeries,
	}
}

// ------------------------------------------------------------- execution

/// Rewrites a single instance and returns its serialised form, without
/// touching the store.
fn apply_to_instance(
	context: &ServerContext,
	modification: &mut DicomModification,
	public_id: &str,
) -> Result<Vec<u8>, ApiError> {
	let original = context.open_instance(public_id)?;
	let mut data = (*original).clone().into_inner();
	modification.apply(&mut data)?;
	to_bytes(&with_file_meta(data)?)
}

/// Rewrites every instance below a resource and re-ingests the results.
/// Returns the descriptor of the first newly created resource of the
/// requested kind.
fn anonymize_or_modify_resource(
	context: &ServerContext,
	mut modification: DicomModification,
	metadata_type: MetadataType,
	change_type: ChangeType,
	resource_type: ResourceType,
	public_id: &str,
) -> Result<Json, ApiError> {
	let instances = context.index().get_child_instances(public_id)?;

	let mut result = Json::Null;

	for instance in &instances {
		info!("modifying instance {instance}");

		let original = match context.open_instance(instance) {
			Ok(original) => original,
			// This child instance has been removed in between
			Err(_) => continue,
		};

		let original_hasher = DicomSummary::from_object(&original).hasher();

		let mut data = (*original).clone().into_inner();
		modification.apply(&mut data)?;
		let modified_hasher = DicomSummary::from_object(&data).hasher();

		// Parentage metadata for every level whose public id changed
		let mut overlays: Vec<MetadataOverlay> = vec![(
			ResourceType::Instance,
			metadata_type,
			instance.clone(),
		)];
		if original_hasher.hash_series() != modified_hasher.hash_series() {
			overlays.push((
				ResourceType::Series,
				metadata_type,
				original_hasher.hash_series(),
			));
		}
		if original_hasher.hash_study() != modified_hasher.hash_study() {
			overlays.push((
				ResourceType::Study,
				metadata_type,
				original_hasher.hash_study(),
			));
		}
		if original_hasher.hash_patient() != modified_hasher.hash_patient() {
			overlays.push((
				ResourceType::Patient,
				metadata_type,
				original_hasher.hash_patient(),
			));
		}

		let file = with_file_meta(data)?;
		let (status, _) = context.store(&file, "", &overlays)?;
		if status != StoreStatus::Success {
			return Err(ApiError::Internal(format!(
				"error while storing the modified instance {instance}"
			)));
		}

		if result.is_null() {
			let new_id = match resource_type {
				ResourceType::Series => modified_hasher.hash_series(),
				ResourceType::Study => modified_hasher.hash_study(),
				ResourceType::Patient => modified_hasher.hash_patient(),
				ResourceType::Instance => modified_hasher.hash_instance(),
			};
			result = json!({
				"Type": resource_type.as_str(),
				"ID": &new_id,
				"Path": base_path(resource_type, &new_id),
				"PatientID": modified_hasher.hash_patient(),
			});
		}
	}

	if let Some(new_id) = result["ID"].as_str() {
		context
			.index()
			.log_change(change_type, resource_type, new_id)?;
	}

	Ok(result)
}

// --------------------------------------------------------------- handlers

#[instrument(skip(state, body))]
async fn modify(
	State(state): State<AppState>,
	Path((kind, id)): Path<(String, String)>,
	body: Bytes,
) -> Result<Response, ApiError> {
	let request = parse_json_body(&body)?;
	let kind = parse_kind(&kind)?;

	match kind {
		ResourceType::Instance => {
			let filename = format!("{id}.dcm");
			let bytes = blocking(move || {
				let mut modification = DicomModification::new();
				modification.set_allow_manual_identifiers(true);
				parse_modify_request(&mut modification, &request)?;
				modification.set_level(infer_modification_level(&modification));
				apply_to_instance(&state, &mut modification, &id)
			})
			.await?;
			answer_dicom(&bytes, &filename)
		}
		resource_type => {
			let result = blocking(move || {
				let mut modification = DicomModification::new();
				// The level bounds which identifiers may be replaced, so it
				// must be known before the replacements are parsed
				modification.set_level(resource_type);
				parse_modify_request(&mut modification, &request)?;
				anonymize_or_modify_resource(
					&state,
					modification,
					MetadataType::ModifiedFrom,
					modification_change(resource_type),
					resource_type,
					&id,
				)
			})
			.await?;
			answer_json(&result)
		}
	}
}

#[instrument(skip(state, body))]
async fn anonymize(
	State(state): State<AppState>,
	Path((kind, id)): Path<(String, String)>,
	body: Bytes,
) -> Result<Response, ApiError> {
	let request = parse_json_body(&body)?;
	let kind = parse_kind(&kind)?;

	match kind {
		ResourceType::Instance => {
			let filename = format!("{id}.dcm");
			let bytes = blocking(move || {
				let mut modification = DicomModification::new();
				modification.set_allow_manual_identifiers(true);
				parse_anonymization_request(&mut modification, &request, &state)?;
				apply_to_instance(&state, &mut modification, &id)
			})
			.await?;
			answer_dicom(&bytes, &filename)
		}
		resource_type => {
			let result = blocking(move || {
				let mut modification = DicomModification::new();
				parse_anonymization_request(&mut modification, &request, &state)?;
				anonymize_or_modify_resource(
					&state,
					modification,
					MetadataType::AnonymizedFrom,
					modification_change(resource_type),
					resource_type,
					&id,
				)
			})
			.await?;
			answer_json(&result)
		}
	}
}

/// Builds a fresh instance from a map of tag names to values. A
/// `PixelData` value holding a `data:image/...;base64,` URI is decoded and
/// embedded as pixel data.
#[instrument(skip(state, body))]
async fn create_dicom(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
	let request = parse_json_body(&body)?;

	let result = blocking(move || {
		let entries = request
			.as_object()
			.ok_or_else(|| ApiError::BadRequest("the request body must be a JSON object".into()))?;

		let mut object = new_secondary_capture()?;
		for (name, value) in entries {
			let value = value
				.as_str()
				.ok_or_else(|| ApiError::BadRequest(format!("the value of {name} must be a string")))?;

			let tag = parse_tag(name)?;
			if tag == tags::PIXEL_DATA {
				embed_image(&mut object, value)?;
			} else {
				object.put(string_element(tag, value)?);
			}
		}

		let file = with_file_meta(object)?;
		let (status, instance_id) = state.store(&file, "", &[])?;
		if status == StoreStatus::Failure {
			return Err(ApiError::Internal(
				"error while storing the manually-created instance".into(),
			));
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

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dicom::{element_str, from_bytes};
	use crate::index::ServerIndex;
	use crate::storage::MemoryStorage;
	use dicom::core::Tag;
	use dicom::object::InMemDicomObject;
	use std::sync::Arc;

	fn test_context() -> Arc<ServerContext> {
		let storage = Arc::new(MemoryStorage::default());
		let index = ServerIndex::open(":memory:", storage.clone()).unwrap();
		ServerContext::new(index, storage)
	}

	fn store_instance(
		context: &ServerContext,
		series_uid: &str,
		sop_uid: &str,
		instance_number: &str,
	) -> String {
		let mut object = InMemDicomObject::new_empty();
		for (tag, value) in [
			(tags::PATIENT_NAME, "DOE^JANE"),
			(tags::PATIENT_ID, "P1"),
			(tags::STUDY_INSTANCE_UID, "1.2.3"),
			(tags::SERIES_INSTANCE_UID, series_uid),
			(tags::SOP_INSTANCE_UID, sop_uid),
			(tags::INSTANCE_NUMBER, instance_number),
			(tags::STUDY_DESCRIPTION, "Brain MRI"),
			(tags::SERIES_DESCRIPTION, "T1 axial"),
		] {
			object.put(string_element(tag, value).unwrap());
		}
		object.put(
			string_element(tags::SOP_CLASS_UID, dicom::dictionary_std::uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
				.unwrap(),
		);

		let file = with_file_meta(object).unwrap();
		let (status, id) = context.store(&file, "TEST", &[]).unwrap();
		assert_eq!(status, StoreStatus::Success);
		id
	}

	#[test]
	fn level_inference_follows_replaced_identifiers() {
		let mut modification = DicomModification::new();
		modification.set_allow_manual_identifiers(true);
		assert_eq!(
			infer_modification_level(&modification),
			ResourceType::Instance
		);

		modification
			.replace(tags::SERIES_INSTANCE_UID, "1.2".into(), false)
			.unwrap();
		assert_eq!(infer_modification_level(&modification), ResourceType::Series);

		modification
			.replace(tags::PATIENT_ID, "P2".into(), false)
			.unwrap();
		assert_eq!(
			infer_modification_level(&modification),
			ResourceType::Patient
		);
	}

	#[test]
	fn anonymize_instance_honours_keeps_and_replacements() {
		let context = test_context();
		let id = store_instance(&context, "1.2.3.4", "1.2.3.4.5", "1");

		let request = json!({
			"Replace": {"PatientName": "X"},
			"Keep": ["StudyDescription"],
		});
		let mut modification = DicomModification::new();
		modification.set_allow_manual_identifiers(true);
		parse_anonymization_request(&mut modification, &request, &context).unwrap();

		let bytes = apply_to_instance(&context, &mut modification, &id).unwrap();
		let anonymized = from_bytes(&bytes).unwrap();

		assert_eq!(element_str(&anonymized, tags::PATIENT_NAME).as_deref(), Some("X"));
		assert_eq!(
			element_str(&anonymized, tags::STUDY_DESCRIPTION).as_deref(),
			Some("Brain MRI")
		);
		assert_ne!(element_str(&anonymized, tags::PATIENT_ID).as_deref(), Some("P1"));
		assert_ne!(
			element_str(&anonymized, tags::SOP_INSTANCE_UID).as_deref(),
			Some("1.2.3.4.5")
		);
		assert_eq!(element_str(&anonymized, tags::SERIES_DESCRIPTION), None);
	}

	#[test]
	fn anonymization_without_a_name_uses_the_global_sequence() {
		let context = test_context();

		let mut modification = DicomModification::new();
		parse_anonymization_request(&mut modification, &json!({}), &context).unwrap();
		assert_eq!(
			modification.replacement(tags::PATIENT_NAME),
			Some("Anonymized1")
		);

		let mut modification = DicomModification::new();
		parse_anonymization_request(&mut modification, &json!({}), &context).unwrap();
		assert_eq!(
			modification.replacement(tags::PATIENT_NAME),
			Some("Anonymized2")
		);
	}

	#[test]
	fn keep_private_tags_flag_is_honoured() {
		let context = test_context();
		let id = store_instance(&context, "1.2.3.4", "1.2.3.4.5", "1");

		// Cover the instance with a private tag first
		let original = context.open_instance(&id).unwrap();
		let mut data = (*original).clone().into_inner();
		data.put(
			dicom::core::DataElement::new(
				Tag(0x0009, 0x0010),
				dicom::core::VR::LO,
				dicom::core::PrimitiveValue::from("vendor"),
			),
		);

		let mut modification = DicomModification::new();
		parse_anonymization_request(
			&mut modification,
			&json!({"KeepPrivateTags": null}),
			&context,
		)
		.unwrap();
		modification.apply(&mut data).unwrap();

		assert!(data.get(Tag(0x0009, 0x0010)).is_some());
	}

	#[test]
	fn modify_series_reingests_and_records_parentage() {
		let context = test_context();
		let first = store_instance(&context, "1.2.3.4", "1.2.3.4.5", "1");
		let _second = store_instance(&context, "1.2.3.4", "1.2.3.4.6", "2");

		let original_series = DicomSummary::from_object(&context.open_instance(&first).unwrap())
			.hasher()
			.hash_series();
		let original_patient = DicomSummary::from_object(&context.open_instance(&first).unwrap())
			.hasher()
			.hash_patient();

		let mut modification = DicomModification::new();
		modification.set_level(ResourceType::Series);
		parse_modify_request(
			&mut modification,
			&json!({"Replace": {"SeriesDescription": "new"}}),
		)
		.unwrap();

		let result = anonymize_or_modify_resource(
			&context,
			modification,
			MetadataType::ModifiedFrom,
			ChangeType::ModifiedSeries,
			ResourceType::Series,
			&original_series,
		)
		.unwrap();

		assert_eq!(result["Type"], "Series");
		let new_series = result["ID"].as_str().unwrap();
		assert_ne!(new_series, original_series);
		// The patient did not change
		assert_eq!(result["PatientID"], original_patient.as_str());

		// Both children were re-stored under the new series
		let descriptor = context
			.index()
			.lookup_resource(new_series, ResourceType::Series)
			.unwrap();
		assert_eq!(descriptor["Instances"].as_array().unwrap().len(), 2);
		assert_eq!(descriptor["MainDicomTags"]["SeriesDescription"], "new");

		// Parentage metadata points back to the original series
		assert_eq!(
			context
				.index()
				.get_metadata(new_series, MetadataType::ModifiedFrom)
				.unwrap()
				.as_deref(),
			Some(original_series.as_str())
		);

		// The original series is still present until explicitly deleted
		assert!(context
			.index()
			.lookup_resource(&original_series, ResourceType::Series)
			.is_ok());

		// The modification is visible in the change feed
		let changes = context.index().get_changes(0, 100).unwrap();
		assert!(changes["Changes"]
			.as_array()
			.unwrap()
			.iter()
			.any(|change| change["ChangeType"] == "ModifiedSeries"
				&& change["ID"] == new_series));
	}

	#[test]
	fn modify_resource_rejects_identifier_replacements() {
		let mut modification = DicomModification::new();
		let outcome = parse_modify_request(
			&mut modification,
			&json!({"Replace": {"StudyInstanceUID": "9.9"}}),
		);
		assert!(outcome.is_err());
	}

	#[test]
	fn malformed_requests_are_bad_requests() {
		let mut modification = DicomModification::new();
		assert!(parse_modify_request(&mut modification, &json!([1, 2])).is_err());
		assert!(parse_modify_request(&mut modification, &json!({"Remove": "PatientName"})).is_err());
		assert!(
			parse_modify_request(&mut modification, &json!({"Replace": {"NoSuchTag": "x"}}))
				.is_err()
		);
	}
}
