//! Helpers over the `dicom` toolkit: tag-name resolution, UID generation,
//! the per-level main-tag projections, and construction of fresh instances.

pub mod modification;

use std::collections::BTreeMap;

use dicom::core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::{tags, uids, StandardDataDictionary};
use dicom::object::mem::InMemElement;
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use uuid::Uuid;

use crate::error::ApiError;
use crate::hasher::InstanceHasher;
use crate::types::ResourceType;

/// A parsed DICOM instance, including its file meta table.
pub type DicomObject = FileDicomObject<InMemDicomObject>;

/// Main tags indexed at the patient level.
pub const PATIENT_MAIN_TAGS: &[Tag] = &[
	tags::PATIENT_NAME,
	tags::PATIENT_ID,
	tags::PATIENT_BIRTH_DATE,
	tags::PATIENT_SEX,
];

/// Main tags indexed at the study level.
pub const STUDY_MAIN_TAGS: &[Tag] = &[
	tags::STUDY_DATE,
	tags::STUDY_TIME,
	tags::STUDY_ID,
	tags::STUDY_DESCRIPTION,
	tags::ACCESSION_NUMBER,
	tags::REFERRING_PHYSICIAN_NAME,
	tags::STUDY_INSTANCE_UID,
];

/// Main tags indexed at the series level.
pub const SERIES_MAIN_TAGS: &[Tag] = &[
	tags::SERIES_DATE,
	tags::SERIES_TIME,
	tags::MODALITY,
	tags::MANUFACTURER,
	tags::STATION_NAME,
	tags::SERIES_DESCRIPTION,
	tags::BODY_PART_EXAMINED,
	tags::SEQUENCE_NAME,
	tags::PROTOCOL_NAME,
	tags::SERIES_NUMBER,
	tags::CARDIAC_NUMBER_OF_IMAGES,
	tags::IMAGES_IN_ACQUISITION,
	tags::NUMBER_OF_TEMPORAL_POSITIONS,
	tags::NUMBER_OF_SLICES,
	tags::SERIES_INSTANCE_UID,
];

/// Main tags indexed at the instance level.
pub const INSTANCE_MAIN_TAGS: &[Tag] = &[
	tags::INSTANCE_CREATION_DATE,
	tags::INSTANCE_CREATION_TIME,
	tags::ACQUISITION_NUMBER,
	tags::INSTANCE_NUMBER,
	tags::IMAGE_INDEX,
	tags::NUMBER_OF_FRAMES,
	tags::TEMPORAL_POSITION_IDENTIFIER,
	tags::SOP_INSTANCE_UID,
];

pub const fn main_tags(level: ResourceType) -> &'static [Tag] {
	match level {
		ResourceType::Patient => PATIENT_MAIN_TAGS,
		ResourceType::Study => STUDY_MAIN_TAGS,
		ResourceType::Series => SERIES_MAIN_TAGS,
		ResourceType::Instance => INSTANCE_MAIN_TAGS,
	}
}

/// Resolves a tag name as accepted by the REST API: a dictionary keyword
/// (`PatientName`), the canonical `GGGG-EEEE` form, or the standard
/// `GGGG,EEEE`/`(GGGG,EEEE)` expressions.
pub fn parse_tag(name: &str) -> Result<Tag, ApiError> {
	let expr = match name.split_once('-') {
		Some((group, element))
			if group.len() == 4
				&& element.len() == 4
				&& group.chars().all(|c| c.is_ascii_hexdigit())
				&& element.chars().all(|c| c.is_ascii_hexdigit()) =>
		{
			format!("{group},{element}")
		}
		_ => name.to_owned(),
	};

	StandardDataDictionary
		.by_expr(&expr)
		.map(|entry| entry.tag())
		.ok_or_else(|| ApiError::BadRequest(format!("unknown DICOM tag: {name}")))
}

/// The dictionary keyword of a tag, falling back to `GGGG,EEEE`.
pub fn tag_alias(tag: Tag) -> String {
	StandardDataDictionary
		.by_tag(tag)
		.map(|entry| entry.alias.to_owned())
		.unwrap_or_else(|| format!("{:04x},{:04x}", tag.group(), tag.element()))
}

/// Generates a unique identifier in the UUID-derived `2.25` root
/// (ITU-T X.667).
pub fn generate_uid() -> String {
	format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Builds an element for `tag` carrying a string value coerced to the
/// dictionary VR. Unknown tags are stored as LO.
pub fn string_element(tag: Tag, value: &str) -> Result<InMemElement, ApiError> {
	let vr = StandardDataDictionary
		.by_tag(tag)
		.map(|entry| entry.vr.relaxed())
		.unwrap_or(VR::LO);

	let primitive = if value.is_empty() {
		PrimitiveValue::Empty
	} else {
		match vr {
			VR::US => PrimitiveValue::from(value.parse::<u16>().map_err(|_| {
				ApiError::BadRequest(format!("tag {tag} expects an unsigned short, got `{value}`"))
			})?),
			VR::UL => PrimitiveValue::from(value.parse::<u32>().map_err(|_| {
				ApiError::BadRequest(format!("tag {tag} expects an unsigned long, got `{value}`"))
			})?),
			VR::SS => PrimitiveValue::from(value.parse::<i16>().map_err(|_| {
				ApiError::BadRequest(format!("tag {tag} expects a signed short, got `{value}`"))
			})?),
			VR::SL => PrimitiveValue::from(value.parse::<i32>().map_err(|_| {
				ApiError::BadRequest(format!("tag {tag} expects a signed long, got `{value}`"))
			})?),
			VR::FL => PrimitiveValue::from(value.parse::<f32>().map_err(|_| {
				ApiError::BadRequest(format!("tag {tag} expects a float, got `{value}`"))
			})?),
			VR::FD => PrimitiveValue::from(value.parse::<f64>().map_err(|_| {
				ApiError::BadRequest(format!("tag {tag} expects a double, got `{value}`"))
			})?),
			_ => PrimitiveValue::from(value),
		}
	};

	Ok(DataElement::new(tag, vr, primitive))
}

/// Reads a data-set element as a trimmed string, if present and non-empty.
pub fn element_str(object: &InMemDicomObject, tag: Tag) -> Option<String> {
	object
		.get(tag)
		.and_then(|element| element.to_str().ok())
		.map(|value| value.trim_end_matches([' ', '\0']).to_owned())
		.filter(|value| !value.is_empty())
}

/// Flat snapshot of the tags the index needs from one instance: the four
/// per-level projections plus the identifier tags.
#[derive(Debug, Clone, Default)]
pub struct DicomSummary {
	values: BTreeMap<Tag, String>,
}

impl DicomSummary {
	pub fn from_object(object: &InMemDicomObject) -> Self {
		let mut values = BTreeMap::new();
		for level in [
			ResourceType::Patient,
			ResourceType::Study,
			ResourceType::Series,
			ResourceType::Instance,
		] {
			for &tag in main_tags(level) {
				if let Some(value) = element_str(object, tag) {
					values.insert(tag, value);
				}
			}
		}
		Self { values }
	}

	pub fn get(&self, tag: Tag) -> Option<&str> {
		self.values.get(&tag).map(String::as_str)
	}

	/// First present value among `candidates`, in order.
	pub fn first_of(&self, candidates: &[Tag]) -> Option<&str> {
		candidates.iter().find_map(|&tag| self.get(tag))
	}

	/// The main-tag projection for one hierarchy level.
	pub fn project(&self, level: ResourceType) -> Vec<(Tag, String)> {
		main_tags(level)
			.iter()
			.filter_map(|&tag| self.values.get(&tag).map(|value| (tag, value.clone())))
			.collect()
	}

	pub fn hasher(&self) -> InstanceHasher {
		InstanceHasher::new(
			self.get(tags::PATIENT_ID).unwrap_or_default(),
			self.get(tags::STUDY_INSTANCE_UID).unwrap_or_default(),
			self.get(tags::SERIES_INSTANCE_UID).unwrap_or_default(),
			self.get(tags::SOP_INSTANCE_UID).unwrap_or_default(),
		)
	}
}

/// A fresh Secondary Capture data set with generated identifiers, the
/// starting point of `/tools/create-dicom`.
pub fn new_secondary_capture() -> Result<InMemDicomObject, ApiError> {
	let mut object = InMemDicomObject::new_empty();
	object.put(string_element(
		tags::SOP_CLASS_UID,
		uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
	)?);
	object.put(string_element(tags::PATIENT_ID, &Uuid::new_v4().to_string())?);
	object.put(string_element(tags::STUDY_INSTANCE_UID, &generate_uid())?);
	object.put(string_element(tags::SERIES_INSTANCE_UID, &generate_uid())?);
	object.put(string_element(tags::SOP_INSTANCE_UID, &generate_uid())?);
	Ok(object)
}

/// Wraps a data set into a file object with a standard Explicit VR Little
/// Endian meta table, taking the SOP references from the data set itself.
pub fn with_file_meta(data: InMemDicomObject) -> Result<DicomObject, ApiError> {
	let sop_class_uid = element_str(&data, tags::SOP_CLASS_UID)
		.unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.to_owned());
	let sop_instance_uid = element_str(&data, tags::SOP_INSTANCE_UID)
		.ok_or_else(|| ApiError::BadRequest("missing SOPInstanceUID".into()))?;

	let meta = FileMetaTableBuilder::new()
		.media_storage_sop_class_uid(sop_class_uid)
		.media_storage_sop_instance_uid(sop_instance_uid)
		.transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
		.build()
		.map_err(|err| ApiError::Internal(format!("failed to build file meta table: {err}")))?;

	Ok(data.with_exact_meta(meta))
}

/// Serialises a file object (preamble, meta table and data set).
pub fn to_bytes(object: &DicomObject) -> Result<Vec<u8>, ApiError> {
	let mut buffer = Vec::new();
	object
		.write_all(&mut buffer)
		.map_err(|err| ApiError::Internal(format!("failed to serialise DICOM object: {err}")))?;
	Ok(buffer)
}

/// Parses a file object from its serialised form. The 128-byte preamble is
/// skipped when present, so both bare meta-group streams and full files are
/// accepted.
pub fn from_bytes(bytes: &[u8]) -> Result<DicomObject, ApiError> {
	let stream = match bytes.get(128..132) {
		Some(magic) if magic == b"DICM" => &bytes[128..],
		_ => bytes,
	};
	DicomObject::from_reader(stream)
		.map_err(|err| ApiError::BadRequest(format!("failed to parse DICOM object: {err}")))
}

/// Decodes a `data:image/<format>;base64,<payload>` URI and embeds it as
/// uncompressed 8-bit pixel data, setting the image-description attributes
/// accordingly.
pub fn embed_image(object: &mut InMemDicomObject, data_uri: &str) -> Result<(), ApiError> {
	use base64::Engine;

	let payload = data_uri
		.strip_prefix("data:image/")
		.and_then(|rest| rest.split_once(";base64,"))
		.map(|(_, payload)| payload)
		.ok_or_else(|| {
			ApiError::BadRequest("PixelData must be a `data:image/...;base64,...` URI".into())
		})?;

	let encoded = base64::engine::general_purpose::STANDARD
		.decode(payload)
		.map_err(|err| ApiError::BadRequest(format!("invalid base64 pixel data: {err}")))?;

	let decoded = image::load_from_memory(&encoded)
		.map_err(|err| ApiError::BadRequest(format!("unsupported image format: {err}")))?;

	let (width, height, samples_per_pixel, photometric, pixels) = match decoded {
		image::DynamicImage::ImageLuma8(gray) => {
			let (w, h) = (gray.width(), gray.height());
			(w, h, 1u16, "MONOCHROME2", gray.into_raw())
		}
		other => {
			let rgb = other.to_rgb8();
			let (w, h) = (rgb.width(), rgb.height());
			(w, h, 3u16, "RGB", rgb.into_raw())
		}
	};

	let rows = u16::try_from(height)
		.map_err(|_| ApiError::ParameterOutOfRange("image height exceeds 65535".into()))?;
	let columns = u16::try_from(width)
		.map_err(|_| ApiError::ParameterOutOfRange("image width exceeds 65535".into()))?;

	object.put(DataElement::new(
		tags::SAMPLES_PER_PIXEL,
		VR::US,
		PrimitiveValue::from(samples_per_pixel),
	));
	object.put(DataElement::new(
		tags::PHOTOMETRIC_INTERPRETATION,
		VR::CS,
		PrimitiveValue::from(photometric),
	));
	if samples_per_pixel == 3 {
		object.put(DataElement::new(
			tags::PLANAR_CONFIGURATION,
			VR::US,
			PrimitiveValue::from(0_u16),
		));
	}
	object.put(DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)));
	object.put(DataElement::new(
		tags::COLUMNS,
		VR::US,
		PrimitiveValue::from(columns),
	));
	object.put(DataElement::new(
		tags::BITS_ALLOCATED,
		VR::US,
		PrimitiveValue::from(8_u16),
	));
	object.put(DataElement::new(
		tags::BITS_STORED,
		VR::US,
		PrimitiveValue::from(8_u16),
	));
	object.put(DataElement::new(
		tags::HIGH_BIT,
		VR::US,
		PrimitiveValue::from(7_u16),
	));
	object.put(DataElement::new(
		tags::PIXEL_REPRESENTATION,
		VR::US,
		PrimitiveValue::from(0_u16),
	));
	object.put(DataElement::new(
		tags::PIXEL_DATA,
		VR::OB,
		PrimitiveValue::U8(pixels.into()),
	));

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_tag_accepts_keyword_and_numeric_forms() {
		assert_eq!(parse_tag("PatientName").unwrap(), tags::PATIENT_NAME);
		assert_eq!(parse_tag("0010-0020").unwrap(), tags::PATIENT_ID);
		assert_eq!(parse_tag("0020,000D").unwrap(), tags::STUDY_INSTANCE_UID);
		assert!(parse_tag("NotATagName").is_err());
	}

	#[test]
	fn summary_projects_per_level() {
		let mut object = InMemDicomObject::new_empty();
		object.put(string_element(tags::PATIENT_ID, "P1").unwrap());
		object.put(string_element(tags::PATIENT_NAME, "DOE^JOHN").unwrap());
		object.put(string_element(tags::STUDY_INSTANCE_UID, "1.2.3").unwrap());
		object.put(string_element(tags::SERIES_INSTANCE_UID, "1.2.3.4").unwrap());
		object.put(string_element(tags::SOP_INSTANCE_UID, "1.2.3.4.5").unwrap());
		object.put(string_element(tags::SERIES_DESCRIPTION, "T1 axial").unwrap());

		let summary = DicomSummary::from_object(&object);

		let patient = summary.project(ResourceType::Patient);
		assert!(patient.contains(&(tags::PATIENT_ID, "P1".to_owned())));
		assert!(patient.contains(&(tags::PATIENT_NAME, "DOE^JOHN".to_owned())));
		assert_eq!(patient.len(), 2);

		let series = summary.project(ResourceType::Series);
		assert!(series.contains(&(tags::SERIES_DESCRIPTION, "T1 axial".to_owned())));
		assert!(!series.iter().any(|(tag, _)| *tag == tags::PATIENT_ID));
	}

	#[test]
	fn summary_hasher_matches_direct_hashing() {
		let mut object = InMemDicomObject::new_empty();
		object.put(string_element(tags::PATIENT_ID, "P1").unwrap());
		object.put(string_element(tags::STUDY_INSTANCE_UID, "S1").unwrap());
		object.put(string_element(tags::SERIES_INSTANCE_UID, "Se1").unwrap());
		object.put(string_element(tags::SOP_INSTANCE_UID, "I1").unwrap());

		let summary = DicomSummary::from_object(&object);
		let expected = InstanceHasher::new("P1", "S1", "Se1", "I1");
		assert_eq!(summary.hasher().hash_instance(), expected.hash_instance());
	}

	#[test]
	fn generated_uids_are_unique_and_rooted() {
		let a = generate_uid();
		let b = generate_uid();
		assert_ne!(a, b);
		assert!(a.starts_with("2.25."));
		assert!(a.len() <= 64);
	}

	#[test]
	fn secondary_capture_has_generated_identifiers() {
		let object = new_secondary_capture().unwrap();
		assert!(element_str(&object, tags::PATIENT_ID).is_some());
		assert!(element_str(&object, tags::STUDY_INSTANCE_UID).is_some());
		assert!(element_str(&object, tags::SERIES_INSTANCE_UID).is_some());
		assert!(element_str(&object, tags::SOP_INSTANCE_UID).is_some());
		assert_eq!(
			element_str(&object, tags::SOP_CLASS_UID).as_deref(),
			Some(uids::SECONDARY_CAPTURE_IMAGE_STORAGE)
		);
	}

	#[test]
	fn file_round_trip_preserves_tags() {
		let mut object = new_secondary_capture().unwrap();
		object.put(string_element(tags::PATIENT_NAME, "ROUND^TRIP").unwrap());

		let file = with_file_meta(object).unwrap();
		let bytes = to_bytes(&file).unwrap();
		let reparsed = from_bytes(&bytes).unwrap();

		assert_eq!(
			element_str(&reparsed, tags::PATIENT_NAME).as_deref(),
			Some("ROUND^TRIP")
		);
	}

	#[test]
	fn embed_image_rejects_malformed_uri() {
		let mut object = InMemDicomObject::new_empty();
		assert!(embed_image(&mut object, "not-a-data-uri").is_err());
		assert!(embed_image(&mut object, "data:image/png;base64,!!!").is_err());
	}
}
