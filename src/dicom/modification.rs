//! Declarative rewriting of DICOM data sets: Keep/Remove/Replace operations
//! with identifier-propagation rules and an anonymization preset following
//! the PS 3.15 Basic Application Level Confidentiality Profile.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dicom::core::header::Header;
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::InMemDicomObject;
use uuid::Uuid;

use crate::dicom::{element_str, generate_uid, string_element};
use crate::error::ApiError;
use crate::types::ResourceType;

/// Attributes removed by the anonymization preset. Identifier UIDs are not
/// listed here; they are regenerated during [`DicomModification::apply`].
const BASIC_PROFILE_REMOVALS: &[Tag] = &[
	tags::INSTANCE_CREATOR_UID,
	tags::ACCESSION_NUMBER,
	tags::INSTITUTION_NAME,
	tags::INSTITUTION_ADDRESS,
	tags::REFERRING_PHYSICIAN_NAME,
	tags::REFERRING_PHYSICIAN_ADDRESS,
	tags::REFERRING_PHYSICIAN_TELEPHONE_NUMBERS,
	tags::STATION_NAME,
	tags::STUDY_DESCRIPTION,
	tags::SERIES_DESCRIPTION,
	tags::INSTITUTIONAL_DEPARTMENT_NAME,
	tags::PHYSICIANS_OF_RECORD,
	tags::PERFORMING_PHYSICIAN_NAME,
	tags::NAME_OF_PHYSICIANS_READING_STUDY,
	tags::OPERATORS_NAME,
	tags::ADMITTING_DIAGNOSES_DESCRIPTION,
	tags::REFERENCED_SOP_INSTANCE_UID,
	tags::DERIVATION_DESCRIPTION,
	tags::PATIENT_BIRTH_DATE,
	tags::PATIENT_BIRTH_TIME,
	tags::PATIENT_SEX,
	Tag(0x0010, 0x1000), // OtherPatientIDs
	tags::OTHER_PATIENT_NAMES,
	tags::PATIENT_AGE,
	tags::PATIENT_SIZE,
	tags::PATIENT_WEIGHT,
	tags::MEDICAL_RECORD_LOCATOR,
	tags::ETHNIC_GROUP,
	tags::OCCUPATION,
	tags::ADDITIONAL_PATIENT_HISTORY,
	tags::PATIENT_COMMENTS,
	tags::DEVICE_SERIAL_NUMBER,
	tags::PROTOCOL_NAME,
	tags::STUDY_ID,
	tags::FRAME_OF_REFERENCE_UID,
	tags::SYNCHRONIZATION_FRAME_OF_REFERENCE_UID,
	tags::IMAGE_COMMENTS,
	tags::REQUEST_ATTRIBUTES_SEQUENCE,
	Tag(0x0040, 0xA124), // UID
	tags::CONTENT_SEQUENCE,
	tags::STORAGE_MEDIA_FILE_SET_UID,
	Tag(0x3006, 0x0024), // ReferencedFrameOfReferenceUID
	Tag(0x3006, 0x00C2), // RelatedFrameOfReferenceUID
];

/// The hierarchy level identified by a DICOM identifier tag.
fn identifier_level(tag: Tag) -> Option<ResourceType> {
	match tag {
		tags::PATIENT_ID => Some(ResourceType::Patient),
		tags::STUDY_INSTANCE_UID => Some(ResourceType::Study),
		tags::SERIES_INSTANCE_UID => Some(ResourceType::Series),
		tags::SOP_INSTANCE_UID => Some(ResourceType::Instance),
		_ => None,
	}
}

const fn identifier_tag(level: ResourceType) -> Tag {
	match level {
		ResourceType::Patient => tags::PATIENT_ID,
		ResourceType::Study => tags::STUDY_INSTANCE_UID,
		ResourceType::Series => tags::SERIES_INSTANCE_UID,
		ResourceType::Instance => tags::SOP_INSTANCE_UID,
	}
}

/// A reusable set of tag operations applied to parsed DICOM data sets.
///
/// One engine is meant to be applied to every instance of the target
/// resource: regenerated identifier UIDs are memoised per original value,
/// so sibling instances are mapped onto the same new series/study.
#[derive(Debug, Default)]
pub struct DicomModification {
	replacements: BTreeMap<Tag, String>,
	removals: BTreeSet<Tag>,
	keeps: BTreeSet<Tag>,
	remove_private_tags: bool,
	level: Option<ResourceType>,
	allow_manual_identifiers: bool,
	uid_map: HashMap<(ResourceType, String), String>,
}

impl DicomModification {
	pub fn new() -> Self {
		Self::default()
	}

	/// The level at which the operation is authorised. Defaults to
	/// Instance when never set.
	pub fn level(&self) -> ResourceType {
		self.level.unwrap_or(ResourceType::Instance)
	}

	pub fn set_level(&mut self, level: ResourceType) {
		self.level = Some(level);
	}

	pub fn set_remove_private_tags(&mut self, remove: bool) {
		self.remove_private_tags = remove;
	}

	pub fn set_allow_manual_identifiers(&mut self, allow: bool) {
		self.allow_manual_identifiers = allow;
	}

	/// Exempts a tag from the automatic clearing of the anonymization
	/// preset, as well as from any pending removal or replacement.
	pub fn keep(&mut self, tag: Tag) {
		self.removals.remove(&tag);
		self.replacements.remove(&tag);
		self.keeps.insert(tag);
	}

	pub fn remove(&mut self, tag: Tag) {
		self.replacements.remove(&tag);
		self.keeps.remove(&tag);
		self.removals.insert(tag);
	}

	/// Schedules a replacement. A DICOM identifier above the authorised
	/// level cannot be replaced unless `allow_manual_identifiers` is set
	/// (or `force`, used by the presets): handing out an ancestor
	/// identifier from below breaks the hierarchy hashing.
	pub fn replace(&mut self, tag: Tag, value: String, force: bool) -> Result<(), ApiError> {
		if !force && !self.allow_manual_identifiers {
			if let Some(identifier) = identifier_level(tag) {
				if identifier < self.level() {
					return Err(ApiError::BadRequest(format!(
						"replacing {} is not authorised at the {} level",
						super::tag_alias(tag),
						self.level()
					)));
				}
			}
		}

		self.removals.remove(&tag);
		self.keeps.remove(&tag);
		self.replacements.insert(tag, value);
		Ok(())
	}

	pub fn is_replaced(&self, tag: Tag) -> bool {
		self.replacements.contains_key(&tag)
	}

	pub fn replacement(&self, tag: Tag) -> Option<&str> {
		self.replacements.get(&tag).map(String::as_str)
	}

	/// Installs the anonymization preset: clear the identifying attributes
	/// of the Basic Profile, randomise the patient identity, strip private
	/// tags, and authorise the operation at the patient level. Identifier
	/// UIDs are regenerated on apply.
	pub fn setup_anonymization(&mut self) {
		self.replacements.clear();
		self.removals.clear();
		self.keeps.clear();
		self.uid_map.clear();
		self.remove_private_tags = true;
		self.level = Some(ResourceType::Patient);

		for &tag in BASIC_PROFILE_REMOVALS {
			self.removals.insert(tag);
		}

		self.replacements
			.insert(tags::PATIENT_NAME, Uuid::new_v4().to_string());
		self.replacements
			.insert(tags::PATIENT_ID, Uuid::new_v4().to_string());
	}

	/// Rewrites one data set in place.
	pub fn apply(&mut self, object: &mut InMemDicomObject) -> Result<(), ApiError> {
		let level = self.level();

		if level == ResourceType::Patient && !self.is_replaced(tags::PATIENT_ID) {
			return Err(ApiError::BadRequest(
				"a patient-level modification must replace PatientID".into(),
			));
		}

		// (1) Strip the private tags
		if self.remove_private_tags {
			let private: Vec<Tag> = object
				.iter()
				.map(|element| element.tag())
				.filter(|tag| tag.group() % 2 == 1 && !self.keeps.contains(tag))
				.collect();
			for tag in private {
				object.remove_element(tag);
			}
		}

		// (2) Apply the removals
		for &tag in &self.removals {
			if !self.keeps.contains(&tag) {
				object.remove_element(tag);
			}
		}

		// (3) Apply the replacements
		for (&tag, value) in &self.replacements {
			object.put(string_element(tag, value)?);
		}

		// (4) Regenerate the identifier UIDs down from the authorised level
		if level <= ResourceType::Study && !self.is_replaced(tags::STUDY_INSTANCE_UID) {
			self.map_identifier(object, ResourceType::Study)?;
		}
		if level <= ResourceType::Series && !self.is_replaced(tags::SERIES_INSTANCE_UID) {
			self.map_identifier(object, ResourceType::Series)?;
		}
		if !self.is_replaced(tags::SOP_INSTANCE_UID) {
			self.map_identifier(object, ResourceType::Instance)?;
		}

		Ok(())
	}

	/// Replaces the identifier UID of `level` by its mapped value,
	/// generating the mapping on first sight of the original.
	fn map_identifier(
		&mut self,
		object: &mut InMemDicomObject,
		level: ResourceType,
	) -> Result<(), ApiError> {
		let tag = identifier_tag(level);
		let original = element_str(object, tag).unwrap_or_default();
		let mapped = self
			.uid_map
			.entry((level, original))
			.or_insert_with(generate_uid)
			.clone();
		object.put(string_element(tag, &mapped)?);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dicom::DicomSummary;
	use dicom::core::{DataElement, PrimitiveValue, VR};

	fn sample_instance() -> InMemDicomObject {
		let mut object = InMemDicomObject::new_empty();
		for (tag, value) in [
			(tags::PATIENT_NAME, "DOE^JANE"),
			(tags::PATIENT_ID, "P1"),
			(tags::PATIENT_BIRTH_DATE, "19700101"),
			(tags::STUDY_INSTANCE_UID, "1.2.3"),
			(tags::SERIES_INSTANCE_UID, "1.2.3.4"),
			(tags::SOP_INSTANCE_UID, "1.2.3.4.5"),
			(tags::STUDY_DESCRIPTION, "Brain MRI"),
			(tags::SERIES_DESCRIPTION, "T1 axial"),
		] {
			object.put(string_element(tag, value).unwrap());
		}
		// A private element, as vendors insert them
		object.put(DataElement::new(
			Tag(0x0009, 0x0010),
			VR::LO,
			PrimitiveValue::from("ACME secret"),
		));
		object
	}

	#[test]
	fn anonymization_scrubs_identity_and_private_tags() {
		let mut object = sample_instance();
		let mut modification = DicomModification::new();
		modification.setup_anonymization();
		modification.keep(tags::STUDY_DESCRIPTION);
		modification.apply(&mut object).unwrap();

		assert_ne!(element_str(&object, tags::PATIENT_NAME).as_deref(), Some("DOE^JANE"));
		assert_ne!(element_str(&object, tags::PATIENT_ID).as_deref(), Some("P1"));
		assert_eq!(element_str(&object, tags::PATIENT_BIRTH_DATE), None);
		assert_eq!(element_str(&object, tags::SERIES_DESCRIPTION), None);
		assert_eq!(
			element_str(&object, tags::STUDY_DESCRIPTION).as_deref(),
			Some("Brain MRI")
		);
		assert!(object.get(Tag(0x0009, 0x0010)).is_none());

		assert_ne!(element_str(&object, tags::STUDY_INSTANCE_UID).as_deref(), Some("1.2.3"));
		assert_ne!(
			element_str(&object, tags::SERIES_INSTANCE_UID).as_deref(),
			Some("1.2.3.4")
		);
		assert_ne!(
			element_str(&object, tags::SOP_INSTANCE_UID).as_deref(),
			Some("1.2.3.4.5")
		);
	}

	#[test]
	fn kept_private_tag_survives_anonymization() {
		let mut object = sample_instance();
		let mut modification = DicomModification::new();
		modification.setup_anonymization();
		modification.keep(Tag(0x0009, 0x0010));
		modification.apply(&mut object).unwrap();

		assert!(object.get(Tag(0x0009, 0x0010)).is_some());
	}

	#[test]
	fn instance_level_change_leaves_ancestors_alone() {
		let mut object = sample_instance();
		let before = DicomSummary::from_object(&object).hasher();

		let mut modification = DicomModification::new();
		modification.set_level(ResourceType::Instance);
		modification
			.replace(tags::SERIES_DESCRIPTION, "redacted".into(), false)
			.unwrap();
		modification.apply(&mut object).unwrap();

		let after = DicomSummary::from_object(&object).hasher();
		assert_eq!(before.hash_patient(), after.hash_patient());
		assert_eq!(before.hash_study(), after.hash_study());
		assert_eq!(before.hash_series(), after.hash_series());
		assert_ne!(before.hash_instance(), after.hash_instance());
	}

	#[test]
	fn series_level_change_regenerates_series_and_instance() {
		let mut object = sample_instance();
		let before = DicomSummary::from_object(&object).hasher();

		let mut modification = DicomModification::new();
		modification.set_level(ResourceType::Series);
		modification
			.replace(tags::SERIES_DESCRIPTION, "new description".into(), false)
			.unwrap();
		modification.apply(&mut object).unwrap();

		let after = DicomSummary::from_object(&object).hasher();
		assert_eq!(before.hash_patient(), after.hash_patient());
		assert_eq!(before.hash_study(), after.hash_study());
		assert_ne!(before.hash_series(), after.hash_series());
		assert_ne!(before.hash_instance(), after.hash_instance());
	}

	#[test]
	fn siblings_map_onto_the_same_new_series() {
		let mut first = sample_instance();
		let mut second = sample_instance();
		second.put(string_element(tags::SOP_INSTANCE_UID, "1.2.3.4.6").unwrap());

		let mut modification = DicomModification::new();
		modification.set_level(ResourceType::Series);
		modification.apply(&mut first).unwrap();
		modification.apply(&mut second).unwrap();

		assert_eq!(
			element_str(&first, tags::SERIES_INSTANCE_UID),
			element_str(&second, tags::SERIES_INSTANCE_UID)
		);
		assert_ne!(
			element_str(&first, tags::SOP_INSTANCE_UID),
			element_str(&second, tags::SOP_INSTANCE_UID)
		);
	}

	#[test]
	fn replacing_an_identifier_above_the_level_is_rejected() {
		// An instance-level operation may not hand out ancestor identifiers
		let mut modification = DicomModification::new();
		assert!(modification
			.replace(tags::STUDY_INSTANCE_UID, "9.9.9".into(), false)
			.is_err());

		// ... unless manual identifiers are explicitly authorised
		modification.set_allow_manual_identifiers(true);
		assert!(modification
			.replace(tags::STUDY_INSTANCE_UID, "9.9.9".into(), false)
			.is_ok());

		// A series-level operation may replace its own identifier, but
		// nothing above it
		let mut modification = DicomModification::new();
		modification.set_level(ResourceType::Series);
		assert!(modification
			.replace(tags::SERIES_INSTANCE_UID, "7.7.7".into(), false)
			.is_ok());
		assert!(modification
			.replace(tags::PATIENT_ID, "P9".into(), false)
			.is_err());
	}

	#[test]
	fn patient_level_modification_requires_patient_id() {
		let mut modification = DicomModification::new();
		modification.set_level(ResourceType::Patient);

		let mut object = sample_instance();
		assert!(modification.apply(&mut object).is_err());
	}

	#[test]
	fn explicit_replacement_wins_over_regeneration() {
		let mut modification = DicomModification::new();
		modification.set_allow_manual_identifiers(true);
		modification
			.replace(tags::SOP_INSTANCE_UID, "1.2.840.777".into(), false)
			.unwrap();
		modification.set_level(ResourceType::Instance);

		let mut object = sample_instance();
		modification.apply(&mut object).unwrap();
		assert_eq!(
			element_str(&object, tags::SOP_INSTANCE_UID).as_deref(),
			Some("1.2.840.777")
		);
	}
}
