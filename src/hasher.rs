//! Derivation of the public identifiers of Patient/Study/Series/Instance
//! resources from the identifying DICOM tags.
//!
//! The same tags must always hash to the same public id, across versions:
//! duplicate detection and the whole hierarchy reconstruction rely on it.

use sha1::{Digest, Sha1};

/// Stand-in for an identifier tag that is absent or empty. Hashing the
/// sentinel instead of "" keeps resources with missing identifiers distinct
/// from resources whose identifier is a real empty string at another level.
const EMPTY_SENTINEL: &str = "(null)";

/// Computes the four public identifiers of the hierarchy containing one
/// DICOM instance. Pure; building one performs no hashing until a `hash_*`
/// method is called.
#[derive(Debug, Clone)]
pub struct InstanceHasher {
	patient_id: String,
	study_instance_uid: String,
	series_instance_uid: String,
	sop_instance_uid: String,
}

impl InstanceHasher {
	pub fn new(
		patient_id: &str,
		study_instance_uid: &str,
		series_instance_uid: &str,
		sop_instance_uid: &str,
	) -> Self {
		let sentinel = |value: &str| {
			if value.is_empty() {
				EMPTY_SENTINEL.to_owned()
			} else {
				value.to_owned()
			}
		};

		Self {
			patient_id: sentinel(patient_id),
			study_instance_uid: sentinel(study_instance_uid),
			series_instance_uid: sentinel(series_instance_uid),
			sop_instance_uid: sentinel(sop_instance_uid),
		}
	}

	pub fn hash_patient(&self) -> String {
		hash(&[&self.patient_id])
	}

	pub fn hash_study(&self) -> String {
		hash(&[&self.patient_id, &self.study_instance_uid])
	}

	pub fn hash_series(&self) -> String {
		hash(&[
			&self.patient_id,
			&self.study_instance_uid,
			&self.series_instance_uid,
		])
	}

	pub fn hash_instance(&self) -> String {
		hash(&[
			&self.patient_id,
			&self.study_instance_uid,
			&self.series_instance_uid,
			&self.sop_instance_uid,
		])
	}
}

/// SHA-1 of the `|`-joined identifier list, rendered as five dash-separated
/// groups of eight lowercase hex characters.
fn hash(components: &[&str]) -> String {
	let mut hasher = Sha1::new();
	for (i, component) in components.iter().enumerate() {
		if i > 0 {
			hasher.update(b"|");
		}
		hasher.update(component.as_bytes());
	}

	let hex: String = hasher
		.finalize()
		.iter()
		.map(|byte| format!("{byte:02x}"))
		.collect();

	hex.as_bytes()
		.chunks(8)
		.map(|group| std::str::from_utf8(group).expect("hex is ASCII"))
		.collect::<Vec<_>>()
		.join("-")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample() -> InstanceHasher {
		InstanceHasher::new("P1", "S1", "Se1", "I1")
	}

	#[test]
	fn hashing_is_deterministic() {
		assert_eq!(sample().hash_patient(), sample().hash_patient());
		assert_eq!(sample().hash_study(), sample().hash_study());
		assert_eq!(sample().hash_series(), sample().hash_series());
		assert_eq!(sample().hash_instance(), sample().hash_instance());
	}

	#[test]
	fn levels_produce_distinct_identifiers() {
		let hasher = sample();
		let ids = [
			hasher.hash_patient(),
			hasher.hash_study(),
			hasher.hash_series(),
			hasher.hash_instance(),
		];
		for (i, a) in ids.iter().enumerate() {
			for b in &ids[i + 1..] {
				assert_ne!(a, b);
			}
		}
	}

	#[test]
	fn output_is_grouped_lowercase_hex() {
		let id = sample().hash_instance();
		assert_eq!(id.len(), 44);
		let groups: Vec<&str> = id.split('-').collect();
		assert_eq!(groups.len(), 5);
		for group in groups {
			assert_eq!(group.len(), 8);
			assert!(group.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
		}
	}

	#[test]
	fn empty_identifier_uses_sentinel() {
		let empty = InstanceHasher::new("", "S1", "Se1", "I1");
		let explicit = InstanceHasher::new("(null)", "S1", "Se1", "I1");
		assert_eq!(empty.hash_patient(), explicit.hash_patient());
		assert_ne!(empty.hash_patient(), InstanceHasher::new("P1", "", "", "").hash_patient());
	}

	#[test]
	fn shared_ancestors_hash_alike() {
		let a = InstanceHasher::new("P1", "S1", "Se1", "I1");
		let b = InstanceHasher::new("P1", "S1", "Se2", "I2");
		assert_eq!(a.hash_patient(), b.hash_patient());
		assert_eq!(a.hash_study(), b.hash_study());
		assert_ne!(a.hash_series(), b.hash_series());
		assert_ne!(a.hash_instance(), b.hash_instance());
	}
}
