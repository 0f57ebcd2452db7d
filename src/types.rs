use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The four levels of the DICOM resource hierarchy, ordered from the root
/// down. The discriminants are persisted in the `resources` table, so they
/// must never change.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceType {
	Patient = 0,
	Study = 1,
	Series = 2,
	Instance = 3,
}

impl ResourceType {
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Patient => "Patient",
			Self::Study => "Study",
			Self::Series => "Series",
			Self::Instance => "Instance",
		}
	}

	/// The URI segment under which resources of this type are exposed.
	pub const fn uri_segment(&self) -> &'static str {
		match self {
			Self::Patient => "patients",
			Self::Study => "studies",
			Self::Series => "series",
			Self::Instance => "instances",
		}
	}

	pub const fn child(&self) -> Option<Self> {
		match self {
			Self::Patient => Some(Self::Study),
			Self::Study => Some(Self::Series),
			Self::Series => Some(Self::Instance),
			Self::Instance => None,
		}
	}

	pub const fn from_db(value: i64) -> Option<Self> {
		match value {
			0 => Some(Self::Patient),
			1 => Some(Self::Study),
			2 => Some(Self::Series),
			3 => Some(Self::Instance),
			_ => None,
		}
	}
}

impl Display for ResourceType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceType {
	type Err = ();

	/// Parses the plural URI segment ("patients", "studies", ...).
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"patients" => Ok(Self::Patient),
			"studies" => Ok(Self::Study),
			"series" => Ok(Self::Series),
			"instances" => Ok(Self::Instance),
			_ => Err(()),
		}
	}
}

/// REST path of a resource, e.g. `/series/<id>`.
pub fn base_path(resource_type: ResourceType, public_id: &str) -> String {
	format!("/{}/{}", resource_type.uri_segment(), public_id)
}

/// Completion state of a series, derived from the expected number of
/// instances and the indexes of the received children.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SeriesStatus {
	/// All the expected instances have been received.
	Complete,
	/// Some instances are still expected.
	Missing,
	/// An instance index is duplicated or out of range.
	Inconsistent,
	/// The expected count or an instance index is absent or non-numeric.
	Unknown,
}

impl SeriesStatus {
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Complete => "Complete",
			Self::Missing => "Missing",
			Self::Inconsistent => "Inconsistent",
			Self::Unknown => "Unknown",
		}
	}
}

impl Display for SeriesStatus {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome of an ingest request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StoreStatus {
	Success,
	AlreadyStored,
	Failure,
}

impl StoreStatus {
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::Success => "Success",
			Self::AlreadyStored => "AlreadyStored",
			Self::Failure => "Failure",
		}
	}
}

/// State transitions recorded in the change feed. Persisted discriminants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ChangeType {
	CompletedSeries = 1,
	Deleted = 2,
	NewInstance = 3,
	NewPatient = 4,
	NewSeries = 5,
	NewStudy = 6,
	ModifiedSeries = 7,
	ModifiedStudy = 8,
	ModifiedPatient = 9,
}

impl ChangeType {
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::CompletedSeries => "CompletedSeries",
			Self::Deleted => "Deleted",
			Self::NewInstance => "NewInstance",
			Self::NewPatient => "NewPatient",
			Self::NewSeries => "NewSeries",
			Self::NewStudy => "NewStudy",
			Self::ModifiedSeries => "ModifiedSeries",
			Self::ModifiedStudy => "ModifiedStudy",
			Self::ModifiedPatient => "ModifiedPatient",
		}
	}

	pub const fn from_db(value: i64) -> Option<Self> {
		match value {
			1 => Some(Self::CompletedSeries),
			2 => Some(Self::Deleted),
			3 => Some(Self::NewInstance),
			4 => Some(Self::NewPatient),
			5 => Some(Self::NewSeries),
			6 => Some(Self::NewStudy),
			7 => Some(Self::ModifiedSeries),
			8 => Some(Self::ModifiedStudy),
			9 => Some(Self::ModifiedPatient),
			_ => None,
		}
	}

	/// The change recorded when a resource of the given type is created.
	pub const fn new_resource(resource_type: ResourceType) -> Self {
		match resource_type {
			ResourceType::Patient => Self::NewPatient,
			ResourceType::Study => Self::NewStudy,
			ResourceType::Series => Self::NewSeries,
			ResourceType::Instance => Self::NewInstance,
		}
	}
}

impl Display for ChangeType {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Typed keys of the per-resource metadata map. Persisted discriminants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MetadataType {
	InstanceIndexInSeries = 1,
	InstanceReceptionDate = 2,
	InstanceRemoteAet = 3,
	SeriesExpectedNumberOfInstances = 4,
	ModifiedFrom = 5,
	AnonymizedFrom = 6,
}

/// Typed keys of the scalar global property store. Persisted discriminants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum GlobalProperty {
	DatabaseSchemaVersion = 1,
	FlushSleep = 2,
	AnonymizationSequence = 3,
}

/// Kinds of blobs that can be attached to an instance. Persisted
/// discriminants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileContentType {
	Dicom = 1,
	DicomAsJson = 2,
}

impl FileContentType {
	pub const fn from_db(value: i64) -> Option<Self> {
		match value {
			1 => Some(Self::Dicom),
			2 => Some(Self::DicomAsJson),
			_ => None,
		}
	}
}

/// Compression applied to an attachment in the file area. Persisted
/// discriminants. Only `None` is currently written; the column exists so
/// that compressed areas remain readable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompressionType {
	None = 1,
	Zlib = 2,
}

impl CompressionType {
	pub const fn from_db(value: i64) -> Option<Self> {
		match value {
			1 => Some(Self::None),
			2 => Some(Self::Zlib),
			_ => None,
		}
	}
}

/// Description of one attachment, as recorded in the metadata index. The
/// `uuid` references a blob owned by the file storage area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
	pub uuid: String,
	pub content_type: FileContentType,
	pub uncompressed_size: u64,
	pub compressed_size: u64,
	pub compression_type: CompressionType,
}

impl FileInfo {
	/// An uncompressed attachment: both sizes are the blob size.
	pub fn uncompressed(uuid: String, content_type: FileContentType, size: u64) -> Self {
		Self {
			uuid,
			content_type,
			uncompressed_size: size,
			compressed_size: size,
			compression_type: CompressionType::None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn resource_type_ordering_follows_hierarchy() {
		assert!(ResourceType::Patient < ResourceType::Study);
		assert!(ResourceType::Study < ResourceType::Series);
		assert!(ResourceType::Series < ResourceType::Instance);
	}

	#[test]
	fn uri_segments_round_trip() {
		for resource_type in [
			ResourceType::Patient,
			ResourceType::Study,
			ResourceType::Series,
			ResourceType::Instance,
		] {
			assert_eq!(
				resource_type.uri_segment().parse::<ResourceType>(),
				Ok(resource_type)
			);
		}
		assert!("attachments".parse::<ResourceType>().is_err());
	}

	#[test]
	fn persisted_discriminants_round_trip() {
		assert_eq!(
			ResourceType::from_db(ResourceType::Series as i64),
			Some(ResourceType::Series)
		);
		assert_eq!(
			ChangeType::from_db(ChangeType::NewInstance as i64),
			Some(ChangeType::NewInstance)
		);
		assert_eq!(FileContentType::from_db(1), Some(FileContentType::Dicom));
		assert_eq!(CompressionType::from_db(1), Some(CompressionType::None));
		assert_eq!(ChangeType::from_db(0), None);
	}
}
