//! Shared server state: the metadata index, the file area, and a bounded
//! cache of parsed instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;
use uuid::Uuid;

use crate::dicom::{from_bytes, to_bytes, DicomObject, DicomSummary};
use crate::error::ApiError;
use crate::index::{MetadataOverlay, ServerIndex};
use crate::storage::FileStorage;
use crate::types::{FileContentType, FileInfo, StoreStatus};

/// Parsed instances kept around between requests. Eviction is coarse: the
/// cache is emptied once full, which is enough for the per-resource
/// modification loops that drive it.
const DICOM_CACHE_SIZE: usize = 16;

pub struct ServerContext {
	index: Arc<ServerIndex>,
	storage: Arc<dyn FileStorage>,
	cache: Mutex<HashMap<String, Arc<DicomObject>>>,
}

impl ServerContext {
	pub fn new(index: Arc<ServerIndex>, storage: Arc<dyn FileStorage>) -> Arc<Self> {
		Arc::new(Self {
			index,
			storage,
			cache: Mutex::new(HashMap::new()),
		})
	}

	pub fn index(&self) -> &ServerIndex {
		&self.index
	}

	/// Serialises one instance, writes the blob into the file area and
	/// registers it in the index. Returns the store status together with
	/// the public id of the instance.
	pub fn store(
		&self,
		object: &DicomObject,
		remote_aet: &str,
		overlays: &[MetadataOverlay],
	) -> Result<(StoreStatus, String), ApiError> {
		let bytes = to_bytes(object)?;
		let summary = DicomSummary::from_object(object);
		let instance_id = summary.hasher().hash_instance();

		let uuid = Uuid::new_v4().to_string();
		self.storage.create(&uuid, &bytes)?;

		let attachment =
			FileInfo::uncompressed(uuid.clone(), FileContentType::Dicom, bytes.len() as u64);
		let status = self.index.store(&summary, &[attachment], remote_aet, overlays);

		if status != StoreStatus::Success {
			// The index did not take ownership of the blob
			if let Err(err) = self.storage.remove(&uuid) {
				warn!("cannot discard the unregistered blob {uuid}: {err}");
			}
		}

		Ok((status, instance_id))
	}

	/// The parsed DICOM of one instance, from the cache or the file area.
	/// The index is consulted first, so deleted instances stay invisible
	/// whatever the cache holds.
	pub fn open_instance(&self, public_id: &str) -> Result<Arc<DicomObject>, ApiError> {
		let attachment = self
			.index
			.lookup_attachment(public_id, FileContentType::Dicom)?
			.ok_or_else(|| {
				ApiError::Internal(format!("instance {public_id} has no DICOM attachment"))
			})?;

		if let Some(cached) = self.cache.lock().expect("cache lock").get(public_id) {
			return Ok(Arc::clone(cached));
		}

		let bytes = self.storage.read(&attachment.uuid)?;
		let object = Arc::new(from_bytes(&bytes)?);

		let mut cache = self.cache.lock().expect("cache lock");
		if cache.len() >= DICOM_CACHE_SIZE {
			cache.clear();
		}
		cache.insert(public_id.to_owned(), Arc::clone(&object));

		Ok(object)
	}

	/// The raw attachment bytes of one instance.
	pub fn read_attachment(&self, info: &FileInfo) -> Result<Vec<u8>, ApiError> {
		self.storage.read(&info.uuid)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dicom::{new_secondary_capture, string_element, with_file_meta};
	use crate::storage::MemoryStorage;
	use dicom::dictionary_std::tags;

	fn context_with_storage() -> (Arc<ServerContext>, Arc<MemoryStorage>) {
		let storage = Arc::new(MemoryStorage::default());
		let index = ServerIndex::open(":memory:", storage.clone()).unwrap();
		(ServerContext::new(index, storage.clone()), storage)
	}

	fn sample_file() -> DicomObject {
		let mut object = new_secondary_capture().unwrap();
		object.put(string_element(tags::PATIENT_NAME, "CACHE^TEST").unwrap());
		with_file_meta(object).unwrap()
	}

	#[test]
	fn store_writes_one_blob_per_new_instance() {
		let (context, storage) = context_with_storage();
		let file = sample_file();

		let (status, _) = context.store(&file, "", &[]).unwrap();
		assert_eq!(status, StoreStatus::Success);
		assert_eq!(storage.len(), 1);

		// A duplicate does not leak a second blob
		let (status, _) = context.store(&file, "", &[]).unwrap();
		assert_eq!(status, StoreStatus::AlreadyStored);
		assert_eq!(storage.len(), 1);
	}

	#[test]
	fn open_instance_round_trips_and_caches() {
		let (context, _storage) = context_with_storage();
		let file = sample_file();
		let (_, instance_id) = context.store(&file, "", &[]).unwrap();

		let first = context.open_instance(&instance_id).unwrap();
		assert_eq!(
			crate::dicom::element_str(&first, tags::PATIENT_NAME).as_deref(),
			Some("CACHE^TEST")
		);

		let second = context.open_instance(&instance_id).unwrap();
		assert!(Arc::ptr_eq(&first, &second));
	}

	#[test]
	fn open_instance_fails_after_delete() {
		let (context, _storage) = context_with_storage();
		let file = sample_file();
		let (_, instance_id) = context.store(&file, "", &[]).unwrap();

		context.open_instance(&instance_id).unwrap();
		context
			.index()
			.delete_resource(&instance_id, crate::types::ResourceType::Instance)
			.unwrap();

		assert!(context.open_instance(&instance_id).is_err());
	}
}
