//! Content-addressed file area holding the attachment blobs.
//!
//! The metadata index only keeps `FileInfo` records; the bytes live behind
//! this seam, keyed by UUID. Blobs are removed exclusively in response to
//! the index's file-deletion signals during a cascading delete.

#[cfg(test)]
use std::collections::HashMap;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::Mutex;

use tracing::warn;

use crate::error::ApiError;

pub trait FileStorage: Send + Sync {
	fn create(&self, uuid: &str, content: &[u8]) -> Result<(), ApiError>;
	fn read(&self, uuid: &str) -> Result<Vec<u8>, ApiError>;
	fn remove(&self, uuid: &str) -> Result<(), ApiError>;
}

/// Blob area on the local filesystem. Blobs are fanned out over two levels
/// of subdirectories to keep directory sizes reasonable.
pub struct FilesystemStorage {
	root: PathBuf,
}

impl FilesystemStorage {
	pub fn new(root: impl AsRef<Path>) -> Result<Self, ApiError> {
		let root = root.as_ref().to_path_buf();
		std::fs::create_dir_all(&root)
			.map_err(|err| ApiError::Internal(format!("cannot create storage area: {err}")))?;
		Ok(Self { root })
	}

	fn blob_path(&self, uuid: &str) -> Result<PathBuf, ApiError> {
		// UUIDs only; anything else could escape the storage root.
		if uuid.len() < 4
			|| !uuid
				.chars()
				.all(|c| c.is_ascii_hexdigit() || c == '-')
		{
			return Err(ApiError::ParameterOutOfRange(format!(
				"not a storage UUID: {uuid}"
			)));
		}
		Ok(self.root.join(&uuid[0..2]).join(&uuid[2..4]).join(uuid))
	}
}

impl FileStorage for FilesystemStorage {
	fn create(&self, uuid: &str, content: &[u8]) -> Result<(), ApiError> {
		let path = self.blob_path(uuid)?;
		let parent = path.parent().expect("blob path has a parent");
		std::fs::create_dir_all(parent)
			.map_err(|err| ApiError::Internal(format!("cannot create blob directory: {err}")))?;
		std::fs::write(&path, content)
			.map_err(|err| ApiError::Internal(format!("cannot write blob {uuid}: {err}")))
	}

	fn read(&self, uuid: &str) -> Result<Vec<u8>, ApiError> {
		let path = self.blob_path(uuid)?;
		std::fs::read(&path).map_err(|err| match err.kind() {
			std::io::ErrorKind::NotFound => ApiError::InexistentItem(format!("blob {uuid}")),
			_ => ApiError::Internal(format!("cannot read blob {uuid}: {err}")),
		})
	}

	fn remove(&self, uuid: &str) -> Result<(), ApiError> {
		let path = self.blob_path(uuid)?;
		match std::fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				warn!("blob {uuid} was already gone from the storage area");
				Ok(())
			}
			Err(err) => Err(ApiError::Internal(format!(
				"cannot remove blob {uuid}: {err}"
			))),
		}
	}
}

/// Storage backend keeping everything in memory. The removal journal lets
/// tests assert which blobs the delete path released.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStorage {
	blobs: Mutex<HashMap<String, Vec<u8>>>,
	removed: Mutex<Vec<String>>,
}

#[cfg(test)]
impl MemoryStorage {
	pub fn removed(&self) -> Vec<String> {
		self.removed.lock().unwrap().clone()
	}

	pub fn len(&self) -> usize {
		self.blobs.lock().unwrap().len()
	}
}

#[cfg(test)]
impl FileStorage for MemoryStorage {
	fn create(&self, uuid: &str, content: &[u8]) -> Result<(), ApiError> {
		self.blobs
			.lock()
			.unwrap()
			.insert(uuid.to_owned(), content.to_vec());
		Ok(())
	}

	fn read(&self, uuid: &str) -> Result<Vec<u8>, ApiError> {
		self.blobs
			.lock()
			.unwrap()
			.get(uuid)
			.cloned()
			.ok_or_else(|| ApiError::InexistentItem(format!("blob {uuid}")))
	}

	fn remove(&self, uuid: &str) -> Result<(), ApiError> {
		self.blobs.lock().unwrap().remove(uuid);
		self.removed.lock().unwrap().push(uuid.to_owned());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use uuid::Uuid;

	#[test]
	fn filesystem_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path()).unwrap();
		let uuid = Uuid::new_v4().to_string();

		storage.create(&uuid, b"DICM payload").unwrap();
		assert_eq!(storage.read(&uuid).unwrap(), b"DICM payload");

		storage.remove(&uuid).unwrap();
		assert!(matches!(
			storage.read(&uuid),
			Err(ApiError::InexistentItem(_))
		));
	}

	#[test]
	fn removing_a_missing_blob_is_not_an_error() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path()).unwrap();
		assert!(storage.remove(&Uuid::new_v4().to_string()).is_ok());
	}

	#[test]
	fn path_traversal_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FilesystemStorage::new(dir.path()).unwrap();
		assert!(storage.create("../../etc/passwd", b"x").is_err());
		assert!(storage.read("..").is_err());
	}
}
