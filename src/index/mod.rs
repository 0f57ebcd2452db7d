//! Transactional metadata index over the Patient → Study → Series →
//! Instance hierarchy.
//!
//! All mutating and reading operations serialise on one process-wide lock
//! and run inside a single transaction, so observers never see a partial
//! hierarchy. A dedicated flush thread periodically checkpoints the
//! database while holding the same lock.

mod database;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use dicom::dictionary_std::tags;
use rusqlite::Connection;
use serde_json::{json, Value as Json};
use tracing::{error, info, warn};

use crate::dicom::{tag_alias, DicomSummary};
use crate::error::ApiError;
use crate::storage::FileStorage;
use crate::types::{
	base_path, ChangeType, FileContentType, FileInfo, GlobalProperty, MetadataType, ResourceType,
	SeriesStatus, StoreStatus,
};

use database::IndexListener;

/// Seconds between two database flushes when the `FlushSleep` global
/// property is absent.
const DEFAULT_FLUSH_SLEEP: u64 = 10;

/// Shallowest ancestor that survived a cascading delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemainingAncestor {
	pub resource_type: ResourceType,
	pub public_id: String,
}

/// Additional metadata to attach to the hierarchy levels of a stored
/// instance, e.g. `ModifiedFrom` parentage.
pub type MetadataOverlay = (ResourceType, MetadataType, String);

/// Observes the rows removed by a cascading delete: forwards released
/// attachments to the file storage and reduces the surviving-ancestor
/// signals to the shallowest one.
struct CascadeListener {
	storage: Arc<dyn FileStorage>,
	remaining: Mutex<Option<RemainingAncestor>>,
}

impl CascadeListener {
	fn new(storage: Arc<dyn FileStorage>) -> Self {
		Self {
			storage,
			remaining: Mutex::new(None),
		}
	}

	fn reset(&self) {
		*self.remaining.lock().expect("listener lock") = None;
	}

	fn take_remaining(&self) -> Option<RemainingAncestor> {
		self.remaining.lock().expect("listener lock").take()
	}
}

impl IndexListener for CascadeListener {
	fn signal_remaining_ancestor(&self, resource_type: ResourceType, public_id: &str) {
		info!("remaining ancestor {public_id} ({resource_type})");

		let mut remaining = self.remaining.lock().expect("listener lock");
		let shallower = remaining
			.as_ref()
			.map_or(true, |current| resource_type < current.resource_type);
		if shallower {
			*remaining = Some(RemainingAncestor {
				resource_type,
				public_id: public_id.to_owned(),
			});
		}
	}

	fn signal_file_deleted(&self, file_uuid: &str) {
		if let Err(err) = self.storage.remove(file_uuid) {
			error!("cannot remove blob {file_uuid} from the storage area: {err}");
		}
	}
}

pub struct ServerIndex {
	connection: Mutex<Connection>,
	listener: Arc<CascadeListener>,
	flush_sleep: u64,
	shutdown: AtomicBool,
}

impl ServerIndex {
	/// Opens (creating if needed) the index at `<db_path>/index`, or an
	/// in-memory index when `db_path` is `:memory:`, and starts the flush
	/// thread.
	pub fn open(db_path: &str, storage: Arc<dyn FileStorage>) -> Result<Arc<Self>, ApiError> {
		let connection = if db_path == ":memory:" {
			Connection::open_in_memory()?
		} else {
			std::fs::create_dir_all(db_path)
				.map_err(|err| ApiError::Internal(format!("cannot create {db_path}: {err}")))?;
			let connection = Connection::open(std::path::Path::new(db_path).join("index"))?;
			let _mode: String =
				connection.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
			connection
		};

		database::initialize(&connection)?;

		let flush_sleep = match database::get_global_property(&connection, GlobalProperty::FlushSleep)?
		{
			Some(value) => value.parse().unwrap_or_else(|_| {
				warn!("non-numeric FlushSleep global property, using the default");
				DEFAULT_FLUSH_SLEEP
			}),
			None => DEFAULT_FLUSH_SLEEP,
		};

		let index = Arc::new(Self {
			connection: Mutex::new(connection),
			listener: Arc::new(CascadeListener::new(storage)),
			flush_sleep,
			shutdown: AtomicBool::new(false),
		});

		Self::spawn_flush_thread(&index);
		Ok(index)
	}

	fn spawn_flush_thread(index: &Arc<Self>) {
		let weak = Arc::downgrade(index);
		let sleep = index.flush_sleep;

		thread::Builder::new()
			.name("index-flush".into())
			.spawn(move || {
				info!("starting the database flush thread (sleep = {sleep}s)");
				loop {
					thread::sleep(Duration::from_secs(sleep));
					let Some(index) = weak.upgrade() else {
						break;
					};
					if index.shutdown.load(Ordering::Relaxed) {
						break;
					}
					if let Err(err) = index.flush_to_disk() {
						error!("database flush failed: {err}");
					}
				}
				info!("stopping the database flush thread");
			})
			.expect("flush thread can be spawned");
	}

	/// Checkpoints the database. Harmless when the journal is not in WAL
	/// mode (in-memory indexes).
	pub fn flush_to_disk(&self) -> Result<(), ApiError> {
		let connection = self.lock();
		connection.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
		Ok(())
	}

	pub fn shutdown(&self) {
		self.shutdown.store(true, Ordering::Relaxed);
	}

	fn lock(&self) -> MutexGuard<'_, Connection> {
		self.connection.lock().expect("index lock")
	}

	// ------------------------------------------------------------ ingest

	/// Registers one instance and the missing part of its hierarchy in a
	/// single transaction. Returns `AlreadyStored` without mutating
	/// anything when the instance is a duplicate; any failure rolls the
	/// transaction back and degrades to `Failure`.
	pub fn store(
		&self,
		summary: &DicomSummary,
		attachments: &[FileInfo],
		remote_aet: &str,
		overlays: &[MetadataOverlay],
	) -> StoreStatus {
		let mut connection = self.lock();

		match store_transaction(&mut connection, summary, attachments, remote_aet, overlays) {
			Ok(status) => status,
			Err(err) => {
				error!("cannot register the instance in the index: {err}");
				StoreStatus::Failure
			}
		}
	}

	// ------------------------------------------------------------ delete

	/// Deletes a resource and its descendants; ancestors left childless
	/// collapse as well. Returns the shallowest surviving ancestor.
	pub fn delete_resource(
		&self,
		public_id: &str,
		expected_type: ResourceType,
	) -> Result<Option<RemainingAncestor>, ApiError> {
		let mut connection = self.lock();

		self.listener.reset();

		let tx = connection.transaction()?;
		let id = match database::lookup_resource(&tx, public_id)? {
			Some((id, resource_type)) if resource_type == expected_type => id,
			_ => {
				return Err(ApiError::InexistentItem(format!(
					"{} {public_id}",
					expected_type.as_str()
				)))
			}
		};

		database::delete_resource(&tx, id, self.listener.as_ref())?;
		database::log_change(&tx, ChangeType::Deleted, expected_type, public_id, &now_iso())?;
		tx.commit()?;

		Ok(self.listener.take_remaining())
	}

	// ----------------------------------------------------------- lookups

	/// Full JSON descriptor of one resource, or `InexistentItem`.
	pub fn lookup_resource(
		&self,
		public_id: &str,
		expected_type: ResourceType,
	) -> Result<Json, ApiError> {
		let connection = self.lock();

		let (id, resource_type) = database::lookup_resource(&connection, public_id)?
			.filter(|(_, resource_type)| *resource_type == expected_type)
			.ok_or_else(|| {
				ApiError::InexistentItem(format!("{} {public_id}", expected_type.as_str()))
			})?;

		let mut result = json!({
			"ID": public_id,
			"Type": resource_type.as_str(),
			"MainDicomTags": main_tags_json(&connection, id)?,
		});

		if let Some(parent) = database::get_parent(&connection, id)? {
			let parent_id = database::get_public_id(&connection, parent)?;
			let key = match resource_type {
				ResourceType::Study => "ParentPatient",
				ResourceType::Series => "ParentStudy",
				ResourceType::Instance => "ParentSeries",
				ResourceType::Patient => unreachable!("patients have no parent"),
			};
			result[key] = json!(parent_id);
		}

		if resource_type != ResourceType::Instance {
			let children = database::get_children_public_ids(&connection, id)?;
			let key = match resource_type {
				ResourceType::Patient => "Studies",
				ResourceType::Study => "Series",
				ResourceType::Series => "Instances",
				ResourceType::Instance => unreachable!("instances have no children"),
			};
			result[key] = json!(children);
		}

		match resource_type {
			ResourceType::Series => {
				result["Status"] = json!(series_status(&connection, id)?.as_str());
				result["ExpectedNumberOfInstances"] = metadata_as_integer(
					&connection,
					id,
					MetadataType::SeriesExpectedNumberOfInstances,
				)?;
			}
			ResourceType::Instance => {
				let attachment =
					database::lookup_attachment(&connection, id, FileContentType::Dicom)?
						.ok_or_else(|| {
							ApiError::Internal(format!(
								"instance {public_id} has no DICOM attachment"
							))
						})?;
				result["FileSize"] = json!(attachment.uncompressed_size);
				result["FileUuid"] = json!(attachment.uuid);
				result["IndexInSeries"] =
					metadata_as_integer(&connection, id, MetadataType::InstanceIndexInSeries)?;
			}
			_ => {}
		}

		Ok(result)
	}

	/// The attachment record of an instance, if any.
	pub fn lookup_attachment(
		&self,
		instance_public_id: &str,
		content_type: FileContentType,
	) -> Result<Option<FileInfo>, ApiError> {
		let connection = self.lock();

		let (id, resource_type) = database::lookup_resource(&connection, instance_public_id)?
			.ok_or_else(|| {
				ApiError::InexistentItem(format!("Instance {instance_public_id}"))
			})?;
		if resource_type != ResourceType::Instance {
			return Err(ApiError::InexistentItem(format!(
				"Instance {instance_public_id}"
			)));
		}

		database::lookup_attachment(&connection, id, content_type)
	}

	pub fn get_all_uuids(&self, resource_type: ResourceType) -> Result<Vec<String>, ApiError> {
		let connection = self.lock();
		database::get_all_public_ids(&connection, resource_type)
	}

	/// One metadata entry of a resource, if set.
	pub fn get_metadata(
		&self,
		public_id: &str,
		metadata_type: MetadataType,
	) -> Result<Option<String>, ApiError> {
		let connection = self.lock();
		let (id, _) = database::lookup_resource(&connection, public_id)?
			.ok_or_else(|| ApiError::InexistentItem(format!("resource {public_id}")))?;
		database::get_metadata(&connection, id, metadata_type)
	}

	/// Public ids of every instance below the given resource (the resource
	/// itself when it is an instance).
	pub fn get_child_instances(&self, public_id: &str) -> Result<Vec<String>, ApiError> {
		let connection = self.lock();

		let (id, resource_type) = database::lookup_resource(&connection, public_id)?
			.ok_or_else(|| ApiError::InexistentItem(format!("resource {public_id}")))?;

		let mut instances = Vec::new();
		collect_instances(&connection, id, resource_type, &mut instances)?;
		Ok(instances)
	}

	// ------------------------------------------------------ change feeds

	pub fn get_changes(&self, since: i64, limit: u64) -> Result<Json, ApiError> {
		let connection = self.lock();
		let (rows, done) = database::get_changes(&connection, since, limit)?;

		let last = rows.last().map_or(since, |row| row.seq);
		let changes: Vec<Json> = rows.iter().map(change_json).collect();
		Ok(json!({ "Changes": changes, "Done": done, "Last": last }))
	}

	pub fn get_last_change(&self) -> Result<Json, ApiError> {
		let connection = self.lock();
		Ok(database::get_last_change(&connection)?
			.as_ref()
			.map_or(Json::Null, change_json))
	}

	/// Records an observable transition that happened outside `store`,
	/// e.g. the creation of a modified resource.
	pub fn log_change(
		&self,
		change_type: ChangeType,
		resource_type: ResourceType,
		public_id: &str,
	) -> Result<(), ApiError> {
		let connection = self.lock();
		database::log_change(&connection, change_type, resource_type, public_id, &now_iso())
	}

	// ------------------------------------------------------- export log

	/// Records that a resource was sent to a remote modality, walking up
	/// the hierarchy to snapshot the identifiers of every level. A single
	/// row insert; no explicit transaction needed.
	pub fn log_exported_resource(
		&self,
		public_id: &str,
		remote_modality: &str,
	) -> Result<(), ApiError> {
		let connection = self.lock();

		let (id, resource_type) = database::lookup_resource(&connection, public_id)?
			.ok_or_else(|| ApiError::InexistentItem(format!("resource {public_id}")))?;

		let mut patient_id = String::new();
		let mut study_instance_uid = String::new();
		let mut series_instance_uid = String::new();
		let mut sop_instance_uid = String::new();

		let mut current_id = id;
		let mut current_type = resource_type;
		loop {
			let main_tags = database::get_main_dicom_tags(&connection, current_id)?;
			let tag_value = |tag| {
				main_tags
					.iter()
					.find(|(candidate, _)| *candidate == tag)
					.map(|(_, value)| value.clone())
					.unwrap_or_default()
			};

			match current_type {
				ResourceType::Patient => {
					patient_id = tag_value(tags::PATIENT_ID);
					break;
				}
				ResourceType::Study => {
					study_instance_uid = tag_value(tags::STUDY_INSTANCE_UID);
				}
				ResourceType::Series => {
					series_instance_uid = tag_value(tags::SERIES_INSTANCE_UID);
				}
				ResourceType::Instance => {
					sop_instance_uid = tag_value(tags::SOP_INSTANCE_UID);
				}
			}

			current_id = database::get_parent(&connection, current_id)?.ok_or_else(|| {
				ApiError::Internal(format!("resource {current_id} has no parent"))
			})?;
			current_type = database::get_resource_type(&connection, current_id)?;
		}

		database::log_exported_resource(
			&connection,
			resource_type,
			public_id,
			remote_modality,
			&patient_id,
			&study_instance_uid,
			&series_instance_uid,
			&sop_instance_uid,
			&now_iso(),
		)
	}

	pub fn get_exported_resources(&self, since: i64, limit: u64) -> Result<Json, ApiError> {
		let connection = self.lock();
		let (rows, done) = database::get_exported_resources(&connection, since, limit)?;

		let last = rows.last().map_or(since, |row| row.seq);
		let exports: Vec<Json> = rows.iter().map(exported_json).collect();
		Ok(json!({ "Exports": exports, "Done": done, "Last": last }))
	}

	pub fn get_last_exported_resource(&self) -> Result<Json, ApiError> {
		let connection = self.lock();
		Ok(database::get_last_exported_resource(&connection)?
			.as_ref()
			.map_or(Json::Null, exported_json))
	}

	// ------------------------------------------------------- statistics

	pub fn compute_statistics(&self) -> Result<Json, ApiError> {
		let connection = self.lock();

		let compressed = database::total_compressed_size(&connection)?;
		let uncompressed = database::total_uncompressed_size(&connection)?;

		Ok(json!({
			"TotalDiskSize": compressed.to_string(),
			"TotalUncompressedSize": uncompressed.to_string(),
			"TotalDiskSizeMB": compressed / (1024 * 1024),
			"TotalUncompressedSizeMB": uncompressed / (1024 * 1024),
			"CountPatients": database::count_resources(&connection, ResourceType::Patient)?,
			"CountStudies": database::count_resources(&connection, ResourceType::Study)?,
			"CountSeries": database::count_resources(&connection, ResourceType::Series)?,
			"CountInstances": database::count_resources(&connection, ResourceType::Instance)?,
		}))
	}

	/// Atomically increments a persistent counter backed by the global
	/// property store, returning the new value.
	pub fn increment_global_sequence(&self, property: GlobalProperty) -> Result<u64, ApiError> {
		let mut connection = self.lock();

		let tx = connection.transaction()?;
		let current: u64 = database::get_global_property(&tx, property)?
			.and_then(|value| value.parse().ok())
			.unwrap_or(0);
		let next = current + 1;
		database::set_global_property(&tx, property, &next.to_string())?;
		tx.commit()?;

		Ok(next)
	}
}

// -------------------------------------------------------------- internals

fn now_iso() -> String {
	Utc::now().format("%Y%m%dT%H%M%S").to_string()
}

fn store_transaction(
	connection: &mut Connection,
	summary: &DicomSummary,
	attachments: &[FileInfo],
	remote_aet: &str,
	overlays: &[MetadataOverlay],
) -> Result<StoreStatus, ApiError> {
	let hasher = summary.hasher();
	let now = now_iso();

	let tx = connection.transaction()?;

	// Do nothing if the instance already exists
	if database::lookup_resource(&tx, &hasher.hash_instance())?.is_some() {
		return Ok(StoreStatus::AlreadyStored);
	}

	// Create the instance
	let instance_id =
		database::create_resource(&tx, &hasher.hash_instance(), ResourceType::Instance)?;
	database::set_main_dicom_tags(&tx, instance_id, &summary.project(ResourceType::Instance))?;
	database::log_change(
		&tx,
		ChangeType::NewInstance,
		ResourceType::Instance,
		&hasher.hash_instance(),
		&now,
	)?;

	// Create the missing part of the patient/study/series hierarchy
	let mut is_new_series = false;
	let series_id = match database::lookup_resource(&tx, &hasher.hash_series())? {
		Some((series_id, ResourceType::Series)) => {
			database::attach_child(&tx, series_id, instance_id)?;
			series_id
		}
		Some((_, other)) => {
			return Err(ApiError::Internal(format!(
				"series hash is already used by a {other}"
			)))
		}
		None => {
			is_new_series = true;
			let series_id =
				database::create_resource(&tx, &hasher.hash_series(), ResourceType::Series)?;
			database::set_main_dicom_tags(&tx, series_id, &summary.project(ResourceType::Series))?;
			database::attach_child(&tx, series_id, instance_id)?;
			database::log_change(
				&tx,
				ChangeType::NewSeries,
				ResourceType::Series,
				&hasher.hash_series(),
				&now,
			)?;

			let study_id = match database::lookup_resource(&tx, &hasher.hash_study())? {
				Some((study_id, ResourceType::Study)) => study_id,
				Some((_, other)) => {
					return Err(ApiError::Internal(format!(
						"study hash is already used by a {other}"
					)))
				}
				None => {
					let study_id =
						database::create_resource(&tx, &hasher.hash_study(), ResourceType::Study)?;
					database::set_main_dicom_tags(
						&tx,
						study_id,
						&summary.project(ResourceType::Study),
					)?;
					database::log_change(
						&tx,
						ChangeType::NewStudy,
						ResourceType::Study,
						&hasher.hash_study(),
						&now,
					)?;

					let patient_id = match database::lookup_resource(&tx, &hasher.hash_patient())? {
						Some((patient_id, ResourceType::Patient)) => patient_id,
						Some((_, other)) => {
							return Err(ApiError::Internal(format!(
								"patient hash is already used by a {other}"
							)))
						}
						None => {
							let patient_id = database::create_resource(
								&tx,
								&hasher.hash_patient(),
								ResourceType::Patient,
							)?;
							database::set_main_dicom_tags(
								&tx,
								patient_id,
								&summary.project(ResourceType::Patient),
							)?;
							database::log_change(
								&tx,
								ChangeType::NewPatient,
								ResourceType::Patient,
								&hasher.hash_patient(),
								&now,
							)?;
							patient_id
						}
					};
					database::attach_child(&tx, patient_id, study_id)?;
					study_id
				}
			};
			database::attach_child(&tx, study_id, series_id)?;
			series_id
		}
	};

	// Attach the files to the newly created instance
	for attachment in attachments {
		database::add_attachment(&tx, instance_id, attachment)?;
	}

	// Attach the reception metadata
	database::set_metadata(&tx, instance_id, MetadataType::InstanceReceptionDate, &now)?;
	database::set_metadata(&tx, instance_id, MetadataType::InstanceRemoteAet, remote_aet)?;

	if let Some(index) = summary.first_of(&[tags::INSTANCE_NUMBER, tags::IMAGE_INDEX]) {
		database::set_metadata(&tx, instance_id, MetadataType::InstanceIndexInSeries, index)?;
	}

	if is_new_series {
		if let Some(expected) = summary.first_of(&[
			tags::NUMBER_OF_SLICES,
			tags::IMAGES_IN_ACQUISITION,
			tags::CARDIAC_NUMBER_OF_IMAGES,
		]) {
			database::set_metadata(
				&tx,
				series_id,
				MetadataType::SeriesExpectedNumberOfInstances,
				expected,
			)?;
		}
	}

	// Parentage metadata recorded by the modification pipeline
	for (level, metadata_type, value) in overlays {
		let public_id = match level {
			ResourceType::Patient => hasher.hash_patient(),
			ResourceType::Study => hasher.hash_study(),
			ResourceType::Series => hasher.hash_series(),
			ResourceType::Instance => hasher.hash_instance(),
		};
		if let Some((target, _)) = database::lookup_resource(&tx, &public_id)? {
			database::set_metadata(&tx, target, *metadata_type, value)?;
		}
	}

	// Check whether the series of this new instance is now complete
	if series_status(&tx, series_id)? == SeriesStatus::Complete {
		database::log_change(
			&tx,
			ChangeType::CompletedSeries,
			ResourceType::Series,
			&hasher.hash_series(),
			&now,
		)?;
	}

	tx.commit()?;
	Ok(StoreStatus::Success)
}

/// Completion state of a series, per the expected-count metadata and the
/// indexes of the child instances.
fn series_status(connection: &Connection, series_id: i64) -> Result<SeriesStatus, ApiError> {
	let expected: i64 = match database::get_metadata(
		connection,
		series_id,
		MetadataType::SeriesExpectedNumberOfInstances,
	)? {
		Some(value) => match value.parse() {
			Ok(expected) if expected >= 0 => expected,
			_ => return Ok(SeriesStatus::Unknown),
		},
		None => return Ok(SeriesStatus::Unknown),
	};

	let mut seen = std::collections::HashSet::new();
	for child in database::get_children(connection, series_id)? {
		let index: i64 = match database::get_metadata(
			connection,
			child,
			MetadataType::InstanceIndexInSeries,
		)? {
			Some(value) => match value.parse() {
				Ok(index) => index,
				Err(_) => return Ok(SeriesStatus::Unknown),
			},
			None => return Ok(SeriesStatus::Unknown),
		};

		if index <= 0 || index > expected {
			// Out-of-range instance index
			return Ok(SeriesStatus::Inconsistent);
		}
		if !seen.insert(index) {
			// Twice the same instance index
			return Ok(SeriesStatus::Inconsistent);
		}
	}

	if seen.len() as i64 == expected {
		Ok(SeriesStatus::Complete)
	} else {
		Ok(SeriesStatus::Missing)
	}
}

fn collect_instances(
	connection: &Connection,
	id: i64,
	resource_type: ResourceType,
	instances: &mut Vec<String>,
) -> Result<(), ApiError> {
	if resource_type == ResourceType::Instance {
		instances.push(database::get_public_id(connection, id)?);
		return Ok(());
	}

	let child_type = resource_type.child().expect("non-instance has a child level");
	for child in database::get_children(connection, id)? {
		collect_instances(connection, child, child_type, instances)?;
	}
	Ok(())
}

fn main_tags_json(connection: &Connection, id: i64) -> Result<Json, ApiError> {
	let mut tags_json = serde_json::Map::new();
	for (tag, value) in database::get_main_dicom_tags(connection, id)? {
		tags_json.insert(tag_alias(tag), json!(value));
	}
	Ok(Json::Object(tags_json))
}

fn metadata_as_integer(
	connection: &Connection,
	id: i64,
	metadata_type: MetadataType,
) -> Result<Json, ApiError> {
	Ok(database::get_metadata(connection, id, metadata_type)?
		.and_then(|value| value.parse::<i64>().ok())
		.map_or(Json::Null, |value| json!(value)))
}

fn change_json(row: &database::ChangeRow) -> Json {
	json!({
		"Seq": row.seq,
		"ChangeType": row.change_type.as_str(),
		"ResourceType": row.resource_type.as_str(),
		"ID": &row.public_id,
		"Path": base_path(row.resource_type, &row.public_id),
		"Date": &row.date,
	})
}

fn exported_json(row: &database::ExportedRow) -> Json {
	json!({
		"Seq": row.seq,
		"ResourceType": row.resource_type.as_str(),
		"ID": &row.public_id,
		"Path": base_path(row.resource_type, &row.public_id),
		"RemoteModality": &row.remote_modality,
		"PatientID": &row.patient_id,
		"StudyInstanceUID": &row.study_instance_uid,
		"SeriesInstanceUID": &row.series_instance_uid,
		"SOPInstanceUID": &row.sop_instance_uid,
		"Date": &row.date,
	})
}
