//! SQLite persistence of the metadata index.
//!
//! Row-level operations over a single connection; transaction boundaries
//! and locking belong to [`super::ServerIndex`]. The cascading delete emits
//! listener signals while rows are removed, so the caller can observe the
//! released attachments and the surviving ancestor.

use dicom::core::Tag;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ApiError;
use crate::types::{
	ChangeType, CompressionType, FileContentType, FileInfo, GlobalProperty, MetadataType,
	ResourceType,
};

/// Current layout of the tables below.
const SCHEMA_VERSION: &str = "1";

/// Callbacks fired while a cascading delete removes rows.
pub trait IndexListener: Send + Sync {
	/// An ancestor of the deleted resource survived the cascade.
	fn signal_remaining_ancestor(&self, resource_type: ResourceType, public_id: &str);
	/// An attachment row was removed; the blob must be released.
	fn signal_file_deleted(&self, file_uuid: &str);
}

pub fn initialize(connection: &Connection) -> Result<(), ApiError> {
	connection.execute_batch(
		"CREATE TABLE IF NOT EXISTS resources(
			internal_id INTEGER PRIMARY KEY AUTOINCREMENT,
			resource_type INTEGER NOT NULL,
			public_id TEXT NOT NULL UNIQUE,
			parent_id INTEGER REFERENCES resources(internal_id)
		);
		CREATE INDEX IF NOT EXISTS idx_resources_parent ON resources(parent_id);
		CREATE TABLE IF NOT EXISTS main_dicom_tags(
			id INTEGER NOT NULL REFERENCES resources(internal_id),
			tag_group INTEGER NOT NULL,
			tag_element INTEGER NOT NULL,
			value TEXT NOT NULL,
			PRIMARY KEY(id, tag_group, tag_element)
		);
		CREATE TABLE IF NOT EXISTS metadata(
			id INTEGER NOT NULL REFERENCES resources(internal_id),
			type INTEGER NOT NULL,
			value TEXT NOT NULL,
			PRIMARY KEY(id, type)
		);
		CREATE TABLE IF NOT EXISTS attached_files(
			id INTEGER NOT NULL REFERENCES resources(internal_id),
			content_type INTEGER NOT NULL,
			uuid TEXT NOT NULL,
			compressed_size INTEGER NOT NULL,
			uncompressed_size INTEGER NOT NULL,
			compression_type INTEGER NOT NULL,
			PRIMARY KEY(id, content_type)
		);
		CREATE TABLE IF NOT EXISTS changes(
			seq INTEGER PRIMARY KEY AUTOINCREMENT,
			change_type INTEGER NOT NULL,
			resource_type INTEGER NOT NULL,
			public_id TEXT NOT NULL,
			date TEXT NOT NULL
		);
		CREATE TABLE IF NOT EXISTS exported_resources(
			seq INTEGER PRIMARY KEY AUTOINCREMENT,
			resource_type INTEGER NOT NULL,
			public_id TEXT NOT NULL,
			remote_modality TEXT NOT NULL,
			patient_id TEXT NOT NULL,
			study_instance_uid TEXT NOT NULL,
			series_instance_uid TEXT NOT NULL,
			sop_instance_uid TEXT NOT NULL,
			date TEXT NOT NULL
		);
		CREATE TABLE IF NOT EXISTS global_properties(
			property INTEGER PRIMARY KEY,
			value TEXT NOT NULL
		);",
	)?;

	if get_global_property(connection, GlobalProperty::DatabaseSchemaVersion)?.is_none() {
		set_global_property(
			connection,
			GlobalProperty::DatabaseSchemaVersion,
			SCHEMA_VERSION,
		)?;
	}

	Ok(())
}

// ---------------------------------------------------------------- resources

pub fn create_resource(
	connection: &Connection,
	public_id: &str,
	resource_type: ResourceType,
) -> Result<i64, ApiError> {
	connection.execute(
		"INSERT INTO resources(resource_type, public_id, parent_id) VALUES (?1, ?2, NULL)",
		params![resource_type as i64, public_id],
	)?;
	Ok(connection.last_insert_rowid())
}

/// Resolves a public id to its internal id and type.
pub fn lookup_resource(
	connection: &Connection,
	public_id: &str,
) -> Result<Option<(i64, ResourceType)>, ApiError> {
	let row = connection
		.query_row(
			"SELECT internal_id, resource_type FROM resources WHERE public_id = ?1",
			params![public_id],
			|row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
		)
		.optional()?;

	match row {
		None => Ok(None),
		Some((id, raw_type)) => {
			let resource_type = ResourceType::from_db(raw_type)
				.ok_or_else(|| ApiError::Internal(format!("corrupted resource type {raw_type}")))?;
			Ok(Some((id, resource_type)))
		}
	}
}

pub fn attach_child(connection: &Connection, parent: i64, child: i64) -> Result<(), ApiError> {
	connection.execute(
		"UPDATE resources SET parent_id = ?1 WHERE internal_id = ?2",
		params![parent, child],
	)?;
	Ok(())
}

pub fn get_parent(connection: &Connection, id: i64) -> Result<Option<i64>, ApiError> {
	let parent = connection.query_row(
		"SELECT parent_id FROM resources WHERE internal_id = ?1",
		params![id],
		|row| row.get::<_, Option<i64>>(0),
	)?;
	Ok(parent)
}

pub fn get_public_id(connection: &Connection, id: i64) -> Result<String, ApiError> {
	Ok(connection.query_row(
		"SELECT public_id FROM resources WHERE internal_id = ?1",
		params![id],
		|row| row.get(0),
	)?)
}

pub fn get_resource_type(connection: &Connection, id: i64) -> Result<ResourceType, ApiError> {
	let raw: i64 = connection.query_row(
		"SELECT resource_type FROM resources WHERE internal_id = ?1",
		params![id],
		|row| row.get(0),
	)?;
	ResourceType::from_db(raw)
		.ok_or_else(|| ApiError::Internal(format!("corrupted resource type {raw}")))
}

pub fn get_children(connection: &Connection, id: i64) -> Result<Vec<i64>, ApiError> {
	let mut statement =
		connection.prepare("SELECT internal_id FROM resources WHERE parent_id = ?1")?;
	let children = statement
		.query_map(params![id], |row| row.get(0))?
		.collect::<Result<Vec<i64>, _>>()?;
	Ok(children)
}

pub fn get_children_public_ids(connection: &Connection, id: i64) -> Result<Vec<String>, ApiError> {
	let mut statement =
		connection.prepare("SELECT public_id FROM resources WHERE parent_id = ?1")?;
	let children = statement
		.query_map(params![id], |row| row.get(0))?
		.collect::<Result<Vec<String>, _>>()?;
	Ok(children)
}

pub fn get_all_public_ids(
	connection: &Connection,
	resource_type: ResourceType,
) -> Result<Vec<String>, ApiError> {
	let mut statement = connection
		.prepare("SELECT public_id FROM resources WHERE resource_type = ?1 ORDER BY internal_id")?;
	let ids = statement
		.query_map(params![resource_type as i64], |row| row.get(0))?
		.collect::<Result<Vec<String>, _>>()?;
	Ok(ids)
}

pub fn count_resources(
	connection: &Connection,
	resource_type: ResourceType,
) -> Result<u64, ApiError> {
	let count: i64 = connection.query_row(
		"SELECT COUNT(*) FROM resources WHERE resource_type = ?1",
		params![resource_type as i64],
		|row| row.get(0),
	)?;
	Ok(count as u64)
}

// ------------------------------------------------------------------ deletes

/// Removes a resource and its whole subtree, then collapses any ancestor
/// left without descendants. Signals the listener for every released
/// attachment and for the shallowest surviving ancestor.
pub fn delete_resource(
	connection: &Connection,
	id: i64,
	listener: &dyn IndexListener,
) -> Result<(), ApiError> {
	let parent = get_parent(connection, id)?;
	delete_subtree(connection, id, listener)?;

	let mut current = parent;
	while let Some(ancestor) = current {
		let children: i64 = connection.query_row(
			"SELECT COUNT(*) FROM resources WHERE parent_id = ?1",
			params![ancestor],
			|row| row.get(0),
		)?;

		if children == 0 {
			let next = get_parent(connection, ancestor)?;
			delete_single_resource(connection, ancestor, listener)?;
			current = next;
		} else {
			let resource_type = get_resource_type(connection, ancestor)?;
			let public_id = get_public_id(connection, ancestor)?;
			listener.signal_remaining_ancestor(resource_type, &public_id);
			break;
		}
	}

	Ok(())
}

fn delete_subtree(
	connection: &Connection,
	id: i64,
	listener: &dyn IndexListener,
) -> Result<(), ApiError> {
	for child in get_children(connection, id)? {
		delete_subtree(connection, child, listener)?;
	}
	delete_single_resource(connection, id, listener)
}

fn delete_single_resource(
	connection: &Connection,
	id: i64,
	listener: &dyn IndexListener,
) -> Result<(), ApiError> {
	let mut statement = connection.prepare("SELECT uuid FROM attached_files WHERE id = ?1")?;
	let uuids = statement
		.query_map(params![id], |row| row.get::<_, String>(0))?
		.collect::<Result<Vec<_>, _>>()?;

	connection.execute("DELETE FROM attached_files WHERE id = ?1", params![id])?;
	connection.execute("DELETE FROM main_dicom_tags WHERE id = ?1", params![id])?;
	connection.execute("DELETE FROM metadata WHERE id = ?1", params![id])?;
	connection.execute(
		"DELETE FROM resources WHERE internal_id = ?1",
		params![id],
	)?;

	for uuid in uuids {
		listener.signal_file_deleted(&uuid);
	}
	Ok(())
}

// ---------------------------------------------------------- tags & metadata

pub fn set_main_dicom_tags(
	connection: &Connection,
	id: i64,
	tags: &[(Tag, String)],
) -> Result<(), ApiError> {
	let mut statement = connection.prepare(
		"INSERT OR REPLACE INTO main_dicom_tags(id, tag_group, tag_element, value)
		 VALUES (?1, ?2, ?3, ?4)",
	)?;
	for (tag, value) in tags {
		statement.execute(params![id, tag.group(), tag.element(), value])?;
	}
	Ok(())
}

pub fn get_main_dicom_tags(connection: &Connection, id: i64) -> Result<Vec<(Tag, String)>, ApiError> {
	let mut statement = connection
		.prepare("SELECT tag_group, tag_element, value FROM main_dicom_tags WHERE id = ?1")?;
	let tags = statement
		.query_map(params![id], |row| {
			Ok((
				Tag(row.get::<_, u16>(0)?, row.get::<_, u16>(1)?),
				row.get::<_, String>(2)?,
			))
		})?
		.collect::<Result<Vec<_>, _>>()?;
	Ok(tags)
}

pub fn set_metadata(
	connection: &Connection,
	id: i64,
	metadata_type: MetadataType,
	value: &str,
) -> Result<(), ApiError> {
	connection.execute(
		"INSERT OR REPLACE INTO metadata(id, type, value) VALUES (?1, ?2, ?3)",
		params![id, metadata_type as i64, value],
	)?;
	Ok(())
}

pub fn get_metadata(
	connection: &Connection,
	id: i64,
	metadata_type: MetadataType,
) -> Result<Option<String>, ApiError> {
	let value = connection
		.query_row(
			"SELECT value FROM metadata WHERE id = ?1 AND type = ?2",
			params![id, metadata_type as i64],
			|row| row.get(0),
		)
		.optional()?;
	Ok(value)
}

// -------------------------------------------------------------- attachments

pub fn add_attachment(connection: &Connection, id: i64, info: &FileInfo) -> Result<(), ApiError> {
	connection.execute(
		"INSERT INTO attached_files(id, content_type, uuid, compressed_size,
			uncompressed_size, compression_type)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
		params![
			id,
			info.content_type as i64,
			info.uuid,
			info.compressed_size as i64,
			info.uncompressed_size as i64,
			info.compression_type as i64,
		],
	)?;
	Ok(())
}

pub fn lookup_attachment(
	connection: &Connection,
	id: i64,
	content_type: FileContentType,
) -> Result<Option<FileInfo>, ApiError> {
	let row = connection
		.query_row(
			"SELECT uuid, compressed_size, uncompressed_size, compression_type
			 FROM attached_files WHERE id = ?1 AND content_type = ?2",
			params![id, content_type as i64],
			|row| {
				Ok((
					row.get::<_, String>(0)?,
					row.get::<_, i64>(1)?,
					row.get::<_, i64>(2)?,
					row.get::<_, i64>(3)?,
				))
			},
		)
		.optional()?;

	match row {
		None => Ok(None),
		Some((uuid, compressed, uncompressed, raw_compression)) => {
			let compression_type = CompressionType::from_db(raw_compression).ok_or_else(|| {
				ApiError::Internal(format!("corrupted compression type {raw_compression}"))
			})?;
			Ok(Some(FileInfo {
				uuid,
				content_type,
				compressed_size: compressed as u64,
				uncompressed_size: uncompressed as u64,
				compression_type,
			}))
		}
	}
}

pub fn total_compressed_size(connection: &Connection) -> Result<u64, ApiError> {
	let total: i64 = connection.query_row(
		"SELECT COALESCE(SUM(compressed_size), 0) FROM attached_files",
		[],
		|row| row.get(0),
	)?;
	Ok(total as u64)
}

pub fn total_uncompressed_size(connection: &Connection) -> Result<u64, ApiError> {
	let total: i64 = connection.query_row(
		"SELECT COALESCE(SUM(uncompressed_size), 0) FROM attached_files",
		[],
		|row| row.get(0),
	)?;
	Ok(total as u64)
}

// ------------------------------------------------------- changes & exports

#[derive(Debug, Clone)]
pub struct ChangeRow {
	pub seq: i64,
	pub change_type: ChangeType,
	pub resource_type: ResourceType,
	pub public_id: String,
	pub date: String,
}

pub fn log_change(
	connection: &Connection,
	change_type: ChangeType,
	resource_type: ResourceType,
	public_id: &str,
	date: &str,
) -> Result<(), ApiError> {
	connection.execute(
		"INSERT INTO changes(change_type, resource_type, public_id, date)
		 VALUES (?1, ?2, ?3, ?4)",
		params![change_type as i64, resource_type as i64, public_id, date],
	)?;
	Ok(())
}

/// Fetches up to `limit` changes after `since`, plus whether the feed is
/// exhausted.
pub fn get_changes(
	connection: &Connection,
	since: i64,
	limit: u64,
) -> Result<(Vec<ChangeRow>, bool), ApiError> {
	let mut statement = connection.prepare(
		"SELECT seq, change_type, resource_type, public_id, date
		 FROM changes WHERE seq > ?1 ORDER BY seq LIMIT ?2",
	)?;
	// One extra row decides the Done flag without a second query.
	let mut rows = statement
		.query_map(params![since, limit + 1], map_change_row)?
		.collect::<Result<Vec<_>, _>>()?;

	let done = rows.len() as u64 <= limit;
	rows.truncate(limit as usize);
	decode_changes(rows)
		.map(|changes| (changes, done))
}

pub fn get_last_change(connection: &Connection) -> Result<Option<ChangeRow>, ApiError> {
	let row = connection
		.query_row(
			"SELECT seq, change_type, resource_type, public_id, date
			 FROM changes ORDER BY seq DESC LIMIT 1",
			[],
			map_change_row,
		)
		.optional()?;
	match row {
		None => Ok(None),
		Some(raw) => Ok(Some(decode_change(raw)?)),
	}
}

type RawChange = (i64, i64, i64, String, String);

fn map_change_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChange> {
	Ok((
		row.get(0)?,
		row.get(1)?,
		row.get(2)?,
		row.get(3)?,
		row.get(4)?,
	))
}

fn decode_change(raw: RawChange) -> Result<ChangeRow, ApiError> {
	let (seq, raw_change, raw_type, public_id, date) = raw;
	Ok(ChangeRow {
		seq,
		change_type: ChangeType::from_db(raw_change)
			.ok_or_else(|| ApiError::Internal(format!("corrupted change type {raw_change}")))?,
		resource_type: ResourceType::from_db(raw_type)
			.ok_or_else(|| ApiError::Internal(format!("corrupted resource type {raw_type}")))?,
		public_id,
		date,
	})
}

fn decode_changes(rows: Vec<RawChange>) -> Result<Vec<ChangeRow>, ApiError> {
	rows.into_iter().map(decode_change).collect()
}

#[derive(Debug, Clone)]
pub struct ExportedRow {
	pub seq: i64,
	pub resource_type: ResourceType,
	pub public_id: String,
	pub remote_modality: String,
	pub patient_id: String,
	pub study_instance_uid: String,
	pub series_instance_uid: String,
	pub sop_instance_uid: String,
	pub date: String,
}

#[allow(clippy::too_many_arguments)]
pub fn log_exported_resource(
	connection: &Connection,
	resource_type: ResourceType,
	public_id: &str,
	remote_modality: &str,
	patient_id: &str,
	study_instance_uid: &str,
	series_instance_uid: &str,
	sop_instance_uid: &str,
	date: &str,
) -> Result<(), ApiError> {
	connection.execute(
		"INSERT INTO exported_resources(resource_type, public_id, remote_modality,
			patient_id, study_instance_uid, series_instance_uid, sop_instance_uid, date)
		 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
		params![
			resource_type as i64,
			public_id,
			remote_modality,
			patient_id,
			study_instance_uid,
			series_instance_uid,
			sop_instance_uid,
			date,
		],
	)?;
	Ok(())
}

pub fn get_exported_resources(
	connection: &Connection,
	since: i64,
	limit: u64,
) -> Result<(Vec<ExportedRow>, bool), ApiError> {
	let mut statement = connection.prepare(
		"SELECT seq, resource_type, public_id, remote_modality, patient_id,
			study_instance_uid, series_instance_uid, sop_instance_uid, date
		 FROM exported_resources WHERE seq > ?1 ORDER BY seq LIMIT ?2",
	)?;
	let mut rows = statement
		.query_map(params![since, limit + 1], map_exported_row)?
		.collect::<Result<Vec<_>, _>>()?;

	let done = rows.len() as u64 <= limit;
	rows.truncate(limit as usize);
	let exports = rows
		.into_iter()
		.map(decode_exported)
		.collect::<Result<Vec<_>, _>>()?;
	Ok((exports, done))
}

pub fn get_last_exported_resource(
	connection: &Connection,
) -> Result<Option<ExportedRow>, ApiError> {
	let row = connection
		.query_row(
			"SELECT seq, resource_type, public_id, remote_modality, patient_id,
				study_instance_uid, series_instance_uid, sop_instance_uid, date
			 FROM exported_resources ORDER BY seq DESC LIMIT 1",
			[],
			map_exported_row,
		)
		.optional()?;
	match row {
		None => Ok(None),
		Some(raw) => Ok(Some(decode_exported(raw)?)),
	}
}

type RawExported = (i64, i64, String, String, String, String, String, String, String);

fn map_exported_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawExported> {
	Ok((
		row.get(0)?,
		row.get(1)?,
		row.get(2)?,
		row.get(3)?,
		row.get(4)?,
		row.get(5)?,
		row.get(6)?,
		row.get(7)?,
		row.get(8)?,
	))
}

fn decode_exported(raw: RawExported) -> Result<ExportedRow, ApiError> {
	let (
		seq,
		raw_type,
		public_id,
		remote_modality,
		patient_id,
		study_instance_uid,
		series_instance_uid,
		sop_instance_uid,
		date,
	) = raw;
	Ok(ExportedRow {
		seq,
		resource_type: ResourceType::from_db(raw_type)
			.ok_or_else(|| ApiError::Internal(format!("corrupted resource type {raw_type}")))?,
		public_id,
		remote_modality,
		patient_id,
		study_instance_uid,
		series_instance_uid,
		sop_instance_uid,
		date,
	})
}

// -------------------------------------------------------- global properties

pub fn get_global_property(
	connection: &Connection,
	property: GlobalProperty,
) -> Result<Option<String>, ApiError> {
	let value = connection
		.query_row(
			"SELECT value FROM global_properties WHERE property = ?1",
			params![property as i64],
			|row| row.get(0),
		)
		.optional()?;
	Ok(value)
}

pub fn set_global_property(
	connection: &Connection,
	property: GlobalProperty,
	value: &str,
) -> Result<(), ApiError> {
	connection.execute(
		"INSERT OR REPLACE INTO global_properties(property, value) VALUES (?1, ?2)",
		params![property as i64, value],
	)?;
	Ok(())
}
