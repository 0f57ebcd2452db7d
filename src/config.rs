use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
	pub logging: LoggingConfig,
	pub http: HttpConfig,
	pub storage: StorageConfig,
}

impl AppConfig {
	/// Layers the built-in defaults, an optional `reliquary.toml` next to
	/// the binary, and `RELIQUARY_*` environment variables.
	pub fn load() -> Result<Self, config::ConfigError> {
		use config::Config;
		let settings = Config::builder()
			.add_source(config::File::from_str(
				include_str!("defaults.toml"),
				config::FileFormat::Toml,
			))
			.add_source(config::File::with_name("reliquary.toml").required(false))
			.add_source(config::Environment::with_prefix("RELIQUARY").separator("_"))
			.build()?;

		settings.try_deserialize()
	}
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
	// Also configurable via RUST_LOG and RELIQUARY_LOGGING_LEVEL
	pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
	// The interface the REST API will be listening on
	pub interface: String,
	// The port of the REST API
	pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
	/// Directory of the metadata index, or `:memory:` for a transient one.
	pub database: String,
	/// Root directory of the content-addressed file area.
	pub files: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn built_in_defaults_deserialize() {
		let config = AppConfig::load().unwrap();
		assert!(!config.logging.level.is_empty());
		assert!(config.http.port > 0);
		assert!(!config.storage.database.is_empty());
	}
}
