mod api;
mod config;
mod context;
mod dicom;
mod error;
mod hasher;
mod http;
mod index;
mod storage;
mod types;

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::context::ServerContext;
use crate::index::ServerIndex;
use crate::storage::{FileStorage, FilesystemStorage};

fn init_logger(level: &str) -> Result<(), anyhow::Error> {
	let log_level = tracing::Level::from_str(level)?;

	let subscriber = tracing_subscriber::fmt()
		.compact()
		.with_file(true)
		.with_line_number(true)
		.with_target(false)
		.with_env_filter(
			EnvFilter::builder()
				.with_default_directive(LevelFilter::from_level(log_level).into())
				.from_env_lossy(),
		)
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
	let config = AppConfig::load()?;
	init_logger(&config.logging.level)?;

	debug!("Config: {config:?}");

	let storage: Arc<dyn FileStorage> = Arc::new(FilesystemStorage::new(&config.storage.files)?);
	let index = ServerIndex::open(&config.storage.database, Arc::clone(&storage))?;
	let context = ServerContext::new(Arc::clone(&index), storage);

	let app = api::routes(context).layer(tower_http::trace::TraceLayer::new_for_http());

	let interface = config.http.interface;
	let port = config.http.port;
	info!("Starting the REST API on http://{interface}:{port}");

	let listener = tokio::net::TcpListener::bind((&interface[..], port)).await?;
	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal(index))
		.await?;

	Ok(())
}

async fn shutdown_signal(index: Arc<ServerIndex>) {
	if let Err(err) = tokio::signal::ctrl_c().await {
		tracing::error!("cannot listen for the shutdown signal: {err}");
		return;
	}
	info!("Shutting down");
	index.shutdown();
	if let Err(err) = index.flush_to_disk() {
		tracing::error!("final database flush failed: {err}");
	}
}
