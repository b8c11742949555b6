use std::io;
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::command::Ffmpeg;
use crate::config::Config;
use crate::processor::{processor, CancelRegistry, ProcessorSettings};
use crate::resolver::FileManifestResolver;
use crate::storage::HttpPublisher;
use crate::template::TEMPLATE;
use crate::tracker::{FileJobStore, MemoryJobStore, SharedJobStore};
use crate::web::{start_web_server, AppState};

mod command;
mod config;
mod error;
mod fetch;
mod filters;
mod models;
mod pipeline;
mod processor;
mod resolver;
mod scratch;
mod storage;
mod template;
mod tracker;
mod web;

fn other(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().map_err(other)?;
    let ffmpeg = Ffmpeg::resolve(config.ffmpeg_path.clone(), config.ffprobe_path.clone()).map_err(other)?;
    info!("using ffmpeg at {}", ffmpeg.ffmpeg_path().display());

    let store: SharedJobStore = match &config.jobs_dir {
        Some(dir) => {
            let store = FileJobStore::open(dir).map_err(other)?;
            info!("persisting job records in {}", store.dir().display());
            Arc::new(store)
        }
        None => Arc::new(MemoryJobStore::new()),
    };

    let (tx, rx) = unbounded_channel();
    let cancellations = CancelRegistry::default();

    let settings = ProcessorSettings {
        store: store.clone(),
        media: Box::new(ffmpeg),
        publisher: Box::new(HttpPublisher::new(config.storage.clone())),
        template: &TEMPLATE,
        scratch_root: config.scratch_root.clone(),
        caption_font: config.caption_font.clone(),
    };
    let processor_cancellations = cancellations.clone();
    let processor_thread = thread::spawn(move || processor(rx, processor_cancellations, settings));

    let state = AppState {
        store,
        resolver: Arc::new(FileManifestResolver::new(config.manifests_dir.clone())),
        channel: tx,
        cancellations,
        expire_finished_jobs_after: config.expire_finished_jobs_after,
    };

    let served = start_web_server(state, &config.bind_address, config.port).await;

    // The server owned the sending side, so the processor returns once the
    // server stops. Dropping the last store handle flushes queued records.
    if processor_thread.join().is_err() {
        error!("assembly processor panicked");
    }

    served
}
