use std::path::Path;

use anyhow::{Context, Result};
use blockput::backend::http_impl::HttpBackend;
use blockput::{Album, CancelSignal, Container, Entry, FileStore, RemoteConfig, Upload};
use tracing::{info, warn};

const USAGE: &str = "usage: blockput <file> [album_id|tid]";

#[tokio::main]
async fn main() -> Result<()> {
    blockput::logging::init();

    let mut args = std::env::args().skip(1);
    let path = args.next().context(USAGE)?;
    let dst = match args.next() {
        Some(spec) => Container::Album(
            Album::parse(&spec).with_context(|| format!("invalid album {spec:?}; {USAGE}"))?,
        ),
        None => Container::Root,
    };

    let config = RemoteConfig::from_env()?;
    let store = FileStore::new(HttpBackend::new(config));

    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("failed to open {path}"))?;
    let size = file.metadata().await?.len();
    let name = Path::new(&path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{path} has no file name"))?;

    let signal = CancelSignal::new();
    let on_ctrl_c = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping upload");
            on_ctrl_c.cancel();
        }
    });

    let entry = store
        .put(
            &dst,
            Upload::new(name, file, size),
            |percent| info!("{percent}%"),
            &signal,
        )
        .await
        .with_context(|| format!("failed to upload {path}"))?;

    let file = entry.file();
    match &entry {
        Entry::File(_) => info!(fs_id = file.fs_id, size = file.size, "uploaded {}", file.path),
        Entry::AlbumFile(album_file) => info!(
            fs_id = file.fs_id,
            album_id = %album_file.album_id,
            "uploaded {} into album",
            file.path
        ),
    }

    Ok(())
}
