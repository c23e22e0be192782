pub mod backend;
pub mod cancel;
pub mod compose;
pub mod config;
pub mod digest;
pub mod error;
pub mod filestore;
pub mod logging;
pub mod object;
pub mod plan;
pub mod source;
pub mod uploader;

pub use cancel::CancelSignal;
pub use config::{RemoteConfig, UploadConfig};
pub use error::{Error, Result, Stage};
pub use filestore::{FileStore, Upload};
pub use object::{Album, AlbumFile, Container, Entry, RemoteFile};
