use serde::{Deserialize, Serialize};

/// A file in the root namespace, as the remote describes it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteFile {
    #[serde(default, rename = "fsid", alias = "fs_id")]
    pub fs_id: i64,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub server_filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    pub ctime: i64,
    #[serde(default)]
    pub mtime: i64,
}

impl RemoteFile {
    pub fn name(&self) -> &str {
        if !self.server_filename.is_empty() {
            return &self.server_filename;
        }
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub album_id: String,
    pub tid: i64,
    #[serde(default)]
    pub title: String,
}

impl Album {
    /// Parses the `album_id|tid` form used on the command line.
    pub fn parse(spec: &str) -> Option<Self> {
        let (album_id, tid) = spec.split_once(['|', ':'])?;
        Some(Self {
            album_id: album_id.to_string(),
            tid: tid.parse().ok()?,
            title: String::new(),
        })
    }
}

/// A root file seen through an album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumFile {
    pub file: RemoteFile,
    pub album_id: String,
    pub tid: i64,
    /// The account that added the file to the album.
    pub uk: i64,
}

/// Where an entry can live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    Root,
    Album(Album),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(RemoteFile),
    AlbumFile(AlbumFile),
}

impl Entry {
    pub fn file(&self) -> &RemoteFile {
        match self {
            Self::File(file) => file,
            Self::AlbumFile(album_file) => &album_file.file,
        }
    }

    pub fn size(&self) -> u64 {
        self.file().size
    }

    pub fn album_id(&self) -> Option<&str> {
        match self {
            Self::File(_) => None,
            Self::AlbumFile(album_file) => Some(&album_file.album_id),
        }
    }
}
