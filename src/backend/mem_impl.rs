use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

use super::*;
use crate::digest::md5_hex;

#[derive(Debug, Error)]
pub enum MemError {
    #[error("unknown upload id {0}")]
    UnknownSession(String),
    #[error("block {partseq} does not match its declared digest")]
    BlockMismatch { partseq: u32 },
    #[error("block {0} was never uploaded")]
    MissingBlock(u32),
    #[error("assembled file does not match its declared digest")]
    FileMismatch,
    #[error("file {0} is not in album {1}")]
    NotInAlbum(i64, String),
    #[error("injected failure")]
    Injected,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How often each remote operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
    pub precreate: usize,
    pub upload_block: usize,
    pub create: usize,
    pub add_album_file: usize,
    pub copy_album_file: usize,
    pub delete_album_file: usize,
}

#[derive(Debug)]
struct Session {
    path: String,
    size: u64,
    content_md5: String,
    block_list: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    /// Block contents, keyed by their md5.
    blocks: HashMap<String, Vec<u8>>,
    sessions: HashMap<String, Session>,
    files: HashMap<i64, RemoteFile>,
    contents: HashMap<i64, Vec<u8>>,
    by_md5: HashMap<String, i64>,
    album_files: HashMap<String, HashMap<i64, AlbumFile>>,
    next_fs_id: i64,
    calls: Calls,
}

/// An in-process stand-in for the remote photo service.
///
/// It deduplicates whole files by md5 and blocks by their digest, so a
/// second upload of the same content completes without any block transfer.
#[derive(Debug)]
pub struct MemBackend {
    state: Mutex<State>,
    uk: i64,

    fail_upload_of: Option<u32>,
    fail_delete: bool,
    fail_add_album_file: bool,
    return_type_override: Option<i64>,
    block_delay: Option<Duration>,

    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self {
            state: Default::default(),
            uk: 1,
            fail_upload_of: None,
            fail_delete: false,
            fail_add_album_file: false,
            return_type_override: None,
            block_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

impl MemBackend {
    pub fn fail_upload_of(mut self, partseq: u32) -> Self {
        self.fail_upload_of = Some(partseq);
        self
    }

    pub fn fail_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn fail_add_album_file(mut self) -> Self {
        self.fail_add_album_file = true;
        self
    }

    /// Answers every `precreate` with `return_type` instead of the real outcome.
    pub fn with_return_type(mut self, return_type: i64) -> Self {
        self.return_type_override = Some(return_type);
        self
    }

    pub fn with_block_delay(mut self, delay: Duration) -> Self {
        self.block_delay = Some(delay);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Calls {
        self.state().calls
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn read_file(&self, fs_id: i64) -> Option<Vec<u8>> {
        self.state().contents.get(&fs_id).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }

    pub fn album_files(&self, album_id: &str) -> Vec<AlbumFile> {
        let mut files: Vec<_> = self
            .state()
            .album_files
            .get(album_id)
            .map(|files| files.values().cloned().collect())
            .unwrap_or_default();
        files.sort_by_key(|f| f.file.fs_id);
        files
    }

    fn insert_file(state: &mut State, path: &str, data: Vec<u8>) -> RemoteFile {
        state.next_fs_id += 1;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let file = RemoteFile {
            fs_id: state.next_fs_id,
            path: path.to_string(),
            server_filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            size: data.len() as u64,
            md5: md5_hex(&data),
            ctime: now,
            mtime: now,
        };

        state.by_md5.entry(file.md5.clone()).or_insert(file.fs_id);
        state.files.insert(file.fs_id, file.clone());
        state.contents.insert(file.fs_id, data);
        file
    }

    async fn receive_block(&self, block: BlockUpload) -> Result<(), MemError> {
        let partseq = block.partseq();
        let failing = self.fail_upload_of == Some(partseq);
        if let Some(delay) = self.block_delay {
            // the failing block gives up halfway, while its neighbours are still in flight
            tokio::time::sleep(if failing { delay / 2 } else { delay }).await;
        }
        if failing {
            return Err(MemError::Injected);
        }
        let data = block.data.read_to_vec().await?;

        let mut state = self.state();
        let session = state
            .sessions
            .get(&block.upload_id)
            .ok_or_else(|| MemError::UnknownSession(block.upload_id.clone()))?;
        let expected = session
            .block_list
            .get(partseq as usize)
            .ok_or(MemError::BlockMismatch { partseq })?;
        let digest = md5_hex(&data);
        if *expected != digest {
            return Err(MemError::BlockMismatch { partseq });
        }
        state.blocks.insert(digest, data);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Backend for MemBackend {
    type Error = MemError;

    async fn precreate(&self, request: &PrecreateRequest) -> Result<PrecreateResponse, MemError> {
        let mut state = self.state();
        state.calls.precreate += 1;

        let digests = &request.digests;
        if let Some(fs_id) = state.by_md5.get(&digests.content_md5) {
            let file = state.files.get(fs_id).cloned();
            return Ok(PrecreateResponse {
                return_type: self.return_type_override.unwrap_or(3),
                file,
                ..Default::default()
            });
        }

        let missing: Vec<u32> = digests
            .block_list
            .iter()
            .enumerate()
            .filter(|(_, md5)| !state.blocks.contains_key(*md5))
            .map(|(partseq, _)| partseq as u32)
            .collect();
        let return_type = if missing.is_empty() { 2 } else { 1 };

        let upload_id = format!("N1-{}", uuid::Uuid::new_v4().simple());
        state.sessions.insert(
            upload_id.clone(),
            Session {
                path: request.path.clone(),
                size: request.size,
                content_md5: digests.content_md5.clone(),
                block_list: digests.block_list.clone(),
            },
        );

        Ok(PrecreateResponse {
            return_type: self.return_type_override.unwrap_or(return_type),
            upload_id,
            block_list: missing,
            file: None,
        })
    }

    async fn upload_block(&self, block: BlockUpload) -> Result<(), MemError> {
        self.state().calls.upload_block += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.receive_block(block).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn create(
        &self,
        request: &PrecreateRequest,
        upload_id: &str,
    ) -> Result<RemoteFile, MemError> {
        let mut state = self.state();
        state.calls.create += 1;

        let session = state
            .sessions
            .get(upload_id)
            .ok_or_else(|| MemError::UnknownSession(upload_id.to_string()))?;

        let mut data = Vec::with_capacity(session.size as usize);
        for (partseq, md5) in session.block_list.iter().enumerate() {
            let block = state
                .blocks
                .get(md5)
                .ok_or(MemError::MissingBlock(partseq as u32))?;
            data.extend_from_slice(block);
        }
        if data.len() as u64 != session.size
            || md5_hex(&data) != session.content_md5
            || session.content_md5 != request.digests.content_md5
        {
            return Err(MemError::FileMismatch);
        }

        let path = session.path.clone();
        state.sessions.remove(upload_id);
        Ok(Self::insert_file(&mut state, &path, data))
    }

    async fn add_album_file(
        &self,
        album: &Album,
        file: &RemoteFile,
    ) -> Result<AlbumFile, MemError> {
        let mut state = self.state();
        state.calls.add_album_file += 1;
        if self.fail_add_album_file {
            return Err(MemError::Injected);
        }

        let album_file = AlbumFile {
            file: file.clone(),
            album_id: album.album_id.clone(),
            tid: album.tid,
            uk: self.uk,
        };
        state
            .album_files
            .entry(album.album_id.clone())
            .or_default()
            .insert(file.fs_id, album_file.clone());
        Ok(album_file)
    }

    async fn copy_album_file(&self, file: &AlbumFile) -> Result<RemoteFile, MemError> {
        let mut state = self.state();
        state.calls.copy_album_file += 1;

        let fs_id = file.file.fs_id;
        let in_album = state
            .album_files
            .get(&file.album_id)
            .is_some_and(|files| files.contains_key(&fs_id));
        let data = state.contents.get(&fs_id).cloned();
        let (true, Some(data)) = (in_album, data) else {
            return Err(MemError::NotInAlbum(fs_id, file.album_id.clone()));
        };

        Ok(Self::insert_file(&mut state, &file.file.path, data))
    }

    async fn delete_album_file(&self, file: &AlbumFile) -> Result<(), MemError> {
        let mut state = self.state();
        state.calls.delete_album_file += 1;
        if self.fail_delete {
            return Err(MemError::Injected);
        }

        state
            .album_files
            .get_mut(&file.album_id)
            .and_then(|files| files.remove(&file.file.fs_id))
            .map(|_| ())
            .ok_or_else(|| MemError::NotInAlbum(file.file.fs_id, file.album_id.clone()))
    }
}

impl MemBackend {
    /// Album ids that contain the file `fs_id`.
    pub fn albums_of(&self, fs_id: i64) -> HashSet<String> {
        self.state()
            .album_files
            .iter()
            .filter(|(_, files)| files.contains_key(&fs_id))
            .map(|(album_id, _)| album_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestSet;

    fn request(contents: &[u8], block_size: usize) -> PrecreateRequest {
        PrecreateRequest {
            path: "/memo.txt".into(),
            size: contents.len() as u64,
            digests: DigestSet {
                content_md5: md5_hex(contents),
                slice_md5: md5_hex(&contents[..contents.len().min(4)]),
                block_list: contents.chunks(block_size).map(md5_hex).collect(),
            },
        }
    }

    #[tokio::test]
    async fn fresh_upload_requests_every_block() {
        let backend = MemBackend::default();
        let response = backend.precreate(&request(b"0123456789", 4)).await.unwrap();
        assert_eq!(response.return_type, 1);
        assert_eq!(response.block_list, [0, 1, 2]);
        assert!(response.upload_id.starts_with("N1-"));
    }

    #[tokio::test]
    async fn create_without_blocks_fails() {
        let backend = MemBackend::default();
        let req = request(b"0123456789", 4);
        let response = backend.precreate(&req).await.unwrap();
        let err = backend.create(&req, &response.upload_id).await.unwrap_err();
        assert!(matches!(err, MemError::MissingBlock(0)));
        assert_eq!(backend.file_count(), 0);
    }

    #[tokio::test]
    async fn unknown_session_is_rejected() {
        let backend = MemBackend::default();
        let req = request(b"abc", 4);
        let err = backend.create(&req, "nope").await.unwrap_err();
        assert!(matches!(err, MemError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn album_membership() {
        let backend = MemBackend::default();
        let file = {
            let mut state = backend.state();
            MemBackend::insert_file(&mut state, "/a.jpg", b"jpeg".to_vec())
        };
        let album = Album {
            album_id: "al".into(),
            tid: 5,
            title: "holiday".into(),
        };

        let album_file = backend.add_album_file(&album, &file).await.unwrap();
        assert_eq!(album_file.tid, 5);
        assert_eq!(backend.albums_of(file.fs_id), HashSet::from(["al".to_string()]));

        let copy = backend.copy_album_file(&album_file).await.unwrap();
        assert_ne!(copy.fs_id, file.fs_id);
        assert_eq!(backend.read_file(copy.fs_id).unwrap(), b"jpeg");

        backend.delete_album_file(&album_file).await.unwrap();
        assert!(backend.album_files("al").is_empty());
        assert!(backend.delete_album_file(&album_file).await.is_err());
    }
}
