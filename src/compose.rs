//! Placement and copy/move between the root namespace and albums.
//!
//! | source    | destination | copy                   | move                    |
//! |-----------|-------------|------------------------|-------------------------|
//! | File      | Root        | unsupported            | unsupported             |
//! | File      | Album       | add to album           | unsupported             |
//! | AlbumFile | Root        | copy out               | copy out, delete entry  |
//! | AlbumFile | Album       | copy out, add to album | copy, delete entry      |
//!
//! A move is not atomic: once the copy succeeds the move succeeds, and a
//! failure to delete the original album entry is only logged.

use tracing::{info, warn};

use crate::backend::Backend;
use crate::error::{Error, Result, Stage};
use crate::filestore::FileStore;
use crate::object::{Album, AlbumFile, Container, Entry, RemoteFile};

impl<B: Backend> FileStore<B> {
    /// Links a freshly created root file into `dst`.
    pub async fn place(&self, dst: &Container, file: RemoteFile) -> Result<Entry> {
        match dst {
            Container::Root => Ok(Entry::File(file)),
            Container::Album(album) => self.add_to_album(album, &file).await,
        }
    }

    pub async fn copy_to(&self, src: &Entry, dst: &Container) -> Result<Entry> {
        match (src, dst) {
            (Entry::File(file), Container::Album(album)) => self.add_to_album(album, file).await,
            (Entry::AlbumFile(album_file), Container::Root) => {
                let file = self.copy_out(album_file).await?;
                Ok(Entry::File(file))
            }
            (Entry::AlbumFile(album_file), Container::Album(album)) => {
                let file = self.copy_out(album_file).await?;
                self.add_to_album(album, &file).await
            }
            (Entry::File(_), Container::Root) => Err(Error::NotSupported),
        }
    }

    /// [`FileStore::copy_to`], then a best-effort removal of the source entry.
    pub async fn move_to(&self, src: &Entry, dst: &Container) -> Result<Entry> {
        let Entry::AlbumFile(album_file) = src else {
            return Err(Error::NotSupported);
        };

        let moved = self.copy_to(src, dst).await?;
        if let Err(err) = self.backend.delete_album_file(album_file).await {
            let err = Error::remote(Stage::DeleteAlbumFile, err);
            warn!(
                fs_id = album_file.file.fs_id,
                album_id = %album_file.album_id,
                "leaving original album entry behind: {err}"
            );
        }
        Ok(moved)
    }

    async fn add_to_album(&self, album: &Album, file: &RemoteFile) -> Result<Entry> {
        let album_file = self
            .backend
            .add_album_file(album, file)
            .await
            .map_err(|e| Error::remote(Stage::AddAlbumFile, e))?;
        info!(fs_id = file.fs_id, album_id = %album.album_id, "added to album");
        Ok(Entry::AlbumFile(album_file))
    }

    async fn copy_out(&self, album_file: &AlbumFile) -> Result<RemoteFile> {
        self.backend
            .copy_album_file(album_file)
            .await
            .map_err(|e| Error::remote(Stage::CopyAlbumFile, e))
    }
}
