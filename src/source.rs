use std::io::{self, SeekFrom};

use tempfile::NamedTempFile;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, Take};

use crate::plan::BlockDescriptor;

/// A local, seekable copy of the caller's stream.
///
/// The backing file is removed when this is dropped.
#[derive(Debug)]
pub struct TempSource {
    file: NamedTempFile,
    size: u64,
}

impl TempSource {
    /// Copies `stream` to a temporary file. The stream must yield exactly
    /// `size` bytes.
    pub async fn materialize(mut stream: impl AsyncRead + Unpin, size: u64) -> io::Result<Self> {
        let file = NamedTempFile::new()?;

        let mut writer = File::from_std(file.reopen()?);
        let written = tokio::io::copy(&mut stream, &mut writer).await?;
        writer.flush().await?;

        if written != size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("stream yielded {written} bytes, expected {size}"),
            ));
        }

        Ok(Self { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// A fresh reader positioned at the start of the file.
    pub async fn reader(&self) -> io::Result<File> {
        Ok(File::from_std(self.file.reopen()?))
    }

    /// An independent reader over exactly the bytes of `block`.
    pub async fn block(&self, block: &BlockDescriptor) -> io::Result<BlockData> {
        let mut file = self.reader().await?;
        file.seek(SeekFrom::Start(block.offset)).await?;
        Ok(BlockData {
            descriptor: *block,
            reader: file.take(block.len),
        })
    }
}

/// The contents of one block, read lazily from the temporary file.
#[derive(Debug)]
pub struct BlockData {
    descriptor: BlockDescriptor,
    reader: Take<File>,
}

impl BlockData {
    pub fn descriptor(&self) -> &BlockDescriptor {
        &self.descriptor
    }

    pub fn into_reader(self) -> Take<File> {
        self.reader
    }

    pub async fn read_to_vec(mut self) -> io::Result<Vec<u8>> {
        let mut data = Vec::with_capacity(self.descriptor.len as usize);
        self.reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}
