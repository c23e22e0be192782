use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cancel::CancelSignal;
use crate::error::Result;
use crate::plan::BlockPlan;

const READ_BUF: usize = 64 * 1024;

/// The fingerprints `precreate` and `create` need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSet {
    /// MD5 of the whole file.
    pub content_md5: String,
    /// MD5 of the first `slice_size` bytes only.
    pub slice_md5: String,
    /// One MD5 per block, indexed by `partseq`.
    pub block_list: Vec<String>,
}

impl DigestSet {
    /// The `block_list` form field, a JSON array of hex digests.
    pub fn block_list_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.block_list)
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    base16ct::lower::encode_string(&Md5::digest(data))
}

/// Hashes `reader` block by block in a single forward pass.
///
/// `reader` must be at offset zero. End of stream ends the current block
/// early rather than failing.
pub async fn compute(
    mut reader: impl AsyncRead + Unpin,
    plan: &BlockPlan,
    slice_size: u64,
    signal: &CancelSignal,
) -> Result<DigestSet> {
    let mut file_hash = Md5::new();
    let mut block_hash = Md5::new();
    let mut slice_hash = Md5::new();
    let mut hashed = 0u64;

    let mut buf = vec![0; READ_BUF];
    let mut block_list = Vec::with_capacity(plan.block_count());

    for block in &plan.blocks {
        signal.check()?;

        let mut remaining = block.len;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let read = reader.read(&mut buf[..want]).await?;
            if read == 0 {
                break;
            }
            let data = &buf[..read];

            file_hash.update(data);
            block_hash.update(data);
            if hashed < slice_size {
                let in_slice = (slice_size - hashed).min(read as u64) as usize;
                slice_hash.update(&data[..in_slice]);
            }

            hashed += read as u64;
            remaining -= read as u64;
        }

        block_list.push(base16ct::lower::encode_string(&block_hash.finalize_reset()));
    }

    Ok(DigestSet {
        content_md5: base16ct::lower::encode_string(&file_hash.finalize()),
        slice_md5: base16ct::lower::encode_string(&slice_hash.finalize()),
        block_list,
    })
}
