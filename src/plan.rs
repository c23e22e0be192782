/// One fixed-size slice of the upload, addressed by `partseq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    pub partseq: u32,
    pub offset: u64,
    pub len: u64,
}

/// The deterministic split of a file of `total_size` bytes into blocks of
/// `block_size`, with the last block holding the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockPlan {
    pub total_size: u64,
    pub block_size: u64,
    pub blocks: Vec<BlockDescriptor>,
}

impl BlockPlan {
    /// Callers reject `total_size == 0` and `block_size == 0` beforehand.
    pub fn new(total_size: u64, block_size: u64) -> Self {
        debug_assert!(total_size > 0 && block_size > 0);

        let count = total_size.div_ceil(block_size);
        let last_len = match total_size % block_size {
            0 => block_size,
            rest => rest,
        };

        let blocks = (0..count)
            .map(|i| BlockDescriptor {
                partseq: i as u32,
                offset: i * block_size,
                len: if i + 1 == count { last_len } else { block_size },
            })
            .collect();

        Self {
            total_size,
            block_size,
            blocks,
        }
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn get(&self, partseq: u32) -> Option<&BlockDescriptor> {
        self.blocks.get(partseq as usize)
    }
}
