// src/blocks.rs
use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::error::Result;
use crate::models::BlockInfo;
use crate::rpc::ChainRpc;

/// Maps timestamps to blocks. Block lookups are cached for the lifetime of
/// the resolver, which is one extraction or one crawl.
pub struct BlockResolver<'a, R: ChainRpc + ?Sized> {
    rpc: &'a R,
    cache: Mutex<HashMap<u64, BlockInfo>>,
}

impl<'a, R: ChainRpc + ?Sized> BlockResolver<'a, R> {
    pub fn new(rpc: &'a R) -> Self {
        Self {
            rpc,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, number: u64) -> Option<BlockInfo> {
        self.cache.lock().ok().and_then(|c| c.get(&number).copied())
    }

    pub async fn block(&self, number: u64) -> Result<BlockInfo> {
        if let Some(info) = self.cached(number) {
            return Ok(info);
        }
        let info = self.rpc.block_by_number(number).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(number, info);
        }
        Ok(info)
    }

    pub async fn latest(&self) -> Result<BlockInfo> {
        let number = self.rpc.block_number().await?;
        self.block(number).await
    }

    /// Latest block whose timestamp is `<= target` (floor semantics).
    ///
    /// When every block is newer than the target, block 0 is returned. Any
    /// block lookup failing aborts the search; there is no retry here.
    pub async fn find_block_by_timestamp(&self, target: i64) -> Result<BlockInfo> {
        let latest = self.rpc.block_number().await?;

        let mut low: u64 = 0;
        let mut high: u64 = latest;
        let mut best = self.block(0).await?;
        let mut steps = 0u32;

        while low <= high {
            let mid = low + (high - low) / 2;
            let info = self.block(mid).await?;
            steps += 1;
            if info.timestamp == target {
                best = info;
                break;
            }
            if info.timestamp < target {
                best = info;
                low = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                high = mid - 1;
            }
        }

        debug!(
            "Resolved ts {} → block {} (ts {}) in {} steps",
            target, best.number, best.timestamp, steps
        );
        Ok(best)
    }
}
