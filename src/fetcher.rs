// src/fetcher.rs
use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::Result;
use crate::models::{sort_transfers_desc, Transfer, TransferKey};
use crate::rpc::{ChainRpc, Direction, SortOrder, TransferQuery};

/// Transfers for one address over one block range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedTransfers {
    /// Unique, ordered by `(block, txIndex, logIndex)` descending.
    pub transfers: Vec<Transfer>,
    /// Collection stopped at the cap while more data may have existed.
    pub truncated: bool,
}

/// Page through both directions until the index is exhausted or `max_total`
/// unique transfers are held. Self-transfers and shifting page boundaries can
/// return the same transfer twice; the uniqueness key drops repeats.
pub async fn fetch_transfers<R: ChainRpc + ?Sized>(
    rpc: &R,
    address: &str,
    from_block: u64,
    to_block: u64,
    max_count: u64,
    max_total: usize,
) -> Result<FetchedTransfers> {
    let max_total = max_total.max(1);
    let mut seen: HashSet<TransferKey> = HashSet::new();
    let mut collected: Vec<Transfer> = Vec::new();
    let mut truncated = false;

    'directions: for direction in Direction::BOTH {
        let mut query = TransferQuery::new(
            address,
            direction,
            format!("0x{:x}", from_block),
            format!("0x{:x}", to_block),
            max_count,
        );
        let mut pages = 0usize;

        loop {
            let page = rpc.asset_transfers(&query).await?;
            pages += 1;

            for item in page.transfers {
                if !seen.insert(item.key()) {
                    continue;
                }
                if collected.len() >= max_total {
                    // A new transfer past the cap was left unread.
                    truncated = true;
                    debug!(
                        "{} {:?}: cap {} reached after {} pages",
                        address, direction, max_total, pages
                    );
                    break 'directions;
                }
                collected.push(item);
            }

            match page.page_key {
                Some(key) if !key.is_empty() => {
                    if collected.len() >= max_total {
                        truncated = true;
                        debug!(
                            "{} {:?}: cap {} reached with more pages pending",
                            address, direction, max_total
                        );
                        break 'directions;
                    }
                    query.page_key = Some(key);
                }
                _ => break,
            }
        }
        debug!("{} {:?}: {} pages", address, direction, pages);
    }

    sort_transfers_desc(&mut collected);
    collected.truncate(max_total);

    info!(
        "Fetched {} transfers for {} (blocks {} → {}, truncated={})",
        collected.len(),
        address,
        from_block,
        to_block,
        truncated
    );

    Ok(FetchedTransfers {
        transfers: collected,
        truncated,
    })
}

/// Earliest transfer touching `address` across all history.
pub async fn fetch_first_transfer<R: ChainRpc + ?Sized>(rpc: &R, address: &str) -> Result<Option<Transfer>> {
    let mut earliest: Option<Transfer> = None;

    for direction in Direction::BOTH {
        let mut query = TransferQuery::new(address, direction, "0x0".to_string(), "latest".to_string(), 1);
        query.order = Some(SortOrder::Asc);
        let page = rpc.asset_transfers(&query).await?;
        let Some(candidate) = page.transfers.into_iter().next() else {
            continue;
        };
        earliest = match earliest {
            None => Some(candidate),
            Some(current) => match (candidate.block_num, current.block_num) {
                (Some(c), Some(e)) if c < e => Some(candidate),
                (Some(_), None) => Some(candidate),
                _ => Some(current),
            },
        };
    }

    Ok(earliest)
}

/// Transfer count over `from_block..=to_block` (`0` for all time), bounded by
/// `max_pages` per direction. Raw page sizes are summed without deduplication.
pub async fn count_transfers<R: ChainRpc + ?Sized>(
    rpc: &R,
    address: &str,
    from_block: u64,
    to_block: u64,
    max_count: u64,
    max_pages: usize,
) -> Result<(u64, bool)> {
    let mut total = 0u64;
    let mut truncated = false;

    for direction in Direction::BOTH {
        let mut query = TransferQuery::new(
            address,
            direction,
            format!("0x{:x}", from_block),
            format!("0x{:x}", to_block),
            max_count,
        );
        query.with_metadata = false;
        query.order = None;
        let mut pages = 0usize;

        loop {
            let page = rpc.asset_transfers(&query).await?;
            total += page.transfers.len() as u64;
            pages += 1;
            match page.page_key {
                Some(key) if !key.is_empty() => {
                    if pages >= max_pages.max(1) {
                        truncated = true;
                        break;
                    }
                    query.page_key = Some(key);
                }
                _ => break,
            }
        }
    }

    info!(
        "Counted {} transfers for {} (blocks {} → {}, truncated={})",
        total, address, from_block, to_block, truncated
    );
    Ok((total, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::transfer;
    use crate::rpc::mock::MockRpc;

    const ME: &str = "0x00000000000000000000000000000000000000aa";

    fn rpc_with(transfers: Vec<Transfer>) -> MockRpc {
        let mut rpc = MockRpc::with_blocks((0..100).map(|i| 1_000 + i * 12).collect());
        rpc.transfers = transfers;
        rpc
    }

    fn assert_unique_and_ordered(list: &[Transfer]) {
        let keys: HashSet<_> = list.iter().map(|t| t.key()).collect();
        assert_eq!(keys.len(), list.len(), "duplicate transfers");
        for w in list.windows(2) {
            assert!(w[0].order_key() >= w[1].order_key(), "ordering violated");
        }
    }

    #[tokio::test]
    async fn merges_both_directions_in_descending_order() {
        let rpc = rpc_with(vec![
            transfer(ME, "0xb", 10, 0, None),
            transfer("0xc", ME, 30, 1, None),
            transfer(ME, "0xd", 20, 4, None),
            transfer("0xe", ME, 20, 2, None),
            transfer("0xf", "0xg", 25, 0, None),
        ]);
        let got = fetch_transfers(&rpc, ME, 0, 99, 1000, 100).await.unwrap();
        assert!(!got.truncated);
        let blocks: Vec<_> = got.transfers.iter().map(|t| t.order_key()).collect();
        assert_eq!(blocks, vec![(30, 0, 1), (20, 0, 4), (20, 0, 2), (10, 0, 0)]);
        assert_unique_and_ordered(&got.transfers);
    }

    #[tokio::test]
    async fn self_transfers_are_deduplicated_across_directions() {
        let rpc = rpc_with(vec![
            transfer(ME, ME, 15, 0, None),
            transfer(ME, "0xb", 14, 0, None),
            transfer("0xb", ME, 13, 0, None),
        ]);
        let got = fetch_transfers(&rpc, ME, 0, 99, 1000, 100).await.unwrap();
        assert_eq!(got.transfers.len(), 3);
        assert_unique_and_ordered(&got.transfers);
    }

    #[tokio::test]
    async fn follows_page_keys_until_exhausted() {
        let list: Vec<_> = (0..7).map(|i| transfer(ME, "0xb", 10 + i, 0, None)).collect();
        let rpc = rpc_with(list);
        let got = fetch_transfers(&rpc, ME, 0, 99, 2, 100).await.unwrap();
        assert_eq!(got.transfers.len(), 7);
        assert!(!got.truncated);
        // 4 outgoing pages, 1 empty incoming page
        assert_eq!(rpc.transfer_calls.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cap_truncates_and_flags() {
        let list: Vec<_> = (0..7).map(|i| transfer(ME, "0xb", 10 + i, 0, None)).collect();
        let rpc = rpc_with(list);
        let got = fetch_transfers(&rpc, ME, 0, 99, 2, 3).await.unwrap();
        assert_eq!(got.transfers.len(), 3);
        assert!(got.truncated);
        assert_unique_and_ordered(&got.transfers);
    }

    #[tokio::test]
    async fn exact_fit_on_last_page_is_not_truncated() {
        let rpc = rpc_with(vec![
            transfer("0xb", ME, 12, 0, None),
            transfer("0xc", ME, 11, 0, None),
        ]);
        let got = fetch_transfers(&rpc, ME, 0, 99, 2, 2).await.unwrap();
        assert_eq!(got.transfers.len(), 2);
        assert!(!got.truncated);
    }

    #[tokio::test]
    async fn exact_cap_on_outgoing_with_empty_incoming_is_not_truncated() {
        let list: Vec<_> = (0..3).map(|i| transfer(ME, "0xb", 10 + i, 0, None)).collect();
        let rpc = rpc_with(list);
        let got = fetch_transfers(&rpc, ME, 0, 99, 1000, 3).await.unwrap();
        assert_eq!(got.transfers.len(), 3);
        assert!(!got.truncated);
    }

    #[tokio::test]
    async fn exact_cap_on_outgoing_with_pending_incoming_is_truncated() {
        let mut list: Vec<_> = (0..3).map(|i| transfer(ME, "0xb", 10 + i, 0, None)).collect();
        list.push(transfer("0xc", ME, 40, 0, None));
        let rpc = rpc_with(list);
        let got = fetch_transfers(&rpc, ME, 0, 99, 1000, 3).await.unwrap();
        assert_eq!(got.transfers.len(), 3);
        assert!(got.truncated);
    }

    #[tokio::test]
    async fn exact_cap_ignores_self_transfer_repeats() {
        let rpc = rpc_with(vec![transfer(ME, ME, 15, 0, None), transfer(ME, "0xb", 14, 0, None)]);
        let got = fetch_transfers(&rpc, ME, 0, 99, 1000, 2).await.unwrap();
        assert_eq!(got.transfers.len(), 2);
        assert!(!got.truncated);
    }

    #[tokio::test]
    async fn block_range_is_respected() {
        let rpc = rpc_with(vec![
            transfer(ME, "0xb", 5, 0, None),
            transfer(ME, "0xb", 50, 0, None),
            transfer(ME, "0xb", 95, 0, None),
        ]);
        let got = fetch_transfers(&rpc, ME, 10, 60, 1000, 100).await.unwrap();
        assert_eq!(got.transfers.len(), 1);
        assert_eq!(got.transfers[0].block_num, Some(50));
    }

    #[tokio::test]
    async fn first_transfer_picks_lowest_block_across_directions() {
        let rpc = rpc_with(vec![
            transfer(ME, "0xb", 40, 0, None),
            transfer("0xc", ME, 12, 0, None),
            transfer(ME, "0xd", 30, 0, None),
        ]);
        let first = fetch_first_transfer(&rpc, ME).await.unwrap().unwrap();
        assert_eq!(first.block_num, Some(12));
    }

    #[tokio::test]
    async fn first_transfer_is_none_without_history() {
        let rpc = rpc_with(vec![]);
        assert!(fetch_first_transfer(&rpc, ME).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn count_stops_at_page_limit() {
        let list: Vec<_> = (0..9).map(|i| transfer(ME, "0xb", 10 + i, 0, None)).collect();
        let rpc = rpc_with(list);

        let (total, truncated) = count_transfers(&rpc, ME, 0, 99, 2, 100).await.unwrap();
        assert_eq!((total, truncated), (9, false));

        let (total, truncated) = count_transfers(&rpc, ME, 0, 99, 2, 2).await.unwrap();
        assert_eq!((total, truncated), (4, true));
    }

    #[tokio::test]
    async fn count_respects_the_window_start() {
        let rpc = rpc_with(vec![
            transfer(ME, "0xb", 5, 0, None),
            transfer("0xc", ME, 40, 0, None),
            transfer(ME, "0xd", 60, 0, None),
        ]);
        let (total, truncated) = count_transfers(&rpc, ME, 30, 99, 1000, 50).await.unwrap();
        assert_eq!((total, truncated), (2, false));
    }
}
