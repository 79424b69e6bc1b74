// src/crawler.rs
//! Budgeted breadth-first expansion of a seed address's counterparties.
//!
//! Level L >= 1 gets `base_days * decay^(L-1)` days of lookback and
//! `base_tx * decay^(L-1)` transfers. The seed's level-1 neighbors come from
//! its already-fetched transfers; every deeper node costs one block
//! resolution (memoized per level) and one transfer fetch.
//!
//! Nodes live in an arena indexed by lowercased address. The queue holds
//! arena indices. Fetches for a batch of queued nodes run concurrently, but
//! their results are folded back in queue order by a single task, so node
//! creation, the visited set and the node cap have one serialization point.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::aggregator::light_aggregates;
use crate::blocks::BlockResolver;
use crate::config::FanoutConfig;
use crate::error::Result;
use crate::fetcher::{fetch_transfers, FetchedTransfers};
use crate::models::{sort_transfers_desc, AddressNode, Edge, FanoutGraph, Transfer, TransferKey};
use crate::rpc::ChainRpc;

const DAY_SECS: i64 = 24 * 60 * 60;

/// Already-fetched data for the seed address.
#[derive(Debug, Clone, Copy)]
pub struct Seed<'a> {
    pub address: &'a str,
    pub transfers: &'a [Transfer],
    pub window_days: u32,
    pub truncated: bool,
}

struct Graph {
    nodes: Vec<AddressNode>,
    index: HashMap<String, usize>,
    edges: Vec<Edge>,
    edge_keys: HashSet<TransferKey>,
    capped: bool,
}

impl Graph {
    fn insert(&mut self, node: AddressNode) -> usize {
        let idx = self.nodes.len();
        self.index.insert(node.address.clone(), idx);
        self.nodes.push(node);
        idx
    }

    fn add_edge(&mut self, t: &Transfer) {
        if self.edge_keys.insert(t.key()) {
            self.edges.push(Edge::from(t));
        }
    }
}

pub struct Crawler<'a, R: ChainRpc + ?Sized> {
    rpc: &'a R,
    config: FanoutConfig,
    max_count: u64,
    max_total_transfers: usize,
}

impl<'a, R: ChainRpc + ?Sized> Crawler<'a, R> {
    pub fn new(rpc: &'a R, config: FanoutConfig, max_count: u64, max_total_transfers: usize) -> Self {
        Self {
            rpc,
            config,
            max_count,
            max_total_transfers,
        }
    }

    pub async fn crawl(&self, seed: Seed<'_>, now_ts: i64) -> Result<FanoutGraph> {
        let seed_addr = seed.address.to_lowercase();
        let mut graph = Graph {
            nodes: Vec::new(),
            index: HashMap::new(),
            edges: Vec::new(),
            edge_keys: HashSet::new(),
            capped: false,
        };
        let mut queue: VecDeque<usize> = VecDeque::new();

        let seed_idx = graph.insert(AddressNode {
            address: seed_addr.clone(),
            level: 0,
            window_days: Some(seed.window_days),
            aggregates: Some(light_aggregates(&seed_addr, seed.transfers)),
            truncated: seed.truncated,
            error: None,
        });

        if self.config.levels >= 1 {
            let (days, tx_cap) = self.config.limits(1);
            let min_ts = now_ts - days as i64 * DAY_SECS;
            let mut window: Vec<Transfer> = seed
                .transfers
                .iter()
                .filter(|t| t.timestamp.is_some_and(|ts| ts >= min_ts))
                .cloned()
                .collect();
            sort_transfers_desc(&mut window);
            window.truncate(tx_cap);
            self.expand(&mut graph, &mut queue, seed_idx, &window, 1);
        }

        if !queue.is_empty() {
            self.drain(&mut graph, &mut queue, now_ts).await?;
        }

        info!(
            "Fan-out for {}: {} nodes, {} edges, capped={}",
            seed_addr,
            graph.nodes.len(),
            graph.edges.len(),
            graph.capped
        );

        Ok(FanoutGraph {
            config: self.config.clone(),
            nodes: graph.nodes,
            edges: graph.edges,
            capped: graph.capped,
        })
    }

    async fn drain(&self, graph: &mut Graph, queue: &mut VecDeque<usize>, now_ts: i64) -> Result<()> {
        let resolver = BlockResolver::new(self.rpc);
        let latest = resolver.latest().await?;
        let mut window_start: HashMap<u32, u64> = HashMap::new();
        let workers = self.config.concurrency.max(1);

        while !queue.is_empty() {
            if graph.nodes.len() >= self.config.max_nodes {
                graph.capped = true;
                debug!("Node cap {} reached with {} queued", self.config.max_nodes, queue.len());
                break;
            }

            let batch: Vec<usize> = queue.drain(..workers.min(queue.len())).collect();

            let mut jobs = Vec::with_capacity(batch.len());
            for idx in &batch {
                let level = graph.nodes[*idx].level;
                let (days, tx_cap) = self.config.limits(level);
                let start = match window_start.get(&level) {
                    Some(block) => *block,
                    None => {
                        let target = now_ts - days as i64 * DAY_SECS;
                        let block = resolver.find_block_by_timestamp(target).await?.number;
                        window_start.insert(level, block);
                        block
                    }
                };
                let cap = tx_cap.min(self.max_total_transfers).max(1);
                jobs.push((*idx, graph.nodes[*idx].address.clone(), start, cap));
            }

            let rpc = self.rpc;
            let max_count = self.max_count;
            let end = latest.number;
            let results: Vec<(usize, Result<FetchedTransfers>)> = stream::iter(jobs)
                .map(|(idx, address, start, cap)| async move {
                    (idx, fetch_transfers(rpc, &address, start, end, max_count, cap).await)
                })
                .buffered(workers)
                .collect()
                .await;

            for (idx, result) in results {
                self.integrate(graph, queue, idx, result);
            }
        }

        Ok(())
    }

    fn integrate(&self, graph: &mut Graph, queue: &mut VecDeque<usize>, idx: usize, result: Result<FetchedTransfers>) {
        let level = graph.nodes[idx].level;
        let (days, _) = self.config.limits(level);
        graph.nodes[idx].window_days = Some(days);

        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Fan-out fetch failed for {}: {}", graph.nodes[idx].address, e);
                graph.nodes[idx].error = Some(e.to_string());
                return;
            }
        };

        let address = graph.nodes[idx].address.clone();
        graph.nodes[idx].aggregates = Some(light_aggregates(&address, &fetched.transfers));
        graph.nodes[idx].truncated = fetched.truncated;

        if level < self.config.levels {
            self.expand(graph, queue, idx, &fetched.transfers, level + 1);
        }
    }

    /// Record edges for `window` and enqueue up to `max_neighbors_per_node`
    /// unvisited counterparties, lexicographically first.
    fn expand(&self, graph: &mut Graph, queue: &mut VecDeque<usize>, idx: usize, window: &[Transfer], next_level: u32) {
        let address = graph.nodes[idx].address.clone();
        let mut candidates: BTreeSet<&str> = BTreeSet::new();

        for t in window {
            if t.from.is_empty() || t.to.is_empty() {
                continue;
            }
            graph.add_edge(t);
            if let Some(other) = t.counterparty(&address) {
                if other != address && !graph.index.contains_key(other) {
                    candidates.insert(other);
                }
            }
        }

        let mut added = 0usize;
        for neighbor in candidates.into_iter().take(self.config.max_neighbors_per_node) {
            if graph.nodes.len() >= self.config.max_nodes {
                graph.capped = true;
                break;
            }
            let new_idx = graph.insert(AddressNode {
                address: neighbor.to_string(),
                level: next_level,
                window_days: None,
                aggregates: None,
                truncated: false,
                error: None,
            });
            queue.push_back(new_idx);
            added += 1;
        }

        debug!(
            "Expanded {} (level {}) → {} new neighbors at level {}",
            address,
            next_level - 1,
            added,
            next_level
        );
    }
}
