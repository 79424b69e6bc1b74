pub mod aggregator;
pub mod api;
pub mod blocks;
pub mod config;
pub mod crawler;
pub mod enrichment;
pub mod error;
pub mod features;
pub mod fetcher;
pub mod infra;
pub mod lists;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod rpc;
pub mod scoring;
pub mod store;
pub mod token_cache;
