//! # meshgate
//!
//! A gateway daemon that bridges a LoRa mesh radio to durable local
//! storage. It owns exactly one connection to the radio at a time, watches
//! that connection for silent failure, deduplicates the packets the mesh
//! redundantly delivers, and routes what survives into per-lane append-only
//! partitions that downstream consumers read.
//!
//! ## Architecture
//!
//! - [`link`] - single-connection lifecycle manager, stream framing, and the
//!   silence watchdog
//! - [`ingest`] - frame decoding, classification, and the fingerprint
//!   deduplication cache
//! - [`store`] - sled-backed per-lane partitions, startup migration, and
//!   retention eviction
//! - [`retry`] - bounded retry with exponential backoff for flaky external
//!   services
//! - [`gateway`] - the runtime that wires it all together
//! - [`services`] - external feeds (weather) behind the retry wrapper

pub mod config;
pub mod gateway;
pub mod ingest;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod retry;
pub mod services;
pub mod store;
