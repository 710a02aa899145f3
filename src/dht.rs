//! Mainline DHT crawler engine ([BEP-5]).
//!
//! This module joins the Kademlia overlay and participates in just
//! enough of the KRPC protocol to be kept in other nodes' routing
//! tables: it answers `ping`, `find_node` and `get_peers`, and it
//! acknowledges `announce_peer`. It never serves `values` — the point
//! is not to be a good citizen but to be *visible*, so that announce
//! traffic flows this way.
//!
//! # Overview
//!
//! - [`Crawler`] — the engine: UDP endpoint, dispatch workers,
//!   discovery ticker, bootstrap.
//! - [`RoutingTable`] — a bucket trie over 160-bit ids with an address
//!   index for O(1) ingress routing.
//! - [`TransactionManager`] — bounded, expiring correlation of replies
//!   to requests.
//! - [`KrpcMessage`] — the wire model, a tagged variant per message
//!   kind so handler dispatch is a `match`.
//!
//! Harvested announces are pushed to the metadata fetcher
//! (`crate::peer`); successful fetches come back to the caller as
//! [`MetaInfo`](crate::metainfo::MetaInfo) records.
//!
//! # Getting started
//!
//! ```no_run
//! use dredge::dht::{Config, Crawler};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (crawler, mut metadata) = Crawler::bind(Config::default()).await?;
//!
//! let engine = crawler.clone();
//! tokio::spawn(async move { engine.run().await });
//!
//! while let Some(info) = metadata.recv().await {
//!     println!("{} {}", info.info_hash, info.name);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html

mod config;
mod crawler;
mod error;
mod fanout;
mod init_queue;
mod message;
mod node;
mod routing;
mod token;
mod transactions;

pub use config::{Config, GenId, NodeFilter, BOOTSTRAP_NODES};
pub use crawler::Crawler;
pub use error::DhtError;
pub use message::{Body, KrpcMessage, Query, Reply, TransactionId};
pub use node::{Node, NodeId, NodeInfo};
pub use routing::{RoutingTable, TableSweep};
pub use transactions::{Transaction, TransactionManager, TxKind};

#[cfg(test)]
mod tests;
