//! dredge - a Mainline DHT crawler
//!
//! dredge joins the BitTorrent DHT ([BEP-5]), keeps itself visible in
//! other nodes' routing tables, and harvests the `announce_peer`
//! traffic that flows past. Each harvested `(info_hash, peer)` is
//! followed up over TCP with a ut_metadata exchange ([BEP-9]/[BEP-10])
//! to fetch the torrent's info dictionary. The result is a stream of
//! [`MetaInfo`](metainfo::MetaInfo) records for the caller to persist
//! or deduplicate.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`dht`] - the crawler engine: routing table, KRPC protocol,
//!   discovery, transaction management
//! - [`peer`] - peer wire handshake and ut_metadata fetching
//! - [`metainfo`] - the harvested metadata records
//!
//! # Example
//!
//! ```no_run
//! use dredge::{Config, Crawler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (crawler, mut metadata) = Crawler::bind(Config::default()).await?;
//!
//!     let engine = crawler.clone();
//!     tokio::spawn(async move { engine.run().await });
//!
//!     let mut nodes = crawler.node_count();
//!     tokio::spawn(async move {
//!         while nodes.changed().await.is_ok() {
//!             eprintln!("{} nodes", *nodes.borrow());
//!         }
//!     });
//!
//!     while let Some(info) = metadata.recv().await {
//!         println!("{} {} {}", info.info_hash, info.length, info.name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! [BEP-5]: http://bittorrent.org/beps/bep_0005.html
//! [BEP-9]: http://bittorrent.org/beps/bep_0009.html
//! [BEP-10]: http://bittorrent.org/beps/bep_0010.html

pub mod bencode;
pub mod dht;
pub mod metainfo;
pub mod peer;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht::{Config, Crawler, DhtError, KrpcMessage, Node, NodeId, RoutingTable};
pub use metainfo::{InfoHash, MetaFile, MetaInfo, MetainfoError};
pub use peer::{FetchRequest, MetadataFetcher, PeerError};
