//! The indexer port of the offer book
//!
//! Offers are discovered through an indexer running the agora plugin, which
//! tags covenant outputs with their terms and groups them by maker and token.
//! The offer book only ever reads from the indexer; txs built by the covenant
//! crate are submitted through `AgoraIndexer::broadcast_tx`.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod errors;
pub mod traits;
pub mod types;

pub use errors::IndexerError;
pub use traits::AgoraIndexer;
