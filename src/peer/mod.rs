//! Peer wire protocol (BEP-3/9/10), used exclusively to pull an `info` dict
//! out of a single responsive peer — this crate never exchanges piece
//! payload (spec §4.2 Non-goals).

pub mod connection;
pub mod extended;
pub mod message;
pub mod session;
pub mod strategy;

pub use session::MetadataSession;
