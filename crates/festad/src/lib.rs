//! festad — event-photo face matching daemon.
//!
//! Guests register with a selfie; event photos are uploaded in batches; a
//! match pass copies every photo containing a registered face into that
//! guest's album directory, served over HTTP.

pub mod api;
pub mod config;
pub mod engine;
pub mod matcher;
pub mod store;
