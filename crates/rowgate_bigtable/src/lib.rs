#![forbid(unsafe_code)]

//! Cloud Bigtable backend for the gateway.
//!
//! Speaks the Bigtable Admin v2 and Data v2 REST surfaces over a single
//! pooled blocking HTTP agent. Calls block the current thread; async
//! callers should run them on a blocking pool.

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod merge;

pub use auth::{CredentialSource, TokenProvider};
pub use client::BigtableRestClient;
pub use config::BigtableConfig;
