//! Cloud-facing clients: claim/complete/heartbeat RPCs (§4.C) and the
//! rendered-payload fetcher (§4.D). Both share the same base URL and
//! anon-key auth pattern.

pub mod client;
pub mod fetcher;

pub use client::CloudClient;
pub use fetcher::PayloadFetcher;
