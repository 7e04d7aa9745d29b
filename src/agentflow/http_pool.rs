//! Shared HTTP client.
//!
//! One pooled `reqwest::Client` per process, reused by connector leaves,
//! LLM providers, and polling triggers so connections and TLS sessions are
//! recycled instead of being re-established per call.

use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    static ref SHARED_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(100)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build shared HTTP client");
}

/// Borrow the process-wide client.
pub fn shared_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}
