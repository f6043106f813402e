use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

const REQUEST_TIMEOUT_SECS: u64 = 10;
const CONNECT_TIMEOUT_SECS: u64 = 10;
/// Longest silence tolerated on an event stream before it counts as dropped.
const STREAM_IDLE_SECS: u64 = 30;

static CLIENT: OnceCell<Client> = OnceCell::new();
static STREAM_CLIENT: OnceCell<Client> = OnceCell::new();

/// Request/response client for roster lookups.
pub fn http_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build http client")
    })
}

/// Client for long-lived event streams. The blocking client applies its
/// timeout to each body read rather than the whole response, so it bounds
/// idle time without capping stream length.
pub fn stream_client() -> Result<&'static Client> {
    STREAM_CLIENT.get_or_try_init(|| {
        Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(STREAM_IDLE_SECS))
            .build()
            .context("failed to build stream client")
    })
}
