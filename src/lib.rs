pub mod config;
pub mod dispatch;
pub mod event;
pub mod feed;
pub mod http_client;
pub mod logging;
pub mod outbox;
pub mod replay;
pub mod roster;
pub mod signal;
pub mod sim_feed;
pub mod state;
pub mod stream_feed;
pub mod views;
