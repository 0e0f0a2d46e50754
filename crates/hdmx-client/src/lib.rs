//! HDMI Matrix Client
//!
//! Async client and state tracker for a 4x4 HDMI matrix switch reachable
//! over a raw TCP socket.
//!
//! - [`MatrixClient`] routes inputs to outputs and answers "what is OUTn
//!   showing?" from a cache, probing the switch on a miss
//! - [`SharedState`] holds the cache and per-output callbacks fed by the
//!   switch's unsolicited status lines
//! - [`Connection`] owns the socket and its single read task
//!
//! # Example
//!
//! ```rust,no_run
//! use hdmx_client::{ClientConfig, MatrixClient};
//!
//! # async fn run() -> Result<(), hdmx_client::ClientError> {
//! let client = MatrixClient::new(ClientConfig::default());
//! client.connect("10.0.0.10", 1110).await?;
//!
//! client.register_callback(1, |code| println!("OUT1 now on code {code}"))?;
//! client.set_input_source(1, 3).await?;
//! assert_eq!(client.get_current_status(1).await.map(|i| i.get()), Some(3));
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod probe;
pub mod state;

pub use client::MatrixClient;
pub use config::{ClientConfig, ProbeStrategy};
pub use connection::Connection;
pub use error::ClientError;
pub use probe::{ProbeMethod, ProbeOutcome};
pub use state::{SharedState, StatusCallback};

/// Default address of the switch
pub const DEFAULT_HOST: &str = "10.0.0.10";

/// Default TCP control port of the switch
pub const DEFAULT_PORT: u16 = 1110;
