//! scrape-agent library
//!
//! A remotely-controlled fetch agent. It holds a connection to a controller,
//! receives SCRAPE commands, fetches the target over HTTP, and streams the
//! status, headers, and raw body back:
//! - Operation framing codec (`transport::protocol`)
//! - Connection session state machine (`session`)
//! - Command dispatch and fetch execution (`dispatch`, `fetch`)

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod fetch;
pub mod session;
pub mod transport;
