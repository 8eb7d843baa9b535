//! telemon agent: polls host and process statistics into a local store and
//! periodically reports the changes to the server.

pub mod config;
pub mod netaddr;
pub mod poller;
pub mod sender;
pub mod store;
pub mod transport;
