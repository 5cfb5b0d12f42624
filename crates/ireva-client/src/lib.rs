//! Client core for the iREVA real-time layer.
//!
//! [`manager::ConnectionManager`] owns the single logical gateway connection
//! and its reconnect state machine. Incoming envelopes flow through
//! [`dispatcher::Dispatcher`] into the [`cache::QueryCache`] and out over the
//! per-type [`bus::EventBus`]; feature code subscribes to the bus rather than
//! touching the socket.

pub mod bus;
pub mod cache;
pub mod dispatcher;
pub mod manager;
pub mod watchers;
