pub mod connection;
pub mod emitter;
pub mod registry;
