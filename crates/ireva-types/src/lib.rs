pub mod api;
pub mod envelope;
