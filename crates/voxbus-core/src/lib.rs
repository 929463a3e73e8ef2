pub mod engine;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod target;
pub mod topics;
