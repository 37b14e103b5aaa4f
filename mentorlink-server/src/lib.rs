//! `MentorLink` development backend library.
//!
//! Serves the two HTTP lookups and the Socket.IO chat channel the client
//! uses, backed by an in-memory user directory and chat store. Exposed as a
//! library for tests and embedding.

pub mod config;
pub mod directory;
pub mod server;
pub mod store;
