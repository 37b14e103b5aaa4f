//! `MentorLink` terminal chat client library.
//!
//! The [`chat`] module holds the session protocol for one two-party
//! conversation; [`transport`] provides the real-time connection it runs
//! on, and [`api`] the HTTP lookups. [`view`], [`app`] and [`ui`] bind a
//! session to the terminal front end.

pub mod api;
pub mod app;
pub mod chat;
pub mod config;
pub mod transport;
pub mod ui;
pub mod view;
