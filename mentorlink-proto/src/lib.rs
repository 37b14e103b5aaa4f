//! Shared protocol definitions for the `MentorLink` chat wire format.

pub mod api;
pub mod event;
pub mod packet;
pub mod room;
pub mod time;
