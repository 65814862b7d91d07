//! Session history for flowagent.
//!
//! A session is an opaque id mapped to the messages exchanged so far. The
//! [`SessionStore`] is deliberately small: `get` returns an empty history for
//! an unknown id, and `put` overwrites unconditionally. Two turns that read
//! the same history and write back independently will lose one of the
//! writes; [`SessionLocks`] lets a caller hold a per-session lock for the
//! whole read-modify-write to prevent that.

mod locks;
mod store;

pub use locks::SessionLocks;
pub use store::{InMemorySessionStore, SessionStore};
