//! Types the session publishes to its host UI.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever event bus it uses.

pub mod events;
