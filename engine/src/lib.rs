//! PlayDeck engine: a web-controlled music player where each folder under the
//! music directory is a playlist.

pub mod api;
pub mod audio;
pub mod catalog;
pub mod config;
pub mod duration;
pub mod error;
pub mod player;
pub mod store;
