//! Matcha core library — event normalization, command routing, thread
//! context resolution, backend dispatch, and the Mattermost transport
//! used by the `matcha` CLI.

pub mod backends;
pub mod bot;
pub mod command;
pub mod config;
pub mod event;
pub mod mattermost;
pub mod outbound;
pub mod thread;
pub mod transport;
