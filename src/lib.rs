//! Arena Duel - authoritative server and client reconciliation core for a
//! two-player lane battler.

pub mod app;
pub mod client;
pub mod config;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod util;
pub mod ws;
