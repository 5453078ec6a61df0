//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::matchmaking::RoomService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: RoomService,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let match_registry = Arc::new(MatchRegistry::new());
        let rooms = RoomService::new(match_registry.clone(), config.match_config());

        Self {
            config,
            rooms,
            match_registry,
        }
    }
}
