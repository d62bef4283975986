// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Exchange names, routing keys and the payloads shared by the server and client roles.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Builds a `<prefix>.<username>` routing key.
pub fn player_key(prefix: &str, username: &str) -> String {
    format!("{prefix}.{username}")
}

/// Builds a `<prefix>.*` topic pattern matching every player.
pub fn any_player(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// Pause/resume signal broadcast by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    #[serde(rename = "IsPaused")]
    pub is_paused: bool,
}

/// Append-only log record written by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    pub current_time: SystemTime,
    pub message: String,
    pub username: String,
}
