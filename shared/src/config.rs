//! Game parameters agreed on by server and client.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Numeric and string parameters consumed once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Edge length of one grid square in pixels.
    pub square_size: i32,
    /// Pixels per tick for players.
    pub velocity_player: i32,
    /// Pixels per tick for enemies.
    pub velocity_enemy: i32,
    /// World height in squares.
    pub world_height: i32,
    /// World width in squares.
    pub world_width: i32,
    /// Chance that a free square receives a box at world generation.
    pub box_ratio: f64,
    /// Chance that a free square receives an enemy at world generation.
    pub enemy_ratio: f64,
    /// Per-tick chance that an enemy rolls a new direction.
    pub enemy_key_change_possibility: f64,
    /// Milliseconds between two ticks.
    pub tick_rate_ms: u64,
    pub auth_length: usize,
    pub name_max_length: usize,
    pub bomb_count_start: u32,
    pub bomb_fuse_seconds: u64,
    /// Minimum distance in squares between a new spawn and any movable.
    pub spawn_square_distance_from_others: i32,
    /// Free squares that must be reachable from a new spawn.
    pub spawn_player_square_free_space: usize,
    /// Seed for the world and token generators. Entropy is used when unset.
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            square_size: 50,
            velocity_player: 6,
            velocity_enemy: 1,
            world_height: 9,
            world_width: 13,
            box_ratio: 0.25,
            enemy_ratio: 0.05,
            enemy_key_change_possibility: 0.0015,
            tick_rate_ms: 1000 / 58,
            auth_length: 26,
            name_max_length: 15,
            bomb_count_start: 1,
            bomb_fuse_seconds: 2,
            spawn_square_distance_from_others: 3,
            spawn_player_square_free_space: 3,
            seed: None,
        }
    }
}

impl GameConfig {
    /// Tick count in one second.
    pub fn ticks_per_second(&self) -> u64 {
        1000 / self.tick_rate_ms.max(1)
    }

    pub fn bomb_lifetime_ticks(&self) -> u64 {
        self.bomb_fuse_seconds * self.ticks_per_second()
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms.max(1))
    }
}
