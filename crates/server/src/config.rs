//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub food: FoodConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Path::new("config.toml");
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No config.toml found, creating default config");
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            simulation: SimulationConfig::default(),
            player: PlayerConfig::default(),
            food: FoodConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

/// Arena dimensions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    #[serde(default = "default_world_size")]
    pub width: f32,
    #[serde(default = "default_world_size")]
    pub height: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: default_world_size(),
            height: default_world_size(),
        }
    }
}

fn default_world_size() -> f32 {
    2000.0
}

/// Tick loop and solver settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    /// Lower bound for the adaptive tick rate.
    #[serde(default = "default_min_fps")]
    pub min_fps: f64,
    /// Upper bound for the adaptive tick rate.
    #[serde(default = "default_max_fps")]
    pub max_fps: f64,
    /// Constraint solver iterations per step.
    #[serde(default = "default_solver_iterations")]
    pub solver_iterations: usize,
    /// Under-budget drift required before raising the tick rate.
    #[serde(default = "default_speed_up_ticks")]
    pub speed_up_ticks: i32,
    /// Over-budget drift required before lowering the tick rate. Kept
    /// smaller than `speed_up_ticks`.
    #[serde(default = "default_slow_down_ticks")]
    pub slow_down_ticks: i32,
    /// Recompute propulsion and fixture sizes every N ticks.
    #[serde(default = "default_propulsion_period")]
    pub propulsion_period_ticks: u64,
    /// Drain the food spawn queue every N ticks.
    #[serde(default = "default_food_flush_period")]
    pub food_flush_period_ticks: u64,
    /// Maximum spawn tasks executed per drain.
    #[serde(default = "default_food_tasks_per_flush")]
    pub food_tasks_per_flush: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_fps: default_min_fps(),
            max_fps: default_max_fps(),
            solver_iterations: default_solver_iterations(),
            speed_up_ticks: default_speed_up_ticks(),
            slow_down_ticks: default_slow_down_ticks(),
            propulsion_period_ticks: default_propulsion_period(),
            food_flush_period_ticks: default_food_flush_period(),
            food_tasks_per_flush: default_food_tasks_per_flush(),
        }
    }
}

fn default_min_fps() -> f64 {
    10.0
}
fn default_max_fps() -> f64 {
    45.0
}
fn default_solver_iterations() -> usize {
    4
}
fn default_speed_up_ticks() -> i32 {
    60
}
fn default_slow_down_ticks() -> i32 {
    5
}
fn default_propulsion_period() -> u64 {
    5
}
fn default_food_flush_period() -> u64 {
    7
}
fn default_food_tasks_per_flush() -> usize {
    5
}

/// Player cookie settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Cruise speed the propulsion controller steers toward.
    #[serde(default = "default_player_speed")]
    pub speed: f32,
    /// Target speed while the turbo flag is held.
    #[serde(default = "default_turbo_speed")]
    pub turbo_speed: f32,
    /// Score granted to every fresh session.
    #[serde(default = "default_start_score")]
    pub start_score: u64,
    /// Falling below this after a clash ends the run.
    #[serde(default = "default_min_score")]
    pub min_score: u64,
    /// Thrust stays reduced for this long after a cookie clash.
    #[serde(default = "default_contact_penalty_ms")]
    pub contact_penalty_ms: u64,
    /// Cookies never spawn closer than this to an arena wall.
    #[serde(default = "default_spawn_margin")]
    pub spawn_margin: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: default_player_speed(),
            turbo_speed: default_turbo_speed(),
            start_score: default_start_score(),
            min_score: default_min_score(),
            contact_penalty_ms: default_contact_penalty_ms(),
            spawn_margin: default_spawn_margin(),
        }
    }
}

fn default_player_speed() -> f32 {
    45.0
}
fn default_turbo_speed() -> f32 {
    70.0
}
fn default_start_score() -> u64 {
    100
}
fn default_min_score() -> u64 {
    50
}
fn default_contact_penalty_ms() -> u64 {
    2000
}
fn default_spawn_margin() -> f32 {
    300.0
}

/// Food pellet settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FoodConfig {
    /// Replenishment keeps at least this many pellets alive.
    #[serde(default = "default_food_min_count")]
    pub min_count: u64,
    /// Pellets queued per replenishment cycle, regardless of deficit.
    #[serde(default = "default_food_spawn_batch")]
    pub spawn_batch: u64,
    #[serde(default = "default_replenish_period_ms")]
    pub replenish_period_ms: u64,
    /// Minimum age before a pellet can be eaten.
    #[serde(default = "default_maturation_ms")]
    pub maturation_ms: u64,
    /// Magnitude of the random impulse scattering freshly spawned pellets.
    #[serde(default = "default_dispersion")]
    pub dispersion: f32,
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            min_count: default_food_min_count(),
            spawn_batch: default_food_spawn_batch(),
            replenish_period_ms: default_replenish_period_ms(),
            maturation_ms: default_maturation_ms(),
            dispersion: default_dispersion(),
        }
    }
}

fn default_food_min_count() -> u64 {
    10_000
}
fn default_food_spawn_batch() -> u64 {
    500
}
fn default_replenish_period_ms() -> u64 {
    2000
}
fn default_maturation_ms() -> u64 {
    500
}
fn default_dispersion() -> f32 {
    10.0
}

/// Outbound queue and broadcast cadence settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastConfig {
    /// Minimum interval between viewport snapshots for one session.
    #[serde(default = "default_update_period_ms")]
    pub update_period_ms: u64,
    /// Capacity of each session's outbound queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
    /// Capacity of each collision event queue.
    #[serde(default = "default_collision_queue_capacity")]
    pub collision_queue_capacity: usize,
    #[serde(default = "default_stats_period_ms")]
    pub stats_period_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            update_period_ms: default_update_period_ms(),
            outbound_capacity: default_outbound_capacity(),
            collision_queue_capacity: default_collision_queue_capacity(),
            stats_period_ms: default_stats_period_ms(),
        }
    }
}

fn default_update_period_ms() -> u64 {
    100
}
fn default_outbound_capacity() -> usize {
    1024
}
fn default_collision_queue_capacity() -> usize {
    1024
}
fn default_stats_period_ms() -> u64 {
    5000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_coherent() {
        let config = Config::default();
        assert!(config.simulation.min_fps < config.simulation.max_fps);
        assert!(config.player.speed < config.player.turbo_speed);
        assert!(config.player.min_score < config.player.start_score);
        assert!(config.simulation.slow_down_ticks < config.simulation.speed_up_ticks);
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.world.width, config.world.width);
        assert_eq!(back.food.min_count, config.food.min_count);
        assert_eq!(back.broadcast.update_period_ms, config.broadcast.update_period_ms);
    }

    #[test]
    fn empty_file_fills_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.player.start_score, 100);
        assert_eq!(config.player.min_score, 50);
    }
}
