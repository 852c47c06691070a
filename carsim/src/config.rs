use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use parry2d::na::Point2;
use serde::{Deserialize, Serialize};

use crate::reward::RewardPolicy;
use crate::sensor::SensorLayout;
use crate::vehicle::VehicleConfig;
use crate::world::algebra_2d::Circle;
use crate::world::{World, ARENA_HEIGHT, ARENA_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObstacleConfig {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// A table-like group of four circular legs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FourLegsConfig {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub leg_radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    pub obstacles: Vec<ObstacleConfig>,
    pub four_legs: Vec<FourLegsConfig>,
}

impl WorldConfig {
    /// Walls only
    pub fn bare(
        width: f32,
        height: f32,
    ) -> Self {
        Self {
            width,
            height,
            obstacles: vec![],
            four_legs: vec![],
        }
    }

    pub fn build(&self) -> World {
        let mut world = World::bounded(self.width, self.height);
        for o in &self.obstacles {
            world.add_obstacle(Circle::new(o.x, o.y, o.radius));
        }
        for f in &self.four_legs {
            world.add_four_legs_obstacle(Point2::new(f.x, f.y), f.width, f.height, f.leg_radius);
        }
        world
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        let obstacle = |x, y, radius| ObstacleConfig { x, y, radius };
        let four_legs = |x, y, size| FourLegsConfig {
            x,
            y,
            width: size,
            height: size,
            leg_radius: if size > 100.0 { 15.0 } else { 10.0 },
        };
        Self {
            width: ARENA_WIDTH,
            height: ARENA_HEIGHT,
            obstacles: vec![
                obstacle(300.0, 300.0, 50.0),
                obstacle(250.0, 630.0, 80.0),
                obstacle(1200.0, 600.0, 90.0),
            ],
            four_legs: vec![
                four_legs(700.0, 400.0, 200.0),
                four_legs(800.0, 50.0, 100.0),
                four_legs(920.0, 50.0, 100.0),
                four_legs(1040.0, 50.0, 100.0),
            ],
        }
    }
}

/// Where and how a vehicle is placed on reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub sites: Vec<[f32; 2]>,
    /// Maximum deviation from a site per axis
    pub jitter: f32,
    /// Number of jittered poses tried before falling back to the site itself
    pub max_attempts: usize,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            sites: vec![[200.0, 150.0], [200.0, 450.0], [500.0, 500.0], [550.0, 150.0], [1100.0, 350.0]],
            jitter: 100.0,
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarSimConfig {
    pub world: WorldConfig,
    pub vehicle: VehicleConfig,
    pub sensors: SensorLayout,
    pub reward: RewardPolicy,
    pub spawn: SpawnConfig,
    /// Simulated seconds per step
    pub timestep: f32,
    pub max_steps: usize,
    /// Share of the best possible episode reward, which counts as mastered
    pub reward_goal_ratio: f32,
    pub seed: Option<u64>,
}

impl Default for CarSimConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            vehicle: VehicleConfig::default(),
            sensors: SensorLayout::default(),
            reward: RewardPolicy::default(),
            spawn: SpawnConfig::default(),
            timestep: 0.1,
            max_steps: 1000,
            reward_goal_ratio: 0.6,
            seed: None,
        }
    }
}

/// Reads a JSON configuration file. Missing fields take their default values.
pub fn load_json<T>(file: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let reader = BufReader::new(File::open(file).with_context(|| format!("failed to open config file {}", file.display()))?);
    serde_json::from_reader(reader).with_context(|| format!("failed to parse config file {}", file.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_world() {
        let world = WorldConfig::default().build();
        // 4 walls, 3 obstacles, 4 x 4 legs
        assert_eq!(world.objects().len(), 4 + 3 + 16);
        assert!(world.objects().iter().all(|o| o.sensible));
    }

    #[test]
    fn test_load_partial_config() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{ "max_steps": 50, "seed": 7, "world": {{ "obstacles": [] }}, "sensors": {{ "type": "Cones", "sensors": [{{ "angle": 0.5 }}] }} }}"#
        )?;
        let config: CarSimConfig = load_json(file.path())?;
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.seed, Some(7));
        assert!(config.world.obstacles.is_empty());
        assert_eq!(config.world.four_legs.len(), 4);
        assert_eq!(config.world.width, ARENA_WIDTH);
        assert_eq!(config.timestep, 0.1);
        assert_eq!(
            config.sensors,
            SensorLayout::Cones {
                sensors: vec![crate::sensor::SensorConfig {
                    angle: 0.5,
                    ..Default::default()
                }]
            }
        );
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_json::<CarSimConfig>(Path::new("/nonexistent/carsim.json")).is_err());
    }
}
