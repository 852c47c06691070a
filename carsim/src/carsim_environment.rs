use std::f32::consts::PI;

use console_engine::pixel;
use console_engine::screen::Screen;
use parry2d::na::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ql::prelude::{Environment, QlError};
use ql::util::immutable::Immutable;

use crate::config::CarSimConfig;
use crate::sensor::{Observation, SensorArray};
use crate::vehicle::{footprint, CarAction, Collision, Pose, Vehicle};
use crate::world::algebra_2d::Circle;
use crate::world::{Shape, World};

/// Lifecycle of an episode. Only `reset` leaves `Terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodePhase {
    Ready,
    Running,
    Terminal,
}

/// Simulated vehicle in a 2D arena, learning to avoid collisions.
///
/// One step: apply the action to the vehicle, advance it by one timestep, read the sensors, compute the reward.
/// The episode ends with a crash or when the step limit is reached.
pub struct CarSimEnvironment {
    config: Immutable<CarSimConfig>,
    world: World,
    sensors: SensorArray,
    vehicle: Vehicle,
    observation: Observation,
    phase: EpisodePhase,
    step_count: usize,
    score: f32,
    rng: StdRng,
}

impl CarSimEnvironment {
    pub fn new(config: CarSimConfig) -> Result<Self, QlError> {
        let world = config.world.build();
        Self::with_world(config, world)
    }

    /// Uses `world` instead of the world described by the configuration
    pub fn with_world(
        config: CarSimConfig,
        world: World,
    ) -> Result<Self, QlError> {
        if !(config.timestep > 0.0) || config.max_steps == 0 {
            return Err(QlError::invalid_configuration("timestep and max_steps must be positive"));
        }
        if config.spawn.sites.is_empty() {
            return Err(QlError::invalid_configuration("no spawn site"));
        }
        let sensors = SensorArray::new(config.sensors.clone())?;

        // every site must allow any heading
        let vehicle_radius = footprint(&config.vehicle, &Pose::new(0.0, 0.0, 0.0)).bounding_radius();
        if let Some(site) = config
            .spawn
            .sites
            .iter()
            .find(|[x, y]| world.collides_circle(&Circle::new(*x, *y, vehicle_radius)))
        {
            return Err(QlError::invalid_configuration(format!("spawn site {:?} is not collision-free", site)));
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let [x, y] = config.spawn.sites[0];
        let vehicle = Vehicle::new(config.vehicle.clone(), Pose::new(x, y, 0.0));
        let observation = sensors.read(&world, &vehicle.pose());

        Ok(Self {
            config: Immutable::new(config),
            world,
            sensors,
            vehicle,
            observation,
            phase: EpisodePhase::Ready,
            step_count: 0,
            score: 0.0,
            rng,
        })
    }

    pub fn config(&self) -> &CarSimConfig { &self.config }

    pub fn world(&self) -> &World { &self.world }

    /// For obstacle repositioning between episodes
    pub fn world_mut(&mut self) -> &mut World { &mut self.world }

    pub fn vehicle(&self) -> &Vehicle { &self.vehicle }

    pub fn sensors(&self) -> &SensorArray { &self.sensors }

    pub fn phase(&self) -> EpisodePhase { self.phase }

    pub fn step_count(&self) -> usize { self.step_count }

    /// Accumulated reward of the current episode
    pub fn score(&self) -> f32 { self.score }

    /// Resets to an explicit pose, which must be collision-free
    pub fn reset_to(
        &mut self,
        pose: Pose,
    ) -> Result<&Observation, QlError> {
        if self.world.collides(&footprint(&self.config.vehicle, &pose)) {
            return Err(QlError::invalid_configuration(format!("vehicle pose {:?} is not collision-free", pose)));
        }
        self.start_episode(pose);
        Ok(&self.observation)
    }

    fn start_episode(
        &mut self,
        pose: Pose,
    ) {
        self.vehicle = Vehicle::new(self.config.vehicle.clone(), pose);
        self.observation = self.sensors.read(&self.world, &pose);
        self.phase = EpisodePhase::Ready;
        self.step_count = 0;
        self.score = 0.0;
        log::trace!("new episode at {:?}", pose);
    }

    /// A random pose near a random spawn site
    fn spawn_pose(&mut self) -> Pose {
        let spawn = &self.config.spawn;
        let [x, y] = spawn.sites[self.rng.gen_range(0..spawn.sites.len())];
        let heading = self.rng.gen_range(-PI..PI);
        for _ in 0..spawn.max_attempts {
            let (dx, dy) = if spawn.jitter > 0.0 {
                (
                    self.rng.gen_range(-spawn.jitter..=spawn.jitter),
                    self.rng.gen_range(-spawn.jitter..=spawn.jitter),
                )
            } else {
                (0.0, 0.0)
            };
            let pose = Pose::new(x + dx, y + dy, heading);
            if !self.world.collides(&footprint(&self.config.vehicle, &pose)) {
                return pose;
            }
        }
        // vetted at construction
        Pose::new(x, y, heading)
    }
}

impl Environment for CarSimEnvironment {
    type S = Observation;
    type A = CarAction;

    fn reset(&mut self) -> Result<&Self::S, QlError> {
        let pose = self.spawn_pose();
        self.start_episode(pose);
        Ok(&self.observation)
    }

    fn state(&self) -> &Self::S { &self.observation }

    fn step(
        &mut self,
        action: Self::A,
    ) -> Result<(&Self::S, f32, bool), QlError> {
        if self.phase == EpisodePhase::Terminal {
            return Err(QlError::EpisodeOver);
        }
        self.phase = EpisodePhase::Running;

        self.vehicle.apply_action(action);
        let crashed = self.vehicle.advance(&self.world, self.config.timestep) == Collision::Crashed;
        self.observation = self.sensors.read(&self.world, &self.vehicle.pose());
        let reward = self.config.reward.step_reward(action, &self.observation, crashed);

        self.step_count += 1;
        self.score += reward;
        let done = crashed || self.step_count >= self.config.max_steps;
        if done {
            self.phase = EpisodePhase::Terminal;
            log::debug!(
                "episode finished after {} steps, crashed: {}, score: {:.1}",
                self.step_count,
                crashed,
                self.score
            );
        }
        Ok((&self.observation, reward, done))
    }

    fn failure_reward(&self) -> f32 { -self.config.reward.crash_penalty }

    fn episode_reward_goal_mean(&self) -> f32 {
        self.config.reward_goal_ratio
            * self.config.max_steps as f32
            * self.config.reward.max_step_reward(self.sensors.observation_len())
    }

    /// Arena and vehicle, scaled to the screen size. `y` grows upwards.
    fn render(
        &self,
        screen: &mut Screen,
    ) {
        let (columns, rows) = (screen.get_width() as i32, screen.get_height() as i32);
        if columns == 0 || rows == 0 {
            return;
        }
        let to_world = |col: i32, row: i32| {
            Point2::new(
                (col as f32 + 0.5) * self.world.width() / columns as f32,
                (rows as f32 - row as f32 - 0.5) * self.world.height() / rows as f32,
            )
        };
        let to_screen = |p: &Point2<f32>| {
            (
                (p.x * columns as f32 / self.world.width()) as i32,
                (rows as f32 - p.y * rows as f32 / self.world.height()) as i32,
            )
        };
        let cell_size = f32::max(self.world.width() / columns as f32, self.world.height() / rows as f32);
        let footprint = self.vehicle.footprint();

        screen.clear();
        for row in 0..rows {
            for col in 0..columns {
                let p = to_world(col, row);
                if footprint.contains_point(&p) {
                    screen.set_pxl(col, row, pixel::pxl('@'));
                    continue;
                }
                for o in self.world.objects() {
                    if let Shape::Circle(c) = &o.shape {
                        if (p - c.center).norm() <= c.radius.max(cell_size / 2.0) {
                            screen.set_pxl(col, row, pixel::pxl('O'));
                        }
                    }
                }
            }
        }
        for o in self.world.objects() {
            if let Shape::Segment(a, b) = &o.shape {
                let chr = if o.sensible { '#' } else { '.' };
                let samples = ((b - a).norm() / (cell_size / 2.0)).ceil().max(1.0) as usize;
                for i in 0..=samples {
                    let p = a + (b - a) * (i as f32 / samples as f32);
                    let (col, row) = to_screen(&p);
                    screen.set_pxl(col.clamp(0, columns - 1), row.clamp(0, rows - 1), pixel::pxl(chr));
                }
            }
        }
        let pose = self.vehicle.pose();
        let front = pose.position + crate::world::algebra_2d::unit_vector(pose.heading) * footprint.length / 2.0;
        let (col, row) = to_screen(&front);
        if (0..columns).contains(&col) && (0..rows).contains(&row) {
            screen.set_pxl(col, row, pixel::pxl(if self.vehicle.crashed() { 'X' } else { '^' }));
        }
    }
}

#[cfg(test)]
mod tests {
    use ql::prelude::{Action, ToModelInput};

    use crate::config::{SpawnConfig, WorldConfig};
    use crate::world::{ARENA_HEIGHT, ARENA_WIDTH};

    use super::*;

    fn config(seed: u64) -> CarSimConfig {
        CarSimConfig {
            seed: Some(seed),
            max_steps: 200,
            ..CarSimConfig::default()
        }
    }

    #[test]
    fn test_reset_and_step() -> Result<(), QlError> {
        let mut env = CarSimEnvironment::new(config(1))?;
        let observation = env.reset()?.clone();
        assert_eq!(observation.len(), 3);
        assert_eq!(env.phase(), EpisodePhase::Ready);

        let (_, reward, done) = env.step(CarAction::Forward)?;
        assert!(reward.is_finite());
        assert!(!done || env.vehicle().crashed());
        assert_eq!(env.step_count(), 1);
        assert_eq!(env.score(), reward);
        assert_ne!(env.phase(), EpisodePhase::Ready);
        Ok(())
    }

    #[test]
    fn test_step_limit() -> Result<(), QlError> {
        let config = CarSimConfig {
            max_steps: 5,
            ..config(2)
        };
        let mut env = CarSimEnvironment::new(config)?;
        env.reset_to(Pose::new(640.0, 300.0, 0.0))?;
        for i in 1..=5 {
            let (_, _, done) = env.step(CarAction::TurnLeft)?;
            assert_eq!(done, i == 5);
        }
        assert_eq!(env.phase(), EpisodePhase::Terminal);
        assert!(matches!(env.step(CarAction::Forward), Err(QlError::EpisodeOver)));

        env.reset()?;
        assert_eq!(env.step_count(), 0);
        assert_eq!(env.score(), 0.0);
        assert!(env.step(CarAction::Forward).is_ok());
        Ok(())
    }

    #[test]
    fn test_crash_penalty_once() -> Result<(), QlError> {
        let mut env = CarSimEnvironment::new(config(3))?;
        env.reset_to(Pose::new(1200.0, 300.0, 0.0))?;
        let mut last = (0.0, false);
        while !last.1 {
            let (_, reward, done) = env.step(CarAction::Forward)?;
            last = (reward, done);
        }
        assert!(env.vehicle().crashed());
        assert_eq!(last.0, -env.config().reward.crash_penalty);
        assert!(env.step(CarAction::Forward).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_action_index() -> Result<(), QlError> {
        let mut env = CarSimEnvironment::new(config(4))?;
        env.reset()?;
        assert!(matches!(
            env.step_numeric(CarAction::ACTION_SPACE),
            Err(QlError::InvalidAction { value: 3, .. })
        ));
        assert_eq!(env.step_count(), 0);
        Ok(())
    }

    #[test]
    fn test_seeded_resets_are_reproducible() -> Result<(), QlError> {
        let mut a = CarSimEnvironment::new(config(5))?;
        let mut b = CarSimEnvironment::new(config(5))?;
        for _ in 0..10 {
            assert_eq!(a.reset()?.to_model_input(), b.reset()?.to_model_input());
            assert_eq!(a.vehicle().pose(), b.vehicle().pose());
        }
        Ok(())
    }

    #[test]
    fn test_unvetted_spawn_site() {
        let config = CarSimConfig {
            spawn: SpawnConfig {
                sites: vec![[300.0, 300.0]],
                ..SpawnConfig::default()
            },
            ..CarSimConfig::default()
        };
        assert!(matches!(CarSimEnvironment::new(config), Err(QlError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_reset_to_invalid_pose() -> Result<(), QlError> {
        let mut env = CarSimEnvironment::new(config(6))?;
        assert!(env.reset_to(Pose::new(300.0, 300.0, 0.0)).is_err());
        assert!(env.reset_to(Pose::new(5.0, 300.0, 0.0)).is_err());
        Ok(())
    }

    #[test]
    fn test_render() -> Result<(), QlError> {
        let config = CarSimConfig {
            world: WorldConfig::bare(ARENA_WIDTH, ARENA_HEIGHT),
            ..config(7)
        };
        let mut env = CarSimEnvironment::new(config)?;
        env.reset_to(Pose::new(640.0, 360.0, 0.0))?;
        let mut screen = Screen::new_fill(64, 36, pixel::pxl(' '));
        env.render(&mut screen);
        assert_eq!(screen.get_pxl(0, 0).unwrap().chr, '#');
        assert_eq!(screen.get_pxl(63, 35).unwrap().chr, '#');
        assert_eq!(screen.get_pxl(32, 18).unwrap().chr, '@');
        assert_eq!(screen.get_pxl(10, 10).unwrap().chr, ' ');
        Ok(())
    }
}
