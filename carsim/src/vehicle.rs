use std::f32::consts::PI;
use std::fmt::{Display, Formatter};

use parry2d::na::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use ql::prelude::{Action, ModelActionType, QlError};

use crate::world::algebra_2d::{unit_vector, OrientedRect};
use crate::world::World;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum CarAction {
    TurnLeft,
    TurnRight,
    Forward,
}

impl Display for CarAction {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            CarAction::TurnLeft => f.write_str("↰"),
            CarAction::TurnRight => f.write_str("↱"),
            CarAction::Forward => f.write_str("↑"),
        }
    }
}

impl Action for CarAction {
    const ACTION_SPACE: ModelActionType = 3;

    fn numeric(&self) -> ModelActionType {
        match self {
            CarAction::TurnLeft => 0,
            CarAction::TurnRight => 1,
            CarAction::Forward => 2,
        }
    }

    fn try_from_numeric(value: ModelActionType) -> Result<Self, QlError> {
        match value {
            0 => Ok(CarAction::TurnLeft),
            1 => Ok(CarAction::TurnRight),
            2 => Ok(CarAction::Forward),
            _ => Err(QlError::InvalidAction {
                value,
                action_space: Self::ACTION_SPACE,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    /// along the heading
    pub length: f32,
    pub width: f32,
    /// units per second
    pub speed: f32,
    /// heading change per turn action (rad)
    pub steering_increment: f32,
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            length: 50.0,
            width: 38.0,
            speed: 50.0,
            steering_increment: 0.2,
        }
    }
}

/// Position and heading (rad, 0 = +x axis, counter-clockwise positive)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Point2<f32>,
    pub heading: f32,
}

impl Pose {
    pub fn new(
        x: f32,
        y: f32,
        heading: f32,
    ) -> Self {
        Self {
            position: Point2::new(x, y),
            heading: normalize_angle(heading),
        }
    }
}

/// Result of one simulation step of the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    Free,
    Crashed,
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    config: VehicleConfig,
    pose: Pose,
    velocity: Vector2<f32>,
    crashed: bool,
}

impl Vehicle {
    pub fn new(
        config: VehicleConfig,
        pose: Pose,
    ) -> Self {
        let velocity = unit_vector(pose.heading) * config.speed;
        Self {
            config,
            pose,
            velocity,
            crashed: false,
        }
    }

    pub fn pose(&self) -> Pose { self.pose }

    pub fn velocity(&self) -> Vector2<f32> { self.velocity }

    pub fn crashed(&self) -> bool { self.crashed }

    pub fn config(&self) -> &VehicleConfig { &self.config }

    pub fn footprint(&self) -> OrientedRect { footprint(&self.config, &self.pose) }

    pub fn apply_action(
        &mut self,
        action: CarAction,
    ) {
        let steering = match action {
            CarAction::TurnLeft => self.config.steering_increment,
            CarAction::TurnRight => -self.config.steering_increment,
            CarAction::Forward => 0.0,
        };
        self.pose.heading = normalize_angle(self.pose.heading + steering);
        self.velocity = unit_vector(self.pose.heading) * self.config.speed;
    }

    /// Moves the vehicle by `velocity * dt` and checks it against the world.
    /// Once crashed, the vehicle stays where it is.
    pub fn advance(
        &mut self,
        world: &World,
        dt: f32,
    ) -> Collision {
        if self.crashed {
            return Collision::Crashed;
        }
        self.pose.position += self.velocity * dt;
        if world.collides(&self.footprint()) {
            self.crashed = true;
            Collision::Crashed
        } else {
            Collision::Free
        }
    }
}

pub fn footprint(
    config: &VehicleConfig,
    pose: &Pose,
) -> OrientedRect {
    OrientedRect {
        center: pose.position,
        angle: pose.heading,
        length: config.length,
        width: config.width,
    }
}

/// Maps an angle into [-π, π)
pub fn normalize_angle(angle: f32) -> f32 { (angle + PI).rem_euclid(2.0 * PI) - PI }
