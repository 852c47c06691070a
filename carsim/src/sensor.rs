use std::f32::consts::PI;

use console_engine::pixel;
use console_engine::screen::Screen;
use nalgebra::DVector;
use parry2d::na::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use ql::prelude::{DebugVisualizer, QlError, ToModelInput};

use crate::vehicle::Pose;
use crate::world::algebra_2d::{rotate, unit_vector};
use crate::world::World;

const RAY_COUNT_TOLERANCE: f32 = 1e-4;

/// A range sensor mounted on the vehicle, scanning a cone of rays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Direction of the sensor axis relative to the vehicle heading (rad, counter-clockwise positive)
    pub angle: f32,
    /// Mount point offset to the left of the vehicle centerline
    pub lateral_offset: f32,
    /// Mount point offset along the heading, measured from the vehicle center
    pub forward_offset: f32,
    /// Opening angle of the cone (rad)
    pub fov: f32,
    /// Angular distance between two rays (rad)
    pub spread: f32,
    pub max_range: f32,
}

impl SensorConfig {
    /// Ray directions relative to the sensor axis: `ceil(fov / spread)` rays, evenly spaced.
    ///
    /// Ratios less than `RAY_COUNT_TOLERANCE` above an integer count as that integer,
    /// so f32 rounding of e.g. `(PI / 3) / (PI / 90)` yields 30 rays, not 31.
    fn ray_angles(&self) -> Vec<f32> {
        let n = if self.fov > 0.0 {
            usize::max(1, ((self.fov / self.spread) - RAY_COUNT_TOLERANCE).ceil() as usize)
        } else {
            1
        };
        if n == 1 {
            return vec![0.0];
        }
        let step = self.fov / (n - 1) as f32;
        (0..n).map(|i| -self.fov / 2.0 + i as f32 * step).collect()
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            angle: 0.0,
            lateral_offset: 0.0,
            forward_offset: 25.0,
            fov: PI / 3.0,
            spread: PI / 90.0,
            max_range: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SensorLayout {
    /// One reading per sensor: the nearest hit within its cone
    Cones { sensors: Vec<SensorConfig> },
    /// Single-ray arms at fixed angles. Readings are minima over sliding windows of `window` arms, advanced by `stride`.
    ArmWindows {
        arm_angles: Vec<f32>,
        forward_offset: f32,
        max_range: f32,
        window: usize,
        stride: usize,
    },
}

impl SensorLayout {
    /// Three ultrasonic sensors at the vehicle front: left (45°), center and right (-45°)
    pub fn default_cones() -> Self {
        let sensor = |lateral_offset: f32, angle: f32| SensorConfig {
            angle,
            lateral_offset,
            ..SensorConfig::default()
        };
        SensorLayout::Cones {
            sensors: vec![sensor(10.0, PI / 4.0), sensor(0.0, 0.0), sensor(-10.0, -PI / 4.0)],
        }
    }

    /// 11 arms spanning ±π/2.5, read as 5 overlapping windows
    pub fn default_arm_windows() -> Self {
        let arm_angles = [PI / 2.5, PI / 3.0, PI / 4.0, PI / 6.0, PI / 13.0, 0.0]
            .into_iter()
            .chain([PI / 13.0, PI / 6.0, PI / 4.0, PI / 3.0, PI / 2.5].map(|a| -a))
            .collect();
        SensorLayout::ArmWindows {
            arm_angles,
            forward_offset: 20.0,
            max_range: 390.0,
            window: 3,
            stride: 2,
        }
    }

    /// Number of readings per observation
    pub fn observation_len(&self) -> usize {
        match self {
            SensorLayout::Cones { sensors } => sensors.len(),
            SensorLayout::ArmWindows {
                arm_angles, window, stride, ..
            } => {
                if *stride == 0 || *window == 0 || arm_angles.len() < *window {
                    0
                } else {
                    (arm_angles.len() - window) / stride + 1
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), QlError> {
        match self {
            SensorLayout::Cones { sensors } => {
                if sensors.is_empty() {
                    return Err(QlError::invalid_configuration("sensor layout without sensors"));
                }
                if let Some(s) = sensors.iter().find(|s| !(s.max_range > 0.0) || !(s.spread > 0.0) || s.fov < 0.0) {
                    return Err(QlError::invalid_configuration(format!("invalid sensor: {:?}", s)));
                }
            }
            SensorLayout::ArmWindows {
                arm_angles,
                max_range,
                window,
                stride,
                ..
            } => {
                if *window == 0 || *stride == 0 || arm_angles.len() < *window {
                    return Err(QlError::invalid_configuration(format!(
                        "{} arms cannot be read in windows of {} with stride {}",
                        arm_angles.len(),
                        window,
                        stride
                    )));
                }
                if !(*max_range > 0.0) {
                    return Err(QlError::invalid_configuration("arm range must be positive"));
                }
            }
        }
        Ok(())
    }
}

impl Default for SensorLayout {
    fn default() -> Self { SensorLayout::default_cones() }
}

/// A single ray cast by the sensor array: origin, direction and range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorRay {
    pub origin: Point2<f32>,
    pub direction: Vector2<f32>,
    pub max_range: f32,
}

impl SensorRay {
    /// Hit distance, clamped to `[0, max_range]`. `max_range` if nothing is hit.
    fn measure(
        &self,
        world: &World,
    ) -> f32 {
        world
            .cast_ray(self.origin, self.direction, self.max_range)
            .unwrap_or(self.max_range)
            .clamp(0.0, self.max_range)
    }
}

/// Turns the vehicle pose into an [Observation]
#[derive(Debug, Clone)]
pub struct SensorArray {
    layout: SensorLayout,
}

impl SensorArray {
    pub fn new(layout: SensorLayout) -> Result<Self, QlError> {
        layout.validate()?;
        Ok(Self { layout })
    }

    pub fn layout(&self) -> &SensorLayout { &self.layout }

    pub fn observation_len(&self) -> usize { self.layout.observation_len() }

    /// All rays grouped per logical sensor (cone) or per arm
    pub fn rays(
        &self,
        pose: &Pose,
    ) -> Vec<Vec<SensorRay>> {
        match &self.layout {
            SensorLayout::Cones { sensors } => sensors
                .iter()
                .map(|s| {
                    let origin = pose.position + rotate(Vector2::new(s.forward_offset, s.lateral_offset), pose.heading);
                    s.ray_angles()
                        .into_iter()
                        .map(|a| SensorRay {
                            origin,
                            direction: unit_vector(pose.heading + s.angle + a),
                            max_range: s.max_range,
                        })
                        .collect()
                })
                .collect(),
            SensorLayout::ArmWindows {
                arm_angles,
                forward_offset,
                max_range,
                ..
            } => arm_angles
                .iter()
                .map(|&a| {
                    let direction = unit_vector(pose.heading + a);
                    vec![SensorRay {
                        origin: pose.position + direction * *forward_offset,
                        direction,
                        max_range: *max_range,
                    }]
                })
                .collect(),
        }
    }

    pub fn read(
        &self,
        world: &World,
        pose: &Pose,
    ) -> Observation {
        let rays = self.rays(pose);
        let readings = match &self.layout {
            SensorLayout::Cones { .. } => rays.iter().map(|cone| min_reading(world, cone)).collect(),
            SensorLayout::ArmWindows { window, stride, .. } => {
                let arm_readings = rays.iter().map(|arm| min_reading(world, arm)).collect::<Vec<_>>();
                arm_readings
                    .windows(*window)
                    .step_by(*stride)
                    .map(|w| w.iter().copied().fold(1.0, f32::min))
                    .collect()
            }
        };
        Observation { readings }
    }
}

/// Minimum normalized distance over the rays
fn min_reading(
    world: &World,
    rays: &[SensorRay],
) -> f32 {
    rays.iter()
        .map(|r| r.measure(world) / r.max_range)
        .fold(1.0, f32::min)
}

/// Normalized sensor readings in [0, 1]. 1.0 means: no obstacle within range.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    readings: Vec<f32>,
}

impl Observation {
    /// Fails for readings outside of [0, 1]
    pub fn new(readings: Vec<f32>) -> Result<Self, QlError> {
        if let Some(r) = readings.iter().find(|r| !(0.0..=1.0).contains(*r)) {
            return Err(QlError::invalid_configuration(format!("sensor reading {} out of range [0, 1]", r)));
        }
        Ok(Self { readings })
    }

    /// All readings at 1.0
    pub fn clear(len: usize) -> Self { Self { readings: vec![1.0; len] } }

    pub fn readings(&self) -> &[f32] { &self.readings }

    pub fn len(&self) -> usize { self.readings.len() }

    pub fn is_empty(&self) -> bool { self.readings.is_empty() }
}

impl ToModelInput for Observation {
    fn input_len(&self) -> usize { self.readings.len() }

    fn to_model_input(&self) -> DVector<f32> { DVector::from_column_slice(&self.readings) }
}

const BAR_WIDTH: usize = 20;

impl DebugVisualizer for Observation {
    fn one_line_info(&self) -> String {
        let readings = self.readings.iter().map(|r| format!("{:.2}", r)).collect::<Vec<_>>();
        format!("Observation: [{}]", readings.join(", "))
    }

    /// One horizontal bar per reading
    fn render_to_console(&self) -> Screen {
        let mut screen = Screen::new_fill(BAR_WIDTH as u32 + 6, self.readings.len().max(1) as u32, pixel::pxl(' '));
        for (y, r) in self.readings.iter().enumerate() {
            screen.print(0, y as i32, &format!("{:.2}", r));
            let len = (r * BAR_WIDTH as f32).round() as i32;
            for x in 0..len {
                screen.set_pxl(5 + x, y as i32, pixel::pxl('#'));
            }
        }
        screen
    }
}
