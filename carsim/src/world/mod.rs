use parry2d::na::{Point2, Vector2};
use parry2d::query::Ray;

use crate::config::WorldConfig;
use crate::world::algebra_2d::{
    intersection_test_circle_circle, intersection_test_circle_segment, intersection_test_rect_circle,
    intersection_test_rect_segment, ray_distance_to_circle, ray_distance_to_segment, Circle, OrientedRect,
};

pub mod algebra_2d;

pub const ARENA_WIDTH: f32 = 1280.0;
pub const ARENA_HEIGHT: f32 = 720.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    Segment(Point2<f32>, Point2<f32>),
    Circle(Circle),
}

/// Something in the world. Only `sensible` objects are seen by sensors and can be hit by a vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldObject {
    pub shape: Shape,
    pub sensible: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObstacleId(usize);

/// Static 2D arena: boundary walls, circular obstacles and (insensible) markers.
#[derive(Clone, Debug)]
pub struct World {
    width: f32,
    height: f32,
    objects: Vec<WorldObject>,
}

impl World {
    /// Empty arena of the given size, enclosed by four walls
    pub fn bounded(
        width: f32,
        height: f32,
    ) -> Self {
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(width, 0.0),
            Point2::new(width, height),
            Point2::new(0.0, height),
        ];
        let objects = (0..4)
            .map(|i| WorldObject {
                shape: Shape::Segment(corners[i], corners[(i + 1) % 4]),
                sensible: true,
            })
            .collect();
        Self { width, height, objects }
    }

    /// The arena used by the simulator: 1280 x 720 with three large obstacles and four table-like groups
    pub fn default_layout() -> Self { WorldConfig::default().build() }

    pub fn width(&self) -> f32 { self.width }

    pub fn height(&self) -> f32 { self.height }

    pub fn objects(&self) -> &[WorldObject] { &self.objects }

    fn sensible_objects(&self) -> impl Iterator<Item = &WorldObject> { self.objects.iter().filter(|o| o.sensible) }

    pub fn add_obstacle(
        &mut self,
        circle: Circle,
    ) -> ObstacleId {
        self.objects.push(WorldObject {
            shape: Shape::Circle(circle),
            sensible: true,
        });
        ObstacleId(self.objects.len() - 1)
    }

    /// Four circular legs at the corners of a `width` x `height` rectangle starting at `pos`
    pub fn add_four_legs_obstacle(
        &mut self,
        pos: Point2<f32>,
        width: f32,
        height: f32,
        leg_radius: f32,
    ) -> [ObstacleId; 4] {
        [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.0, height),
            Vector2::new(width, 0.0),
            Vector2::new(width, height),
        ]
        .map(|offset| {
            let leg = pos + offset;
            self.add_obstacle(Circle::new(leg.x, leg.y, leg_radius))
        })
    }

    /// Debug geometry, invisible for sensors and collision detection
    pub fn add_marker_segment(
        &mut self,
        a: Point2<f32>,
        b: Point2<f32>,
    ) {
        self.objects.push(WorldObject {
            shape: Shape::Segment(a, b),
            sensible: false,
        })
    }

    /// Moves the center of an obstacle. Returns false, if `id` does not denote a circular obstacle.
    pub fn move_obstacle(
        &mut self,
        id: ObstacleId,
        center: Point2<f32>,
    ) -> bool {
        match self.objects.get_mut(id.0) {
            Some(WorldObject {
                shape: Shape::Circle(circle),
                ..
            }) => {
                circle.center = center;
                true
            }
            _ => false,
        }
    }

    pub fn obstacle(
        &self,
        id: ObstacleId,
    ) -> Option<&Circle> {
        match self.objects.get(id.0) {
            Some(WorldObject {
                shape: Shape::Circle(circle),
                ..
            }) => Some(circle),
            _ => None,
        }
    }

    pub fn contains(
        &self,
        p: &Point2<f32>,
    ) -> bool {
        (0.0..=self.width).contains(&p.x) && (0.0..=self.height).contains(&p.y)
    }

    /// Distance to the nearest sensible object along the ray, if one lies within `max_range`.
    /// A ray starting outside the arena hits immediately (distance 0).
    pub fn cast_ray(
        &self,
        origin: Point2<f32>,
        direction: Vector2<f32>,
        max_range: f32,
    ) -> Option<f32> {
        if !self.contains(&origin) {
            return Some(0.0);
        }
        let norm = direction.norm();
        if norm == 0.0 || max_range <= 0.0 {
            return None;
        }
        let ray = Ray::new(origin, direction / norm);
        self.sensible_objects()
            .filter_map(|o| match &o.shape {
                Shape::Segment(a, b) => ray_distance_to_segment(&ray, &(*a, *b), max_range),
                Shape::Circle(c) => ray_distance_to_circle(&ray, c, max_range),
            })
            .filter(|d| *d <= max_range)
            .reduce(f32::min)
            .map(|d| d.max(0.0))
    }

    /// Whether the rectangle overlaps any sensible object or reaches beyond the arena
    pub fn collides(
        &self,
        rect: &OrientedRect,
    ) -> bool {
        !rect.corners().iter().all(|c| self.contains(c))
            || self.sensible_objects().any(|o| match &o.shape {
                Shape::Segment(a, b) => intersection_test_rect_segment(rect, &(*a, *b)),
                Shape::Circle(c) => intersection_test_rect_circle(rect, c),
            })
    }

    /// Whether the circle overlaps any sensible object or reaches beyond the arena
    pub fn collides_circle(
        &self,
        circle: &Circle,
    ) -> bool {
        let c = &circle.center;
        let r = circle.radius;
        c.x - r < 0.0
            || c.y - r < 0.0
            || c.x + r > self.width
            || c.y + r > self.height
            || self.sensible_objects().any(|o| match &o.shape {
                Shape::Segment(a, b) => intersection_test_circle_segment(circle, &(*a, *b)),
                Shape::Circle(other) => intersection_test_circle_circle(circle, other),
            })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::world::algebra_2d::unit_vector;

    use super::*;

    #[test]
    fn test_cast_ray_to_wall() {
        let world = World::bounded(ARENA_WIDTH, ARENA_HEIGHT);
        let d = world.cast_ray(Point2::new(100.0, 100.0), Vector2::new(1.0, 0.0), 2000.0).unwrap();
        assert!((d - 1180.0).abs() < 1e-2);
        assert_eq!(world.cast_ray(Point2::new(100.0, 100.0), Vector2::new(1.0, 0.0), 1000.0), None);
        // unnormalized directions
        let d = world.cast_ray(Point2::new(100.0, 100.0), Vector2::new(0.0, -7.0), 500.0).unwrap();
        assert!((d - 100.0).abs() < 1e-2);
    }

    #[test]
    fn test_cast_ray_nearest_object() {
        let mut world = World::bounded(ARENA_WIDTH, ARENA_HEIGHT);
        world.add_obstacle(Circle::new(400.0, 100.0, 20.0));
        world.add_obstacle(Circle::new(300.0, 100.0, 20.0));
        let d = world.cast_ray(Point2::new(100.0, 100.0), Vector2::new(1.0, 0.0), 2000.0).unwrap();
        assert!((d - 180.0).abs() < 1e-2);
    }

    #[test]
    fn test_markers_are_insensible() {
        let mut world = World::bounded(ARENA_WIDTH, ARENA_HEIGHT);
        world.add_marker_segment(Point2::new(200.0, 0.0), Point2::new(200.0, 720.0));
        let d = world.cast_ray(Point2::new(100.0, 100.0), Vector2::new(1.0, 0.0), 2000.0).unwrap();
        assert!((d - 1180.0).abs() < 1e-2);

        let rect = OrientedRect {
            center: Point2::new(200.0, 100.0),
            angle: 0.0,
            length: 50.0,
            width: 38.0,
        };
        assert!(!world.collides(&rect));
    }

    #[test]
    fn test_origin_outside_arena() {
        let world = World::bounded(ARENA_WIDTH, ARENA_HEIGHT);
        assert_eq!(world.cast_ray(Point2::new(-1.0, 100.0), Vector2::new(1.0, 0.0), 100.0), Some(0.0));
    }

    #[test]
    fn test_move_obstacle() {
        let mut world = World::bounded(ARENA_WIDTH, ARENA_HEIGHT);
        let id = world.add_obstacle(Circle::new(300.0, 100.0, 20.0));
        assert!(world.move_obstacle(id, Point2::new(600.0, 100.0)));
        assert_eq!(world.obstacle(id).unwrap().center, Point2::new(600.0, 100.0));
        let d = world.cast_ray(Point2::new(100.0, 100.0), Vector2::new(1.0, 0.0), 2000.0).unwrap();
        assert!((d - 480.0).abs() < 1e-2);
        // a wall is not movable
        assert!(!world.move_obstacle(ObstacleId(0), Point2::new(1.0, 1.0)));
    }

    #[test]
    fn test_four_legs() {
        let mut world = World::bounded(ARENA_WIDTH, ARENA_HEIGHT);
        let legs = world.add_four_legs_obstacle(Point2::new(700.0, 400.0), 200.0, 200.0, 15.0);
        let centers = legs.map(|id| world.obstacle(id).unwrap().center);
        assert!(centers.contains(&Point2::new(700.0, 400.0)));
        assert!(centers.contains(&Point2::new(900.0, 600.0)));
        // between the legs there is free space
        assert!(!world.collides_circle(&Circle::new(800.0, 500.0, 50.0)));
    }

    #[test]
    fn test_collides() {
        let world = World::default_layout();
        let rect = |x, y| OrientedRect {
            center: Point2::new(x, y),
            angle: 0.3,
            length: 50.0,
            width: 38.0,
        };
        assert!(!world.collides(&rect(200.0, 150.0)));
        assert!(world.collides(&rect(300.0, 300.0)));
        assert!(world.collides(&rect(10.0, 150.0)));
        assert!(world.collides(&rect(-100.0, 150.0)));
    }

    #[rstest]
    #[case(100.0, 100.0)]
    #[case(640.0, 360.0)]
    #[case(1270.0, 710.0)]
    #[case(500.0, 500.0)]
    fn test_cast_ray_within_range(
        #[case] x: f32,
        #[case] y: f32,
    ) {
        let world = World::default_layout();
        for i in 0..64 {
            let angle = i as f32 * std::f32::consts::TAU / 64.0;
            if let Some(d) = world.cast_ray(Point2::new(x, y), unit_vector(angle), 150.0) {
                assert!((0.0..=150.0).contains(&d), "distance {} out of range", d);
            }
        }
    }
}
