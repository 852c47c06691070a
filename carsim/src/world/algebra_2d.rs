use parry2d::na::{Isometry2, Point2, Vector2};
use parry2d::query;
use parry2d::query::{Ray, RayCast};
use parry2d::shape::{Ball, Cuboid, Segment};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub center: Point2<f32>,
    pub radius: f32,
}

impl Circle {
    pub fn new(
        x: f32,
        y: f32,
        radius: f32,
    ) -> Self {
        Self {
            center: Point2::new(x, y),
            radius,
        }
    }
}

/// Oriented rectangle, e.g. the footprint of a vehicle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientedRect {
    pub center: Point2<f32>,
    /// rad, 0 = +x axis
    pub angle: f32,
    /// along the orientation axis
    pub length: f32,
    pub width: f32,
}

impl OrientedRect {
    fn isometry(&self) -> Isometry2<f32> { Isometry2::new(self.center.coords, self.angle) }

    fn cuboid(&self) -> Cuboid { Cuboid::new(Vector2::new(self.length / 2.0, self.width / 2.0)) }

    pub fn corners(&self) -> [Point2<f32>; 4] {
        let iso = self.isometry();
        let (hl, hw) = (self.length / 2.0, self.width / 2.0);
        [
            iso * Point2::new(hl, hw),
            iso * Point2::new(hl, -hw),
            iso * Point2::new(-hl, -hw),
            iso * Point2::new(-hl, hw),
        ]
    }

    pub fn contains_point(
        &self,
        p: &Point2<f32>,
    ) -> bool {
        let local = self.isometry().inverse_transform_point(p);
        local.x.abs() <= self.length / 2.0 && local.y.abs() <= self.width / 2.0
    }

    /// Radius of the smallest circle around the center containing the whole rectangle
    pub fn bounding_radius(&self) -> f32 { (self.length * self.length + self.width * self.width).sqrt() / 2.0 }
}

/// Unit vector pointing in direction `angle` (rad, counter-clockwise from the +x axis)
pub fn unit_vector(angle: f32) -> Vector2<f32> { Vector2::new(angle.cos(), angle.sin()) }

/// Rotates `v` counter-clockwise by `angle`
pub fn rotate(
    v: Vector2<f32>,
    angle: f32,
) -> Vector2<f32> {
    let (sin, cos) = angle.sin_cos();
    Vector2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

pub fn ray_distance_to_segment(
    ray: &Ray,
    segment: &(Point2<f32>, Point2<f32>),
    max_range: f32,
) -> Option<f32> {
    Segment::new(segment.0, segment.1).cast_ray(&Isometry2::identity(), ray, max_range, true)
}

pub fn ray_distance_to_circle(
    ray: &Ray,
    circle: &Circle,
    max_range: f32,
) -> Option<f32> {
    Ball::new(circle.radius).cast_ray(&Isometry2::translation(circle.center.x, circle.center.y), ray, max_range, true)
}

pub fn intersection_test_rect_circle(
    rect: &OrientedRect,
    circle: &Circle,
) -> bool {
    query::intersection_test(
        &rect.isometry(),
        &rect.cuboid(),
        &Isometry2::translation(circle.center.x, circle.center.y),
        &Ball::new(circle.radius),
    )
    .unwrap_or(false)
}

pub fn intersection_test_rect_segment(
    rect: &OrientedRect,
    segment: &(Point2<f32>, Point2<f32>),
) -> bool {
    query::intersection_test(
        &rect.isometry(),
        &rect.cuboid(),
        &Isometry2::identity(),
        &Segment::new(segment.0, segment.1),
    )
    .unwrap_or(false)
}

pub fn intersection_test_circle_circle(
    a: &Circle,
    b: &Circle,
) -> bool { distance(&a.center, &b.center) <= a.radius + b.radius }

pub fn intersection_test_circle_segment(
    circle: &Circle,
    segment: &(Point2<f32>, Point2<f32>),
) -> bool {
    query::intersection_test(
        &Isometry2::translation(circle.center.x, circle.center.y),
        &Ball::new(circle.radius),
        &Isometry2::identity(),
        &Segment::new(segment.0, segment.1),
    )
    .unwrap_or(false)
}

fn distance(
    a: &Point2<f32>,
    b: &Point2<f32>,
) -> f32 {
    (b - a).norm()
}
