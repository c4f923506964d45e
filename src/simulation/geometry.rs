//! Geometry calculations for ray casting against static obstacles.
//!
//! Contains helper functions for:
//! - Point-in-shape tests (rectangles, circles)
//! - Ray-segment and ray-circle intersection with surface normals
//! - Line-of-sight checks between two positions
//! - Horizontal-plane specular reflection of a direction vector
//!
//! Obstacles are vertical extrusions of their 2D footprint, so every
//! intersection is solved in the horizontal plane. A 3D ray is parametrized
//! by its 3D length; its horizontal component is used unnormalized so the
//! returned hit distance is measured along the 3D ray.

use crate::common::scene::{CirclePos, Obstacle, Point, RectPos, Scene};

use super::types::Vec3;

/// Hits closer than this to the ray origin are ignored (the origin is on, or
/// numerically next to, the surface it just left).
const MIN_HIT_DISTANCE: f64 = 1e-9;

/// Nearest surface hit along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Distance from the ray origin along the (unit) ray direction.
    pub distance: f64,
    /// Unit surface normal at the hit point.
    pub normal: Vec3,
}

/// Static-geometry intersection query used by the mobility model.
pub trait StaticGeometry {
    /// Nearest intersection of the ray `origin + s * direction` for
    /// `0 < s <= max_distance`, or `None` if nothing is hit.
    ///
    /// `direction` must be a unit vector.
    fn intersect(&self, origin: Vec3, direction: Vec3, max_distance: f64) -> Option<SurfaceHit>;

    /// True if the straight segment between `a` and `b` is unobstructed.
    fn line_of_sight(&self, a: Vec3, b: Vec3) -> bool {
        segment_clear(self, a, b)
    }
}

/// True if nothing intersects the open segment from `a` to `b`.
fn segment_clear<G: StaticGeometry + ?Sized>(geometry: &G, a: Vec3, b: Vec3) -> bool {
    match (b - a).normalized() {
        Some(direction) => geometry.intersect(a, direction, a.distance(b) - MIN_HIT_DISTANCE).is_none(),
        None => true,
    }
}

/// Static geometry built from a loaded scene.
#[derive(Debug, Clone, Default)]
pub struct SceneGeometry {
    obstacles: Vec<Obstacle>,
}

impl SceneGeometry {
    pub fn new(obstacles: Vec<Obstacle>) -> Self {
        Self { obstacles }
    }

    pub fn from_scene(scene: &Scene) -> Self {
        Self::new(scene.obstacles.clone())
    }

    /// All flat reflecting surfaces: walls and rectangle edges.
    pub fn reflecting_segments(&self) -> Vec<(Point, Point)> {
        let mut segments = Vec::new();
        for obs in &self.obstacles {
            match obs {
                Obstacle::Wall { position } => segments.push((position.start, position.end)),
                Obstacle::Rectangle { position } => segments.extend(rect_edges(position)),
                Obstacle::Circle { .. } => {}
            }
        }
        segments
    }

    /// True if the horizontal footprint of `p` lies inside any solid obstacle.
    pub fn contains(&self, p: &Point) -> bool {
        self.obstacles.iter().any(|obs| match obs {
            Obstacle::Rectangle { position } => point_in_rect(p, position),
            Obstacle::Circle { position } => point_in_circle(p, position),
            Obstacle::Wall { .. } => false,
        })
    }
}

impl StaticGeometry for SceneGeometry {
    fn intersect(&self, origin: Vec3, direction: Vec3, max_distance: f64) -> Option<SurfaceHit> {
        let mut best: Option<SurfaceHit> = None;
        let mut consider = |hit: Option<SurfaceHit>| {
            if let Some(hit) = hit {
                if hit.distance <= max_distance && best.map_or(true, |b| hit.distance < b.distance) {
                    best = Some(hit);
                }
            }
        };

        for obs in &self.obstacles {
            match obs {
                Obstacle::Wall { position } => consider(ray_segment_intersection(origin, direction, &position.start, &position.end)),
                Obstacle::Rectangle { position } => {
                    for (a, b) in rect_edges(position) {
                        consider(ray_segment_intersection(origin, direction, &a, &b));
                    }
                }
                Obstacle::Circle { position } => consider(ray_circle_intersection(origin, direction, position)),
            }
        }
        best
    }

    fn line_of_sight(&self, a: Vec3, b: Vec3) -> bool {
        // Degenerate segment: treat as a point-inside-obstacle test
        if a.horizontal() == b.horizontal() {
            return !self.contains(&Point { x: a.x, y: a.y });
        }
        segment_clear(self, a, b)
    }
}

/// Reflect a direction off a surface, in the horizontal plane.
///
/// The surface normal is projected onto the horizontal plane and the
/// reflection axis is the wall tangent (normal rotated by 90°), so
/// `-(d - 2 (d·t) t)` mirrors the component along the normal and keeps the
/// tangential one. The magnitude of `direction` is preserved. A normal with
/// no horizontal component reverses the direction.
pub fn reflect_horizontal(direction: Vec3, normal: Vec3) -> Vec3 {
    let Some(n) = normal.horizontal().normalized() else {
        return -direction;
    };
    let tangent = Vec3::new(n.y, -n.x, 0.0);
    -(direction - tangent * (2.0 * direction.dot(tangent)))
}

fn cross(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    ax * by - ay * bx
}

/// The four edges of an axis-aligned rectangle.
fn rect_edges(rect: &RectPos) -> [(Point, Point); 4] {
    let (left, right, top, bottom) = rect_bounds(rect);
    let lt = Point { x: left, y: top };
    let rt = Point { x: right, y: top };
    let rb = Point { x: right, y: bottom };
    let lb = Point { x: left, y: bottom };
    [(lt, rt), (rt, rb), (rb, lb), (lb, lt)]
}

/// Corners reordered as (left, right, top, bottom).
fn rect_bounds(rect: &RectPos) -> (f64, f64, f64, f64) {
    let left = rect.top_left.x.min(rect.bottom_right.x);
    let right = rect.top_left.x.max(rect.bottom_right.x);
    let top = rect.top_left.y.min(rect.bottom_right.y);
    let bottom = rect.top_left.y.max(rect.bottom_right.y);
    (left, right, top, bottom)
}

/// Inclusive point-in-rectangle test.
pub fn point_in_rect(p: &Point, rect: &RectPos) -> bool {
    let (left, right, top, bottom) = rect_bounds(rect);
    p.x >= left && p.x <= right && p.y >= top && p.y <= bottom
}

/// Inclusive point-inside-circle test.
pub fn point_in_circle(p: &Point, circle: &CirclePos) -> bool {
    let dx = p.x - circle.center.x;
    let dy = p.y - circle.center.y;
    dx * dx + dy * dy <= circle.radius * circle.radius
}

/// Ray vs. vertical wall segment `a`–`b`.
///
/// Solves `o + s·d = a + u·(b - a)` in the horizontal plane with `d` the
/// unnormalized horizontal part of the 3D direction, so `s` is the 3D distance.
pub fn ray_segment_intersection(origin: Vec3, direction: Vec3, a: &Point, b: &Point) -> Option<SurfaceHit> {
    let (dx, dy) = (direction.x, direction.y);
    let (ex, ey) = (b.x - a.x, b.y - a.y);
    let denom = cross(dx, dy, ex, ey);
    if denom.abs() < f64::EPSILON {
        // Parallel (or vertical ray): grazing contact is not a reflection
        return None;
    }
    let (wx, wy) = (a.x - origin.x, a.y - origin.y);
    let s = cross(wx, wy, ex, ey) / denom;
    let u = cross(wx, wy, dx, dy) / denom;
    if s <= MIN_HIT_DISTANCE || !(0.0..=1.0).contains(&u) {
        return None;
    }

    let mut normal = Vec3::new(-ey, ex, 0.0).normalized()?;
    if normal.dot(direction) > 0.0 {
        normal = -normal;
    }
    Some(SurfaceHit { distance: s, normal })
}

/// Ray vs. vertical cylinder with the given circular footprint.
pub fn ray_circle_intersection(origin: Vec3, direction: Vec3, circle: &CirclePos) -> Option<SurfaceHit> {
    let (dx, dy) = (direction.x, direction.y);
    let (ox, oy) = (origin.x - circle.center.x, origin.y - circle.center.y);
    let a = dx * dx + dy * dy;
    if a < f64::EPSILON {
        return None;
    }
    let b = 2.0 * (dx * ox + dy * oy);
    let c = ox * ox + oy * oy - circle.radius * circle.radius;
    let disc = b * b - 4.0 * a * c;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let near = (-b - sqrt_disc) / (2.0 * a);
    let far = (-b + sqrt_disc) / (2.0 * a);
    let s = if near > MIN_HIT_DISTANCE {
        near
    } else if far > MIN_HIT_DISTANCE {
        far
    } else {
        return None;
    };

    let hx = ox + s * dx;
    let hy = oy + s * dy;
    let mut normal = Vec3::new(hx, hy, 0.0).normalized()?;
    if normal.dot(direction) > 0.0 {
        normal = -normal;
    }
    Some(SurfaceHit { distance: s, normal })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point {
        Point { x, y }
    }

    fn room(width: f64, height: f64) -> SceneGeometry {
        let corners = [p(0.0, 0.0), p(width, 0.0), p(width, height), p(0.0, height)];
        let obstacles = (0..4)
            .map(|i| Obstacle::Wall {
                position: crate::common::scene::WallPos {
                    start: corners[i],
                    end: corners[(i + 1) % 4],
                },
            })
            .collect();
        SceneGeometry::new(obstacles)
    }

    #[test]
    fn footprint_containment_is_inclusive() {
        let geometry = SceneGeometry::new(vec![
            Obstacle::Rectangle {
                position: RectPos {
                    top_left: p(1.0, 2.0),
                    bottom_right: p(3.0, 4.0),
                },
            },
            Obstacle::Circle {
                position: CirclePos { center: p(-5.0, 0.0), radius: 1.5 },
            },
        ]);
        assert!(geometry.contains(&p(1.0, 2.0)));
        assert!(geometry.contains(&p(2.5, 3.5)));
        assert!(!geometry.contains(&p(0.9, 3.0)));
        assert!(geometry.contains(&p(-3.5, 0.0)));
        assert!(!geometry.contains(&p(-3.4, 0.0)));
    }

    #[test]
    fn ray_hits_nearest_wall_with_facing_normal() {
        let geometry = room(10.0, 10.0);
        let hit = geometry.intersect(Vec3::new(2.0, 5.0, 1.0), Vec3::new(1.0, 0.0, 0.0), 100.0).unwrap();
        assert!((hit.distance - 8.0).abs() < 1e-9);
        assert!((hit.normal.x + 1.0).abs() < 1e-9 && hit.normal.y.abs() < 1e-9);
    }

    #[test]
    fn ray_respects_max_distance() {
        let geometry = room(10.0, 10.0);
        assert!(geometry.intersect(Vec3::new(2.0, 5.0, 0.0), Vec3::new(1.0, 0.0, 0.0), 7.9).is_none());
    }

    #[test]
    fn slanted_ray_distance_is_measured_in_3d() {
        let geometry = room(10.0, 10.0);
        let direction = Vec3::new(3.0, 0.0, 4.0).normalized().unwrap();
        let hit = geometry.intersect(Vec3::new(7.0, 5.0, 0.0), direction, 100.0).unwrap();
        // 3 m horizontal to the wall at x = 10 along a 3-4-5 slope
        assert!((hit.distance - 5.0).abs() < 1e-9);
    }

    #[test]
    fn ray_hits_circle_front_face() {
        let circle = CirclePos { center: p(10.0, 0.0), radius: 2.0 };
        let hit = ray_circle_intersection(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), &circle).unwrap();
        assert!((hit.distance - 8.0).abs() < 1e-9);
        assert!((hit.normal.x + 1.0).abs() < 1e-9);
        assert!(ray_circle_intersection(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), &circle).is_none());
    }

    #[test]
    fn line_of_sight_blocked_by_rectangle() {
        let geometry = SceneGeometry::new(vec![Obstacle::Rectangle {
            position: RectPos {
                top_left: p(4.0, -1.0),
                bottom_right: p(6.0, 1.0),
            },
        }]);
        assert!(!geometry.line_of_sight(Vec3::new(0.0, 0.0, 1.0), Vec3::new(10.0, 0.0, 1.0)));
        assert!(geometry.line_of_sight(Vec3::new(0.0, 5.0, 1.0), Vec3::new(10.0, 5.0, 1.0)));
        // Degenerate segment inside the rectangle
        assert!(!geometry.line_of_sight(Vec3::new(5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 3.0)));
    }

    #[test]
    fn default_line_of_sight_matches_scene_geometry() {
        struct RayOnly(SceneGeometry);

        impl StaticGeometry for RayOnly {
            fn intersect(&self, origin: Vec3, direction: Vec3, max_distance: f64) -> Option<SurfaceHit> {
                self.0.intersect(origin, direction, max_distance)
            }
        }

        let geometry = room(10.0, 10.0);
        let ray_only = RayOnly(geometry.clone());
        let inside = Vec3::new(5.0, 5.0, 1.0);
        for b in [Vec3::new(9.0, 1.0, 1.0), Vec3::new(12.0, 5.0, 1.0), Vec3::new(5.0, -3.0, 2.0)] {
            assert_eq!(ray_only.line_of_sight(inside, b), geometry.line_of_sight(inside, b));
        }
        assert!(geometry.line_of_sight(inside, Vec3::new(9.0, 1.0, 1.0)));
        assert!(!geometry.line_of_sight(inside, Vec3::new(12.0, 5.0, 1.0)));
        // Identical points see each other without an obstacle underneath
        assert!(ray_only.line_of_sight(inside, inside));
    }

    #[test]
    fn reflection_preserves_magnitude() {
        let normals = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.3, -0.7, 0.2), Vec3::new(-1.0, 1.0, 0.0)];
        let directions = [Vec3::new(0.6, 0.8, 0.0), Vec3::new(-2.0, 0.5, 0.0), Vec3::new(0.0, -3.0, 0.0)];
        for n in normals {
            for d in directions {
                let r = reflect_horizontal(d, n);
                assert!((r.norm() - d.norm()).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn reflection_mirrors_normal_component() {
        // Wall along y, hit moving +x and +y: x flips, y is kept
        let r = reflect_horizontal(Vec3::new(0.6, 0.8, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        assert!((r.x + 0.6).abs() < 1e-12);
        assert!((r.y - 0.8).abs() < 1e-12);
        // Head-on bounce reverses
        let r = reflect_horizontal(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        assert!((r.x + 1.0).abs() < 1e-12 && r.y.abs() < 1e-12);
    }
}
