//! Geometry primitives over lat/lon boxes
//!
//! Boxes are `geo::Rect` with `x` = longitude and `y` = latitude. Every clip
//! snaps boundary crossings exactly onto the box edge, so clipped output lies
//! inside the (closed) box and clipping it again returns it unchanged.

use geo::{Area as _, Coord, LineString, Polygon, Rect};
use smallvec::SmallVec;

/// Polygons whose clipped area is at or below this are dropped.
pub(crate) const MIN_CLIPPED_AREA: f64 = 1e-10;

/// True if the coordinate is inside the closed box.
#[inline]
pub fn contains_point(bounds: &Rect<f64>, coord: Coord<f64>) -> bool {
    let (min, max) = (bounds.min(), bounds.max());
    coord.x >= min.x && coord.x <= max.x && coord.y >= min.y && coord.y <= max.y
}

/// True if `inner` lies entirely within `outer`.
#[inline]
pub fn contains_rect(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    contains_point(outer, inner.min()) && contains_point(outer, inner.max())
}

/// True if the closed boxes overlap or touch.
#[inline]
pub fn intersects_rect(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && a.max().x >= b.min().x && a.min().y <= b.max().y && a.max().y >= b.min().y
}

/// Bounding box of a coordinate run, `None` when empty.
pub(crate) fn bounding_rect(coords: &[Coord<f64>]) -> Option<Rect<f64>> {
    let first = *coords.first()?;
    let (mut min, mut max) = (first, first);
    for c in &coords[1..] {
        min.x = min.x.min(c.x);
        min.y = min.y.min(c.y);
        max.x = max.x.max(c.x);
        max.y = max.y.max(c.y);
    }
    Some(Rect::new(min, max))
}

/// Distance from `p` to the segment `a`-`b` in degrees.
pub(crate) fn segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let d = b - a;
    let len_sq = d.x * d.x + d.y * d.y;
    if len_sq == 0.0 {
        return (p - a).x.hypot((p - a).y);
    }
    let t = (((p.x - a.x) * d.x + (p.y - a.y) * d.y) / len_sq).clamp(0.0, 1.0);
    let proj = Coord {
        x: a.x + t * d.x,
        y: a.y + t * d.y,
    };
    (p.x - proj.x).hypot(p.y - proj.y)
}

/// Least distance from `p` to the boundary of the box.
pub(crate) fn distance_to_edge(bounds: &Rect<f64>, p: Coord<f64>) -> f64 {
    let (min, max) = (bounds.min(), bounds.max());
    let corners = [
        min,
        Coord { x: max.x, y: min.y },
        max,
        Coord { x: min.x, y: max.y },
    ];
    (0..4)
        .map(|i| segment_distance(p, corners[i], corners[(i + 1) % 4]))
        .fold(f64::INFINITY, f64::min)
}

#[inline]
fn snap(bounds: &Rect<f64>, c: Coord<f64>) -> Coord<f64> {
    let (min, max) = (bounds.min(), bounds.max());
    Coord {
        x: c.x.clamp(min.x, max.x),
        y: c.y.clamp(min.y, max.y),
    }
}

#[inline]
fn lerp(a: Coord<f64>, b: Coord<f64>, t: f64) -> Coord<f64> {
    Coord {
        x: a.x + t * (b.x - a.x),
        y: a.y + t * (b.y - a.y),
    }
}

/// Where an edge crosses the box: the parameter along the edge and, when
/// the crossing is on a box side, that side's axis and value.
#[derive(Clone, Copy)]
struct Crossing {
    t: f64,
    side: Option<(bool, f64)>,
}

impl Crossing {
    /// The crossing coordinate with the side's axis set exactly.
    fn at(&self, bounds: &Rect<f64>, a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
        let mut c = lerp(a, b, self.t);
        match self.side {
            Some((true, value)) => c.x = value,
            Some((false, value)) => c.y = value,
            None => {}
        }
        snap(bounds, c)
    }
}

/// Liang-Barsky parametric clip of one edge, returning the visible range.
fn clip_edge(bounds: &Rect<f64>, a: Coord<f64>, b: Coord<f64>) -> Option<(Crossing, Crossing)> {
    let (min, max) = (bounds.min(), bounds.max());
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    // (p, q, is x axis, side value)
    let checks = [
        (-dx, a.x - min.x, true, min.x),
        (dx, max.x - a.x, true, max.x),
        (-dy, a.y - min.y, false, min.y),
        (dy, max.y - a.y, false, max.y),
    ];

    let mut enter = Crossing { t: 0.0, side: None };
    let mut exit = Crossing { t: 1.0, side: None };
    for (p, q, is_x, value) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > enter.t {
                    enter = Crossing { t: r, side: Some((is_x, value)) };
                }
            } else if r < exit.t {
                exit = Crossing { t: r, side: Some((is_x, value)) };
            }
        }
    }

    (enter.t <= exit.t).then_some((enter, exit))
}

/// Clip an open polyline against a box.
///
/// Returns every inside run as its own line; a line fully inside comes back
/// unchanged and a line fully outside yields nothing.
pub fn clip_line(bounds: &Rect<f64>, line: &LineString<f64>) -> SmallVec<[LineString<f64>; 2]> {
    let coords = &line.0;
    let mut pieces = SmallVec::new();

    if coords.iter().all(|c| contains_point(bounds, *c)) {
        if !coords.is_empty() {
            pieces.push(line.clone());
        }
        return pieces;
    }

    if coords.len() < 2 {
        return pieces;
    }

    let mut current: Vec<Coord<f64>> = Vec::new();
    for pair in coords.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let Some((enter, exit)) = clip_edge(bounds, a, b) else {
            flush_piece(&mut current, &mut pieces);
            continue;
        };

        let start = if enter.side.is_none() { a } else { enter.at(bounds, a, b) };
        let end = if exit.side.is_none() { b } else { exit.at(bounds, a, b) };

        if current.last() != Some(&start) {
            flush_piece(&mut current, &mut pieces);
            current.push(start);
        }
        if end != start || current.len() == 1 {
            current.push(end);
        }

        // left the box through this edge
        if exit.side.is_some() {
            flush_piece(&mut current, &mut pieces);
        }
    }
    flush_piece(&mut current, &mut pieces);

    pieces
}

fn flush_piece(current: &mut Vec<Coord<f64>>, pieces: &mut SmallVec<[LineString<f64>; 2]>) {
    let run = std::mem::take(current);
    // a run touching the box in a single point is not a piece
    if run.len() >= 2 && run.iter().any(|c| *c != run[0]) {
        pieces.push(LineString::new(run));
    }
}

/// Open ring coordinates of a closed `LineString` (closing point removed).
pub(crate) fn open_ring(ring: &LineString<f64>) -> &[Coord<f64>] {
    let coords = &ring.0;
    match (coords.first(), coords.last()) {
        (Some(first), Some(last)) if coords.len() > 1 && first == last => &coords[..coords.len() - 1],
        _ => coords,
    }
}

/// Sutherland-Hodgman clip of an open ring against the box.
fn clip_ring(bounds: &Rect<f64>, ring: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let (min, max) = (bounds.min(), bounds.max());
    // (inside test, axis value, is x axis)
    let edges: [(fn(Coord<f64>, f64) -> bool, f64, bool); 4] = [
        (|c, v| c.x >= v, min.x, true),
        (|c, v| c.x <= v, max.x, true),
        (|c, v| c.y >= v, min.y, false),
        (|c, v| c.y <= v, max.y, false),
    ];

    let mut output = ring.to_vec();
    for (inside, value, is_x) in edges {
        if output.is_empty() {
            break;
        }
        let input = std::mem::take(&mut output);
        let mut prev = input[input.len() - 1];
        for &current in &input {
            let cross = |a: Coord<f64>, b: Coord<f64>| {
                let t = if is_x {
                    (value - a.x) / (b.x - a.x)
                } else {
                    (value - a.y) / (b.y - a.y)
                };
                let mut c = lerp(a, b, t);
                if is_x {
                    c.x = value;
                } else {
                    c.y = value;
                }
                snap(bounds, c)
            };

            if inside(current, value) {
                if !inside(prev, value) {
                    output.push(cross(prev, current));
                }
                output.push(current);
            } else if inside(prev, value) {
                output.push(cross(prev, current));
            }
            prev = current;
        }
    }

    output.dedup();
    while output.len() > 1 && output.first() == output.last() {
        output.pop();
    }
    output
}

fn ring_to_polygon_area(ring: &[Coord<f64>]) -> f64 {
    Polygon::new(LineString::new(ring.to_vec()), Vec::new()).unsigned_area()
}

fn clip_closed_ring(bounds: &Rect<f64>, ring: &LineString<f64>) -> Option<LineString<f64>> {
    let open = open_ring(ring);
    if open.iter().all(|c| contains_point(bounds, *c)) {
        return Some(ring.clone());
    }
    let clipped = clip_ring(bounds, open);
    if clipped.len() < 3 || ring_to_polygon_area(&clipped) <= MIN_CLIPPED_AREA {
        return None;
    }
    let mut closed = LineString::new(clipped);
    closed.close();
    Some(closed)
}

/// Clip a polygon against a box.
///
/// The exterior is clipped with Sutherland-Hodgman and each hole is clipped
/// independently against the same box. Returns `None` when nothing with a
/// meaningful area is left.
pub fn clip_polygon(bounds: &Rect<f64>, polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = open_ring(polygon.exterior());
    let extent = bounding_rect(exterior)?;
    if !intersects_rect(bounds, &extent) {
        return None;
    }
    if contains_rect(bounds, &extent) {
        return Some(polygon.clone());
    }

    let exterior = clip_closed_ring(bounds, polygon.exterior())?;
    let holes = polygon
        .interiors()
        .iter()
        .filter_map(|hole| clip_closed_ring(bounds, hole))
        .collect();
    Some(Polygon::new(exterior, holes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Rect<f64> {
        Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 1.0, y: 1.0 })
    }

    fn line(points: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(points.to_vec())
    }

    #[test]
    fn test_contains_and_intersects() {
        let b = unit_box();
        assert!(contains_point(&b, Coord { x: 0.0, y: 1.0 }));
        assert!(!contains_point(&b, Coord { x: 1.1, y: 0.5 }));

        let inner = Rect::new(Coord { x: 0.2, y: 0.2 }, Coord { x: 0.8, y: 0.8 });
        let far = Rect::new(Coord { x: 2.0, y: 2.0 }, Coord { x: 3.0, y: 3.0 });
        assert!(contains_rect(&b, &inner));
        assert!(!contains_rect(&inner, &b));
        assert!(intersects_rect(&b, &inner));
        assert!(!intersects_rect(&b, &far));
    }

    #[test]
    fn test_segment_distance() {
        let a = Coord { x: 0.0, y: 0.0 };
        let b = Coord { x: 2.0, y: 0.0 };
        assert!((segment_distance(Coord { x: 1.0, y: 1.0 }, a, b) - 1.0).abs() < 1e-12);
        assert!((segment_distance(Coord { x: 3.0, y: 0.0 }, a, b) - 1.0).abs() < 1e-12);
        assert!((segment_distance(Coord { x: 0.0, y: 2.0 }, a, a) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_clip_line_inside_unchanged() {
        let l = line(&[(0.1, 0.1), (0.5, 0.9), (0.9, 0.2)]);
        let pieces = clip_line(&unit_box(), &l);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0], l);
    }

    #[test]
    fn test_clip_line_outside_empty() {
        let l = line(&[(2.0, 2.0), (3.0, 3.0)]);
        assert!(clip_line(&unit_box(), &l).is_empty());
    }

    #[test]
    fn test_clip_line_crossing() {
        let l = line(&[(-1.0, 0.5), (2.0, 0.5)]);
        let pieces = clip_line(&unit_box(), &l);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0], line(&[(0.0, 0.5), (1.0, 0.5)]));
    }

    #[test]
    fn test_clip_line_multiple_pieces() {
        // dips out of the box through the top and comes back
        let l = line(&[(0.1, 0.5), (0.3, 1.5), (0.6, 1.5), (0.8, 0.5)]);
        let pieces = clip_line(&unit_box(), &l);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].0[0], Coord { x: 0.1, y: 0.5 });
        assert_eq!(pieces[0].0[1].y, 1.0);
        assert_eq!(pieces[1].0[0].y, 1.0);
        assert_eq!(pieces[1].0[1], Coord { x: 0.8, y: 0.5 });
    }

    #[test]
    fn test_clip_line_idempotent() {
        let b = unit_box();
        let l = line(&[(-0.3, -0.7), (0.4, 0.45), (1.7, 0.8), (0.2, 2.0)]);
        let once = clip_line(&b, &l);
        assert!(!once.is_empty());
        for piece in &once {
            let twice = clip_line(&b, piece);
            assert_eq!(twice.len(), 1);
            assert_eq!(&twice[0], piece);
        }
    }

    #[test]
    fn test_clip_two_point_line() {
        let l = line(&[(0.2, 0.2), (0.4, 0.4)]);
        let pieces = clip_line(&unit_box(), &l);
        assert_eq!(pieces[0].0.len(), 2);
    }

    #[test]
    fn test_clip_polygon_inside_unchanged() {
        let p = Polygon::new(
            line(&[(0.1, 0.1), (0.9, 0.1), (0.9, 0.9), (0.1, 0.9)]),
            vec![line(&[(0.4, 0.4), (0.6, 0.4), (0.6, 0.6)])],
        );
        assert_eq!(clip_polygon(&unit_box(), &p), Some(p));
    }

    #[test]
    fn test_clip_polygon_outside_none() {
        let p = Polygon::new(line(&[(2.0, 2.0), (3.0, 2.0), (3.0, 3.0)]), vec![]);
        assert!(clip_polygon(&unit_box(), &p).is_none());
    }

    #[test]
    fn test_clip_polygon_overlapping() {
        let p = Polygon::new(line(&[(0.5, 0.5), (1.5, 0.5), (1.5, 1.5), (0.5, 1.5)]), vec![]);
        let clipped = clip_polygon(&unit_box(), &p).unwrap();
        assert!((clipped.unsigned_area() - 0.25).abs() < 1e-12);
        assert!(clipped.exterior().is_closed());

        let again = clip_polygon(&unit_box(), &clipped).unwrap();
        assert_eq!(again, clipped);
    }

    #[test]
    fn test_clip_polygon_holes_independent() {
        let p = Polygon::new(
            line(&[(-1.0, -1.0), (2.0, -1.0), (2.0, 2.0), (-1.0, 2.0)]),
            vec![
                // fully inside the box
                line(&[(0.2, 0.2), (0.4, 0.2), (0.4, 0.4), (0.2, 0.4)]),
                // straddles the right edge
                line(&[(0.8, 0.6), (1.2, 0.6), (1.2, 0.8), (0.8, 0.8)]),
                // fully outside
                line(&[(1.5, 1.5), (1.8, 1.5), (1.8, 1.8)]),
            ],
        );
        let clipped = clip_polygon(&unit_box(), &p).unwrap();
        assert_eq!(clipped.interiors().len(), 2);
        assert_eq!(clipped.interiors()[0], p.interiors()[0]);
        let cut = Polygon::new(clipped.interiors()[1].clone(), vec![]);
        assert!((cut.unsigned_area() - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_clip_polygon_sliver_dropped() {
        // only touches the box along its left edge
        let p = Polygon::new(line(&[(1.0, 0.2), (2.0, 0.2), (2.0, 0.4), (1.0, 0.4)]), vec![]);
        assert!(clip_polygon(&unit_box(), &p).is_none());
    }
}
