//! Planar polyline operations in the vehicle frame.
//!
//! Everything here works on `geo` line strings with metric coordinates, so
//! distances are plain euclidean distances and arc lengths are in meters.

use geo::{
    Closest, ClosestPoint, Coord, Distance, Euclidean, Length, LineInterpolatePoint,
    LineLocatePoint, LineString, Point,
};

use crate::error::RouteError;

/// Coordinates closer than this are treated as the same point.
pub const COORD_EPSILON: f64 = 1e-9;

/// Result of cutting a polyline near a point.
#[derive(Debug, Clone, PartialEq)]
pub enum Split {
    /// The cut fell inside the line. `leading` ends exactly where `trailing` starts.
    Inner {
        leading: LineString<f64>,
        trailing: LineString<f64>,
    },
    /// The point coincides with the first coordinate.
    AtStart,
    /// The point coincides with the last coordinate.
    AtEnd,
}

pub fn coords_close(a: Coord<f64>, b: Coord<f64>, tolerance: f64) -> bool {
    (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance
}

fn segment_length(start: Coord<f64>, end: Coord<f64>) -> f64 {
    Euclidean.distance(Point::from(start), Point::from(end))
}

/// Total arc length of the line.
pub fn length(line: &LineString<f64>) -> f64 {
    Euclidean.length(line)
}

/// Point at `distance` along the line, clamped to its ends.
pub fn interpolate(line: &LineString<f64>, distance: f64) -> Option<Coord<f64>> {
    let first = *line.0.first()?;
    let last = *line.0.last()?;
    let total = length(line);
    if distance <= 0.0 {
        return Some(first);
    }
    if distance >= total {
        return Some(last);
    }
    line.line_interpolate_point(distance / total).map(|p| p.0)
}

/// Part of the line between two arc lengths.
pub fn slice(line: &LineString<f64>, start: f64, end: f64) -> LineString<f64> {
    let total = length(line);
    let start = start.clamp(0.0, total);
    let end = end.clamp(start, total);

    let mut coords = Vec::new();
    if let Some(c) = interpolate(line, start) {
        coords.push(c);
    }
    let mut travelled = 0.0;
    for l in line.lines() {
        travelled += segment_length(l.start, l.end);
        if travelled > start && travelled < end {
            coords.push(l.end);
        }
    }
    if let Some(c) = interpolate(line, end) {
        coords.push(c);
    }
    LineString::from(coords)
}

/// The first `distance` meters of the line.
pub fn substring(line: &LineString<f64>, distance: f64) -> LineString<f64> {
    slice(line, 0.0, distance)
}

/// Closest point on the line to `point`.
pub fn nearest_point(line: &LineString<f64>, point: Coord<f64>) -> Option<Coord<f64>> {
    match line.closest_point(&Point::from(point)) {
        Closest::SinglePoint(p) | Closest::Intersection(p) => Some(p.0),
        Closest::Indeterminate => interpolate(line, locate_point(line, point)),
    }
}

/// Shortest distance between the line and `point`, infinite for an empty line.
pub fn distance_to_point(line: &LineString<f64>, point: Coord<f64>) -> f64 {
    nearest_point(line, point)
        .map(|p| segment_length(p, point))
        .unwrap_or(f64::INFINITY)
}

/// Arc length from the start of the line to the projection of `point`.
///
/// The first of several equally close segments wins.
pub fn locate_point(line: &LineString<f64>, point: Coord<f64>) -> f64 {
    line.line_locate_point(&Point::from(point))
        .map(|fraction| fraction * length(line))
        .unwrap_or(0.0)
}

/// Cuts the line at the projection of `point`.
///
/// The span of `tolerance` on either side of the cut is dropped and the two
/// halves are joined at the far edge of that span, so a cut closer than
/// `tolerance` to either end is reported as coinciding with that end.
pub fn split_at(line: &LineString<f64>, point: Coord<f64>, tolerance: f64) -> Split {
    let total = length(line);
    let at = locate_point(line, point);

    if at - tolerance <= COORD_EPSILON || at + tolerance >= total - COORD_EPSILON {
        return if at <= total - at {
            Split::AtStart
        } else {
            Split::AtEnd
        };
    }

    let cut = at + tolerance;
    let trailing = slice(line, cut, total);
    let mut leading = slice(line, 0.0, at - tolerance);
    leading.0.pop();
    leading.0.push(trailing.0[0]);

    Split::Inner { leading, trailing }
}

pub fn reverse(line: &LineString<f64>) -> LineString<f64> {
    LineString::from(line.0.iter().rev().copied().collect::<Vec<_>>())
}

/// Joins consecutive parts into one line, dropping the duplicated junction
/// coordinates. Every part must start where the previous one ended.
pub fn concatenate<'a, I>(parts: I) -> Result<LineString<f64>, RouteError>
where
    I: IntoIterator<Item = &'a LineString<f64>>,
{
    let mut coords: Vec<Coord<f64>> = Vec::new();
    for (i, part) in parts.into_iter().enumerate() {
        match (coords.last(), part.0.first()) {
            (None, _) => coords.extend(part.0.iter().copied()),
            (Some(prev_last), Some(current_first)) => {
                if !coords_close(*prev_last, *current_first, COORD_EPSILON) {
                    return Err(RouteError::integrity(format!(
                        "connection {} starts at ({:.6}, {:.6}) but the previous one ends at ({:.6}, {:.6})",
                        i, current_first.x, current_first.y, prev_last.x, prev_last.y
                    )));
                }
                coords.extend(part.0.iter().skip(1).copied());
            }
            (Some(_), None) => {
                return Err(RouteError::integrity(format!("connection {} is empty", i)));
            }
        }
    }
    Ok(LineString::from(coords))
}
