//! Attributes of the chosen route, read from the original map links.

use geo::LineString;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::error::RouteError;
use crate::geometry;
use crate::local_frame::LocalFrame;
use crate::map_data::MapDataProvider;
use crate::map_link::{Direction, MapLink, RoadClass};
use crate::route_builder::RouteBuilderConfig;
use crate::route_graph::{CandidateRoute, RouteGraph, SearchLimits};

/// Crossings closer together than this along the route are reported once.
pub const CROSSING_MERGE_DISTANCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteProperties {
    pub road_class: RoadClass,
    pub is_tunnel: bool,
    pub is_highway: bool,
    pub num_lanes: Option<u32>,
    /// km/h
    pub speed_limit: Option<f64>,
    pub num_links: usize,
    pub num_branches: usize,
    pub has_bridge: bool,
    /// Distances ahead of the vehicle along the route, in meters.
    pub crossings: Vec<f64>,
}

/// A route expressed in original map nodes only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRoute {
    pub node_ids: Vec<String>,
    /// Arc length from the first node to the vehicle along the first link.
    pub start_offset: f64,
}

struct CleanLink<'a> {
    link: &'a MapLink,
    reversed: bool,
    local: LineString<f64>,
}

/// Map link from `from` to `to` in the vehicle frame, oriented in travel order.
fn clean_link<'a, P: MapDataProvider + ?Sized>(
    provider: &'a P,
    frame: &LocalFrame,
    from: &str,
    to: &str,
) -> Result<CleanLink<'a>, RouteError> {
    let (link, reversed) = provider.resolve_between(from, to).map_err(|e| {
        RouteError::integrity(format!("route link {}-{} is not on the map: {}", from, to, e))
    })?;
    let mut local = frame.line_to_local(&link.geometry);
    if reversed {
        local = geometry::reverse(&local);
    }
    Ok(CleanLink {
        link,
        reversed,
        local,
    })
}

/// Reduces a route to original map nodes and reads its properties.
pub fn extract<P: MapDataProvider + ?Sized>(
    graph: &RouteGraph,
    route: &CandidateRoute,
    provider: &P,
    frame: &LocalFrame,
    config: &RouteBuilderConfig,
) -> Result<(RouteProperties, CleanRoute), RouteError> {
    let nodes = graph.clean_node_sequence(route, config.node_match_tolerance)?;
    let node_ids: Vec<String> = nodes
        .iter()
        .map(|&n| graph.node_id(n).to_string())
        .collect();

    let links = node_ids
        .windows(2)
        .map(|pair| clean_link(provider, frame, &pair[0], &pair[1]))
        .collect::<Result<Vec<_>, _>>()?;
    let first = links
        .first()
        .ok_or_else(|| RouteError::integrity("clean route has no links"))?;

    let route_start = route
        .edges
        .first()
        .and_then(|&e| graph.connection_geometry(e))
        .and_then(|g| g.0.first().copied())
        .ok_or_else(|| RouteError::integrity("route has no start point"))?;

    let start_offset = geometry::locate_point(&first.local, route_start);
    let first_length = geometry::length(&first.local);
    if start_offset >= first_length {
        return Err(RouteError::integrity(format!(
            "start offset {:.3} m is not shorter than the first link ({:.3} m)",
            start_offset, first_length
        )));
    }

    let mut crossings: Vec<f64> = Vec::new();
    let mut travelled = -start_offset;
    for clean in &links {
        for crossing in clean.link.pedestrian_crossings() {
            let local = frame.point_to_local(crossing);
            let ahead = geometry::locate_point(&clean.local, local) + travelled;
            trace!("Crossing on {} at {:.2} m", clean.link.id, ahead);
            if ahead > 0.0
                && !crossings
                    .iter()
                    .any(|d| (d - ahead).abs() < CROSSING_MERGE_DISTANCE)
            {
                crossings.push(ahead);
            }
        }
        travelled += geometry::length(&clean.local);
    }

    let num_branches = nodes
        .iter()
        .skip(1)
        .take(nodes.len().saturating_sub(2))
        .map(|&n| graph.out_degree(n))
        .sum();

    let direction = Direction::from_reversed(first.reversed);
    let properties = RouteProperties {
        road_class: first.link.road_class,
        is_tunnel: first.link.is_tunnel(),
        is_highway: first.link.is_highway(),
        num_lanes: first.link.lane_count(direction),
        speed_limit: first.link.speed_limit(direction),
        num_links: links.len(),
        num_branches,
        has_bridge: links.iter().any(|l| l.link.is_bridge()),
        crossings,
    };

    debug!(
        "Route over {} links from {} (offset {:.2} m), {} crossings ahead",
        properties.num_links,
        node_ids[0],
        start_offset,
        properties.crossings.len()
    );

    Ok((
        properties,
        CleanRoute {
            node_ids,
            start_offset,
        },
    ))
}
