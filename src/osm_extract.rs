//! Builds a link extract from an OpenStreetMap `.osm.pbf` file.
//!
//! Every pair of consecutive way nodes becomes one link, so the extract keeps
//! all intermediate nodes. Two-way roads produce a link in each direction.

use anyhow::{Context, Result};
use geo::{BoundingRect, Coord, Intersects, LineString, Point, Rect};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use osmpbf::{Element, ElementReader};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use crate::geometry;
use crate::map_data::MapExtract;
use crate::map_link::{MapLink, MapLinkId};

/// `highway` values kept in the extract.
const DRIVABLE_HIGHWAYS: &[&str] = &[
    "motorway",
    "trunk",
    "primary",
    "secondary",
    "tertiary",
    "motorway_link",
    "trunk_link",
    "primary_link",
    "secondary_link",
    "tertiary_link",
    "residential",
    "living_street",
    "unclassified",
    "road",
    "service",
];

struct WayEntry {
    refs: Vec<i64>,
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Oneway {
    No,
    Forward,
    Backward,
}

fn oneway(tags: &BTreeMap<String, String>) -> Oneway {
    match tags.get("oneway").map(String::as_str) {
        Some("yes" | "1" | "true") => Oneway::Forward,
        Some("-1" | "reverse") => Oneway::Backward,
        Some("no" | "0" | "false") => Oneway::No,
        _ => {
            let motorway = tags.get("highway").is_some_and(|h| h == "motorway");
            let roundabout = tags.get("junction").is_some_and(|j| j == "roundabout");
            if motorway || roundabout {
                Oneway::Forward
            } else {
                Oneway::No
            }
        }
    }
}

/// Parses `min_lon,min_lat,max_lon,max_lat`.
pub fn parse_bbox(value: &str) -> Result<Rect<f64>, String> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid bounding box '{}': {}", value, e))?;
    match parts.as_slice() {
        [min_lon, min_lat, max_lon, max_lat] => Ok(Rect::new(
            Coord {
                x: *min_lon,
                y: *min_lat,
            },
            Coord {
                x: *max_lon,
                y: *max_lat,
            },
        )),
        _ => Err(format!(
            "invalid bounding box '{}', expected min_lon,min_lat,max_lon,max_lat",
            value
        )),
    }
}

/// Reads drivable roads from a PBF file, optionally limited to a bounding box.
pub fn extract_pbf(path: &Path, bbox: Option<Rect<f64>>) -> Result<MapExtract> {
    let reader = ElementReader::from_path(path)
        .with_context(|| format!("Failed to open OSM file {:?}", path))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner} {pos} elements - {msg}")?,
    );
    pb.set_message("Reading OSM data");

    let mut nodes: HashMap<i64, Coord<f64>> = HashMap::new();
    let mut crossings: HashSet<i64> = HashSet::new();
    let mut ways = Vec::new();

    reader
        .for_each(|element| {
            pb.inc(1);
            match element {
                Element::Node(node) => {
                    nodes.insert(
                        node.id(),
                        Coord {
                            x: node.lon(),
                            y: node.lat(),
                        },
                    );
                    if node.tags().any(|(k, v)| k == "highway" && v == "crossing") {
                        crossings.insert(node.id());
                    }
                }
                Element::DenseNode(node) => {
                    nodes.insert(
                        node.id(),
                        Coord {
                            x: node.lon(),
                            y: node.lat(),
                        },
                    );
                    if node.tags().any(|(k, v)| k == "highway" && v == "crossing") {
                        crossings.insert(node.id());
                    }
                }
                Element::Way(way) => {
                    let drivable = way
                        .tags()
                        .any(|(k, v)| k == "highway" && DRIVABLE_HIGHWAYS.contains(&v));
                    if !drivable {
                        return;
                    }
                    let refs: Vec<i64> = way.refs().collect();
                    if refs.len() > 1 {
                        ways.push(WayEntry {
                            refs,
                            tags: way
                                .tags()
                                .map(|(k, v)| (k.to_string(), v.to_string()))
                                .collect(),
                        });
                    }
                }
                Element::Relation(_) => {}
            }
        })
        .with_context(|| format!("Failed to read OSM file {:?}", path))?;

    pb.finish_with_message(format!(
        "Read {} nodes, {} ways, {} crossings",
        nodes.len(),
        ways.len(),
        crossings.len()
    ));

    let links = links_from_ways(&ways, &nodes, &crossings, bbox);
    info!("Extracted {} links from {:?}", links.len(), path);
    Ok(MapExtract::new(links))
}

fn links_from_ways(
    ways: &[WayEntry],
    nodes: &HashMap<i64, Coord<f64>>,
    crossings: &HashSet<i64>,
    bbox: Option<Rect<f64>>,
) -> Vec<MapLink> {
    let mut links = Vec::new();
    let mut missing_nodes = 0;

    for way in ways {
        let direction = oneway(&way.tags);
        for pair in way.refs.windows(2) {
            let (u, v) = (pair[0], pair[1]);
            if u == v {
                continue;
            }
            let (Some(&cu), Some(&cv)) = (nodes.get(&u), nodes.get(&v)) else {
                missing_nodes += 1;
                continue;
            };

            let forward = LineString::from(vec![cu, cv]);
            if let Some(area) = bbox {
                if !forward
                    .bounding_rect()
                    .is_some_and(|segment| segment.intersects(&area))
                {
                    continue;
                }
            }

            let crossing_points: Vec<Point<f64>> = [(u, cu), (v, cv)]
                .into_iter()
                .filter(|(id, _)| crossings.contains(id))
                .map(|(_, c)| Point::from(c))
                .collect();

            let link = |a: i64, b: i64, line: LineString<f64>| {
                MapLink::from_tags(
                    MapLinkId::new(a.to_string(), b.to_string()),
                    line,
                    &way.tags,
                    crossing_points.clone(),
                )
            };

            match direction {
                Oneway::Forward => links.push(link(u, v, forward)),
                Oneway::Backward => links.push(link(v, u, geometry::reverse(&forward))),
                Oneway::No => {
                    links.push(link(v, u, geometry::reverse(&forward)));
                    links.push(link(u, v, forward));
                }
            }
        }
    }

    if missing_nodes > 0 {
        debug!("Skipped {} way segments with nodes outside the file", missing_nodes);
    }
    links
}
