use geo_types::{LineString, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const MPH_TO_KMH: f64 = 1.60934;

/// Identifies a link by its two end nodes, in stored order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapLinkId {
    pub node_a: String,
    pub node_b: String,
}

impl MapLinkId {
    pub fn new(node_a: impl Into<String>, node_b: impl Into<String>) -> Self {
        Self {
            node_a: node_a.into(),
            node_b: node_b.into(),
        }
    }

    pub fn is_loop(&self) -> bool {
        self.node_a == self.node_b
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.node_b.clone(), self.node_a.clone())
    }
}

impl fmt::Display for MapLinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.node_a, self.node_b)
    }
}

impl FromStr for MapLinkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((a, b)) if !a.is_empty() && !b.is_empty() => Ok(Self::new(a, b)),
            _ => Err(format!("invalid link id '{}', expected '<node>-<node>'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoadClass {
    Unclassified,
    Motorway,
    Trunk,
    Primary,
    Secondary,
    Tertiary,
    Residential,
    Ignored,
}

impl RoadClass {
    /// Road class for an OSM `highway` value.
    pub fn from_highway(highway: Option<&str>) -> Self {
        match highway {
            Some("motorway") => Self::Motorway,
            Some("trunk") => Self::Trunk,
            Some("primary") => Self::Primary,
            Some("secondary") => Self::Secondary,
            Some("tertiary") => Self::Tertiary,
            Some("road") => Self::Unclassified,
            Some("residential") => Self::Residential,
            _ => Self::Ignored,
        }
    }
}

/// Travel direction over a link relative to its stored node order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn from_reversed(reversed: bool) -> Self {
        if reversed {
            Self::Backward
        } else {
            Self::Forward
        }
    }
}

/// One road segment with its geographic geometry (x = lon, y = lat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLink {
    pub id: MapLinkId,
    pub geometry: LineString<f64>,
    pub road_class: RoadClass,
    pub lanes: Option<u32>,
    /// km/h
    pub speed_limit: Option<f64>,
    pub highway: bool,
    pub tunnel: bool,
    pub bridge: bool,
    #[serde(default)]
    pub crossings: Vec<Point<f64>>,
}

impl MapLink {
    /// Builds a link from OSM way tags.
    pub fn from_tags(
        id: MapLinkId,
        geometry: LineString<f64>,
        tags: &BTreeMap<String, String>,
        crossings: Vec<Point<f64>>,
    ) -> Self {
        let highway = tags.get("highway").map(String::as_str);
        Self {
            id,
            geometry,
            road_class: RoadClass::from_highway(highway),
            lanes: tags.get("lanes").and_then(|v| parse_lanes(v)),
            speed_limit: tags.get("maxspeed").and_then(|v| parse_max_speed(v)),
            highway: highway.is_some(),
            tunnel: tags.contains_key("tunnel"),
            bridge: tags.contains_key("bridge"),
            crossings,
        }
    }

    /// Lane count. The direction is accepted but not yet used: lanes are
    /// stored per link, not per travel direction.
    pub fn lane_count(&self, _direction: Direction) -> Option<u32> {
        self.lanes
    }

    /// Speed limit in km/h. The direction is accepted but not yet used.
    pub fn speed_limit(&self, _direction: Direction) -> Option<f64> {
        self.speed_limit
    }

    pub fn is_highway(&self) -> bool {
        self.highway
    }

    pub fn is_tunnel(&self) -> bool {
        self.tunnel
    }

    pub fn is_bridge(&self) -> bool {
        self.bridge
    }

    pub fn pedestrian_crossings(&self) -> &[Point<f64>] {
        &self.crossings
    }
}

fn parse_lanes(value: &str) -> Option<u32> {
    value
        .split(';')
        .filter_map(|v| v.trim().parse::<u32>().ok())
        .max()
}

/// Parses `maxspeed`, taking the largest of multiple values and converting mph.
fn parse_max_speed(value: &str) -> Option<f64> {
    let mph = value.contains("mph");
    let speed = value
        .split(';')
        .filter_map(|v| {
            v.trim()
                .trim_end_matches("mph")
                .trim_end_matches("km/h")
                .trim()
                .parse::<f64>()
                .ok()
        })
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))?;

    if mph {
        Some((speed * MPH_TO_KMH).trunc())
    } else {
        Some(speed)
    }
}
