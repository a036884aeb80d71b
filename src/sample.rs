//! Input samples and output records of the route builder.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geo::{Coord, LineString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::local_frame::{LocalFrame, VehiclePose};
use crate::route_properties::RouteProperties;

/// Recorded trajectory the vehicle actually drove after the sample time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum GroundTruth {
    /// Points in the vehicle frame as `[x, y]` meters.
    Local { points: Vec<[f64; 2]> },
    /// Geographic points as `[lat, lon]`.
    Global { points: Vec<[f64; 2]> },
}

impl GroundTruth {
    pub fn to_local(&self, frame: &LocalFrame) -> LineString<f64> {
        match self {
            Self::Local { points } => points
                .iter()
                .map(|&[x, y]| Coord { x, y })
                .collect::<Vec<_>>()
                .into(),
            Self::Global { points } => points
                .iter()
                .map(|&[lat, lon]| frame.to_local(lat, lon))
                .collect::<Vec<_>>()
                .into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSample {
    pub sample_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub pose: VehiclePose,
    pub ground_truth: GroundTruth,
}

/// The route chosen for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub sample_id: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Winning route in the vehicle frame.
    pub route_coords: Vec<[f64; 2]>,
    pub route_properties: RouteProperties,
    pub clean_nodes: Vec<String>,
    pub start_offset: f64,
    pub num_candidates: usize,
    pub discrepancy: f64,
}

pub fn line_coords(line: &LineString<f64>) -> Vec<[f64; 2]> {
    line.0.iter().map(|c| [c.x, c.y]).collect()
}

/// Loads a JSON array of samples.
pub fn load_samples(path: &Path) -> Result<Vec<RouteSample>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open samples file {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid samples file {:?}", path))
}

pub fn write_records(path: &Path, records: &[RouteRecord]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create output file {:?}", path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), records)?;
    Ok(())
}

/// GeoJSON view of a sample in the vehicle frame: the chosen route, the
/// other candidates and the ground truth.
pub fn route_geojson(
    best: &LineString<f64>,
    candidates: &[LineString<f64>],
    ground_truth: &LineString<f64>,
) -> Value {
    let feature = |line: &LineString<f64>, kind: &str, color: &str, weight: u32| {
        json!({
            "type": "Feature",
            "properties": {
                "type": kind,
                "color": color,
                "weight": weight
            },
            "geometry": {
                "type": "LineString",
                "coordinates": line_coords(line)
            }
        })
    };

    let mut features: Vec<Value> = candidates
        .iter()
        .map(|c| feature(c, "candidate", "#999999", 2))
        .collect();
    features.push(feature(ground_truth, "ground_truth", "#0000FF", 3));
    features.push(feature(best, "matched_route", "#FF0000", 4));

    json!({
        "type": "FeatureCollection",
        "features": features
    })
}
