use anyhow::{Context, ensure};
use geo::LineString;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::RouteError;
use crate::geometry;
use crate::local_frame::LocalFrame;
use crate::map_data::{GeoRectangle, MapDataProvider};
use crate::map_link::MapLinkId;
use crate::route_graph::{RouteGraph, SearchLimits};
use crate::route_matcher;
use crate::route_properties;
use crate::sample::{RouteRecord, RouteSample, line_coords};

/// Route building configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteBuilderConfig {
    /// Route length every candidate must reach (meters)
    pub horizon: f64,
    /// Sampling step of the discrepancy metric (meters)
    pub sample_step: f64,
    /// First radius searched for start nodes (meters)
    pub initial_search_radius: f64,
    /// Radius growth per retry (meters)
    pub search_radius_step: f64,
    /// Radius expansions before giving up
    pub max_search_iterations: usize,
    /// Gap left on each side of a split point (meters)
    pub split_tolerance: f64,
    /// Maximum distance when matching route junctions back to nodes (meters)
    pub node_match_tolerance: f64,
    /// Allowed deviation of truncated lines from the horizon (meters)
    pub horizon_tolerance: f64,
    /// Side of the square map area queried around the vehicle (meters)
    pub search_rectangle_m: f64,
    /// Cap on enumerated routes per sample
    pub max_routes: Option<usize>,
    /// Cap on partial paths expanded per sample, including dead ends
    pub max_explored_paths: Option<usize>,
}

impl Default for RouteBuilderConfig {
    fn default() -> Self {
        Self {
            horizon: 200.0,
            sample_step: 2.0,
            initial_search_radius: 10.0,
            search_radius_step: 10.0,
            max_search_iterations: 100,
            split_tolerance: 0.01,
            node_match_tolerance: 0.1,
            horizon_tolerance: 1e-6,
            search_rectangle_m: 400.0,
            max_routes: Some(100_000),
            max_explored_paths: Some(1_000_000),
        }
    }
}

impl RouteBuilderConfig {
    /// Reads a JSON config; missing fields keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open config {:?}", path))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid config {:?}", path))?;
        config
            .validate()
            .with_context(|| format!("Invalid config {:?}", path))?;
        Ok(config)
    }

    /// Rejects settings the route search and the matcher can not work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let positive = [
            ("horizon", self.horizon),
            ("sample_step", self.sample_step),
            ("search_radius_step", self.search_radius_step),
            ("split_tolerance", self.split_tolerance),
            ("node_match_tolerance", self.node_match_tolerance),
            ("search_rectangle_m", self.search_rectangle_m),
        ];
        for (name, value) in positive {
            ensure!(
                value.is_finite() && value > 0.0,
                "{} must be positive, got {}",
                name,
                value
            );
        }
        ensure!(
            self.initial_search_radius.is_finite() && self.initial_search_radius >= 0.0,
            "initial_search_radius must not be negative, got {}",
            self.initial_search_radius
        );
        ensure!(
            self.horizon_tolerance.is_finite() && self.horizon_tolerance >= 0.0,
            "horizon_tolerance must not be negative, got {}",
            self.horizon_tolerance
        );
        Ok(())
    }
}

/// Diagnostics gathered while building one route.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub links_in_area: usize,
    pub unresolved_links: Vec<MapLinkId>,
    pub skipped_loops: Vec<MapLinkId>,
    pub radius_iterations: usize,
    pub search_radius: f64,
    pub start_nodes: usize,
    pub inserted_nodes: usize,
    pub routes_truncated: bool,
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub record: RouteRecord,
    pub report: BuildReport,
    pub best_route: LineString<f64>,
    pub candidates: Vec<LineString<f64>>,
    pub ground_truth: LineString<f64>,
}

/// Builds the most likely route for one sample.
///
/// The ground truth is checked first so short samples are rejected before
/// any map data is touched. The graph is checked for reciprocity after
/// construction and again after start insertion.
pub fn build_route<P: MapDataProvider + ?Sized>(
    sample: &RouteSample,
    provider: &P,
    config: &RouteBuilderConfig,
) -> Result<RouteOutcome, RouteError> {
    let frame = LocalFrame::new(&sample.pose);
    let ground_truth = sample.ground_truth.to_local(&frame);
    let truth_length = geometry::length(&ground_truth);
    if truth_length < config.horizon {
        info!(
            "Sample {}: ground truth is only {:.1} m long, skipping",
            sample.sample_id, truth_length
        );
        return Err(RouteError::GroundTruthTooShort {
            length: truth_length,
            horizon: config.horizon,
        });
    }

    let area = GeoRectangle::around(
        sample.pose.lat,
        sample.pose.lon,
        config.search_rectangle_m,
        config.search_rectangle_m,
    );
    let link_ids = provider.links_in(&area);
    debug!(
        "Sample {}: {} links within {:.0} m",
        sample.sample_id,
        link_ids.len(),
        config.search_rectangle_m
    );

    let (mut graph, construction) = RouteGraph::build(&link_ids, provider, &frame);
    if !construction.unresolved_links.is_empty() {
        warn!(
            "Sample {}: {} links could not be resolved",
            sample.sample_id,
            construction.unresolved_links.len()
        );
    }
    graph.check_consistency()?;

    let insertion = graph.insert_start_points(config)?;
    graph.check_consistency()?;

    let enumerated = graph.enumerate_routes(config.horizon, SearchLimits::from_config(config));
    if enumerated.is_empty() {
        info!(
            "Sample {}: no route reaches {:.0} m from {} start nodes",
            sample.sample_id,
            config.horizon,
            insertion.start_nodes.len()
        );
        return Err(RouteError::NoRoutes {
            horizon: config.horizon,
        });
    }

    let candidates = enumerated
        .routes
        .iter()
        .map(|route| graph.route_polyline(route))
        .collect::<Result<Vec<_>, _>>()?;
    let matched = route_matcher::select_best(&candidates, &ground_truth, config)?;
    let best = &enumerated.routes[matched.best_index];
    debug!(
        "Sample {}: best route {:?}",
        sample.sample_id,
        graph.route_node_ids(best)
    );

    let (properties, clean) =
        route_properties::extract(&graph, best, provider, &frame, config)?;
    let best_route = candidates[matched.best_index].clone();

    let record = RouteRecord {
        sample_id: sample.sample_id.clone(),
        timestamp: sample.timestamp,
        route_coords: line_coords(&best_route),
        route_properties: properties,
        clean_nodes: clean.node_ids,
        start_offset: clean.start_offset,
        num_candidates: candidates.len(),
        discrepancy: matched.score,
    };

    let report = BuildReport {
        links_in_area: link_ids.len(),
        unresolved_links: construction.unresolved_links,
        skipped_loops: construction.skipped_loops,
        radius_iterations: insertion.iterations,
        search_radius: insertion.radius,
        start_nodes: insertion.start_nodes.len(),
        inserted_nodes: insertion.inserted_nodes,
        routes_truncated: enumerated.truncated,
    };

    Ok(RouteOutcome {
        record,
        report,
        best_route,
        candidates,
        ground_truth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: RouteBuilderConfig =
            serde_json::from_str(r#"{"horizon": 150.0, "max_routes": null}"#).unwrap();
        assert_eq!(config.horizon, 150.0);
        assert_eq!(config.max_routes, None);
        assert_eq!(config.sample_step, 2.0);
        assert_eq!(config.max_search_iterations, 100);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"initial_search_radius": 25.0}"#).unwrap();
        let config = RouteBuilderConfig::load(&path).unwrap();
        assert_eq!(config.initial_search_radius, 25.0);
        assert_eq!(config.split_tolerance, 0.01);
        assert!(RouteBuilderConfig::load(&dir.path().join("missing.json")).is_err());

        for bad in [
            r#"{"sample_step": 0.0}"#,
            r#"{"sample_step": -2.0}"#,
            r#"{"horizon": 0.0}"#,
            r#"{"search_radius_step": 0.0}"#,
            r#"{"split_tolerance": -0.01}"#,
            r#"{"initial_search_radius": -1.0}"#,
        ] {
            std::fs::write(&path, bad).unwrap();
            let err = RouteBuilderConfig::load(&path).unwrap_err();
            assert!(format!("{:#}", err).contains("must"), "{} was accepted", bad);
        }

        std::fs::write(&path, r#"{"initial_search_radius": 0.0}"#).unwrap();
        assert!(RouteBuilderConfig::load(&path).is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RouteBuilderConfig::default().validate().is_ok());
    }
}
