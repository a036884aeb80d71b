use geo_types::LineString;
use routegen::{
    ErrorCategory, GeoRectangle, GroundTruth, MapDataProvider, MapExtract, MapLink, MapLinkId,
    RoadClass, RouteBuilderConfig, RouteError, RouteSample, VehiclePose, build_route,
};

const LAT: f64 = 52.0;
const LON: f64 = 5.0;
const ROAD_LAT: f64 = LAT + 0.00001;

fn link(a: &str, b: &str, coords: Vec<(f64, f64)>, road_class: RoadClass) -> MapLink {
    MapLink {
        id: MapLinkId::new(a, b),
        geometry: LineString::from(coords),
        road_class,
        lanes: Some(1),
        speed_limit: Some(30.0),
        highway: true,
        tunnel: false,
        bridge: false,
        crossings: Vec::new(),
    }
}

/// An east-west road through the vehicle position with a side road going
/// north from B:
///
/// ```text
///              N2
///              |
///              N1
///              |
///   W -- A -v- B -- C -- D
/// ```
fn junction_map() -> MapExtract {
    let node = |dlon: f64| (LON + dlon, ROAD_LAT);
    let north = |dlat: f64| (LON + 0.00075, ROAD_LAT + dlat);
    MapExtract::new(vec![
        link("W", "A", vec![node(-0.0015), node(-0.00075)], RoadClass::Secondary),
        link("A", "B", vec![node(-0.00075), node(0.00075)], RoadClass::Secondary),
        link("B", "C", vec![node(0.00075), node(0.00225)], RoadClass::Secondary),
        link("C", "D", vec![node(0.00225), node(0.00375)], RoadClass::Secondary),
        link("N1", "B", vec![north(0.0015), node(0.00075)], RoadClass::Residential),
        link("N1", "N2", vec![north(0.0015), north(0.003)], RoadClass::Residential),
    ])
}

fn sample(points: Vec<[f64; 2]>) -> RouteSample {
    RouteSample {
        sample_id: "sample-1".to_string(),
        timestamp: None,
        pose: VehiclePose::new(LAT, LON, 90.0),
        ground_truth: GroundTruth::Global { points },
    }
}

fn eastbound() -> RouteSample {
    sample(vec![[LAT, LON], [LAT, LON + 0.004]])
}

#[test]
fn test_route_follows_ground_truth() {
    let outcome = build_route(&eastbound(), &junction_map(), &RouteBuilderConfig::default())
        .unwrap();

    assert_eq!(outcome.record.clean_nodes, vec!["A", "B", "C", "D"]);
    assert_eq!(outcome.record.num_candidates, 2);
    assert!(outcome.record.discrepancy >= 0.0);
    assert!(outcome.record.discrepancy < 150.0);
    assert!(outcome.record.start_offset > 40.0 && outcome.record.start_offset < 60.0);

    let props = &outcome.record.route_properties;
    assert_eq!(props.road_class, RoadClass::Secondary);
    assert_eq!(props.num_links, 3);
    assert_eq!(props.num_lanes, Some(1));
    // B has three neighbors, C has two
    assert_eq!(props.num_branches, 5);

    assert_eq!(outcome.report.start_nodes, 1);
    assert_eq!(outcome.report.inserted_nodes, 1);
    assert_eq!(outcome.report.radius_iterations, 0);
    assert!(outcome.report.unresolved_links.is_empty());
}

#[test]
fn test_route_takes_the_side_road() {
    let turning = sample(vec![
        [LAT, LON],
        [LAT, LON + 0.00075],
        [LAT + 0.003, LON + 0.00075],
    ]);
    let outcome = build_route(&turning, &junction_map(), &RouteBuilderConfig::default()).unwrap();

    assert_eq!(outcome.record.clean_nodes, vec!["A", "B", "N1"]);
    assert_eq!(outcome.record.route_properties.num_links, 2);
    assert_eq!(outcome.candidates.len(), 2);
}

struct UnreachableMap;

impl MapDataProvider for UnreachableMap {
    fn links_in(&self, _rect: &GeoRectangle) -> Vec<MapLinkId> {
        panic!("map data must not be queried for rejected samples");
    }

    fn link(&self, _id: &MapLinkId) -> Option<&MapLink> {
        None
    }
}

#[test]
fn test_short_ground_truth_is_rejected_first() {
    let short = sample(vec![[LAT, LON], [LAT, LON + 0.002]]);
    let err = build_route(&short, &UnreachableMap, &RouteBuilderConfig::default()).unwrap_err();
    assert!(matches!(err, RouteError::GroundTruthTooShort { .. }));
    assert_eq!(err.category(), ErrorCategory::InputRejection);
}

#[test]
fn test_dead_end_map_has_no_routes() {
    let node = |dlon: f64| (LON + dlon, ROAD_LAT);
    let map = MapExtract::new(vec![
        link("W", "A", vec![node(-0.0015), node(-0.00075)], RoadClass::Tertiary),
        link("A", "B", vec![node(-0.00075), node(0.00075)], RoadClass::Tertiary),
    ]);
    let err = build_route(&eastbound(), &map, &RouteBuilderConfig::default()).unwrap_err();
    assert!(matches!(err, RouteError::NoRoutes { .. }));
}

#[test]
fn test_distant_road_exhausts_search() {
    let far_lat = LAT + 0.0015;
    let map = MapExtract::new(vec![link(
        "A",
        "B",
        vec![(LON - 0.003, far_lat), (LON + 0.003, far_lat)],
        RoadClass::Primary,
    )]);
    let config = RouteBuilderConfig {
        max_search_iterations: 5,
        ..RouteBuilderConfig::default()
    };
    let err = build_route(&eastbound(), &map, &config).unwrap_err();
    assert!(matches!(err, RouteError::NoStartNode { iterations: 5, .. }));
    assert_eq!(err.category(), ErrorCategory::InputRejection);
}

/// Wraps a map and advertises extra links it can not resolve.
struct IncompleteMap {
    inner: MapExtract,
    missing: Vec<MapLinkId>,
}

impl MapDataProvider for IncompleteMap {
    fn links_in(&self, rect: &GeoRectangle) -> Vec<MapLinkId> {
        let mut ids = self.inner.links_in(rect);
        ids.extend(self.missing.iter().cloned());
        ids
    }

    fn link(&self, id: &MapLinkId) -> Option<&MapLink> {
        self.inner.link(id)
    }
}

#[test]
fn test_unresolved_links_are_reported_and_skipped() {
    let map = IncompleteMap {
        inner: junction_map(),
        missing: vec![MapLinkId::new("D", "X")],
    };
    let outcome = build_route(&eastbound(), &map, &RouteBuilderConfig::default()).unwrap();
    assert_eq!(outcome.report.unresolved_links, vec![MapLinkId::new("D", "X")]);
    assert_eq!(outcome.record.clean_nodes, vec!["A", "B", "C", "D"]);
}
