pub mod error;
pub mod geometry;
pub mod local_frame;
pub mod map_data;
pub mod map_link;
pub mod osm_extract;
pub mod route_builder;
pub mod route_graph;
pub mod route_matcher;
pub mod route_properties;
pub mod sample;

pub use error::{ErrorCategory, RouteError};
pub use local_frame::{LocalFrame, VehiclePose};
pub use map_data::{GeoRectangle, MapDataProvider, MapExtract};
pub use map_link::{Direction, MapLink, MapLinkId, RoadClass};
pub use route_builder::{BuildReport, RouteBuilderConfig, RouteOutcome, build_route};
pub use route_graph::{RouteGraph, SearchLimits};
pub use route_properties::RouteProperties;
pub use sample::{GroundTruth, RouteRecord, RouteSample};
