//! Road graph around the vehicle and the candidate route search over it.
//!
//! Nodes live in a petgraph arena and are looked up by their map id. Every
//! directed connection carries its local-frame geometry, starting at the
//! source node and ending at the target node. Each connection has a
//! reciprocal whose geometry is the exact reversal.

use geo::{Coord, LineString};
use log::{debug, info, trace, warn};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use std::collections::{HashMap, HashSet};

use crate::error::RouteError;
use crate::geometry::{self, COORD_EPSILON, Split};
use crate::local_frame::LocalFrame;
use crate::map_data::MapDataProvider;
use crate::map_link::MapLinkId;
use crate::route_builder::RouteBuilderConfig;

/// Id prefix of nodes created by splitting a connection near the vehicle.
pub const INSERTED_NODE_PREFIX: &str = "inserted_node_";

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub is_start_candidate: bool,
}

impl GraphNode {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_start_candidate: false,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.id.starts_with(INSERTED_NODE_PREFIX)
    }
}

/// What happened to the link list while building the graph.
#[derive(Debug, Clone, Default)]
pub struct ConstructionReport {
    pub links_added: usize,
    pub skipped_loops: Vec<MapLinkId>,
    pub unresolved_links: Vec<MapLinkId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartInsertion {
    /// Number of radius expansions needed.
    pub iterations: usize,
    pub radius: f64,
    pub start_nodes: Vec<NodeIndex>,
    pub inserted_nodes: usize,
}

/// A simple path through the graph, as traversed connections.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRoute {
    pub edges: Vec<EdgeIndex>,
    pub nodes: Vec<NodeIndex>,
    pub length: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EnumeratedRoutes {
    pub routes: Vec<CandidateRoute>,
    /// Node ids visited by each route, parallel to `routes`.
    pub visited: Vec<HashSet<String>>,
    /// True when the search stopped at a cap in [`SearchLimits`].
    pub truncated: bool,
}

/// Bounds on the route search. `None` means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchLimits {
    /// Finished routes to collect before stopping.
    pub max_routes: Option<usize>,
    /// Partial paths to expand before stopping, whether or not they reach the horizon.
    pub max_explored_paths: Option<usize>,
}

impl SearchLimits {
    pub fn from_config(config: &RouteBuilderConfig) -> Self {
        Self {
            max_routes: config.max_routes,
            max_explored_paths: config.max_explored_paths,
        }
    }
}

impl EnumeratedRoutes {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }
}

struct PendingSplit {
    from: NodeIndex,
    to: NodeIndex,
    leading: LineString<f64>,
    trailing: LineString<f64>,
}

struct PathState {
    node: NodeIndex,
    edges: Vec<EdgeIndex>,
    nodes: Vec<NodeIndex>,
    length: f64,
}

/// Spatial lookup of node positions.
pub struct NodeLocator {
    tree: RTree<GeomWithData<[f64; 2], NodeIndex>>,
}

impl NodeLocator {
    /// Nearest node strictly closer than `max_distance`.
    pub fn nearest_within(&self, point: Coord<f64>, max_distance: f64) -> Option<NodeIndex> {
        let nearest = self.tree.nearest_neighbor(&[point.x, point.y])?;
        let [x, y] = *nearest.geom();
        let distance = ((x - point.x).powi(2) + (y - point.y).powi(2)).sqrt();
        (distance < max_distance).then_some(nearest.data)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteGraph {
    graph: StableDiGraph<GraphNode, LineString<f64>>,
    index: HashMap<String, NodeIndex>,
    inserted_count: usize,
}

impl RouteGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from map links, transformed into the vehicle frame.
    ///
    /// Self-loops and links the provider can not resolve are skipped and
    /// listed in the report.
    pub fn build<P: MapDataProvider + ?Sized>(
        link_ids: &[MapLinkId],
        provider: &P,
        frame: &LocalFrame,
    ) -> (Self, ConstructionReport) {
        let mut graph = Self::new();
        let mut report = ConstructionReport::default();

        for link_id in link_ids {
            if link_id.is_loop() {
                debug!("Link {} is a loop, skipping", link_id);
                report.skipped_loops.push(link_id.clone());
                continue;
            }

            let (link, reversed) =
                match provider.resolve_between(&link_id.node_a, &link_id.node_b) {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("{}", e);
                        report.unresolved_links.push(link_id.clone());
                        continue;
                    }
                };

            if link.geometry.0.len() < 2 {
                warn!("Link {} has fewer than two points, skipping", link.id);
                report.unresolved_links.push(link_id.clone());
                continue;
            }

            let mut local = frame.line_to_local(&link.geometry);
            if reversed {
                local = geometry::reverse(&local);
            }
            graph.add_link(&link_id.node_a, &link_id.node_b, local);
            report.links_added += 1;
        }

        debug!(
            "Built route graph with {} nodes and {} connections ({} loops, {} unresolved)",
            graph.node_count(),
            graph.connection_count(),
            report.skipped_loops.len(),
            report.unresolved_links.len()
        );

        (graph, report)
    }

    /// Adds both directions of a link given in local coordinates, oriented
    /// from `node_a` to `node_b`. Existing connections between the pair are
    /// replaced.
    pub fn add_link(&mut self, node_a: &str, node_b: &str, geometry: LineString<f64>) {
        let a = self.ensure_node(node_a);
        let b = self.ensure_node(node_b);
        self.graph.update_edge(b, a, geometry::reverse(&geometry));
        self.graph.update_edge(a, b, geometry);
    }

    fn ensure_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(GraphNode::new(id));
        self.index.insert(id.to_string(), idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&GraphNode> {
        self.graph.node_weight(idx)
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn node_id(&self, idx: NodeIndex) -> &str {
        self.graph
            .node_weight(idx)
            .map(|n| n.id.as_str())
            .unwrap_or("<removed>")
    }

    pub fn connection(&self, from: NodeIndex, to: NodeIndex) -> Option<&LineString<f64>> {
        self.graph.find_edge(from, to).map(|e| &self.graph[e])
    }

    pub fn connection_geometry(&self, edge: EdgeIndex) -> Option<&LineString<f64>> {
        self.graph.edge_weight(edge)
    }

    /// Outgoing connections of a node with their targets.
    pub fn connections(
        &self,
        idx: NodeIndex,
    ) -> impl Iterator<Item = (NodeIndex, &LineString<f64>)> + '_ {
        self.graph.edges(idx).map(|e| (e.target(), e.weight()))
    }

    pub fn out_degree(&self, idx: NodeIndex) -> usize {
        self.graph.edges(idx).count()
    }

    /// Local position of a node, taken from its outgoing connections.
    pub fn node_position(&self, idx: NodeIndex) -> Option<Coord<f64>> {
        self.graph
            .edges(idx)
            .find_map(|e| e.weight().0.first().copied())
    }

    pub fn start_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph[idx].is_start_candidate)
            .collect()
    }

    fn remove_connection(&mut self, from: NodeIndex, to: NodeIndex) {
        if let Some(edge) = self.graph.find_edge(from, to) {
            self.graph.remove_edge(edge);
        }
    }

    /// Verifies that every connection has a reversed reciprocal and that all
    /// outgoing connections of a node start at the same position.
    pub fn check_consistency(&self) -> Result<(), RouteError> {
        for edge in self.graph.edge_references() {
            let (from, to) = (edge.source(), edge.target());
            let back = self.connection(to, from).ok_or_else(|| {
                RouteError::integrity(format!(
                    "node {} is connected to {} but not the other way around",
                    self.node_id(from),
                    self.node_id(to)
                ))
            })?;

            if !is_reversal(edge.weight(), back) {
                return Err(RouteError::integrity(format!(
                    "connections between {} and {} are not reversals of each other",
                    self.node_id(from),
                    self.node_id(to)
                )));
            }
        }

        for idx in self.graph.node_indices() {
            let mut starts = self.graph.edges(idx).map(|e| e.weight().0.first().copied());
            let Some(first) = starts.next() else {
                continue;
            };
            let first = first.ok_or_else(|| {
                RouteError::integrity(format!(
                    "node {} has an empty connection",
                    self.node_id(idx)
                ))
            })?;
            for start in starts {
                if !start.is_some_and(|s| geometry::coords_close(s, first, COORD_EPSILON)) {
                    return Err(RouteError::integrity(format!(
                        "node {} has different relative coordinates for its connections",
                        self.node_id(idx)
                    )));
                }
            }
        }

        Ok(())
    }

    /// Marks the nodes where route search starts, growing the search radius
    /// until at least one start node exists or the iteration cap is hit.
    pub fn insert_start_points(
        &mut self,
        config: &RouteBuilderConfig,
    ) -> Result<StartInsertion, RouteError> {
        let mut radius = config.initial_search_radius;
        let mut iterations = 0;

        loop {
            let inserted_nodes = self.insert_start_points_once(radius, config.split_tolerance);
            let start_nodes = self.start_nodes();
            if !start_nodes.is_empty() {
                debug!(
                    "Found {} start nodes ({} inserted) within {:.1} m",
                    start_nodes.len(),
                    inserted_nodes,
                    radius
                );
                return Ok(StartInsertion {
                    iterations,
                    radius,
                    start_nodes,
                    inserted_nodes,
                });
            }

            if iterations >= config.max_search_iterations {
                warn!(
                    "No start node found within {:.1} m after {} expansions",
                    radius, iterations
                );
                return Err(RouteError::NoStartNode { iterations, radius });
            }

            iterations += 1;
            radius += config.search_radius_step;
            if iterations % 10 == 0 {
                info!("Expanded search radius to {:.1} meters", radius);
            }
        }
    }

    /// One insertion pass at a fixed radius. Returns the number of nodes inserted.
    ///
    /// Every connection closer than `radius` to the vehicle is cut at its
    /// closest point and a synthetic start node is placed there. When that
    /// point is an end of the connection, the end node becomes a start node
    /// instead. All rewiring happens after the scan.
    pub fn insert_start_points_once(&mut self, radius: f64, tolerance: f64) -> usize {
        let origin = Coord { x: 0.0, y: 0.0 };
        let mut split_pairs: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
        let mut pending = Vec::new();
        let mut marked = Vec::new();

        for node in self.graph.node_indices() {
            for edge in self.graph.edges(node) {
                let next = edge.target();
                let pair = if node < next { (node, next) } else { (next, node) };
                if split_pairs.contains(&pair) {
                    continue;
                }

                let connection = edge.weight();
                if geometry::distance_to_point(connection, origin) >= radius {
                    continue;
                }
                let Some(closest) = geometry::nearest_point(connection, origin) else {
                    continue;
                };

                match geometry::split_at(connection, closest, tolerance) {
                    Split::Inner { leading, trailing } => {
                        split_pairs.insert(pair);
                        pending.push(PendingSplit {
                            from: node,
                            to: next,
                            leading,
                            trailing,
                        });
                    }
                    Split::AtStart => marked.push(node),
                    Split::AtEnd => marked.push(next),
                }
            }
        }

        for idx in marked {
            self.graph[idx].is_start_candidate = true;
        }

        let inserted = pending.len();
        for split in pending {
            self.apply_split(split);
        }
        inserted
    }

    fn apply_split(&mut self, split: PendingSplit) {
        let PendingSplit {
            from,
            to,
            leading,
            trailing,
        } = split;

        self.remove_connection(from, to);
        self.remove_connection(to, from);

        let id = format!("{}{}", INSERTED_NODE_PREFIX, self.inserted_count);
        self.inserted_count += 1;
        trace!(
            "Inserting {} between {} and {}",
            id,
            self.node_id(from),
            self.node_id(to)
        );

        let inserted = self.ensure_node(&id);
        self.graph[inserted].is_start_candidate = true;

        self.graph
            .add_edge(inserted, from, geometry::reverse(&leading));
        self.graph.add_edge(from, inserted, leading);
        self.graph
            .add_edge(to, inserted, geometry::reverse(&trailing));
        self.graph.add_edge(inserted, to, trailing);
    }

    /// Every simple path from a start node that reaches `horizon` meters.
    ///
    /// A path is recorded as soon as its length reaches the horizon and is
    /// not extended further. Paths that dead-end earlier are dropped. The
    /// search uses an explicit stack and stops once `limits.max_routes` paths
    /// exist or `limits.max_explored_paths` partial paths have been expanded.
    pub fn enumerate_routes(&self, horizon: f64, limits: SearchLimits) -> EnumeratedRoutes {
        let mut result = EnumeratedRoutes::default();
        let mut explored = 0usize;

        'starts: for start in self.start_nodes() {
            let mut stack = vec![PathState {
                node: start,
                edges: Vec::new(),
                nodes: vec![start],
                length: 0.0,
            }];

            while let Some(state) = stack.pop() {
                explored += 1;
                if limits.max_explored_paths.is_some_and(|cap| explored > cap) {
                    warn!(
                        "Route enumeration stopped after {} partial paths ({} routes found)",
                        explored - 1,
                        result.routes.len()
                    );
                    result.truncated = true;
                    break 'starts;
                }

                if state.length >= horizon {
                    result.visited.push(
                        state
                            .nodes
                            .iter()
                            .map(|&n| self.node_id(n).to_string())
                            .collect(),
                    );
                    result.routes.push(CandidateRoute {
                        edges: state.edges,
                        nodes: state.nodes,
                        length: state.length,
                    });

                    if limits.max_routes.is_some_and(|cap| result.routes.len() >= cap) {
                        warn!(
                            "Route enumeration stopped at {} routes",
                            result.routes.len()
                        );
                        result.truncated = true;
                        break 'starts;
                    }
                    continue;
                }

                let branches: Vec<(EdgeIndex, NodeIndex, f64)> = self
                    .graph
                    .edges(state.node)
                    .filter(|e| !state.nodes.contains(&e.target()))
                    .map(|e| (e.id(), e.target(), geometry::length(e.weight())))
                    .collect();

                if branches.is_empty() {
                    trace!(
                        "Path ends at {} after {:.1} m",
                        self.node_id(state.node),
                        state.length
                    );
                    continue;
                }

                // reversed so branches are explored in connection order
                for (edge, target, length) in branches.into_iter().rev() {
                    let mut edges = state.edges.clone();
                    edges.push(edge);
                    let mut nodes = state.nodes.clone();
                    nodes.push(target);
                    stack.push(PathState {
                        node: target,
                        edges,
                        nodes,
                        length: state.length + length,
                    });
                }
            }
        }

        debug!(
            "Enumerated {} routes from {} start nodes",
            result.routes.len(),
            self.start_nodes().len()
        );
        result
    }

    /// Concatenated geometry of a route.
    pub fn route_polyline(&self, route: &CandidateRoute) -> Result<LineString<f64>, RouteError> {
        let parts = route
            .edges
            .iter()
            .map(|&e| {
                self.connection_geometry(e).ok_or_else(|| {
                    RouteError::integrity(format!("route refers to missing connection {:?}", e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        geometry::concatenate(parts)
    }

    /// Node ids along a route, for debugging.
    pub fn route_node_ids(&self, route: &CandidateRoute) -> Vec<String> {
        route
            .nodes
            .iter()
            .map(|&n| self.node_id(n).to_string())
            .collect()
    }

    pub fn node_locator(&self) -> NodeLocator {
        let entries = self
            .graph
            .node_indices()
            .filter_map(|idx| {
                self.node_position(idx)
                    .map(|p| GeomWithData::new([p.x, p.y], idx))
            })
            .collect();
        NodeLocator {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Original map nodes visited by a route.
    ///
    /// Junction points are matched back to nodes by position. A synthetic node
    /// at either end is replaced by its other neighbor; synthetic nodes inside
    /// the route are dropped since their two neighbors are adjacent on the map.
    pub fn clean_node_sequence(
        &self,
        route: &CandidateRoute,
        tolerance: f64,
    ) -> Result<Vec<NodeIndex>, RouteError> {
        let locator = self.node_locator();
        let mut junctions = Vec::with_capacity(route.edges.len() + 1);
        for &edge in &route.edges {
            if let Some(start) = self.connection_geometry(edge).and_then(|g| g.0.first()) {
                junctions.push(*start);
            }
        }
        if let Some(end) = route
            .edges
            .last()
            .and_then(|&e| self.connection_geometry(e))
            .and_then(|g| g.0.last())
        {
            junctions.push(*end);
        }
        if junctions.len() < 2 {
            return Err(RouteError::integrity("route has no connections"));
        }

        let raw = junctions
            .iter()
            .map(|&p| {
                locator.nearest_within(p, tolerance).ok_or_else(|| {
                    RouteError::integrity(format!(
                        "no node within {} m of route junction ({:.3}, {:.3})",
                        tolerance, p.x, p.y
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let last = raw.len() - 1;
        let mut clean = Vec::with_capacity(raw.len());
        for (i, &node) in raw.iter().enumerate() {
            if !self.graph[node].is_synthetic() {
                clean.push(node);
                continue;
            }
            if i != 0 && i != last {
                continue;
            }

            let adjacent = if i == 0 { raw[1] } else { raw[i - 1] };
            let others: Vec<NodeIndex> = self
                .graph
                .neighbors(node)
                .filter(|&n| n != adjacent)
                .collect();
            if others.len() != 1 {
                return Err(RouteError::integrity(format!(
                    "route end {} has {} replacement candidates instead of one",
                    self.node_id(node),
                    others.len()
                )));
            }
            clean.push(others[0]);
        }

        if clean.len() < 2 {
            return Err(RouteError::integrity(format!(
                "clean node sequence has only {} nodes",
                clean.len()
            )));
        }
        Ok(clean)
    }
}

fn is_reversal(a: &LineString<f64>, b: &LineString<f64>) -> bool {
    a.0.len() == b.0.len()
        && a.0
            .iter()
            .zip(b.0.iter().rev())
            .all(|(p, q)| geometry::coords_close(*p, *q, COORD_EPSILON))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map_data::MapExtract;
    use crate::map_link::{MapLink, RoadClass};
    use crate::local_frame::VehiclePose;
    use geo_types::Point;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn straight(from: (f64, f64), to: (f64, f64)) -> LineString<f64> {
        LineString::from(vec![from, to])
    }

    /// E - D - A - B - C - F along y = 1, 100 m apart, vehicle at the origin
    /// halfway between A and B.
    fn chain() -> RouteGraph {
        let mut graph = RouteGraph::new();
        graph.add_link("E", "D", straight((-250.0, 1.0), (-150.0, 1.0)));
        graph.add_link("D", "A", straight((-150.0, 1.0), (-50.0, 1.0)));
        graph.add_link("A", "B", straight((-50.0, 1.0), (50.0, 1.0)));
        graph.add_link("B", "C", straight((50.0, 1.0), (150.0, 1.0)));
        graph.add_link("C", "F", straight((150.0, 1.0), (250.0, 1.0)));
        graph
    }

    fn link(a: &str, b: &str, coords: Vec<(f64, f64)>) -> MapLink {
        MapLink {
            id: MapLinkId::new(a, b),
            geometry: LineString::from(coords),
            road_class: RoadClass::Residential,
            lanes: None,
            speed_limit: None,
            highway: true,
            tunnel: false,
            bridge: false,
            crossings: Vec::<Point<f64>>::new(),
        }
    }

    #[test]
    fn test_add_link_installs_both_directions() {
        let graph = chain();
        let a = graph.node_index("A").unwrap();
        let b = graph.node_index("B").unwrap();
        let forward = graph.connection(a, b).unwrap();
        let backward = graph.connection(b, a).unwrap();
        assert_eq!(forward.0.first(), backward.0.last());
        assert_eq!(graph.node_position(b), Some(Coord { x: 50.0, y: 1.0 }));
        assert!(graph.check_consistency().is_ok());
    }

    #[test]
    fn test_build_skips_loops_and_unresolved_links() {
        let pose = VehiclePose::new(52.0, 5.0, 0.0);
        let frame = LocalFrame::new(&pose);
        let extract = MapExtract::new(vec![
            link("1", "2", vec![(5.0, 52.0), (5.001, 52.0)]),
            link("5", "5", vec![(5.0, 52.0), (5.0005, 52.0005), (5.0, 52.0)]),
        ]);
        let ids = vec![
            MapLinkId::new("1", "2"),
            MapLinkId::new("5", "5"),
            MapLinkId::new("7", "8"),
        ];

        let (graph, report) = RouteGraph::build(&ids, &extract, &frame);
        assert_eq!(report.links_added, 1);
        assert_eq!(report.skipped_loops, vec![MapLinkId::new("5", "5")]);
        assert_eq!(report.unresolved_links, vec![MapLinkId::new("7", "8")]);
        assert!(graph.node_index("5").is_none());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.connection_count(), 2);
    }

    #[test]
    fn test_built_graphs_are_reciprocal() {
        let pose = VehiclePose::new(48.137, 11.575, 30.0);
        let frame = LocalFrame::new(&pose);
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..25 {
            let node_count = rng.random_range(2..8);
            let positions: Vec<(f64, f64)> = (0..node_count)
                .map(|_| {
                    (
                        pose.lon + rng.random_range(-0.002..0.002),
                        pose.lat + rng.random_range(-0.002..0.002),
                    )
                })
                .collect();

            let mut links = Vec::new();
            let mut ids = Vec::new();
            for _ in 0..rng.random_range(1..12) {
                let a = rng.random_range(0..node_count);
                let b = rng.random_range(0..node_count);
                let mut coords = vec![positions[a]];
                if rng.random_bool(0.5) {
                    coords.push((
                        (positions[a].0 + positions[b].0) / 2.0 + 0.0001,
                        (positions[a].1 + positions[b].1) / 2.0,
                    ));
                }
                coords.push(positions[b]);
                links.push(link(&a.to_string(), &b.to_string(), coords));
                ids.push(MapLinkId::new(a.to_string(), b.to_string()));
            }

            let extract = MapExtract::new(links);
            let (graph, _) = RouteGraph::build(&ids, &extract, &frame);
            assert!(graph.check_consistency().is_ok());

            for from in graph.graph.node_indices() {
                assert!(graph.connection(from, from).is_none());
                for (to, geometry) in graph.connections(from) {
                    let back = graph.connection(to, from).unwrap();
                    assert!(is_reversal(geometry, back));
                }
            }
        }
    }

    #[test]
    fn test_consistency_detects_missing_reciprocal() {
        let mut graph = chain();
        let a = graph.node_index("A").unwrap();
        let b = graph.node_index("B").unwrap();
        graph.remove_connection(b, a);
        assert!(matches!(
            graph.check_consistency(),
            Err(RouteError::Integrity(_))
        ));
    }

    #[test]
    fn test_insertion_splits_link_under_vehicle() {
        let mut graph = chain();
        let config = RouteBuilderConfig::default();
        let insertion = graph.insert_start_points(&config).unwrap();

        assert_eq!(insertion.iterations, 0);
        assert_eq!(insertion.inserted_nodes, 1);
        assert_eq!(insertion.start_nodes.len(), 1);

        let s = insertion.start_nodes[0];
        assert_eq!(graph.node_id(s), "inserted_node_0");
        let a = graph.node_index("A").unwrap();
        let b = graph.node_index("B").unwrap();
        assert!(graph.connection(a, b).is_none());
        assert!(graph.connection(b, a).is_none());

        let to_a = geometry::length(graph.connection(s, a).unwrap());
        let to_b = geometry::length(graph.connection(s, b).unwrap());
        assert!((to_a - 50.0).abs() < 0.02);
        assert!((to_b - 50.0).abs() < 0.02);
        assert!((to_a + to_b - 100.0).abs() < 0.03);
        assert!(graph.check_consistency().is_ok());
    }

    #[test]
    fn test_insertion_is_idempotent() {
        let mut graph = chain();
        let config = RouteBuilderConfig::default();
        let first = graph.insert_start_points(&config).unwrap();
        let nodes_before = graph.node_count();

        graph.insert_start_points_once(config.initial_search_radius, config.split_tolerance);
        assert_eq!(graph.start_nodes(), first.start_nodes);
        assert_eq!(graph.node_count(), nodes_before);
    }

    #[test]
    fn test_insertion_marks_end_node() {
        let mut graph = RouteGraph::new();
        graph.add_link("A", "B", straight((0.0, 2.0), (100.0, 50.0)));
        graph.add_link("B", "C", straight((100.0, 50.0), (300.0, 50.0)));
        graph.insert_start_points_once(10.0, 0.01);

        let a = graph.node_index("A").unwrap();
        assert_eq!(graph.start_nodes(), vec![a]);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn test_insertion_expands_radius() {
        let mut graph = RouteGraph::new();
        graph.add_link("A", "B", straight((-50.0, 35.0), (50.0, 35.0)));
        let insertion = graph
            .insert_start_points(&RouteBuilderConfig::default())
            .unwrap();
        assert_eq!(insertion.iterations, 3);
        assert!((insertion.radius - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_insertion_gives_up_after_cap() {
        let mut graph = RouteGraph::new();
        graph.add_link("A", "B", straight((-50.0, 5000.0), (50.0, 5000.0)));
        let result = graph.insert_start_points(&RouteBuilderConfig::default());
        match result {
            Err(RouteError::NoStartNode { iterations, .. }) => assert_eq!(iterations, 100),
            other => panic!("expected NoStartNode, got {:?}", other),
        }
    }

    #[test]
    fn test_enumeration_from_split_node() {
        let mut graph = chain();
        graph
            .insert_start_points(&RouteBuilderConfig::default())
            .unwrap();
        let routes = graph.enumerate_routes(200.0, SearchLimits::default());

        assert_eq!(routes.len(), 2);
        assert_eq!(routes.visited.len(), 2);
        let mut ends: Vec<String> = routes
            .routes
            .iter()
            .map(|r| graph.node_id(*r.nodes.last().unwrap()).to_string())
            .collect();
        ends.sort();
        assert_eq!(ends, vec!["E", "F"]);

        for route in &routes.routes {
            let line = graph.route_polyline(route).unwrap();
            let total = geometry::length(&line);
            let last = geometry::length(
                graph
                    .connection_geometry(*route.edges.last().unwrap())
                    .unwrap(),
            );
            assert!(total >= 200.0);
            assert!(total - last < 200.0);
        }
    }

    #[test]
    fn test_dead_ends_are_dropped() {
        let mut graph = RouteGraph::new();
        graph.add_link("A", "B", straight((-50.0, 1.0), (50.0, 1.0)));
        graph.add_link("B", "C", straight((50.0, 1.0), (150.0, 1.0)));
        graph
            .insert_start_points(&RouteBuilderConfig::default())
            .unwrap();
        assert!(graph.enumerate_routes(200.0, SearchLimits::default()).is_empty());
    }

    #[test]
    fn test_paths_are_simple_and_capped() {
        // square loop A-B-C-D-A, each side 100 m
        let mut graph = RouteGraph::new();
        graph.add_link("A", "B", straight((-50.0, 1.0), (50.0, 1.0)));
        graph.add_link("B", "C", straight((50.0, 1.0), (50.0, 101.0)));
        graph.add_link("C", "D", straight((50.0, 101.0), (-50.0, 101.0)));
        graph.add_link("D", "A", straight((-50.0, 101.0), (-50.0, 1.0)));
        graph
            .insert_start_points(&RouteBuilderConfig::default())
            .unwrap();

        let routes = graph.enumerate_routes(200.0, SearchLimits::default());
        assert_eq!(routes.len(), 2);
        for route in &routes.routes {
            let unique: HashSet<_> = route.nodes.iter().collect();
            assert_eq!(unique.len(), route.nodes.len());
        }

        let capped = graph.enumerate_routes(
            200.0,
            SearchLimits {
                max_routes: Some(1),
                ..SearchLimits::default()
            },
        );
        assert_eq!(capped.len(), 1);
        assert!(capped.truncated);
    }

    #[test]
    fn test_clean_node_sequence_replaces_synthetic_start() {
        let mut graph = chain();
        graph
            .insert_start_points(&RouteBuilderConfig::default())
            .unwrap();
        let routes = graph.enumerate_routes(200.0, SearchLimits::default());
        let towards_f = routes
            .routes
            .iter()
            .find(|r| graph.node_id(*r.nodes.last().unwrap()) == "F")
            .unwrap();

        assert_eq!(
            graph.route_node_ids(towards_f),
            vec!["inserted_node_0", "B", "C", "F"]
        );
        let clean = graph.clean_node_sequence(towards_f, 0.1).unwrap();
        let ids: Vec<&str> = clean.iter().map(|&n| graph.node_id(n)).collect();
        assert_eq!(ids, vec!["A", "B", "C", "F"]);
    }

    #[test]
    fn test_node_locator_matches_within_tolerance() {
        let graph = chain();
        let b = graph.node_index("B").unwrap();
        let locator = graph.node_locator();
        assert_eq!(locator.nearest_within(Coord { x: 50.05, y: 1.0 }, 0.1), Some(b));
        assert_eq!(locator.nearest_within(Coord { x: 51.0, y: 1.0 }, 0.1), None);
    }

    /// Every pair of `n` nodes on a unit circle connected, all links shorter than 2 m.
    fn complete_graph(n: usize) -> RouteGraph {
        let position = |i: usize| {
            let angle = i as f64 * std::f64::consts::TAU / n as f64;
            (angle.cos(), angle.sin())
        };
        let mut graph = RouteGraph::new();
        for i in 0..n {
            for j in (i + 1)..n {
                graph.add_link(&i.to_string(), &j.to_string(), straight(position(i), position(j)));
            }
        }
        let start = graph.node_index("0").unwrap();
        graph.graph[start].is_start_candidate = true;
        graph
    }

    #[test]
    fn test_dense_cluster_stops_at_explored_path_cap() {
        let graph = complete_graph(6);

        // 1 + 5 + 20 + 60 + 120 + 120 partial paths from one start node
        let full = graph.enumerate_routes(200.0, SearchLimits::default());
        assert!(full.is_empty());
        assert!(!full.truncated);

        let limits = SearchLimits {
            max_routes: Some(10),
            max_explored_paths: Some(50),
        };
        let capped = graph.enumerate_routes(200.0, limits);
        assert!(capped.is_empty());
        assert!(capped.truncated);

        let roomy = SearchLimits {
            max_explored_paths: Some(326),
            ..limits
        };
        assert!(!graph.enumerate_routes(200.0, roomy).truncated);
    }

    #[test]
    fn test_consistency_detects_non_reversed_reciprocal() {
        let mut graph = chain();
        let a = graph.node_index("A").unwrap();
        let b = graph.node_index("B").unwrap();
        graph
            .graph
            .update_edge(b, a, straight((50.0, 1.0), (-50.0, 2.0)));
        match graph.check_consistency() {
            Err(RouteError::Integrity(message)) => assert!(message.contains("not reversals")),
            other => panic!("expected integrity failure, got {:?}", other),
        }
    }

    #[test]
    fn test_consistency_detects_diverging_node_positions() {
        let mut graph = chain();
        graph.add_link("A", "X", straight((-49.0, 1.0), (-49.0, 80.0)));
        match graph.check_consistency() {
            Err(RouteError::Integrity(message)) => {
                assert!(message.contains("node A has different relative coordinates"))
            }
            other => panic!("expected integrity failure, got {:?}", other),
        }
    }

    #[test]
    fn test_clean_sequence_rejects_ambiguous_synthetic_end() {
        let mut graph = chain();
        let insertion = graph
            .insert_start_points(&RouteBuilderConfig::default())
            .unwrap();
        let routes = graph.enumerate_routes(200.0, SearchLimits::default());
        let towards_f = routes
            .routes
            .iter()
            .find(|r| graph.node_id(*r.nodes.last().unwrap()) == "F")
            .unwrap()
            .clone();

        let s = insertion.start_nodes[0];
        let position = graph.node_position(s).unwrap();
        graph.add_link(
            "inserted_node_0",
            "X",
            straight((position.x, position.y), (position.x, -100.0)),
        );

        match graph.clean_node_sequence(&towards_f, 0.1) {
            Err(RouteError::Integrity(message)) => {
                assert!(message.contains("has 2 replacement candidates"))
            }
            other => panic!("expected integrity failure, got {:?}", other),
        }
    }
}
