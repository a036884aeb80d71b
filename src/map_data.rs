use anyhow::{Context, Result, anyhow};
use geo::{BoundingRect, Destination, Distance, Haversine, Intersects, Rect};
use geo_types::Point;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::RouteError;
use crate::map_link::{MapLink, MapLinkId};

/// Axis-aligned geographic search area around a center point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRectangle {
    pub center: Point<f64>,
    pub lower_left: Point<f64>,
    pub upper_right: Point<f64>,
}

impl GeoRectangle {
    /// Rectangle of `width_m` x `height_m` meters centered on (lat, lon).
    pub fn around(lat: f64, lon: f64, width_m: f64, height_m: f64) -> Self {
        let center = Point::new(lon, lat);
        let south = Haversine.destination(center, 180.0, height_m / 2.0);
        let west = Haversine.destination(center, 270.0, width_m / 2.0);
        let north = Haversine.destination(center, 0.0, height_m / 2.0);
        let east = Haversine.destination(center, 90.0, width_m / 2.0);
        Self {
            center,
            lower_left: Point::new(west.x(), south.y()),
            upper_right: Point::new(east.x(), north.y()),
        }
    }

    pub fn as_rect(&self) -> Rect<f64> {
        Rect::new(self.lower_left.0, self.upper_right.0)
    }
}

/// Source of road links. Implemented by whatever holds the map extract.
pub trait MapDataProvider {
    /// Ids of all links whose geometry touches the rectangle.
    fn links_in(&self, rect: &GeoRectangle) -> Vec<MapLinkId>;

    fn link(&self, id: &MapLinkId) -> Option<&MapLink>;

    /// Link joining two nodes in either stored order. The flag is true when
    /// the link is stored as (b, a). If both orders exist the shorter link wins.
    fn link_between(&self, a: &str, b: &str) -> Option<(&MapLink, bool)> {
        let forward = self.link(&MapLinkId::new(a, b));
        let backward = self.link(&MapLinkId::new(b, a));
        match (forward, backward) {
            (Some(f), Some(r)) => {
                if geodesic_length(r) < geodesic_length(f) {
                    Some((r, true))
                } else {
                    Some((f, false))
                }
            }
            (Some(f), None) => Some((f, false)),
            (None, Some(r)) => Some((r, true)),
            (None, None) => None,
        }
    }

    fn resolve_between(&self, a: &str, b: &str) -> Result<(&MapLink, bool), RouteError> {
        self.link_between(a, b)
            .ok_or_else(|| RouteError::UnresolvedLink(MapLinkId::new(a, b)))
    }
}

fn geodesic_length(link: &MapLink) -> f64 {
    link.geometry
        .lines()
        .map(|l| Haversine.distance(Point::from(l.start), Point::from(l.end)))
        .sum()
}

/// In-memory set of links, loadable from JSON or the binary cache format.
#[derive(Debug, Clone, Default)]
pub struct MapExtract {
    links: Vec<MapLink>,
    index: HashMap<MapLinkId, usize>,
}

impl MapExtract {
    pub fn new(links: Vec<MapLink>) -> Self {
        let mut index = HashMap::with_capacity(links.len());
        for (i, link) in links.iter().enumerate() {
            if index.insert(link.id.clone(), i).is_some() {
                warn!("Duplicate link {} in extract, keeping the last one", link.id);
            }
        }
        Self { links, index }
    }

    pub fn links(&self) -> &[MapLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Writes the extract, as JSON for `.json` paths and bincode otherwise.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create map extract {:?}", path))?;
        let mut writer = BufWriter::new(file);
        if is_json(path) {
            serde_json::to_writer(&mut writer, &self.links)?;
        } else {
            let config = bincode::config::standard();
            bincode::serde::encode_into_std_write(&self.links, &mut writer, config)
                .map_err(|e| anyhow!("Failed to encode map extract {:?}: {}", path, e))?;
        }
        info!("Saved {} links to {:?}", self.links.len(), path);
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open map extract {:?}", path))?;
        let mut reader = BufReader::new(file);
        let links: Vec<MapLink> = if is_json(path) {
            serde_json::from_reader(reader)?
        } else {
            let config = bincode::config::standard();
            bincode::serde::decode_from_std_read(&mut reader, config)
                .map_err(|e| anyhow!("Invalid map extract {:?}: {}", path, e))?
        };
        debug!("Loaded {} links from {:?}", links.len(), path);
        Ok(Self::new(links))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

impl MapDataProvider for MapExtract {
    fn links_in(&self, rect: &GeoRectangle) -> Vec<MapLinkId> {
        let area = rect.as_rect();
        let mut ids: Vec<MapLinkId> = self
            .index
            .iter()
            .filter(|&(_, &i)| {
                self.links[i]
                    .geometry
                    .bounding_rect()
                    .is_some_and(|bbox| bbox.intersects(&area))
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn link(&self, id: &MapLinkId) -> Option<&MapLink> {
        self.index.get(id).map(|&i| &self.links[i])
    }
}

impl From<Vec<MapLink>> for MapExtract {
    fn from(links: Vec<MapLink>) -> Self {
        Self::new(links)
    }
}
