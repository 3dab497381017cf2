//! Coordinate reference system registry and reprojection.
//!
//! Only the handful of systems the survey and boundary datasets actually
//! ship in are supported. Transformations run through `proj4rs` (pure
//! Rust), with geographic coordinates converted to and from radians at the
//! boundary.

use geo::{Coord, MapCoords, Rect};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::SpatialError;

/// EPSG code of WGS84 longitude/latitude.
pub const EPSG_WGS84: u32 = 4326;

/// EPSG code of Web Mercator.
pub const EPSG_WEB_MERCATOR: u32 = 3857;

/// EPSG code of RGF93 / Lambert-93, the French national metric projection.
pub const EPSG_LAMBERT_93: u32 = 2154;

/// EPSG code of ETRS89 / LAEA Europe.
pub const EPSG_LAEA_EUROPE: u32 = 3035;

/// A supported coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// EPSG:4326, degrees.
    Wgs84,
    /// EPSG:3857, meters (not distance-preserving).
    WebMercator,
    /// EPSG:2154, meters.
    Lambert93,
    /// EPSG:3035, meters.
    LaeaEurope,
}

impl Crs {
    /// Looks up a CRS by EPSG code.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnsupportedCrs`] for codes outside the registry.
    pub const fn from_epsg(epsg: u32) -> Result<Self, SpatialError> {
        match epsg {
            EPSG_WGS84 => Ok(Self::Wgs84),
            EPSG_WEB_MERCATOR => Ok(Self::WebMercator),
            EPSG_LAMBERT_93 => Ok(Self::Lambert93),
            EPSG_LAEA_EUROPE => Ok(Self::LaeaEurope),
            _ => Err(SpatialError::UnsupportedCrs { epsg }),
        }
    }

    /// Looks up a CRS in which planar distances are ground distances.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::UnsupportedCrs`] for codes outside the
    /// registry and [`SpatialError::NotDistancePreserving`] for geographic
    /// or otherwise distorting systems.
    pub fn metric_from_epsg(epsg: u32) -> Result<Self, SpatialError> {
        let crs = Self::from_epsg(epsg)?;
        if crs.is_distance_preserving() {
            Ok(crs)
        } else {
            Err(SpatialError::NotDistancePreserving { epsg })
        }
    }

    /// The EPSG code of this CRS.
    #[must_use]
    pub const fn epsg(self) -> u32 {
        match self {
            Self::Wgs84 => EPSG_WGS84,
            Self::WebMercator => EPSG_WEB_MERCATOR,
            Self::Lambert93 => EPSG_LAMBERT_93,
            Self::LaeaEurope => EPSG_LAEA_EUROPE,
        }
    }

    /// Whether coordinates are longitude/latitude degrees.
    #[must_use]
    pub const fn is_geographic(self) -> bool {
        matches!(self, Self::Wgs84)
    }

    /// Whether planar distances in this CRS are usable as ground distances
    /// at national scale.
    #[must_use]
    pub const fn is_distance_preserving(self) -> bool {
        matches!(self, Self::Lambert93 | Self::LaeaEurope)
    }

    const fn proj_string(self) -> &'static str {
        match self {
            Self::Wgs84 => "+proj=longlat +datum=WGS84 +no_defs",
            Self::WebMercator => {
                "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
            }
            Self::Lambert93 => {
                "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 +y_0=6600000 \
                 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
            }
            Self::LaeaEurope => {
                "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 \
                 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
            }
        }
    }

    /// Parses a CRS name as found in legacy `GeoJSON` `crs` members:
    /// `urn:ogc:def:crs:EPSG::2154`, `EPSG:2154`, or the OGC `CRS84` alias
    /// for WGS84.
    #[must_use]
    pub fn parse_epsg_name(name: &str) -> Option<u32> {
        let name = name.trim();
        let upper = name.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Some(EPSG_WGS84);
        }
        let idx = upper.rfind("EPSG")?;
        upper[idx + 4..]
            .trim_start_matches(':')
            .trim()
            .parse::<u32>()
            .ok()
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Whether a bounding box fits inside the longitude/latitude value range.
///
/// Used as a plausibility check: a dataset that advertises degrees but has
/// coordinates outside ±180/±90 is really in a projected system.
#[must_use]
pub fn looks_geographic(bounds: &Rect<f64>) -> bool {
    let (min, max) = (bounds.min(), bounds.max());
    min.x >= -180.0 && max.x <= 180.0 && min.y >= -90.0 && max.y <= 90.0
}

/// Reconciles an advertised CRS with the actual coordinate magnitudes.
///
/// When the advertised CRS is geographic but `bounds` fall outside the
/// degree range, `projected_fallback` is assumed instead. Projected CRSs
/// are trusted as-is.
#[must_use]
pub fn effective_crs(advertised: Crs, bounds: Option<&Rect<f64>>, projected_fallback: Crs) -> Crs {
    match bounds {
        Some(rect) if advertised.is_geographic() && !looks_geographic(rect) => {
            log::warn!(
                "Coordinates exceed the longitude/latitude range for {advertised}, treating them as {projected_fallback}"
            );
            projected_fallback
        }
        _ => advertised,
    }
}

/// Reusable transformer between two supported CRSs.
pub struct Reprojector {
    source: Crs,
    target: Crs,
    projs: Option<(Proj, Proj)>,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl Reprojector {
    /// Creates a transformer from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Projection`] if either projection definition
    /// fails to initialize.
    pub fn new(source: Crs, target: Crs) -> Result<Self, SpatialError> {
        if source == target {
            return Ok(Self {
                source,
                target,
                projs: None,
            });
        }

        let source_proj = Proj::from_proj_string(source.proj_string()).map_err(|e| {
            SpatialError::Projection {
                message: format!("Invalid source projection {source}: {e:?}"),
            }
        })?;
        let target_proj = Proj::from_proj_string(target.proj_string()).map_err(|e| {
            SpatialError::Projection {
                message: format!("Invalid target projection {target}: {e:?}"),
            }
        })?;

        Ok(Self {
            source,
            target,
            projs: Some((source_proj, target_proj)),
        })
    }

    #[must_use]
    pub const fn source(&self) -> Crs {
        self.source
    }

    #[must_use]
    pub const fn target(&self) -> Crs {
        self.target
    }

    /// Whether source and target are the same CRS.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Transforms a single coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Projection`] if the transformation fails or
    /// produces non-finite values.
    pub fn transform_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, SpatialError> {
        let Some((source_proj, target_proj)) = &self.projs else {
            return Ok(coord);
        };

        let (in_x, in_y) = if self.source.is_geographic() {
            (coord.x.to_radians(), coord.y.to_radians())
        } else {
            (coord.x, coord.y)
        };

        let mut point = (in_x, in_y, 0.0);
        transform(source_proj, target_proj, &mut point).map_err(|e| SpatialError::Projection {
            message: format!(
                "Transform {} -> {} failed for ({}, {}): {e:?}",
                self.source, self.target, coord.x, coord.y
            ),
        })?;

        let (out_x, out_y) = if self.target.is_geographic() {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(SpatialError::Projection {
                message: format!(
                    "Transform {} -> {} produced non-finite output for ({}, {})",
                    self.source, self.target, coord.x, coord.y
                ),
            });
        }

        Ok(Coord { x: out_x, y: out_y })
    }

    /// Transforms every coordinate of a geometry.
    ///
    /// # Errors
    ///
    /// Returns the first [`SpatialError::Projection`] encountered.
    pub fn transform_geometry<G>(&self, geometry: &G) -> Result<G::Output, SpatialError>
    where
        G: MapCoords<f64, f64>,
    {
        geometry.try_map_coords(|c| self.transform_coord(c))
    }
}
