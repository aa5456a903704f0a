//! Administrative boundary layer: load once, filter to one district, keep
//! geometries in geographic lon/lat degrees.
//!
//! Input is a GeoJSON FeatureCollection (e.g. a GADM level-3 export). Files
//! without a `crs` member are RFC 7946 WGS84. Legacy files may name a projected
//! CRS; spherical Web Mercator and WGS84 UTM zones are inverted back to lon/lat.

use std::f64::consts::PI;
use std::fs;
use std::path::Path;

use geo::{Coord, LineString, MultiPolygon, Polygon};
use geojson::{FeatureCollection, GeoJson, Value};
use log::{info, warn};
use proj4rs::proj::Proj;
use serde::{Deserialize, Serialize};

use crate::error::BoundaryError;

/// Half the equatorial circumference of the spherical Mercator plane, metres.
const HALF_EARTH: f64 = 20_037_508.342_789_244;

const LONLAT_WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs";

// ── Types ────────────────────────────────────────────────────────────────────

/// Which features to keep and which properties name them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistrictFilter {
    pub name: String,
    /// Property holding the district name (GADM level 2).
    pub district_field: String,
    /// Property holding the sub-district (taluk) name (GADM level 3).
    pub region_field: String,
}

impl Default for DistrictFilter {
    fn default() -> Self {
        Self {
            name: "Ramanathapuram".into(),
            district_field: "NAME_2".into(),
            region_field: "NAME_3".into(),
        }
    }
}

/// One sub-district polygon in lon/lat degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

/// Regions of one district, in source order. Immutable after load.
#[derive(Debug, Clone)]
pub struct BoundaryLayer {
    pub district: String,
    regions: Vec<Region>,
}

impl BoundaryLayer {
    pub fn from_regions(district: impl Into<String>, regions: Vec<Region>) -> Self {
        Self {
            district: district.into(),
            regions,
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

// ── Source CRS ───────────────────────────────────────────────────────────────

enum SourceCrs {
    Geographic,
    WebMercator,
    Projected { from: Proj, to: Proj },
}

impl SourceCrs {
    /// Resolve the legacy `crs` member, if any.
    fn from_collection(fc: &FeatureCollection) -> Result<Self, BoundaryError> {
        let name = fc
            .foreign_members
            .as_ref()
            .and_then(|m| m.get("crs"))
            .and_then(|crs| crs.get("properties"))
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str());

        let Some(name) = name else {
            return Ok(SourceCrs::Geographic);
        };
        if name.ends_with("CRS84") {
            return Ok(SourceCrs::Geographic);
        }

        let code: u32 = name
            .rsplit(':')
            .next()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| BoundaryError::SchemaError(format!("unrecognised crs name '{name}'")))?;

        match code {
            4326 => Ok(SourceCrs::Geographic),
            3857 | 900913 => Ok(SourceCrs::WebMercator),
            32601..=32660 | 32701..=32760 => {
                let zone = code % 100;
                let south = if code >= 32701 { "+south " } else { "" };
                let utm = format!("+proj=utm +zone={zone} {south}+datum=WGS84 +units=m +no_defs");
                let from = Proj::from_proj_string(&utm)
                    .map_err(|e| BoundaryError::SchemaError(format!("EPSG:{code}: {e:?}")))?;
                let to = Proj::from_proj_string(LONLAT_WGS84)
                    .map_err(|e| BoundaryError::SchemaError(format!("EPSG:4326: {e:?}")))?;
                Ok(SourceCrs::Projected { from, to })
            }
            other => Err(BoundaryError::SchemaError(format!(
                "unsupported source CRS EPSG:{other}"
            ))),
        }
    }

    fn to_lonlat(&self, x: f64, y: f64) -> Result<Coord<f64>, String> {
        match self {
            SourceCrs::Geographic => Ok(Coord { x, y }),
            SourceCrs::WebMercator => Ok(Coord {
                x: x * 180.0 / HALF_EARTH,
                y: (2.0 * (y * PI / HALF_EARTH).exp().atan() - PI / 2.0).to_degrees(),
            }),
            SourceCrs::Projected { from, to } => {
                let mut point = (x, y, 0.0);
                proj4rs::transform::transform(from, to, &mut point)
                    .map_err(|e| format!("reprojection failed at ({x}, {y}): {e:?}"))?;
                Ok(Coord {
                    x: point.0.to_degrees(),
                    y: point.1.to_degrees(),
                })
            }
        }
    }
}

// ── GeoJSON → geo ────────────────────────────────────────────────────────────

fn ring(positions: &[Vec<f64>], crs: &SourceCrs) -> Result<LineString<f64>, String> {
    positions
        .iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => crs.to_lonlat(*x, *y),
            _ => Err(format!("position with {} ordinates", p.len())),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::from)
}

fn polygon(rings: &[Vec<Vec<f64>>], crs: &SourceCrs) -> Result<Polygon<f64>, String> {
    let (exterior, interiors) = rings.split_first().ok_or("polygon without rings")?;
    let interiors = interiors
        .iter()
        .map(|r| ring(r, crs))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(ring(exterior, crs)?, interiors))
}

fn areal_geometry(value: &Value, crs: &SourceCrs) -> Result<MultiPolygon<f64>, String> {
    match value {
        Value::Polygon(rings) => Ok(MultiPolygon(vec![polygon(rings, crs)?])),
        Value::MultiPolygon(polys) => polys
            .iter()
            .map(|rings| polygon(rings, crs))
            .collect::<Result<Vec<_>, _>>()
            .map(MultiPolygon),
        Value::Point(_) | Value::MultiPoint(_) => Err("point geometry is not areal".into()),
        Value::LineString(_) | Value::MultiLineString(_) => Err("line geometry is not areal".into()),
        Value::GeometryCollection(_) => Err("geometry collections are not supported".into()),
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// Read the boundary dataset and keep the regions of `filter.name`.
pub fn load(path: &Path, filter: &DistrictFilter) -> Result<BoundaryLayer, BoundaryError> {
    let unavailable = |reason: String| BoundaryError::DataUnavailable {
        path: path.to_path_buf(),
        reason,
    };

    let text = fs::read_to_string(path).map_err(|e| unavailable(e.to_string()))?;
    let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| unavailable(e.to_string()))?;
    let GeoJson::FeatureCollection(fc) = geojson else {
        return Err(BoundaryError::SchemaError(
            "expected a GeoJSON FeatureCollection".into(),
        ));
    };

    for field in [&filter.district_field, &filter.region_field] {
        if !fc.features.iter().any(|f| f.contains_property(field)) {
            let mut found: Vec<&str> = fc
                .features
                .first()
                .and_then(|f| f.properties.as_ref())
                .map(|p| p.keys().map(String::as_str).collect())
                .unwrap_or_default();
            found.sort_unstable();
            return Err(BoundaryError::SchemaError(format!(
                "missing field '{field}'; found {found:?}"
            )));
        }
    }

    let crs = SourceCrs::from_collection(&fc)?;
    let mut regions: Vec<Region> = Vec::new();

    for feature in &fc.features {
        let district = feature
            .property(&filter.district_field)
            .and_then(|v| v.as_str());
        if district != Some(filter.name.as_str()) {
            continue;
        }

        let name = feature
            .property(&filter.region_field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BoundaryError::SchemaError(format!(
                    "feature in '{}' has no string '{}'",
                    filter.name, filter.region_field
                ))
            })?
            .to_string();

        let value = feature
            .geometry
            .as_ref()
            .map(|g| &g.value)
            .ok_or_else(|| BoundaryError::SchemaError(format!("region '{name}' has no geometry")))?;
        let geometry = areal_geometry(value, &crs)
            .map_err(|e| BoundaryError::SchemaError(format!("region '{name}': {e}")))?;

        if let Some(existing) = regions.iter_mut().find(|r| r.name == name) {
            warn!("region '{name}' appears more than once; merging its parts");
            existing.geometry.0.extend(geometry.0);
        } else {
            regions.push(Region { name, geometry });
        }
    }

    if regions.is_empty() {
        return Err(BoundaryError::EmptyResult {
            district: filter.name.clone(),
        });
    }

    info!(
        "loaded {} regions for {} from {}",
        regions.len(),
        filter.name,
        path.display()
    );
    Ok(BoundaryLayer::from_regions(filter.name.clone(), regions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;

    fn write_fixture(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn feature(district: &str, taluk: &str, ring: &str) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{"NAME_2":"{district}","NAME_3":"{taluk}"}},
                "geometry":{{"type":"Polygon","coordinates":[{ring}]}}}}"#
        )
    }

    const RING: &str = "[[79.0,9.0],[79.5,9.0],[79.5,9.5],[79.0,9.5],[79.0,9.0]]";

    fn collection(features: &[String], crs: Option<&str>) -> String {
        let crs = crs
            .map(|name| format!(r#""crs":{{"type":"name","properties":{{"name":"{name}"}}}},"#))
            .unwrap_or_default();
        format!(
            r#"{{"type":"FeatureCollection",{crs}"features":[{}]}}"#,
            features.join(",")
        )
    }

    #[test]
    fn filters_to_district_in_source_order() {
        let file = write_fixture(&collection(
            &[
                feature("Ramanathapuram", "Paramakudi", RING),
                feature("Sivaganga", "Karaikudi", RING),
                feature("Ramanathapuram", "Kadaladi", RING),
            ],
            None,
        ));
        let layer = load(file.path(), &DistrictFilter::default()).unwrap();
        let names: Vec<&str> = layer.regions().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Paramakudi", "Kadaladi"]);
        assert_eq!(layer.district, "Ramanathapuram");
        assert_eq!(layer.regions()[0].geometry.0[0].exterior().0.len(), 5);
    }

    #[test]
    fn missing_file_is_data_unavailable() {
        let err = load(Path::new("/nonexistent/gadm.json"), &DistrictFilter::default()).unwrap_err();
        assert!(matches!(err, BoundaryError::DataUnavailable { .. }));
    }

    #[test]
    fn missing_field_is_schema_error() {
        let file = write_fixture(&collection(&[feature("Ramanathapuram", "Kadaladi", RING)], None));
        let filter = DistrictFilter {
            district_field: "DISTRICT".into(),
            ..DistrictFilter::default()
        };
        let err = load(file.path(), &filter).unwrap_err();
        assert!(matches!(err, BoundaryError::SchemaError(_)), "{err}");
    }

    #[test]
    fn no_match_is_empty_result() {
        let file = write_fixture(&collection(&[feature("Sivaganga", "Karaikudi", RING)], None));
        let err = load(file.path(), &DistrictFilter::default()).unwrap_err();
        assert!(matches!(err, BoundaryError::EmptyResult { .. }));
    }

    #[test]
    fn duplicate_names_are_merged() {
        let file = write_fixture(&collection(
            &[
                feature("Ramanathapuram", "Rameswaram", RING),
                feature("Ramanathapuram", "Rameswaram", RING),
            ],
            None,
        ));
        let layer = load(file.path(), &DistrictFilter::default()).unwrap();
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.regions()[0].geometry.0.len(), 2);
    }

    #[test]
    fn web_mercator_is_reprojected() {
        let lon: f64 = 79.25;
        let lat: f64 = 9.4;
        let x = lon * HALF_EARTH / 180.0;
        let y = (PI / 4.0 + lat.to_radians() / 2.0).tan().ln() * HALF_EARTH / PI;
        let ring = format!("[[{x},{y}],[{x2},{y}],[{x2},{y2}],[{x},{y}]]", x2 = x + 1000.0, y2 = y + 1000.0);
        let file = write_fixture(&collection(
            &[feature("Ramanathapuram", "Kamuthi", &ring)],
            Some("urn:ogc:def:crs:EPSG::3857"),
        ));
        let layer = load(file.path(), &DistrictFilter::default()).unwrap();
        let first = layer.regions()[0].geometry.0[0].exterior().0[0];
        assert_abs_diff_eq!(first.x, lon, epsilon = 1e-9);
        assert_abs_diff_eq!(first.y, lat, epsilon = 1e-9);
    }

    #[test]
    fn utm_is_reprojected() {
        // Zone 44N central meridian is 81°E; the false-easting origin on the equator.
        let ring = "[[500000.0,0.0],[501000.0,0.0],[501000.0,1000.0],[500000.0,0.0]]";
        let file = write_fixture(&collection(
            &[feature("Ramanathapuram", "Mudukulathur", ring)],
            Some("EPSG:32644"),
        ));
        let layer = load(file.path(), &DistrictFilter::default()).unwrap();
        let first = layer.regions()[0].geometry.0[0].exterior().0[0];
        assert_abs_diff_eq!(first.x, 81.0, epsilon = 1e-6);
        assert_abs_diff_eq!(first.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn unsupported_crs_is_schema_error() {
        let file = write_fixture(&collection(
            &[feature("Ramanathapuram", "Kadaladi", RING)],
            Some("urn:ogc:def:crs:EPSG::27700"),
        ));
        let err = load(file.path(), &DistrictFilter::default()).unwrap_err();
        assert!(matches!(err, BoundaryError::SchemaError(_)));
    }
}
