//! Distance search over stored points. A point is GeoJSON
//! `{type: "Point", coordinates: [lng, lat]}` or a legacy `[lng, lat]`
//! pair; distances are great-circle meters. There is no geo index: every
//! document passing the filter is measured.

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::spec::CollationSpec;
use crate::validate::CollationValidator;

pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Result count when the request names no `limit`.
pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lng: f64,
    pub lat: f64,
}

impl Point {
    /// Read a point, rejecting anything outside longitude/latitude range.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        let coords = match value {
            JsonValue::Array(pair) => pair.as_slice(),
            JsonValue::Object(map) if map.get("type").and_then(JsonValue::as_str) == Some("Point") => {
                map.get("coordinates")?.as_array()?.as_slice()
            }
            _ => return None,
        };
        let [lng, lat] = coords else {
            return None;
        };
        let point = Point {
            lng: lng.as_f64()?,
            lat: lat.as_f64()?,
        };
        ((-180.0..=180.0).contains(&point.lng) && (-90.0..=90.0).contains(&point.lat)).then_some(point)
    }

    /// Haversine distance in meters.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().min(1.0).asin()
    }
}

/// A `geoNear` request: `{near, key, query, collation, maxDistance, limit}`.
#[derive(Debug, Clone)]
pub struct GeoNearOptions {
    pub near: Point,
    /// Dotted path of the point field.
    pub key: String,
    /// Filter applied under the effective collation before measuring.
    pub query: JsonValue,
    pub collation: Option<CollationSpec>,
    pub max_distance: Option<f64>,
    pub limit: usize,
}

impl GeoNearOptions {
    pub fn parse(request: &JsonValue, validator: &CollationValidator) -> Result<Self> {
        let invalid = |msg: &str| Error::InvalidQuery(format!("geoNear: {msg}"));
        let near = request
            .get("near")
            .and_then(Point::from_json)
            .ok_or_else(|| invalid("near must be a point within longitude/latitude range"))?;
        let key = match request.get("key") {
            Some(JsonValue::String(k)) if !k.is_empty() => k.clone(),
            _ => return Err(invalid("key must name the point field")),
        };
        let query = match request.get("query") {
            None | Some(JsonValue::Null) => JsonValue::Object(Default::default()),
            Some(q @ JsonValue::Object(_)) => q.clone(),
            Some(_) => return Err(invalid("query must be an object")),
        };
        let max_distance = match request.get("maxDistance") {
            None | Some(JsonValue::Null) => None,
            Some(v) => match v.as_f64() {
                Some(d) if d >= 0.0 => Some(d),
                _ => return Err(invalid("maxDistance must be a non-negative number")),
            },
        };
        let limit = match request.get("limit") {
            None | Some(JsonValue::Null) => DEFAULT_LIMIT,
            Some(v) => match v.as_u64() {
                Some(n) if n > 0 => n as usize,
                _ => return Err(invalid("limit must be a positive integer")),
            },
        };
        Ok(Self {
            near,
            key,
            query,
            collation: validator.validate_option(request)?,
            max_distance,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_geojson_and_legacy_points() {
        assert_eq!(
            Point::from_json(&json!({"type": "Point", "coordinates": [2.35, 48.85]})),
            Some(Point { lng: 2.35, lat: 48.85 })
        );
        assert_eq!(Point::from_json(&json!([0, 0])), Some(Point { lng: 0.0, lat: 0.0 }));
        assert_eq!(Point::from_json(&json!([0, 91])), None);
        assert_eq!(Point::from_json(&json!([1, 2, 3])), None);
        assert_eq!(Point::from_json(&json!({"type": "Polygon", "coordinates": [0, 0]})), None);
        assert_eq!(Point::from_json(&json!("0,0")), None);
    }

    #[test]
    fn haversine_distances() {
        let origin = Point { lng: 0.0, lat: 0.0 };
        assert_eq!(origin.distance_to(&origin), 0.0);
        // One degree of arc along the equator.
        let east = Point { lng: 1.0, lat: 0.0 };
        let expected = EARTH_RADIUS_METERS * 1f64.to_radians();
        assert!((origin.distance_to(&east) - expected).abs() < 1e-6);
        let pole = Point { lng: 0.0, lat: 90.0 };
        assert!((origin.distance_to(&pole) - EARTH_RADIUS_METERS * std::f64::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn parse_requires_near_and_key() {
        let validator = CollationValidator::builtin();
        assert!(GeoNearOptions::parse(&json!({"key": "loc"}), &validator).is_err());
        assert!(GeoNearOptions::parse(&json!({"near": [0, 0]}), &validator).is_err());
        assert!(GeoNearOptions::parse(&json!({"near": [0, 0], "key": "loc", "limit": 0}), &validator).is_err());
        assert!(
            GeoNearOptions::parse(&json!({"near": [0, 0], "key": "loc", "maxDistance": -1}), &validator).is_err()
        );

        let opts = GeoNearOptions::parse(
            &json!({"near": [0, 0], "key": "loc", "collation": {"locale": "en_US", "strength": 2}}),
            &validator,
        )
        .unwrap();
        assert_eq!(opts.limit, DEFAULT_LIMIT);
        assert_eq!(opts.query, json!({}));
        assert!(opts.collation.is_some());
    }
}
