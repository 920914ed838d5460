// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Parsing of vendor well-known-text geofence areas.
//!
//! The tracking vendor describes geofences as `CIRCLE (lng lat, radius)` or
//! `POLYGON ((lng lat, lng lat, ...))`. Coordinates arrive
//! longitude-first and are swapped to `{lat, lng}` on the way in. Parsing is
//! strict per shape, but the public entry point never refuses an event: an
//! unusable area degrades to a default circle with the degradation recorded.

use crate::models::stop::{GeoPoint, StopGeometry};

/// Record of a best-effort decision taken while parsing an area.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeFallback {
    /// The area was absent or unusable; a default circle was substituted.
    DefaultedCircle { reason: String },
    /// Some polygon vertices did not parse as two numbers and were dropped.
    DroppedVertices { dropped: usize },
}

impl ShapeFallback {
    /// Human-readable note stored on the Stop so the degradation is visible.
    pub fn note(&self) -> String {
        match self {
            ShapeFallback::DefaultedCircle { reason } => {
                format!("geometry defaulted to circle: {reason}")
            }
            ShapeFallback::DroppedVertices { dropped } => {
                format!("dropped {dropped} unparseable polygon vertices")
            }
        }
    }
}

/// A normalized shape plus the representative point used for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedShape {
    pub shape: StopGeometry,
    pub anchor: GeoPoint,
    pub fallback: Option<ShapeFallback>,
}

/// Errors from strict area parsing.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GeometryParseError {
    #[error("Unrecognized geometry keyword in: {0}")]
    UnknownKeyword(String),

    #[error("Malformed circle: {0}")]
    MalformedCircle(String),

    #[error("Malformed polygon: {0}")]
    MalformedPolygon(String),
}

/// Parse a vendor area string strictly.
pub fn parse_area(area: &str) -> Result<ParsedShape, GeometryParseError> {
    let trimmed = area.trim();
    let upper = trimmed.to_ascii_uppercase();

    if upper.starts_with("CIRCLE") {
        parse_circle(trimmed)
    } else if upper.starts_with("POLYGON") {
        parse_polygon(trimmed)
    } else {
        Err(GeometryParseError::UnknownKeyword(truncate(trimmed, 40)))
    }
}

/// Parse an area, degrading to a default circle instead of failing.
///
/// `center_hint` is the event's reported position, used as the center of the
/// substitute circle when available. The returned `fallback` must end up in
/// the created Stop's `geometry_note`; a silent guess would otherwise look
/// like real survey data.
pub fn parse_area_or_default(
    area: Option<&str>,
    center_hint: Option<GeoPoint>,
    default_radius_m: f64,
) -> ParsedShape {
    let reason = match area {
        Some(raw) => match parse_area(raw) {
            Ok(parsed) => return parsed,
            Err(err) => err.to_string(),
        },
        None => "no area supplied".to_string(),
    };

    let center = center_hint.unwrap_or(GeoPoint { lat: 0.0, lng: 0.0 });
    tracing::warn!(reason = %reason, "Falling back to default circle geometry");

    ParsedShape {
        shape: StopGeometry::Circle {
            center,
            radius_m: default_radius_m,
        },
        anchor: center,
        fallback: Some(ShapeFallback::DefaultedCircle { reason }),
    }
}

/// `CIRCLE (<lng> <lat>, <radiusMeters>)`
fn parse_circle(raw: &str) -> Result<ParsedShape, GeometryParseError> {
    let content = parenthesized(raw)
        .ok_or_else(|| GeometryParseError::MalformedCircle("missing parentheses".into()))?;

    let (center_part, radius_part) = content
        .split_once(',')
        .ok_or_else(|| GeometryParseError::MalformedCircle("missing radius separator".into()))?;

    let mut tokens = center_part.split_whitespace();
    let lng = parse_coord(tokens.next())
        .ok_or_else(|| GeometryParseError::MalformedCircle("bad center longitude".into()))?;
    let lat = parse_coord(tokens.next())
        .ok_or_else(|| GeometryParseError::MalformedCircle("bad center latitude".into()))?;

    let radius_m: f64 = radius_part
        .trim()
        .parse()
        .map_err(|_| GeometryParseError::MalformedCircle("non-numeric radius".into()))?;
    if !radius_m.is_finite() || radius_m < 0.0 {
        return Err(GeometryParseError::MalformedCircle(format!(
            "radius out of range: {radius_m}"
        )));
    }

    let center = GeoPoint { lat, lng };
    Ok(ParsedShape {
        shape: StopGeometry::Circle { center, radius_m },
        anchor: center,
        fallback: None,
    })
}

/// `POLYGON ((<lng> <lat>, ...))`, single or double parenthesization.
fn parse_polygon(raw: &str) -> Result<ParsedShape, GeometryParseError> {
    let mut content = parenthesized(raw)
        .ok_or_else(|| GeometryParseError::MalformedPolygon("missing parentheses".into()))?
        .trim();

    // The vendor emits both POLYGON ((...)) and POLYGON (...).
    if content.starts_with('(') && content.ends_with(')') {
        content = content[1..content.len() - 1].trim();
    }

    let mut vertices = Vec::new();
    let mut dropped = 0usize;
    for token in content.split(',') {
        let mut coords = token.split_whitespace();
        match (parse_coord(coords.next()), parse_coord(coords.next())) {
            (Some(lng), Some(lat)) => vertices.push(GeoPoint { lat, lng }),
            _ => dropped += 1,
        }
    }

    let anchor = *vertices
        .first()
        .ok_or_else(|| GeometryParseError::MalformedPolygon("no parseable vertices".into()))?;

    Ok(ParsedShape {
        shape: StopGeometry::Polygon { vertices },
        anchor,
        fallback: (dropped > 0).then_some(ShapeFallback::DroppedVertices { dropped }),
    })
}

/// Content between the first `(` and the last `)`.
fn parenthesized(raw: &str) -> Option<&str> {
    let open = raw.find('(')?;
    let close = raw.rfind(')')?;
    (close > open).then(|| raw[open + 1..close].trim())
}

fn parse_coord(token: Option<&str>) -> Option<f64> {
    token?.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Bound an error preview to `max_chars` characters. The cut lands on a
/// character boundary, so non-ASCII input never splits a code point.
fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}
