//! Sample and fix types for the position pipeline.
//!
//! A [`Fix`] is one raw reading decoded from a gpsd report. Once a fix passes
//! the collector's filters it is rendered into a [`Sample`], whose scalar
//! fields are decimal strings capped at [`MAX_SCALAR_LEN`] characters. The same
//! format rules are applied when samples are reloaded from the durable store.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of characters kept for each scalar field.
pub const MAX_SCALAR_LEN: usize = 14;

/// Scalar fields of a sample in wire order.
pub const SCALAR_FIELDS: [&str; 4] = ["lat", "lon", "alt", "speed"];

/// One accepted position awaiting submission.
///
/// Field names match the on-disk and wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Latitude as a decimal string
    pub lat: String,

    /// Longitude as a decimal string
    pub lon: String,

    /// Altitude as a decimal string
    pub alt: String,

    /// Ground speed as a decimal string
    pub speed: String,

    /// Unix timestamp of the fix, in seconds
    pub utctime: i64,
}

/// Reasons a sample can fail the format invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    /// The entry is not a JSON object
    NotAnObject,

    /// A required field is absent
    MissingField(&'static str),

    /// `utctime` is not an integer
    NotAnInteger,

    /// A scalar field is not a string
    NotAString(&'static str),

    /// A scalar field has the wrong length or charset
    InvalidScalar { field: &'static str, value: String },
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleError::NotAnObject => write!(f, "sample is not an object"),
            SampleError::MissingField(field) => write!(f, "field '{}' is missing", field),
            SampleError::NotAnInteger => write!(f, "field 'utctime' is not an integer"),
            SampleError::NotAString(field) => write!(f, "field '{}' is not a string", field),
            SampleError::InvalidScalar { field, value } => {
                write!(f, "field '{}' has invalid value '{}'", field, value)
            }
        }
    }
}

impl std::error::Error for SampleError {}

impl Sample {
    /// Render an accepted fix into a sample, truncating every scalar.
    ///
    /// Fails when a rendered scalar does not satisfy the format invariant,
    /// which happens for negative or non-finite readings.
    pub fn from_fix(fix: &Fix) -> Result<Self, SampleError> {
        let sample = Self {
            lat: format_scalar(fix.lat),
            lon: format_scalar(fix.lon),
            alt: format_scalar(fix.alt),
            speed: format_scalar(fix.speed),
            utctime: fix.utctime,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Decode and validate one stored entry.
    pub fn from_value(value: &Value) -> Result<Self, SampleError> {
        let object = value.as_object().ok_or(SampleError::NotAnObject)?;

        let utctime = object
            .get("utctime")
            .ok_or(SampleError::MissingField("utctime"))?
            .as_i64()
            .ok_or(SampleError::NotAnInteger)?;

        let scalar = |field: &'static str| -> Result<String, SampleError> {
            let text = object
                .get(field)
                .ok_or(SampleError::MissingField(field))?
                .as_str()
                .ok_or(SampleError::NotAString(field))?;
            if !is_valid_scalar(text) {
                return Err(SampleError::InvalidScalar {
                    field,
                    value: text.to_string(),
                });
            }
            Ok(text.to_string())
        };

        Ok(Self {
            lat: scalar("lat")?,
            lon: scalar("lon")?,
            alt: scalar("alt")?,
            speed: scalar("speed")?,
            utctime,
        })
    }

    /// Check every scalar field against the format invariant.
    pub fn validate(&self) -> Result<(), SampleError> {
        for (field, value) in SCALAR_FIELDS.into_iter().zip(self.scalars()) {
            if !is_valid_scalar(value) {
                return Err(SampleError::InvalidScalar {
                    field,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Scalar fields in wire order.
    pub fn scalars(&self) -> [&str; 4] {
        [&self.lat, &self.lon, &self.alt, &self.speed]
    }
}

/// Check the scalar format invariant: 1 to 14 characters drawn from digits
/// and `.`, with at most one decimal point.
pub fn is_valid_scalar(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_SCALAR_LEN
        && value.chars().all(|c| c.is_ascii_digit() || c == '.')
        && value.chars().filter(|c| *c == '.').count() <= 1
}

/// Render a float in plain decimal notation and cap it at 14 characters.
///
/// Integral values keep a trailing `.0` so `34.0` renders as `"34.0"`.
pub fn format_scalar(value: f64) -> String {
    let mut text = value.to_string();
    if value.is_finite() && !text.contains('.') {
        text.push_str(".0");
    }
    text.chars().take(MAX_SCALAR_LEN).collect()
}

/// Convert a gpsd time string such as `2018-02-01T20:01:18.500Z` to Unix
/// seconds. Fractional seconds and the zone suffix are ignored.
pub fn parse_utc_time(time: &str) -> Option<i64> {
    let whole = match time.find('.') {
        Some(idx) => &time[..idx],
        None => time,
    };
    let whole = whole.trim_end_matches('Z');

    NaiveDateTime::parse_from_str(whole, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// A complete position reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fix {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub speed: f64,
    pub utctime: i64,
}

/// Error raised when a gpsd line cannot be unpacked into a report.
#[derive(Debug)]
pub struct UnpackError(serde_json::Error);

impl std::fmt::Display for UnpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unpacking gps data failed: {}", self.0)
    }
}

impl std::error::Error for UnpackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// One decoded gpsd JSON report.
#[derive(Debug, Clone)]
pub struct Report {
    fields: Map<String, Value>,
}

impl Report {
    /// Unpack a single line of gpsd output. Anything other than a JSON object
    /// is an unpack failure.
    pub fn parse(line: &str) -> Result<Self, UnpackError> {
        let fields = serde_json::from_str(line.trim()).map_err(UnpackError)?;
        Ok(Self { fields })
    }

    /// The report class, e.g. `TPV` or `SKY`.
    pub fn class(&self) -> Option<&str> {
        self.fields.get("class").and_then(Value::as_str)
    }

    /// Extract a fix when the report is a TPV carrying numeric lat, lon,
    /// alt and speed plus a well-formed time.
    pub fn fix(&self) -> Option<Fix> {
        if self.class() != Some("TPV") {
            return None;
        }

        let number = |key: &str| self.fields.get(key).and_then(Value::as_f64);
        let alt = number("alt")
            .or_else(|| number("altHAE"))
            .or_else(|| number("altMSL"))?;
        let time = self.fields.get("time").and_then(Value::as_str)?;

        Some(Fix {
            lat: number("lat")?,
            lon: number("lon")?,
            alt,
            speed: number("speed")?,
            utctime: parse_utc_time(time)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn berlin_fix() -> Fix {
        Fix {
            lat: 52.52,
            lon: 13.405,
            alt: 34.0,
            speed: 0.0,
            utctime: 1_704_067_200,
        }
    }

    #[test]
    fn test_scalar_validation() {
        assert!(is_valid_scalar("52.52"));
        assert!(is_valid_scalar("34"));
        assert!(is_valid_scalar("12345678901234"));

        assert!(!is_valid_scalar(""));
        assert!(!is_valid_scalar("123456789012345"));
        assert!(!is_valid_scalar("-33.5"));
        assert!(!is_valid_scalar("1.2.3"));
        assert!(!is_valid_scalar("1e-05"));
    }

    #[test]
    fn test_format_scalar() {
        assert_eq!(format_scalar(52.52), "52.52");
        assert_eq!(format_scalar(34.0), "34.0");
        assert_eq!(format_scalar(0.0), "0.0");
        assert_eq!(format_scalar(0.0000001), "0.0000001");
        assert_eq!(format_scalar(52.520008333333336), "52.52000833333");
        assert!(format_scalar(1.0 / 3.0).len() <= MAX_SCALAR_LEN);
    }

    #[test]
    fn test_parse_utc_time() {
        assert_eq!(parse_utc_time("2024-01-01T00:00:00Z"), Some(1_704_067_200));
        assert_eq!(parse_utc_time("2024-01-01T00:00:02.500Z"), Some(1_704_067_202));
        assert_eq!(parse_utc_time("2024-01-01T00:00:00"), Some(1_704_067_200));
        assert_eq!(parse_utc_time("yesterday"), None);
        assert_eq!(parse_utc_time(""), None);
    }

    #[test]
    fn test_sample_from_fix() {
        let sample = Sample::from_fix(&berlin_fix()).unwrap();
        assert_eq!(sample.lat, "52.52");
        assert_eq!(sample.lon, "13.405");
        assert_eq!(sample.alt, "34.0");
        assert_eq!(sample.speed, "0.0");
        assert_eq!(sample.utctime, 1_704_067_200);
    }

    #[test]
    fn test_sample_from_fix_rejects_negative() {
        let fix = Fix {
            lat: -33.86,
            ..berlin_fix()
        };
        let err = Sample::from_fix(&fix).unwrap_err();
        assert!(matches!(err, SampleError::InvalidScalar { field: "lat", .. }));
    }

    #[test]
    fn test_sample_from_value() {
        let value = json!({
            "lat": "52.52", "lon": "13.405", "alt": "34.0", "speed": "0.0", "utctime": 1704067200
        });
        let sample = Sample::from_value(&value).unwrap();
        assert_eq!(sample, Sample::from_fix(&berlin_fix()).unwrap());
    }

    #[test]
    fn test_sample_from_value_rejects_corrupt_entries() {
        let integer_alt = json!({
            "lat": "52.52", "lon": "13.405", "alt": 123, "speed": "0.0", "utctime": 1704067200
        });
        assert_eq!(
            Sample::from_value(&integer_alt),
            Err(SampleError::NotAString("alt"))
        );

        let float_time = json!({
            "lat": "52.52", "lon": "13.405", "alt": "34.0", "speed": "0.0", "utctime": 1704067200.5
        });
        assert_eq!(Sample::from_value(&float_time), Err(SampleError::NotAnInteger));

        let missing = json!({ "lat": "52.52", "utctime": 1 });
        assert_eq!(
            Sample::from_value(&missing),
            Err(SampleError::MissingField("lon"))
        );

        assert_eq!(Sample::from_value(&json!([1, 2])), Err(SampleError::NotAnObject));
    }

    #[test]
    fn test_sample_serialization_shape() {
        let sample = Sample::from_fix(&berlin_fix()).unwrap();
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(value["alt"], json!("34.0"));
        assert_eq!(value["utctime"], json!(1_704_067_200));
    }

    #[test]
    fn test_report_fix_extraction() {
        let report = Report::parse(
            r#"{"class":"TPV","mode":3,"lat":52.52,"lon":13.405,"alt":34.0,"speed":0.0,"time":"2024-01-01T00:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(report.class(), Some("TPV"));
        assert_eq!(report.fix(), Some(berlin_fix()));
    }

    #[test]
    fn test_report_without_complete_fix() {
        let sky = Report::parse(r#"{"class":"SKY","satellites":[]}"#).unwrap();
        assert_eq!(sky.fix(), None);

        let no_fix = Report::parse(r#"{"class":"TPV","mode":1,"time":"2024-01-01T00:00:00Z"}"#).unwrap();
        assert_eq!(no_fix.fix(), None);

        let bad_time =
            Report::parse(r#"{"class":"TPV","lat":1.0,"lon":1.0,"alt":1.0,"speed":1.0,"time":"n/a"}"#)
                .unwrap();
        assert_eq!(bad_time.fix(), None);
    }

    #[test]
    fn test_report_alt_msl_fallback() {
        let report = Report::parse(
            r#"{"class":"TPV","lat":52.52,"lon":13.405,"altMSL":34.0,"speed":0.0,"time":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(report.fix(), Some(berlin_fix()));
    }

    #[test]
    fn test_report_alt_hae_fallback() {
        let report = Report::parse(
            r#"{"class":"TPV","lat":52.52,"lon":13.405,"altHAE":34.0,"altMSL":-10.0,"speed":0.0,"time":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(report.fix(), Some(berlin_fix()));
    }

    #[test]
    fn test_report_unpack_failure() {
        assert!(Report::parse("not json").is_err());
        assert!(Report::parse("[1,2,3]").is_err());
        assert!(Report::parse("").is_err());
    }
}
