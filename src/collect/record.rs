use std::collections::HashMap;

use thiserror::Error;

/// Score written when a directional image decoded but could not be
/// classified.
pub const CLASSIFY_FAILURE_SCORE: f64 = -1.0;
/// Score written when one or more directional images failed to fetch or
/// decode. Partial averages would silently bias the score toward whichever
/// headings happened to succeed, so the whole panorama is marked failed.
pub const FETCH_FAILURE_SCORE: f64 = -1000.0;

/// Two spaces separate fields; values may therefore contain single spaces.
const FIELD_DELIMITER: &str = "  ";
/// Serialized placeholder for an absent optional attribute.
const ABSENT: &str = "None";

/// One collected panorama. `pano_id` uniqueness is enforced at aggregation
/// time, not at collection time: overlapping reruns are expected to produce
/// duplicate fetches that are filtered downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct PanoramaRecord {
    pub pano_id: String,
    pub pano_date: String,
    pub longitude: f64,
    pub latitude: f64,
    pub street_id: Option<String>,
    pub street_name: Option<String>,
    pub point_id: Option<String>,
    pub green_view: Option<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value `{value}` for field `{field}`")]
    InvalidValue { field: &'static str, value: String },
}

impl PanoramaRecord {
    /// Serialize to the one-line batch file format: `label: value` pairs
    /// separated by a fixed delimiter. `parse_line` is the exact inverse.
    pub fn to_line(&self) -> String {
        let mut fields = vec![
            format!("panoID: {}", self.pano_id),
            format!("panoDate: {}", self.pano_date),
            format!("lat: {}", self.latitude),
            format!("lon: {}", self.longitude),
            format!("street_id: {}", self.street_id.as_deref().unwrap_or(ABSENT)),
            format!(
                "street_name: {}",
                self.street_name.as_deref().unwrap_or(ABSENT)
            ),
            format!("point_id: {}", self.point_id.as_deref().unwrap_or(ABSENT)),
        ];
        if let Some(green_view) = self.green_view {
            fields.push(format!("greenview: {}", green_view));
        }
        fields.join(FIELD_DELIMITER)
    }

    /// Parse one batch file line by locating the fixed field labels.
    pub fn parse_line(line: &str) -> Result<PanoramaRecord, RecordError> {
        let mut values: HashMap<&str, &str> = HashMap::new();
        for field in line.trim().split(FIELD_DELIMITER) {
            if let Some((label, value)) = field.split_once(':') {
                values.insert(label.trim(), value.trim());
            }
        }

        let green_view = match values.get("greenview").copied() {
            None => None,
            Some(value) => Some(value.parse().map_err(|_| RecordError::InvalidValue {
                field: "greenview",
                value: value.to_string(),
            })?),
        };

        Ok(PanoramaRecord {
            pano_id: required(&values, "panoID")?.to_string(),
            pano_date: required(&values, "panoDate")?.to_string(),
            latitude: parse_f64(&values, "lat")?,
            longitude: parse_f64(&values, "lon")?,
            street_id: optional(&values, "street_id"),
            street_name: optional(&values, "street_name"),
            point_id: optional(&values, "point_id"),
            green_view,
        })
    }

    /// True when the record carries a usable score: present and
    /// non-negative (both failure sentinels are negative).
    pub fn has_valid_green_view(&self) -> bool {
        matches!(self.green_view, Some(score) if score >= 0.0)
    }
}

fn required<'a>(
    values: &HashMap<&str, &'a str>,
    label: &'static str,
) -> Result<&'a str, RecordError> {
    values
        .get(label)
        .copied()
        .filter(|v| !v.is_empty())
        .ok_or(RecordError::MissingField(label))
}

fn parse_f64(values: &HashMap<&str, &str>, label: &'static str) -> Result<f64, RecordError> {
    let value = required(values, label)?;
    value.parse().map_err(|_| RecordError::InvalidValue {
        field: label,
        value: value.to_string(),
    })
}

fn optional(values: &HashMap<&str, &str>, label: &str) -> Option<String> {
    values
        .get(label)
        .copied()
        .filter(|v| !v.is_empty() && *v != ABSENT)
        .map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> PanoramaRecord {
        PanoramaRecord {
            pano_id: "CAoSLEFGMVFpcE1nvQ".to_string(),
            pano_date: "2019-07".to_string(),
            longitude: 79.974533,
            latitude: 14.442599,
            street_id: Some("123456".to_string()),
            street_name: Some("Grand Trunk Road".to_string()),
            point_id: Some("42".to_string()),
            green_view: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let record = sample_record();
        assert_eq!(PanoramaRecord::parse_line(&record.to_line()), Ok(record));
    }

    #[test]
    fn test_round_trip_with_green_view() {
        let mut record = sample_record();
        record.green_view = Some(27.341666666666665);
        assert_eq!(PanoramaRecord::parse_line(&record.to_line()), Ok(record));
    }

    #[test]
    fn test_round_trip_absent_attributes() {
        let record = PanoramaRecord {
            street_id: None,
            street_name: None,
            point_id: None,
            ..sample_record()
        };
        let line = record.to_line();
        assert!(line.contains("street_id: None"));
        assert_eq!(PanoramaRecord::parse_line(&line), Ok(record));
    }

    #[test]
    fn test_street_name_keeps_single_spaces() {
        let record = sample_record();
        let parsed = PanoramaRecord::parse_line(&record.to_line()).unwrap();
        assert_eq!(parsed.street_name.as_deref(), Some("Grand Trunk Road"));
    }

    #[test]
    fn test_missing_label_is_rejected() {
        assert_eq!(
            PanoramaRecord::parse_line("panoDate: 2019-07  lat: 1.0  lon: 2.0"),
            Err(RecordError::MissingField("panoID"))
        );
    }

    #[test]
    fn test_unparsable_coordinate_is_rejected() {
        let line = "panoID: abc  panoDate: 2019-07  lat: north  lon: 2.0";
        assert!(matches!(
            PanoramaRecord::parse_line(line),
            Err(RecordError::InvalidValue { field: "lat", .. })
        ));
    }

    #[test]
    fn test_unparsable_green_view_is_rejected() {
        let line = "panoID: abc  panoDate: 2019-07  lat: 1.0  lon: 2.0  greenview: n/a";
        assert!(matches!(
            PanoramaRecord::parse_line(line),
            Err(RecordError::InvalidValue {
                field: "greenview",
                ..
            })
        ));
    }

    #[test]
    fn test_non_record_line_is_rejected() {
        assert!(PanoramaRecord::parse_line("").is_err());
        assert!(PanoramaRecord::parse_line("collection finished").is_err());
    }

    #[test]
    fn test_has_valid_green_view() {
        let mut record = sample_record();
        assert!(!record.has_valid_green_view());
        record.green_view = Some(0.0);
        assert!(record.has_valid_green_view());
        record.green_view = Some(CLASSIFY_FAILURE_SCORE);
        assert!(!record.has_valid_green_view());
        record.green_view = Some(FETCH_FAILURE_SCORE);
        assert!(!record.has_valid_green_view());
    }
}
