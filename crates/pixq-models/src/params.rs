//! Job types and their typed parameters.
//!
//! Parameters arrive from clients as an untyped JSON object. Each job type has
//! its own explicit decoder that either yields a [`TransformParams`] value or a
//! [`ParamError`] naming the offending field. Unknown keys are rejected.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Supported transformation job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    ResizeToWidthPx,
    ResizeToHeightPx,
    ResizeByPercentage,
    CropByPercentage,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::ResizeToWidthPx,
        JobType::ResizeToHeightPx,
        JobType::ResizeByPercentage,
        JobType::CropByPercentage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ResizeToWidthPx => "resizeToWidthPx",
            JobType::ResizeToHeightPx => "resizeToHeightPx",
            JobType::ResizeByPercentage => "resizeByPercentage",
            JobType::CropByPercentage => "cropByPercentage",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ParamError::UnknownJobType(s.to_string()))
    }
}

/// Why a parameter bag was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("unknown job type: {0:?}")]
    UnknownJobType(String),

    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` must be {expected}")]
    WrongType { field: &'static str, expected: &'static str },

    #[error("field `{field}` {reason}")]
    OutOfRange { field: &'static str, reason: &'static str },

    #[error("unexpected field `{0}`")]
    UnknownField(String),
}

/// Validated parameters, one variant per job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "jobType", rename_all = "camelCase")]
pub enum TransformParams {
    ResizeToWidthPx { width: u32 },
    ResizeToHeightPx { height: u32 },
    ResizeByPercentage { percentage: f64 },
    CropByPercentage { percentage: f64 },
}

impl TransformParams {
    /// Decode a client parameter bag for the given job type.
    pub fn decode(job_type: JobType, bag: &Map<String, Value>) -> Result<Self, ParamError> {
        let params = match job_type {
            JobType::ResizeToWidthPx => {
                check_fields(bag, &["width"])?;
                TransformParams::ResizeToWidthPx {
                    width: positive_int(bag, "width")?,
                }
            }
            JobType::ResizeToHeightPx => {
                check_fields(bag, &["height"])?;
                TransformParams::ResizeToHeightPx {
                    height: positive_int(bag, "height")?,
                }
            }
            JobType::ResizeByPercentage => {
                check_fields(bag, &["percentage"])?;
                TransformParams::ResizeByPercentage {
                    percentage: percentage(bag, false)?,
                }
            }
            JobType::CropByPercentage => {
                check_fields(bag, &["percentage"])?;
                TransformParams::CropByPercentage {
                    percentage: percentage(bag, true)?,
                }
            }
        };
        Ok(params)
    }

    pub fn job_type(&self) -> JobType {
        match self {
            TransformParams::ResizeToWidthPx { .. } => JobType::ResizeToWidthPx,
            TransformParams::ResizeToHeightPx { .. } => JobType::ResizeToHeightPx,
            TransformParams::ResizeByPercentage { .. } => JobType::ResizeByPercentage,
            TransformParams::CropByPercentage { .. } => JobType::CropByPercentage,
        }
    }
}

fn check_fields(bag: &Map<String, Value>, allowed: &[&str]) -> Result<(), ParamError> {
    match bag
        .keys()
        .find(|k| k.as_str() != "jobType" && !allowed.contains(&k.as_str()))
    {
        Some(extra) => Err(ParamError::UnknownField(extra.clone())),
        None => Ok(()),
    }
}

fn positive_int(bag: &Map<String, Value>, field: &'static str) -> Result<u32, ParamError> {
    let value = bag.get(field).ok_or(ParamError::Missing(field))?;
    let wrong_type = ParamError::WrongType {
        field,
        expected: "a positive integer",
    };

    let n = match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                u
            } else if let Some(f) = n.as_f64() {
                if f.fract() != 0.0 || f < 0.0 {
                    return Err(wrong_type);
                }
                f as u64
            } else {
                return Err(wrong_type);
            }
        }
        _ => return Err(wrong_type),
    };

    if n == 0 {
        return Err(ParamError::OutOfRange {
            field,
            reason: "must be greater than zero",
        });
    }
    u32::try_from(n).map_err(|_| ParamError::OutOfRange {
        field,
        reason: "is too large",
    })
}

fn percentage(bag: &Map<String, Value>, at_most_100: bool) -> Result<f64, ParamError> {
    let field = "percentage";
    let value = bag
        .get(field)
        .ok_or(ParamError::Missing(field))?
        .as_f64()
        .ok_or(ParamError::WrongType {
            field,
            expected: "a number",
        })?;

    if !(value > 0.0) || !value.is_finite() {
        return Err(ParamError::OutOfRange {
            field,
            reason: "must be greater than zero",
        });
    }
    if at_most_100 && value > 100.0 {
        return Err(ParamError::OutOfRange {
            field,
            reason: "must be at most 100",
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_job_type_round_trips_through_str() {
        for t in JobType::ALL {
            assert_eq!(t.as_str().parse::<JobType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), json!(t.as_str()));
        }
        assert!(matches!(
            "unknownType".parse::<JobType>(),
            Err(ParamError::UnknownJobType(_))
        ));
    }

    #[test]
    fn test_decode_width() {
        let params = TransformParams::decode(JobType::ResizeToWidthPx, &bag(json!({"width": 100}))).unwrap();
        assert_eq!(params, TransformParams::ResizeToWidthPx { width: 100 });
    }

    #[test]
    fn test_decode_accepts_integral_float() {
        let params = TransformParams::decode(JobType::ResizeToHeightPx, &bag(json!({"height": 64.0}))).unwrap();
        assert_eq!(params, TransformParams::ResizeToHeightPx { height: 64 });
    }

    #[test]
    fn test_decode_rejects_bad_integers() {
        let cases = [
            (json!({"width": 0}), "zero"),
            (json!({"width": -5}), "negative"),
            (json!({"width": 10.5}), "fractional"),
            (json!({"width": "100"}), "string"),
            (json!({"width": true}), "bool"),
            (json!({}), "missing"),
        ];
        for (input, label) in cases {
            assert!(
                TransformParams::decode(JobType::ResizeToWidthPx, &bag(input)).is_err(),
                "{} width should be rejected",
                label
            );
        }
    }

    #[test]
    fn test_decode_rejects_unknown_field() {
        let err = TransformParams::decode(JobType::ResizeToWidthPx, &bag(json!({"width": 10, "foo": 1})))
            .unwrap_err();
        assert_eq!(err, ParamError::UnknownField("foo".to_string()));
    }

    #[test]
    fn test_decode_percentages() {
        assert!(TransformParams::decode(JobType::ResizeByPercentage, &bag(json!({"percentage": 250}))).is_ok());
        assert!(TransformParams::decode(JobType::ResizeByPercentage, &bag(json!({"percentage": 0}))).is_err());
        assert!(TransformParams::decode(JobType::CropByPercentage, &bag(json!({"percentage": 100}))).is_ok());
        assert!(TransformParams::decode(JobType::CropByPercentage, &bag(json!({"percentage": 100.5}))).is_err());
        assert!(TransformParams::decode(JobType::CropByPercentage, &bag(json!({"percentage": "50"}))).is_err());
    }

    #[test]
    fn test_params_serialize_with_job_type_tag() {
        let params = TransformParams::ResizeByPercentage { percentage: 50.0 };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"jobType": "resizeByPercentage", "percentage": 50.0})
        );
        assert_eq!(params.job_type(), JobType::ResizeByPercentage);
    }
}
