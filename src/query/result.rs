//! Query result types and formatters
//!
//! Range queries produce a matrix (one [`Series`] per output label set,
//! ordered by labels), instant queries a vector (one [`Sample`] per series,
//! ordered by value). Results serialize to JSON or CSV.

use crate::types::{Labels, Point};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Query Result Types
// ============================================================================

/// Complete query result with data and metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Query execution metadata
    pub metadata: ResultMetadata,

    /// Result data
    pub data: ResultData,
}

impl QueryResult {
    /// Result of a range query
    pub fn matrix(series: Vec<Series>) -> Self {
        let point_count = series.iter().map(|s| s.points.len()).sum();
        Self {
            metadata: ResultMetadata {
                series_count: series.len(),
                point_count,
                ..Default::default()
            },
            data: ResultData::Matrix(series),
        }
    }

    /// Result of an instant query
    pub fn vector(samples: Vec<Sample>) -> Self {
        Self {
            metadata: ResultMetadata {
                series_count: samples.len(),
                point_count: samples.len(),
                ..Default::default()
            },
            data: ResultData::Vector(samples),
        }
    }

    /// Set execution time metadata
    pub fn with_execution_time(mut self, duration: Duration) -> Self {
        self.metadata.execution_time_us = duration.as_micros() as u64;
        self
    }

    /// Attach warnings
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.metadata.warnings.extend(warnings);
        self
    }

    /// Check if no series were returned
    pub fn is_empty(&self) -> bool {
        self.metadata.series_count == 0
    }

    /// Series of a matrix result
    pub fn as_matrix(&self) -> Option<&[Series]> {
        match &self.data {
            ResultData::Matrix(m) => Some(m),
            ResultData::Vector(_) => None,
        }
    }

    /// Samples of a vector result
    pub fn as_vector(&self) -> Option<&[Sample]> {
        match &self.data {
            ResultData::Vector(v) => Some(v),
            ResultData::Matrix(_) => None,
        }
    }

    /// Format result to string
    pub fn format(&self, format: ResultFormat) -> String {
        match format {
            ResultFormat::Json => self.to_json(),
            ResultFormat::JsonPretty => self.to_json_pretty(),
            ResultFormat::Csv => self.to_csv(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to pretty-printed JSON string
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Convert to CSV string
    pub fn to_csv(&self) -> String {
        let mut output = String::from("series,timestamp,value\n");

        match &self.data {
            ResultData::Matrix(series) => {
                for s in series {
                    let metric = csv_escape(&s.metric.to_string());
                    for p in &s.points {
                        output.push_str(&format!("{},{},{}\n", metric, p.t, p.v));
                    }
                }
            },
            ResultData::Vector(samples) => {
                for s in samples {
                    output.push_str(&format!(
                        "{},{},{}\n",
                        csv_escape(&s.metric.to_string()),
                        s.t,
                        s.v
                    ));
                }
            },
        }

        output
    }
}

fn csv_escape(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Result data variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
pub enum ResultData {
    /// One series per label set with points over the range
    Matrix(Vec<Series>),

    /// One sample per label set at the evaluation time
    Vector(Vec<Sample>),
}

/// A series with its points in ascending timestamp order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Series labels
    pub metric: Labels,

    /// Points in ascending timestamp order
    pub points: Vec<Point>,
}

impl Series {
    /// Create a series without points
    pub fn new(metric: Labels) -> Self {
        Self {
            metric,
            points: Vec::new(),
        }
    }

    /// Set points
    pub fn with_points(mut self, points: Vec<Point>) -> Self {
        self.points = points;
        self
    }
}

/// A single sample of an instant result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Series labels
    pub metric: Labels,
    /// Evaluation timestamp in milliseconds
    pub t: i64,
    /// Value
    pub v: f64,
}

/// Order series by labels
pub fn sort_matrix(series: &mut [Series]) {
    series.sort_by(|a, b| a.metric.cmp(&b.metric));
}

/// Order samples by value ascending, then labels
pub fn sort_vector(samples: &mut [Sample]) {
    samples.sort_by(|a, b| match a.v.total_cmp(&b.v) {
        Ordering::Equal => a.metric.cmp(&b.metric),
        ord => ord,
    });
}

// ============================================================================
// Result Metadata
// ============================================================================

/// Query result metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Number of series returned
    pub series_count: usize,

    /// Number of points across all series
    #[serde(skip_serializing_if = "is_zero")]
    #[serde(default)]
    pub point_count: usize,

    /// Query execution time in microseconds
    pub execution_time_us: u64,

    /// Warning messages
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Helper for serde skip_serializing_if
fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ResultMetadata {
    /// Add a warning message
    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

// ============================================================================
// Result Format
// ============================================================================

/// Output format for query results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultFormat {
    /// Compact JSON
    #[default]
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// CSV format
    Csv,
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultFormat::Json => write!(f, "json"),
            ResultFormat::JsonPretty => write!(f, "json-pretty"),
            ResultFormat::Csv => write!(f, "csv"),
        }
    }
}

impl std::str::FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ResultFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(ResultFormat::JsonPretty),
            "csv" => Ok(ResultFormat::Csv),
            _ => Err(format!("unknown format: {}", s)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn series(job: &str, points: &[(i64, f64)]) -> Series {
        Series::new(Labels::from_pairs(&[("__name__", "up"), ("job", job)]))
            .with_points(points.iter().map(|&(t, v)| Point::new(t, v)).collect())
    }

    #[test]
    fn test_matrix_metadata() {
        let result = QueryResult::matrix(vec![
            series("a", &[(0, 1.0), (30_000, 2.0)]),
            series("b", &[(0, 3.0)]),
        ]);
        assert_eq!(result.metadata.series_count, 2);
        assert_eq!(result.metadata.point_count, 3);
        assert!(result.as_vector().is_none());
    }

    #[test]
    fn test_sort_matrix_by_labels() {
        let mut m = vec![series("b", &[]), series("a", &[])];
        sort_matrix(&mut m);
        assert_eq!(m[0].metric.get("job"), Some("a"));
    }

    #[test]
    fn test_sort_vector_by_value_then_labels() {
        let sample = |job: &str, v: f64| Sample {
            metric: Labels::from_pairs(&[("job", job)]),
            t: 0,
            v,
        };
        let mut v = vec![sample("c", 2.0), sample("b", 1.0), sample("a", 2.0)];
        sort_vector(&mut v);
        let jobs: Vec<_> = v.iter().map(|s| s.metric.get("job").unwrap_or("")).collect();
        assert_eq!(jobs, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_query_result_json() {
        let result = QueryResult::matrix(vec![series("a", &[(1000, 42.5)])]);
        let json = result.to_json();
        assert!(json.contains("\"resultType\":\"matrix\""));
        assert!(json.contains("42.5"));
    }

    #[test]
    fn test_query_result_csv() {
        let result = QueryResult::matrix(vec![series("a", &[(1000, 42.5), (2000, 43.5)])]);
        let csv = result.to_csv();
        assert!(csv.starts_with("series,timestamp,value\n"));
        assert!(csv.contains(",1000,42.5"));
        assert!(csv.contains(",2000,43.5"));
    }

    #[test]
    fn test_result_format_parsing() {
        assert_eq!("json".parse::<ResultFormat>().unwrap(), ResultFormat::Json);
        assert_eq!("csv".parse::<ResultFormat>().unwrap(), ResultFormat::Csv);
        assert!("table".parse::<ResultFormat>().is_err());
    }
}
