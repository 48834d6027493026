use std::time::SystemTime;

use crate::metrics::descriptor::{LabelValue, MetricDescriptor};
use crate::metrics::export::{MetricError, MetricResult};

/// A metric: a descriptor plus the time series recorded against it.
///
/// Every time series carries exactly as many label values as the descriptor
/// has label keys; instruments enforce this at recording time.
#[derive(Clone, Debug, PartialEq)]
pub struct Metric {
    /// Identity and shape of the metric.
    pub descriptor: MetricDescriptor,
    /// The recorded series, in insertion order.
    pub timeseries: Vec<TimeSeries>,
}

/// One stream of points sharing a label-value tuple.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    /// When accumulation started; `None` for gauges.
    pub start_timestamp: Option<SystemTime>,
    /// Label values, ordered to match the descriptor's label keys.
    pub label_values: Vec<LabelValue>,
    /// The points, usually exactly one per export snapshot.
    pub points: Vec<Point>,
}

/// A single measurement.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    /// The measured value.
    pub value: Value,
    /// When the measurement was taken.
    pub timestamp: SystemTime,
}

/// The value of a point.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// A 64-bit integer.
    Long(i64),
    /// A 64-bit float.
    Double(f64),
    /// A distribution of observed values.
    Distribution(DistributionValue),
    /// A summary of observed values.
    Summary(SummaryValue),
}

/// A distribution over explicit bucket bounds.
///
/// With `n` bounds there are `n + 1` buckets: `(-inf, bounds[0])`,
/// `[bounds[0], bounds[1])`, ..., `[bounds[n-1], +inf)`.
#[derive(Clone, Debug, PartialEq)]
pub struct DistributionValue {
    /// Number of observed values.
    pub count: i64,
    /// Sum of observed values.
    pub sum: f64,
    /// Sum of squared deviations from the mean.
    pub sum_of_squared_deviation: f64,
    /// Explicit bucket bounds, strictly increasing.
    pub bucket_bounds: Vec<f64>,
    /// One bucket per bound interval.
    pub buckets: Vec<Bucket>,
}

impl DistributionValue {
    /// Builds a distribution value, checking that the bucket list is one
    /// longer than the bounds list.
    pub fn new(
        count: i64,
        sum: f64,
        sum_of_squared_deviation: f64,
        bucket_bounds: Vec<f64>,
        buckets: Vec<Bucket>,
    ) -> MetricResult<Self> {
        if buckets.len() != bucket_bounds.len() + 1 {
            return Err(MetricError::InvalidDistribution(format!(
                "expected {} buckets for {} bounds, got {}",
                bucket_bounds.len() + 1,
                bucket_bounds.len(),
                buckets.len()
            )));
        }
        Ok(DistributionValue {
            count,
            sum,
            sum_of_squared_deviation,
            bucket_bounds,
            buckets,
        })
    }
}

/// One bucket of a distribution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bucket {
    /// Number of values that fell in this bucket.
    pub count: i64,
    /// An example value from this bucket, when one was captured.
    pub exemplar: Option<Exemplar>,
}

/// An example raw measurement attached to a distribution bucket.
#[derive(Clone, Debug, PartialEq)]
pub struct Exemplar {
    /// The raw measured value.
    pub value: f64,
    /// When the example was recorded.
    pub timestamp: SystemTime,
    /// Opaque contextual attachments (a trace id, typically).
    pub attachments: Vec<(String, String)>,
}

/// A summary of observed values: totals plus a percentile snapshot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryValue {
    /// Total number of observed values, when known.
    pub count: Option<i64>,
    /// Sum of observed values, when known.
    pub sum: Option<f64>,
    /// Values at requested percentiles.
    pub snapshot: Vec<ValueAtPercentile>,
}

/// One percentile of a summary snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueAtPercentile {
    /// The percentile, in `(0, 100]`.
    pub percentile: f64,
    /// The value at that percentile.
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_bucket_arity_is_checked() {
        let ok = DistributionValue::new(
            3,
            6.0,
            2.0,
            vec![1.0, 5.0],
            vec![Bucket::default(), Bucket::default(), Bucket::default()],
        );
        assert!(ok.is_ok());

        let err = DistributionValue::new(3, 6.0, 2.0, vec![1.0, 5.0], vec![Bucket::default()])
            .unwrap_err();
        assert!(matches!(err, MetricError::InvalidDistribution(_)));
    }
}
