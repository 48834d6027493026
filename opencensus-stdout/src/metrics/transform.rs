use std::time::SystemTime;

use serde::Serialize;

use crate::common::{as_opt_unix_nano, as_unix_nano};

/// A metric snapshot flattened into a serializable shape.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Metric {
    descriptor: MetricDescriptor,
    timeseries: Vec<TimeSeries>,
}

impl From<&opencensus::metrics::Metric> for Metric {
    fn from(metric: &opencensus::metrics::Metric) -> Self {
        Metric {
            descriptor: (&metric.descriptor).into(),
            timeseries: metric.timeseries.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricDescriptor {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    unit: String,
    #[serde(rename = "type")]
    descriptor_type: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    label_keys: Vec<LabelKey>,
}

impl From<&opencensus::metrics::MetricDescriptor> for MetricDescriptor {
    fn from(descriptor: &opencensus::metrics::MetricDescriptor) -> Self {
        MetricDescriptor {
            name: descriptor.name().to_string(),
            description: descriptor.description().to_string(),
            unit: descriptor.unit().to_string(),
            descriptor_type: descriptor_type(descriptor.descriptor_type()),
            label_keys: descriptor.label_keys().iter().map(Into::into).collect(),
        }
    }
}

fn descriptor_type(descriptor_type: opencensus::metrics::MetricDescriptorType) -> &'static str {
    use opencensus::metrics::MetricDescriptorType::*;
    match descriptor_type {
        GaugeInt64 => "GAUGE_INT64",
        GaugeDouble => "GAUGE_DOUBLE",
        GaugeDistribution => "GAUGE_DISTRIBUTION",
        CumulativeInt64 => "CUMULATIVE_INT64",
        CumulativeDouble => "CUMULATIVE_DOUBLE",
        CumulativeDistribution => "CUMULATIVE_DISTRIBUTION",
        Summary => "SUMMARY",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelKey {
    key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
}

impl From<&opencensus::metrics::LabelKey> for LabelKey {
    fn from(key: &opencensus::metrics::LabelKey) -> Self {
        LabelKey {
            key: key.key().to_string(),
            description: key.description().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TimeSeries {
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "as_opt_unix_nano"
    )]
    start_timestamp_unix_nano: Option<SystemTime>,
    label_values: Vec<Option<String>>,
    points: Vec<Point>,
}

impl From<&opencensus::metrics::TimeSeries> for TimeSeries {
    fn from(series: &opencensus::metrics::TimeSeries) -> Self {
        TimeSeries {
            start_timestamp_unix_nano: series.start_timestamp,
            label_values: series
                .label_values
                .iter()
                .map(|value| value.value().map(str::to_string))
                .collect(),
            points: series.points.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Point {
    value: Value,
    #[serde(serialize_with = "as_unix_nano")]
    timestamp_unix_nano: SystemTime,
}

impl From<&opencensus::metrics::Point> for Point {
    fn from(point: &opencensus::metrics::Point) -> Self {
        Point {
            value: (&point.value).into(),
            timestamp_unix_nano: point.timestamp,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Value {
    Long(i64),
    Double(f64),
    Distribution(Distribution),
    Summary(Summary),
}

impl From<&opencensus::metrics::Value> for Value {
    fn from(value: &opencensus::metrics::Value) -> Self {
        match value {
            opencensus::metrics::Value::Long(v) => Value::Long(*v),
            opencensus::metrics::Value::Double(v) => Value::Double(*v),
            opencensus::metrics::Value::Distribution(v) => Value::Distribution(v.into()),
            opencensus::metrics::Value::Summary(v) => Value::Summary(v.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Distribution {
    count: i64,
    sum: f64,
    sum_of_squared_deviation: f64,
    bucket_bounds: Vec<f64>,
    buckets: Vec<Bucket>,
}

impl From<&opencensus::metrics::DistributionValue> for Distribution {
    fn from(value: &opencensus::metrics::DistributionValue) -> Self {
        Distribution {
            count: value.count,
            sum: value.sum,
            sum_of_squared_deviation: value.sum_of_squared_deviation,
            bucket_bounds: value.bucket_bounds.clone(),
            buckets: value.buckets.iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    exemplar: Option<Exemplar>,
}

impl From<&opencensus::metrics::Bucket> for Bucket {
    fn from(bucket: &opencensus::metrics::Bucket) -> Self {
        Bucket {
            count: bucket.count,
            exemplar: bucket.exemplar.as_ref().map(Into::into),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Exemplar {
    value: f64,
    #[serde(serialize_with = "as_unix_nano")]
    timestamp_unix_nano: SystemTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<(String, String)>,
}

impl From<&opencensus::metrics::Exemplar> for Exemplar {
    fn from(exemplar: &opencensus::metrics::Exemplar) -> Self {
        Exemplar {
            value: exemplar.value,
            timestamp_unix_nano: exemplar.timestamp,
            attachments: exemplar.attachments.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sum: Option<f64>,
    snapshot: Vec<ValueAtPercentile>,
}

impl From<&opencensus::metrics::SummaryValue> for Summary {
    fn from(value: &opencensus::metrics::SummaryValue) -> Self {
        Summary {
            count: value.count,
            sum: value.sum,
            snapshot: value
                .snapshot
                .iter()
                .map(|vp| ValueAtPercentile {
                    percentile: vp.percentile,
                    value: vp.value,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueAtPercentile {
    percentile: f64,
    value: f64,
}
