//! Metric recording: instruments, time series, producers, and the periodic
//! export transport.
//!
//! Instruments ([`LongGauge`], [`LongCumulative`], their double, derived,
//! and distribution variants) map label-value tuples to internally
//! synchronized points, so recording is lock-free or per-point locked and
//! never blocks an export snapshot. Instruments live in a [`Registry`],
//! registries are [`MetricProducer`]s, and a [`MetricProducerManager`]
//! gathers producers for the [`PeriodicExporter`] worker to drain into a
//! [`MetricExporter`] on a fixed interval.

mod data;
mod descriptor;
mod export;
mod in_memory_exporter;
mod instruments;
mod periodic;
mod registry;

pub use data::{
    Bucket, DistributionValue, Exemplar, Metric, Point, SummaryValue, TimeSeries, Value,
    ValueAtPercentile,
};
pub use descriptor::{LabelKey, LabelValue, MetricDescriptor, MetricDescriptorType};
pub use export::{MetricError, MetricExporter, MetricResult};
pub use in_memory_exporter::InMemoryMetricExporter;
pub use instruments::{
    CumulativePointDouble, CumulativePointLong, DerivedDoubleCumulative, DerivedDoubleGauge,
    DerivedLongCumulative, DerivedLongGauge, DistributionCumulative, DistributionPoint,
    DoubleCumulative, DoubleGauge, GaugePointDouble, GaugePointLong, LongCumulative, LongGauge,
};
pub use periodic::{
    PeriodicExporter, PeriodicExporterBuilder, DEFAULT_EXPORT_INTERVAL, OC_METRIC_EXPORT_INTERVAL,
};
pub use registry::{InstrumentHandle, MetricProducer, MetricProducerManager, Registry};
