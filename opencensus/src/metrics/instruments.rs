use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use crate::metrics::data::{Bucket, DistributionValue, Metric, Point, TimeSeries, Value};
use crate::metrics::descriptor::{LabelKey, LabelValue, MetricDescriptor, MetricDescriptorType};
use crate::metrics::export::{MetricError, MetricResult};

/// Insertion-ordered map from label-value tuples to points.
///
/// Reads take only the read lock; the points themselves are internally
/// synchronized so recording never blocks enumeration for export.
struct SeriesMap<P> {
    arity: usize,
    series: RwLock<Vec<(Vec<LabelValue>, Arc<P>)>>,
}

impl<P> SeriesMap<P> {
    fn new(arity: usize) -> Self {
        SeriesMap {
            arity,
            series: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(Vec<LabelValue>, Arc<P>)>> {
        self.series.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<(Vec<LabelValue>, Arc<P>)>> {
        self.series.write().unwrap_or_else(|e| e.into_inner())
    }

    fn validate(&self, label_values: &[LabelValue]) -> MetricResult<()> {
        if label_values.len() != self.arity {
            return Err(MetricError::InvalidLabelArity {
                expected: self.arity,
                got: label_values.len(),
            });
        }
        if label_values.iter().any(|v| !v.has_value()) {
            return Err(MetricError::NullLabelValue);
        }
        Ok(())
    }

    fn get_or_insert_with(
        &self,
        label_values: &[LabelValue],
        make: impl FnOnce() -> P,
    ) -> Arc<P> {
        if let Some((_, point)) = self.read().iter().find(|(lv, _)| lv == label_values) {
            return point.clone();
        }
        let mut series = self.write();
        // Double-check: another writer may have inserted meanwhile.
        if let Some((_, point)) = series.iter().find(|(lv, _)| lv == label_values) {
            return point.clone();
        }
        let point = Arc::new(make());
        series.push((label_values.to_vec(), point.clone()));
        point
    }

    fn get_or_create(
        &self,
        label_values: &[LabelValue],
        make: impl FnOnce() -> P,
    ) -> MetricResult<Arc<P>> {
        self.validate(label_values)?;
        Ok(self.get_or_insert_with(label_values, make))
    }

    /// The series for the all-unset label tuple, for label-less recording.
    fn default_series(&self, make: impl FnOnce() -> P) -> Arc<P> {
        let label_values = vec![LabelValue::unset(); self.arity];
        self.get_or_insert_with(&label_values, make)
    }

    fn remove(&self, label_values: &[LabelValue]) {
        self.write().retain(|(lv, _)| lv != label_values);
    }

    fn clear(&self) {
        self.write().clear();
    }

    fn snapshot(&self) -> Vec<(Vec<LabelValue>, Arc<P>)> {
        self.read().clone()
    }
}

impl<P> fmt::Debug for SeriesMap<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeriesMap")
            .field("arity", &self.arity)
            .field("len", &self.read().len())
            .finish()
    }
}

fn f64_add(bits: &AtomicU64, delta: f64) {
    let mut current = bits.load(Ordering::Relaxed);
    loop {
        let next = (f64::from_bits(current) + delta).to_bits();
        match bits.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return,
            Err(observed) => current = observed,
        }
    }
}

fn f64_max(bits: &AtomicU64, value: f64) -> f64 {
    let mut current = bits.load(Ordering::Relaxed);
    loop {
        let current_value = f64::from_bits(current);
        if value <= current_value {
            return current_value;
        }
        match bits.compare_exchange_weak(
            current,
            value.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return value,
            Err(observed) => current = observed,
        }
    }
}

/// One mutable int64 gauge value.
#[derive(Debug, Default)]
pub struct GaugePointLong {
    value: AtomicI64,
}

impl GaugePointLong {
    /// Replaces the value.
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Adds a (possibly negative) delta.
    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// The current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// One mutable double gauge value.
#[derive(Debug, Default)]
pub struct GaugePointDouble {
    bits: AtomicU64,
}

impl GaugePointDouble {
    /// Replaces the value.
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Adds a (possibly negative) delta.
    pub fn add(&self, delta: f64) {
        f64_add(&self.bits, delta);
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// One monotone int64 counter value.
#[derive(Debug)]
pub struct CumulativePointLong {
    value: AtomicI64,
    start: SystemTime,
}

impl Default for CumulativePointLong {
    fn default() -> Self {
        CumulativePointLong {
            value: AtomicI64::new(0),
            start: SystemTime::now(),
        }
    }
}

impl CumulativePointLong {
    /// Adds a non-negative delta; negative deltas are dropped.
    pub fn add(&self, delta: i64) {
        if delta < 0 {
            return;
        }
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// The current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// One monotone double counter value.
#[derive(Debug)]
pub struct CumulativePointDouble {
    bits: AtomicU64,
    start: SystemTime,
}

impl Default for CumulativePointDouble {
    fn default() -> Self {
        CumulativePointDouble {
            bits: AtomicU64::new(0f64.to_bits()),
            start: SystemTime::now(),
        }
    }
}

impl CumulativePointDouble {
    /// Adds a non-negative delta; negative or non-finite deltas are dropped.
    pub fn add(&self, delta: f64) {
        if !delta.is_finite() || delta < 0.0 {
            return;
        }
        f64_add(&self.bits, delta);
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

macro_rules! series_api {
    ($point:ty) => {
        /// Identity and shape of this instrument.
        pub fn descriptor(&self) -> &MetricDescriptor {
            &self.descriptor
        }

        /// The point for `label_values`, created on first use.
        ///
        /// Fails synchronously on wrong arity or an unset label value.
        pub fn get_or_create_time_series(
            &self,
            label_values: &[LabelValue],
        ) -> MetricResult<Arc<$point>> {
            self.series.get_or_create(label_values, <$point>::default)
        }

        /// The point for the all-unset label tuple, for label-less use.
        pub fn get_default_time_series(&self) -> Arc<$point> {
            self.series.default_series(<$point>::default)
        }

        /// Removes one series. Removing an absent series is a no-op.
        pub fn remove_time_series(&self, label_values: &[LabelValue]) {
            self.series.remove(label_values);
        }

        /// Removes every series.
        pub fn clear(&self) {
            self.series.clear();
        }
    };
}

/// An int64 gauge: a value that can go up and down, read at export time.
#[derive(Debug)]
pub struct LongGauge {
    descriptor: MetricDescriptor,
    series: SeriesMap<GaugePointLong>,
}

impl LongGauge {
    /// Creates the gauge.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        LongGauge {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::GaugeInt64,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    series_api!(GaugePointLong);

    /// Snapshots every series into a [`Metric`], or `None` without series.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            Some((None, Value::Long(point.get())))
        })
    }
}

/// A double gauge.
#[derive(Debug)]
pub struct DoubleGauge {
    descriptor: MetricDescriptor,
    series: SeriesMap<GaugePointDouble>,
}

impl DoubleGauge {
    /// Creates the gauge.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        DoubleGauge {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::GaugeDouble,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    series_api!(GaugePointDouble);

    /// Snapshots every series into a [`Metric`], or `None` without series.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            Some((None, Value::Double(point.get())))
        })
    }
}

/// An int64 cumulative counter: monotonically non-decreasing.
#[derive(Debug)]
pub struct LongCumulative {
    descriptor: MetricDescriptor,
    series: SeriesMap<CumulativePointLong>,
}

impl LongCumulative {
    /// Creates the counter.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        LongCumulative {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::CumulativeInt64,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    series_api!(CumulativePointLong);

    /// Snapshots every series into a [`Metric`], or `None` without series.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            Some((Some(point.start), Value::Long(point.get())))
        })
    }
}

/// A double cumulative counter.
#[derive(Debug)]
pub struct DoubleCumulative {
    descriptor: MetricDescriptor,
    series: SeriesMap<CumulativePointDouble>,
}

impl DoubleCumulative {
    /// Creates the counter.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        DoubleCumulative {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::CumulativeDouble,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    series_api!(CumulativePointDouble);

    /// Snapshots every series into a [`Metric`], or `None` without series.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            Some((Some(point.start), Value::Double(point.get())))
        })
    }
}

fn snapshot_metric_at<P>(
    descriptor: &MetricDescriptor,
    series: &SeriesMap<P>,
    now: SystemTime,
    read: impl Fn(&P) -> Option<(Option<SystemTime>, Value)>,
) -> Option<Metric> {
    let snapshot = series.snapshot();
    if snapshot.is_empty() {
        return None;
    }
    let mut timeseries = Vec::with_capacity(snapshot.len());
    for (label_values, point) in snapshot {
        let (start_timestamp, value) = read(&point)?;
        timeseries.push(TimeSeries {
            start_timestamp,
            label_values,
            points: vec![Point {
                value,
                timestamp: now,
            }],
        });
    }
    Some(Metric {
        descriptor: descriptor.clone(),
        timeseries,
    })
}

type LongFn = Box<dyn Fn() -> i64 + Send + Sync>;
type DoubleFn = Box<dyn Fn() -> f64 + Send + Sync>;

struct DerivedLongPoint {
    callback: LongFn,
}

struct DerivedDoublePoint {
    callback: DoubleFn,
}

struct DerivedLongCumulativePoint {
    callback: LongFn,
    last: AtomicI64,
    start: SystemTime,
}

struct DerivedDoubleCumulativePoint {
    callback: DoubleFn,
    last: AtomicU64,
    start: SystemTime,
}

fn guarded<T>(metric_name: &str, callback: impl Fn() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(value) => Some(value),
        Err(_) => {
            oc_warn!(
                name: "DerivedInstrument.CallbackPanicked",
                metric = metric_name.to_owned()
            );
            None
        }
    }
}

/// An int64 gauge whose value comes from a callback invoked at read time.
///
/// Callbacks must be safe to call concurrently and must not touch the
/// registry. A panicking callback aborts the snapshot of this metric only.
pub struct DerivedLongGauge {
    descriptor: MetricDescriptor,
    series: SeriesMap<DerivedLongPoint>,
}

impl DerivedLongGauge {
    /// Creates the gauge.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        DerivedLongGauge {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::GaugeInt64,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    /// Identity and shape of this instrument.
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    /// Registers a callback for `label_values`. On a repeat call for the same
    /// tuple the existing callback stays in place.
    pub fn create_time_series(
        &self,
        label_values: &[LabelValue],
        callback: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> MetricResult<()> {
        self.series.validate(label_values)?;
        self.series.get_or_insert_with(label_values, || DerivedLongPoint {
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Registers a callback for the all-unset label tuple.
    pub fn create_default_time_series(
        &self,
        callback: impl Fn() -> i64 + Send + Sync + 'static,
    ) {
        self.series.default_series(|| DerivedLongPoint {
            callback: Box::new(callback),
        });
    }

    /// Removes one series.
    pub fn remove_time_series(&self, label_values: &[LabelValue]) {
        self.series.remove(label_values);
    }

    /// Removes every series.
    pub fn clear(&self) {
        self.series.clear();
    }

    /// Snapshots every series, invoking the callbacks now.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            guarded(self.descriptor.name(), &point.callback).map(|v| (None, Value::Long(v)))
        })
    }
}

impl fmt::Debug for DerivedLongGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedLongGauge")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// A double gauge whose value comes from a callback invoked at read time.
pub struct DerivedDoubleGauge {
    descriptor: MetricDescriptor,
    series: SeriesMap<DerivedDoublePoint>,
}

impl DerivedDoubleGauge {
    /// Creates the gauge.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        DerivedDoubleGauge {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::GaugeDouble,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    /// Identity and shape of this instrument.
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    /// Registers a callback for `label_values`.
    pub fn create_time_series(
        &self,
        label_values: &[LabelValue],
        callback: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> MetricResult<()> {
        self.series.validate(label_values)?;
        self.series
            .get_or_insert_with(label_values, || DerivedDoublePoint {
                callback: Box::new(callback),
            });
        Ok(())
    }

    /// Registers a callback for the all-unset label tuple.
    pub fn create_default_time_series(
        &self,
        callback: impl Fn() -> f64 + Send + Sync + 'static,
    ) {
        self.series.default_series(|| DerivedDoublePoint {
            callback: Box::new(callback),
        });
    }

    /// Removes one series.
    pub fn remove_time_series(&self, label_values: &[LabelValue]) {
        self.series.remove(label_values);
    }

    /// Removes every series.
    pub fn clear(&self) {
        self.series.clear();
    }

    /// Snapshots every series, invoking the callbacks now.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            guarded(self.descriptor.name(), &point.callback).map(|v| (None, Value::Double(v)))
        })
    }
}

impl fmt::Debug for DerivedDoubleGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedDoubleGauge")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// An int64 cumulative whose value comes from a callback, clamped so a
/// decreasing callback never reports a decrease downstream.
pub struct DerivedLongCumulative {
    descriptor: MetricDescriptor,
    series: SeriesMap<DerivedLongCumulativePoint>,
}

impl DerivedLongCumulative {
    /// Creates the counter.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        DerivedLongCumulative {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::CumulativeInt64,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    /// Identity and shape of this instrument.
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    /// Registers a callback for `label_values`.
    pub fn create_time_series(
        &self,
        label_values: &[LabelValue],
        callback: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> MetricResult<()> {
        self.series.validate(label_values)?;
        self.series
            .get_or_insert_with(label_values, || DerivedLongCumulativePoint {
                callback: Box::new(callback),
                last: AtomicI64::new(i64::MIN),
                start: SystemTime::now(),
            });
        Ok(())
    }

    /// Registers a callback for the all-unset label tuple.
    pub fn create_default_time_series(
        &self,
        callback: impl Fn() -> i64 + Send + Sync + 'static,
    ) {
        self.series.default_series(|| DerivedLongCumulativePoint {
            callback: Box::new(callback),
            last: AtomicI64::new(i64::MIN),
            start: SystemTime::now(),
        });
    }

    /// Removes one series, discarding its clamp state.
    pub fn remove_time_series(&self, label_values: &[LabelValue]) {
        self.series.remove(label_values);
    }

    /// Removes every series. This is the only way the clamp resets.
    pub fn clear(&self) {
        self.series.clear();
    }

    /// Snapshots every series, invoking the callbacks now.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            let value = guarded(self.descriptor.name(), &point.callback)?;
            let previous = point.last.fetch_max(value, Ordering::Relaxed);
            Some((Some(point.start), Value::Long(previous.max(value))))
        })
    }
}

impl fmt::Debug for DerivedLongCumulative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedLongCumulative")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// A double cumulative whose value comes from a callback, monotone-clamped
/// like [`DerivedLongCumulative`].
pub struct DerivedDoubleCumulative {
    descriptor: MetricDescriptor,
    series: SeriesMap<DerivedDoubleCumulativePoint>,
}

impl DerivedDoubleCumulative {
    /// Creates the counter.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        let arity = label_keys.len();
        DerivedDoubleCumulative {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::CumulativeDouble,
                label_keys,
            ),
            series: SeriesMap::new(arity),
        }
    }

    /// Identity and shape of this instrument.
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    /// Registers a callback for `label_values`.
    pub fn create_time_series(
        &self,
        label_values: &[LabelValue],
        callback: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> MetricResult<()> {
        self.series.validate(label_values)?;
        self.series
            .get_or_insert_with(label_values, || DerivedDoubleCumulativePoint {
                callback: Box::new(callback),
                last: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
                start: SystemTime::now(),
            });
        Ok(())
    }

    /// Registers a callback for the all-unset label tuple.
    pub fn create_default_time_series(
        &self,
        callback: impl Fn() -> f64 + Send + Sync + 'static,
    ) {
        self.series.default_series(|| DerivedDoubleCumulativePoint {
            callback: Box::new(callback),
            last: AtomicU64::new(f64::NEG_INFINITY.to_bits()),
            start: SystemTime::now(),
        });
    }

    /// Removes one series, discarding its clamp state.
    pub fn remove_time_series(&self, label_values: &[LabelValue]) {
        self.series.remove(label_values);
    }

    /// Removes every series. This is the only way the clamp resets.
    pub fn clear(&self) {
        self.series.clear();
    }

    /// Snapshots every series, invoking the callbacks now.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            let value = guarded(self.descriptor.name(), &point.callback)?;
            let clamped = f64_max(&point.last, value);
            Some((Some(point.start), Value::Double(clamped)))
        })
    }
}

impl fmt::Debug for DerivedDoubleCumulative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedDoubleCumulative")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

#[derive(Debug, Default)]
struct DistributionData {
    count: i64,
    sum: f64,
    mean: f64,
    sum_of_squared_deviation: f64,
    bucket_counts: Vec<i64>,
}

/// One distribution series: bounded buckets plus running moments.
#[derive(Debug)]
pub struct DistributionPoint {
    bounds: Arc<Vec<f64>>,
    start: SystemTime,
    data: Mutex<DistributionData>,
}

impl DistributionPoint {
    fn new(bounds: Arc<Vec<f64>>) -> Self {
        let bucket_counts = vec![0; bounds.len() + 1];
        DistributionPoint {
            bounds,
            start: SystemTime::now(),
            data: Mutex::new(DistributionData {
                bucket_counts,
                ..DistributionData::default()
            }),
        }
    }

    /// Records one observed value.
    pub fn record(&self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let bucket = self
            .bounds
            .iter()
            .position(|bound| value < *bound)
            .unwrap_or(self.bounds.len());
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.count += 1;
        data.sum += value;
        // Welford's online update for the squared deviation.
        let delta = value - data.mean;
        data.mean += delta / data.count as f64;
        data.sum_of_squared_deviation += delta * (value - data.mean);
        data.bucket_counts[bucket] += 1;
    }

    fn value(&self) -> Option<Value> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        let buckets = data
            .bucket_counts
            .iter()
            .map(|&count| Bucket {
                count,
                exemplar: None,
            })
            .collect();
        DistributionValue::new(
            data.count,
            data.sum,
            data.sum_of_squared_deviation,
            self.bounds.as_ref().clone(),
            buckets,
        )
        .ok()
        .map(Value::Distribution)
    }
}

/// A cumulative distribution over explicit bucket bounds.
#[derive(Debug)]
pub struct DistributionCumulative {
    descriptor: MetricDescriptor,
    bounds: Arc<Vec<f64>>,
    series: SeriesMap<DistributionPoint>,
}

impl DistributionCumulative {
    /// Creates the instrument. Bounds must be finite and strictly
    /// increasing.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        label_keys: Vec<LabelKey>,
        bounds: Vec<f64>,
    ) -> MetricResult<Self> {
        if bounds.iter().any(|b| !b.is_finite())
            || bounds.windows(2).any(|pair| pair[0] >= pair[1])
        {
            return Err(MetricError::InvalidDistribution(
                "bucket bounds must be finite and strictly increasing".to_string(),
            ));
        }
        let arity = label_keys.len();
        Ok(DistributionCumulative {
            descriptor: MetricDescriptor::new(
                name,
                description,
                unit,
                MetricDescriptorType::CumulativeDistribution,
                label_keys,
            ),
            bounds: Arc::new(bounds),
            series: SeriesMap::new(arity),
        })
    }

    /// Identity and shape of this instrument.
    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    /// The series for `label_values`, created on first use.
    pub fn get_or_create_time_series(
        &self,
        label_values: &[LabelValue],
    ) -> MetricResult<Arc<DistributionPoint>> {
        self.series
            .get_or_create(label_values, || DistributionPoint::new(self.bounds.clone()))
    }

    /// The series for the all-unset label tuple.
    pub fn get_default_time_series(&self) -> Arc<DistributionPoint> {
        self.series
            .default_series(|| DistributionPoint::new(self.bounds.clone()))
    }

    /// Removes one series.
    pub fn remove_time_series(&self, label_values: &[LabelValue]) {
        self.series.remove(label_values);
    }

    /// Removes every series.
    pub fn clear(&self) {
        self.series.clear();
    }

    /// Snapshots every series into a [`Metric`], or `None` without series.
    pub fn get_metric(&self, now: SystemTime) -> Option<Metric> {
        snapshot_metric_at(&self.descriptor, &self.series, now, |point| {
            point.value().map(|value| (Some(point.start), value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(metric: &Metric) -> Vec<Value> {
        metric
            .timeseries
            .iter()
            .map(|ts| ts.points[0].value.clone())
            .collect()
    }

    #[test]
    fn gauge_snapshot_one_series_per_label_tuple() {
        let gauge = LongGauge::new("g", "d", "1", vec!["k1".into(), "k2".into()]);
        let now = SystemTime::now();
        gauge
            .get_or_create_time_series(&["a".into(), "b".into()])
            .unwrap()
            .set(5);
        gauge
            .get_or_create_time_series(&["c".into(), "d".into()])
            .unwrap()
            .set(7);

        let metric = gauge.get_metric(now).unwrap();
        assert_eq!(metric.timeseries.len(), 2);
        assert_eq!(values(&metric), vec![Value::Long(5), Value::Long(7)]);
        for ts in &metric.timeseries {
            assert_eq!(ts.points.len(), 1);
            assert_eq!(ts.points[0].timestamp, now);
            assert_eq!(ts.start_timestamp, None);
        }
    }

    #[test]
    fn gauge_without_series_returns_none() {
        let gauge = LongGauge::new("g", "d", "1", vec![]);
        assert!(gauge.get_metric(SystemTime::now()).is_none());
    }

    #[test]
    fn label_arity_is_validated() {
        let gauge = LongGauge::new("g", "d", "1", vec!["k1".into(), "k2".into()]);
        assert!(matches!(
            gauge.get_or_create_time_series(&["a".into()]),
            Err(MetricError::InvalidLabelArity {
                expected: 2,
                got: 1
            })
        ));
        assert!(matches!(
            gauge.get_or_create_time_series(&["a".into(), "b".into(), "c".into()]),
            Err(MetricError::InvalidLabelArity {
                expected: 2,
                got: 3
            })
        ));
        assert!(matches!(
            gauge.get_or_create_time_series(&["a".into(), LabelValue::unset()]),
            Err(MetricError::NullLabelValue)
        ));
    }

    #[test]
    fn series_are_reused_and_enumerated_in_insertion_order() {
        let gauge = LongGauge::new("g", "d", "1", vec!["k".into()]);
        let first = gauge.get_or_create_time_series(&["b".into()]).unwrap();
        gauge.get_or_create_time_series(&["a".into()]).unwrap().set(2);
        let again = gauge.get_or_create_time_series(&["b".into()]).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        first.set(1);

        let metric = gauge.get_metric(SystemTime::now()).unwrap();
        assert_eq!(values(&metric), vec![Value::Long(1), Value::Long(2)]);
    }

    #[test]
    fn remove_and_clear_are_idempotent() {
        let gauge = LongGauge::new("g", "d", "1", vec!["k".into()]);
        gauge.get_or_create_time_series(&["a".into()]).unwrap();
        gauge.remove_time_series(&["a".into()]);
        gauge.remove_time_series(&["a".into()]);
        assert!(gauge.get_metric(SystemTime::now()).is_none());
        gauge.clear();
    }

    #[test]
    fn double_gauge_add_and_set() {
        let gauge = DoubleGauge::new("g", "d", "ms", vec![]);
        let point = gauge.get_default_time_series();
        point.set(1.5);
        point.add(2.0);
        point.add(-0.5);
        let metric = gauge.get_metric(SystemTime::now()).unwrap();
        assert_eq!(values(&metric), vec![Value::Double(3.0)]);
    }

    #[test]
    fn cumulative_drops_negative_deltas() {
        let counter = LongCumulative::new("c", "d", "1", vec![]);
        let point = counter.get_default_time_series();
        let mut seen = Vec::new();
        for delta in [3, -1, 2] {
            point.add(delta);
            seen.push(point.get());
        }
        assert_eq!(seen, vec![3, 3, 5]);

        let metric = counter.get_metric(SystemTime::now()).unwrap();
        assert_eq!(values(&metric), vec![Value::Long(5)]);
        assert!(metric.timeseries[0].start_timestamp.is_some());
    }

    #[test]
    fn double_cumulative_drops_negative_and_nan() {
        let counter = DoubleCumulative::new("c", "d", "1", vec![]);
        let point = counter.get_default_time_series();
        point.add(1.5);
        point.add(-2.0);
        point.add(f64::NAN);
        point.add(0.5);
        assert_eq!(point.get(), 2.0);
    }

    #[test]
    fn derived_gauge_reads_callback_at_snapshot() {
        let gauge = DerivedLongGauge::new("g", "d", "1", vec!["k".into()]);
        let source = Arc::new(AtomicI64::new(10));
        let reader = source.clone();
        gauge
            .create_time_series(&["a".into()], move || reader.load(Ordering::Relaxed))
            .unwrap();

        let metric = gauge.get_metric(SystemTime::now()).unwrap();
        assert_eq!(values(&metric), vec![Value::Long(10)]);
        source.store(4, Ordering::Relaxed);
        let metric = gauge.get_metric(SystemTime::now()).unwrap();
        // Gauges may go down.
        assert_eq!(values(&metric), vec![Value::Long(4)]);
    }

    #[test]
    fn derived_cumulative_never_reports_a_decrease() {
        let counter = DerivedLongCumulative::new("c", "d", "1", vec![]);
        let source = Arc::new(AtomicI64::new(10));
        let reader = source.clone();
        counter.create_default_time_series(move || reader.load(Ordering::Relaxed));

        let read = |expected: i64| {
            let metric = counter.get_metric(SystemTime::now()).unwrap();
            assert_eq!(values(&metric), vec![Value::Long(expected)]);
        };
        read(10);
        source.store(4, Ordering::Relaxed);
        read(10);
        source.store(12, Ordering::Relaxed);
        read(12);
    }

    #[test]
    fn derived_callback_panic_aborts_the_metric_snapshot() {
        let gauge = DerivedLongGauge::new("g", "d", "1", vec![]);
        gauge.create_default_time_series(|| panic!("broken callback"));
        assert!(gauge.get_metric(SystemTime::now()).is_none());
    }

    #[test]
    fn distribution_bounds_are_validated() {
        assert!(DistributionCumulative::new("d", "d", "ms", vec![], vec![1.0, 1.0]).is_err());
        assert!(DistributionCumulative::new("d", "d", "ms", vec![], vec![5.0, 1.0]).is_err());
        assert!(DistributionCumulative::new("d", "d", "ms", vec![], vec![1.0, f64::NAN]).is_err());
    }

    #[test]
    fn distribution_records_into_buckets() {
        let dist = DistributionCumulative::new("d", "d", "ms", vec![], vec![1.0, 5.0]).unwrap();
        let point = dist.get_default_time_series();
        for value in [0.5, 2.0, 3.0, 10.0] {
            point.record(value);
        }

        let metric = dist.get_metric(SystemTime::now()).unwrap();
        let Value::Distribution(value) = &metric.timeseries[0].points[0].value else {
            panic!("expected a distribution value");
        };
        assert_eq!(value.count, 4);
        assert_eq!(value.sum, 15.5);
        assert_eq!(value.bucket_bounds, vec![1.0, 5.0]);
        let counts: Vec<i64> = value.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 2, 1]);
        assert_eq!(value.buckets.len(), value.bucket_bounds.len() + 1);
        assert!(value.sum_of_squared_deviation > 0.0);
    }
}
