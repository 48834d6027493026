use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::metrics::data::Metric;
use crate::metrics::descriptor::MetricDescriptor;
use crate::metrics::export::{MetricError, MetricResult};
use crate::metrics::instruments::{
    DerivedDoubleCumulative, DerivedDoubleGauge, DerivedLongCumulative, DerivedLongGauge,
    DistributionCumulative, DoubleCumulative, DoubleGauge, LongCumulative, LongGauge,
};

/// Anything a [`Registry`] can hold and snapshot: every instrument type
/// implements this.
pub trait InstrumentHandle: Send + Sync + fmt::Debug {
    /// Identity and shape of the instrument.
    fn descriptor(&self) -> &MetricDescriptor;

    /// Snapshots the instrument's series at `now`, or `None` when it has
    /// nothing to report.
    fn get_metric(&self, now: SystemTime) -> Option<Metric>;
}

macro_rules! impl_instrument_handle {
    ($($instrument:ty),+ $(,)?) => {
        $(
            impl InstrumentHandle for $instrument {
                fn descriptor(&self) -> &MetricDescriptor {
                    self.descriptor()
                }

                fn get_metric(&self, now: SystemTime) -> Option<Metric> {
                    self.get_metric(now)
                }
            }
        )+
    };
}

impl_instrument_handle!(
    LongGauge,
    DoubleGauge,
    LongCumulative,
    DoubleCumulative,
    DerivedLongGauge,
    DerivedDoubleGauge,
    DerivedLongCumulative,
    DerivedDoubleCumulative,
    DistributionCumulative,
);

/// A named collection of instruments, snapshotted as one producer.
#[derive(Debug, Default)]
pub struct Registry {
    instruments: RwLock<Vec<Arc<dyn InstrumentHandle>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Adds an instrument. Registering a second instrument under an existing
    /// name is a usage error.
    pub fn add(&self, instrument: Arc<dyn InstrumentHandle>) -> MetricResult<()> {
        let mut instruments = self.instruments.write().unwrap_or_else(|e| e.into_inner());
        let name = instrument.descriptor().name();
        if instruments.iter().any(|i| i.descriptor().name() == name) {
            return Err(MetricError::DuplicateInstrument(name.to_string()));
        }
        instruments.push(instrument);
        Ok(())
    }

    /// Removes an instrument by name. Removing an absent name is a no-op.
    pub fn remove(&self, name: &str) {
        self.instruments
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|i| i.descriptor().name() != name);
    }
}

/// A source of metric snapshots enumerated by the periodic worker.
pub trait MetricProducer: Send + Sync + fmt::Debug {
    /// The current snapshot of every metric this producer knows about.
    fn get_metrics(&self) -> MetricResult<Vec<Metric>>;
}

impl MetricProducer for Registry {
    fn get_metrics(&self) -> MetricResult<Vec<Metric>> {
        let instruments = self
            .instruments
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let now = SystemTime::now();
        Ok(instruments
            .iter()
            .filter_map(|instrument| instrument.get_metric(now))
            .collect())
    }
}

/// A thread-safe set of producers. Export cycles iterate a consistent copy,
/// so adds and removes during a cycle take effect on the next one.
#[derive(Debug, Default)]
pub struct MetricProducerManager {
    producers: RwLock<Vec<Arc<dyn MetricProducer>>>,
}

impl MetricProducerManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        MetricProducerManager::default()
    }

    /// Adds a producer. Adding the same producer twice keeps one entry.
    pub fn add(&self, producer: Arc<dyn MetricProducer>) {
        let mut producers = self.producers.write().unwrap_or_else(|e| e.into_inner());
        if !producers.iter().any(|p| Arc::ptr_eq(p, &producer)) {
            producers.push(producer);
        }
    }

    /// Removes a producer by identity.
    pub fn remove(&self, producer: &Arc<dyn MetricProducer>) {
        self.producers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|p| !Arc::ptr_eq(p, producer));
    }

    /// A consistent copy of the current producer set.
    pub fn get_all(&self) -> Vec<Arc<dyn MetricProducer>> {
        self.producers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
