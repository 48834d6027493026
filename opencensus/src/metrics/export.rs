use std::fmt;

use thiserror::Error;

use crate::metrics::data::Metric;

/// Result type for metric operations.
pub type MetricResult<T> = Result<T, MetricError>;

/// Errors across the metric pipeline.
///
/// The first three are usage errors surfaced synchronously to the recording
/// caller. The rest travel through the export path, where `Transport` is the
/// one terminal class: the periodic worker stops on it and keeps running
/// through everything else.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricError {
    /// An instrument with this name is already registered.
    #[error("instrument {0:?} is already registered")]
    DuplicateInstrument(String),

    /// The label values supplied do not match the descriptor's label keys.
    #[error("expected {expected} label values, got {got}")]
    InvalidLabelArity {
        /// Number of label keys on the descriptor.
        expected: usize,
        /// Number of label values supplied.
        got: usize,
    },

    /// A supplied label value was unset.
    #[error("label values must not be unset")]
    NullLabelValue,

    /// A distribution was configured or assembled inconsistently.
    #[error("invalid distribution: {0}")]
    InvalidDistribution(String),

    /// A producer failed to enumerate its metrics.
    #[error("metric producer failed: {0}")]
    Producer(String),

    /// The exporter rejected a batch; the batch is dropped and export
    /// continues.
    #[error("metric export failed: {0}")]
    Export(String),

    /// The exporter's transport is permanently broken.
    #[error("metric transport failed: {0}")]
    Transport(String),
}

/// Receives metric snapshots from the periodic worker.
pub trait MetricExporter: Send + Sync + fmt::Debug {
    /// Ships one snapshot batch.
    ///
    /// A [`MetricError::Transport`] return stops the periodic worker; any
    /// other error is logged and the next cycle proceeds.
    fn export_metrics(&self, metrics: Vec<Metric>) -> MetricResult<()>;
}
