/// The key part of a label, with an optional human readable description.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LabelKey {
    key: String,
    description: String,
}

impl LabelKey {
    /// Create a label key.
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        LabelKey {
            key: key.into(),
            description: description.into(),
        }
    }

    /// The key string.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The description.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl From<&str> for LabelKey {
    fn from(key: &str) -> Self {
        LabelKey::new(key, "")
    }
}

/// The value part of a label. A label value may be explicitly unset, which is
/// distinct from an empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct LabelValue(Option<String>);

impl LabelValue {
    /// A present value.
    pub fn new(value: impl Into<String>) -> Self {
        LabelValue(Some(value.into()))
    }

    /// The unset value.
    pub fn unset() -> Self {
        LabelValue(None)
    }

    /// Whether a value is present.
    pub fn has_value(&self) -> bool {
        self.0.is_some()
    }

    /// The value, when present.
    pub fn value(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        LabelValue::new(value)
    }
}

/// The kind of values a metric's points carry, and whether they are
/// resettable (gauge) or monotone (cumulative).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricDescriptorType {
    /// Instantaneous int64 measurement.
    GaugeInt64,
    /// Instantaneous double measurement.
    GaugeDouble,
    /// Instantaneous distribution measurement.
    GaugeDistribution,
    /// Monotonically non-decreasing int64.
    CumulativeInt64,
    /// Monotonically non-decreasing double.
    CumulativeDouble,
    /// Monotonically growing distribution.
    CumulativeDistribution,
    /// Summary of observed values (count, sum, percentiles).
    Summary,
}

impl MetricDescriptorType {
    /// Whether points of this type carry a meaningful start timestamp.
    pub fn is_cumulative(self) -> bool {
        matches!(
            self,
            MetricDescriptorType::CumulativeInt64
                | MetricDescriptorType::CumulativeDouble
                | MetricDescriptorType::CumulativeDistribution
        )
    }
}

/// Identity and shape of a metric: name, unit, value type, and the ordered
/// label keys every time series of the metric must provide values for.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricDescriptor {
    name: String,
    description: String,
    unit: String,
    descriptor_type: MetricDescriptorType,
    label_keys: Vec<LabelKey>,
}

impl MetricDescriptor {
    /// Create a descriptor.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        unit: impl Into<String>,
        descriptor_type: MetricDescriptorType,
        label_keys: Vec<LabelKey>,
    ) -> Self {
        MetricDescriptor {
            name: name.into(),
            description: description.into(),
            unit: unit.into(),
            descriptor_type,
            label_keys,
        }
    }

    /// The metric name, unique within a registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The unit, in UCUM form (for example `"ms"` or `"1"`).
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// The value type.
    pub fn descriptor_type(&self) -> MetricDescriptorType {
        self.descriptor_type
    }

    /// The ordered label keys.
    pub fn label_keys(&self) -> &[LabelKey] {
        &self.label_keys
    }
}
