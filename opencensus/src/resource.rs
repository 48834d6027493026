//! Monitored-resource identification.
//!
//! A [`Resource`] names the environment a process reports telemetry from
//! (a GCE instance, a Kubernetes container, an EC2 instance). Platform
//! metadata fetchers live outside this crate behind the [`ResourceDetector`]
//! trait; what ships here is the environment-variable detector and the merge
//! rule: explicit `OC_RESOURCE_TYPE` / `OC_RESOURCE_LABELS` settings override
//! whatever a platform detector reports.

use std::collections::BTreeMap;
use std::env;
use std::fmt;

/// Environment variable naming the resource type.
pub const OC_RESOURCE_TYPE: &str = "OC_RESOURCE_TYPE";

/// Environment variable carrying resource labels as comma separated `k=v`
/// pairs.
pub const OC_RESOURCE_LABELS: &str = "OC_RESOURCE_LABELS";

/// Resource type reported for Google Compute Engine instances.
pub const GCE_INSTANCE: &str = "gce_instance";

/// Resource type reported for Kubernetes containers.
pub const K8S_CONTAINER: &str = "k8s_container";

/// Resource type reported for AWS EC2 instances.
pub const AWS_EC2_INSTANCE: &str = "aws_ec2_instance";

/// The environment a process reports telemetry from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resource {
    /// Well-known resource type, such as [`GCE_INSTANCE`], when one applies.
    pub resource_type: Option<String>,
    /// Identifying labels, ordered by key.
    pub labels: BTreeMap<String, String>,
}

impl Resource {
    /// Creates a resource with no type and no labels.
    pub fn empty() -> Self {
        Resource::default()
    }

    /// Whether the resource identifies anything at all.
    pub fn is_empty(&self) -> bool {
        self.resource_type.is_none() && self.labels.is_empty()
    }

    /// Merges `other` into `self`, keeping `self`'s values on conflict.
    /// Used to layer explicit overrides over detected values.
    pub fn merge(mut self, other: Resource) -> Resource {
        if self.resource_type.is_none() {
            self.resource_type = other.resource_type;
        }
        for (key, value) in other.labels {
            self.labels.entry(key).or_insert(value);
        }
        self
    }
}

/// Detects the resource for a particular platform.
///
/// Cloud metadata fetchers (GCE, GKE, EC2) implement this outside the crate;
/// detection must not panic and returns an empty resource when the platform
/// does not apply.
pub trait ResourceDetector: Send + Sync + fmt::Debug {
    /// The detected resource, empty when nothing was identified.
    fn detect(&self) -> Resource;
}

/// Reads the resource from `OC_RESOURCE_TYPE` and `OC_RESOURCE_LABELS`.
#[derive(Debug, Default)]
pub struct EnvResourceDetector {
    _private: (),
}

impl EnvResourceDetector {
    /// Creates the detector.
    pub fn new() -> Self {
        EnvResourceDetector::default()
    }
}

impl ResourceDetector for EnvResourceDetector {
    fn detect(&self) -> Resource {
        let resource_type = env::var(OC_RESOURCE_TYPE)
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());
        let labels = match env::var(OC_RESOURCE_LABELS) {
            Ok(raw) => parse_labels(&raw),
            Err(_) => BTreeMap::new(),
        };
        Resource {
            resource_type,
            labels,
        }
    }
}

/// Parses comma separated `k=v` pairs; entries without `=` or with an empty
/// key are skipped.
fn parse_labels(raw: &str) -> BTreeMap<String, String> {
    raw.split_terminator(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Resolves the process resource: environment-variable overrides layered
/// over `detector`, when one is registered. Returns `None` when neither
/// source identifies the environment.
pub fn get_resource_instance(detector: Option<&dyn ResourceDetector>) -> Option<Resource> {
    let from_env = EnvResourceDetector::new().detect();
    let resolved = match detector {
        Some(detector) => from_env.merge(detector.detect()),
        None => from_env,
    };
    if resolved.is_empty() {
        None
    } else {
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedDetector(Resource);

    impl ResourceDetector for FixedDetector {
        fn detect(&self) -> Resource {
            self.0.clone()
        }
    }

    fn gce_detector() -> FixedDetector {
        FixedDetector(Resource {
            resource_type: Some(GCE_INSTANCE.to_string()),
            labels: BTreeMap::from([
                ("project_id".to_string(), "my-project".to_string()),
                ("zone".to_string(), "us-east1-b".to_string()),
            ]),
        })
    }

    #[test]
    fn env_detector_reads_type_and_labels() {
        temp_env::with_vars(
            [
                (OC_RESOURCE_TYPE, Some(K8S_CONTAINER)),
                (
                    OC_RESOURCE_LABELS,
                    Some("k8s.io/namespace=default, k8s.io/pod=web-0 ,malformed,=nokey"),
                ),
            ],
            || {
                let resource = EnvResourceDetector::new().detect();
                assert_eq!(resource.resource_type.as_deref(), Some(K8S_CONTAINER));
                assert_eq!(
                    resource.labels,
                    BTreeMap::from([
                        ("k8s.io/namespace".to_string(), "default".to_string()),
                        ("k8s.io/pod".to_string(), "web-0".to_string()),
                    ])
                );
            },
        );
    }

    #[test]
    fn env_detector_is_empty_without_variables() {
        temp_env::with_vars(
            [
                (OC_RESOURCE_TYPE, None::<&str>),
                (OC_RESOURCE_LABELS, None),
            ],
            || {
                assert!(EnvResourceDetector::new().detect().is_empty());
            },
        );
    }

    #[test]
    fn env_overrides_win_over_detector() {
        temp_env::with_vars(
            [
                (OC_RESOURCE_TYPE, Some(AWS_EC2_INSTANCE)),
                (OC_RESOURCE_LABELS, Some("zone=eu-west-1a")),
            ],
            || {
                let resource =
                    get_resource_instance(Some(&gce_detector())).expect("resource resolves");
                assert_eq!(resource.resource_type.as_deref(), Some(AWS_EC2_INSTANCE));
                // Env value for a key the detector also reports wins.
                assert_eq!(resource.labels["zone"], "eu-west-1a");
                // Detector-only labels survive the merge.
                assert_eq!(resource.labels["project_id"], "my-project");
            },
        );
    }

    #[test]
    fn detector_alone_resolves() {
        temp_env::with_vars(
            [
                (OC_RESOURCE_TYPE, None::<&str>),
                (OC_RESOURCE_LABELS, None),
            ],
            || {
                let resource =
                    get_resource_instance(Some(&gce_detector())).expect("resource resolves");
                assert_eq!(resource.resource_type.as_deref(), Some(GCE_INSTANCE));
            },
        );
    }

    #[test]
    fn nothing_identified_yields_none() {
        temp_env::with_vars(
            [
                (OC_RESOURCE_TYPE, None::<&str>),
                (OC_RESOURCE_LABELS, None),
            ],
            || {
                assert!(get_resource_instance(None).is_none());
            },
        );
    }
}
