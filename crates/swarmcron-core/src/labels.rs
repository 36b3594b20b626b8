//! Label parser: `swarm.cronjob.*` service labels → [`JobSpec`].
//!
//! Decoding is field by field. A malformed value never aborts the build: the
//! field keeps its default, a [`LabelError`] is recorded, and the remaining
//! labels are still read.

use std::collections::BTreeMap;

use tracing::warn;

use crate::duration::parse_duration;
use crate::types::JobSpec;

/// Namespace shared by every recognised label.
pub const LABEL_PREFIX: &str = "swarm.cronjob.";

pub const ENABLE: &str = "swarm.cronjob.enable";
pub const SCHEDULE: &str = "swarm.cronjob.schedule";
pub const SKIP_RUNNING: &str = "swarm.cronjob.skip-running";
pub const REPLICAS: &str = "swarm.cronjob.replicas";
pub const REGISTRY_AUTH: &str = "swarm.cronjob.registry-auth";
pub const EVENT_ENABLE: &str = "swarm.cronjob.event.enable";
pub const EVENT_KEY: &str = "swarm.cronjob.event.key";
pub const EVENT_TIMEOUT: &str = "swarm.cronjob.event.timeout";
/// Written by the job runner while it scales a finished service back to zero.
pub const SCALEDOWN: &str = "swarm.cronjob.scaledown";

/// A label whose value could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

/// Result of reading one service's labels.
#[derive(Debug, Clone)]
pub struct LabelParse {
    pub spec: JobSpec,
    pub errors: Vec<LabelError>,
    /// `scaledown=true` is present: the service is being scaled down by
    /// swarmcron itself and must not be (re)scheduled from this state.
    pub scale_down: bool,
}

/// Build a [`JobSpec`] for `service` from its label map.
///
/// Unknown keys are ignored. Every parse failure is logged with the service
/// name and returned in [`LabelParse::errors`].
pub fn parse_labels(service: &str, labels: &BTreeMap<String, String>) -> LabelParse {
    let mut spec = JobSpec::new(service);
    let mut errors = Vec::new();
    let mut scale_down = false;

    for (key, value) in labels {
        if !key.starts_with(LABEL_PREFIX) {
            continue;
        }
        let mut fail = |reason: String| {
            warn!(service, label = %key, value = %value, %reason, "cannot parse label");
            errors.push(LabelError {
                key: key.clone(),
                value: value.clone(),
                reason,
            });
        };

        match key.as_str() {
            ENABLE => match parse_bool(value) {
                Some(b) => spec.enabled = b,
                None => fail(bool_reason()),
            },
            SCHEDULE => spec.schedule = value.clone(),
            EVENT_ENABLE => match parse_bool(value) {
                Some(b) => spec.event_enabled = b,
                None => fail(bool_reason()),
            },
            EVENT_KEY => spec.event_key = value.clone(),
            EVENT_TIMEOUT => {
                // Kept raw either way so a later reader can re-parse it.
                spec.event_timeout_raw = Some(value.clone());
                match parse_duration(value) {
                    Ok(d) => spec.event_timeout = Some(d),
                    Err(e) => fail(e.to_string()),
                }
            }
            SKIP_RUNNING => match parse_bool(value) {
                Some(b) => spec.skip_if_running = b,
                None => fail(bool_reason()),
            },
            REPLICAS => match value.trim().parse::<u64>() {
                Ok(n) if n >= 1 => spec.replicas = n,
                Ok(_) => {
                    spec.replicas = 1;
                    fail("must be greater than or equal to one".to_string());
                }
                Err(e) => {
                    spec.replicas = 1;
                    fail(e.to_string());
                }
            },
            REGISTRY_AUTH => match parse_bool(value) {
                Some(b) => spec.use_registry_auth = b,
                None => fail(bool_reason()),
            },
            SCALEDOWN => scale_down = value == "true",
            _ => {}
        }
    }

    LabelParse {
        spec,
        errors,
        scale_down,
    }
}

/// Boolean spellings accepted in label values.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn bool_reason() -> String {
    "invalid boolean".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_labels() {
        let parsed = parse_labels("svc", &BTreeMap::new());
        assert_eq!(parsed.spec, JobSpec::new("svc"));
        assert!(parsed.errors.is_empty());
        assert!(!parsed.scale_down);
    }

    #[test]
    fn reads_every_known_label() {
        let parsed = parse_labels(
            "backup",
            &labels(&[
                (ENABLE, "true"),
                (SCHEDULE, "*/5 * * * *"),
                (SKIP_RUNNING, "1"),
                (REPLICAS, "3"),
                (REGISTRY_AUTH, "T"),
                (EVENT_ENABLE, "true"),
                (EVENT_KEY, "k3y"),
                (EVENT_TIMEOUT, "90s"),
                ("com.docker.stack.namespace", "ops"),
            ]),
        );
        let spec = parsed.spec;
        assert!(parsed.errors.is_empty());
        assert!(spec.enabled);
        assert_eq!(spec.schedule, "*/5 * * * *");
        assert!(spec.skip_if_running);
        assert_eq!(spec.replicas, 3);
        assert!(spec.use_registry_auth);
        assert!(spec.event_enabled);
        assert_eq!(spec.event_key, "k3y");
        assert_eq!(spec.event_timeout, Some(Duration::from_secs(90)));
        assert_eq!(spec.event_timeout_raw.as_deref(), Some("90s"));
    }

    #[test]
    fn zero_replicas_rejected_and_reset() {
        let parsed = parse_labels("svc", &labels(&[(REPLICAS, "0")]));
        assert_eq!(parsed.spec.replicas, 1);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].key, REPLICAS);
    }

    #[test]
    fn non_numeric_replicas_rejected_and_reset() {
        for bad in ["many", "-2", "1.5", ""] {
            let parsed = parse_labels("svc", &labels(&[(REPLICAS, bad)]));
            assert_eq!(parsed.spec.replicas, 1, "value {bad:?}");
            assert_eq!(parsed.errors.len(), 1, "value {bad:?}");
        }
    }

    #[test]
    fn bad_bool_keeps_default_and_continues() {
        let parsed = parse_labels(
            "svc",
            &labels(&[(ENABLE, "yes"), (SCHEDULE, "@daily"), (SKIP_RUNNING, "true")]),
        );
        assert!(!parsed.spec.enabled);
        assert_eq!(parsed.spec.schedule, "@daily");
        assert!(parsed.spec.skip_if_running);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].value, "yes");
    }

    #[test]
    fn invalid_timeout_is_kept_raw() {
        let parsed = parse_labels("svc", &labels(&[(EVENT_TIMEOUT, "soon")]));
        assert_eq!(parsed.spec.event_timeout, None);
        assert_eq!(parsed.spec.event_timeout_raw.as_deref(), Some("soon"));
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn scaledown_only_matches_literal_true() {
        assert!(parse_labels("svc", &labels(&[(SCALEDOWN, "true")])).scale_down);
        assert!(!parse_labels("svc", &labels(&[(SCALEDOWN, "True")])).scale_down);
        assert!(!parse_labels("svc", &labels(&[(SCALEDOWN, "false")])).scale_down);
    }

    #[test]
    fn unknown_prefixed_keys_are_ignored() {
        let parsed = parse_labels("svc", &labels(&[("swarm.cronjob.colour", "blue")]));
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.spec, JobSpec::new("svc"));
    }
}
