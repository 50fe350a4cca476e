use super::InstanceSpec;
use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGER: &str = "challenge-orchestrator";
pub const COMPONENT: &str = "app.kubernetes.io/component";
pub const CHALLENGE_ID: &str = "orchestrator.ctf/challenge-id";
pub const CANDIDATE_ID: &str = "orchestrator.ctf/candidate-id";
pub const INSTANCE: &str = "orchestrator.ctf/instance";

pub const EXPIRES_AT_ANNOTATION: &str = "orchestrator.ctf/expires-at";
pub const REPLICAS_ANNOTATION: &str = "orchestrator.ctf/replicas";
pub const USERNAME_ANNOTATION: &str = "orchestrator.ctf/username";
/// Unsanitized ids of the pair, label values may be mangled
pub const CANDIDATE_ID_ANNOTATION: &str = "orchestrator.ctf/candidate";
pub const CHALLENGE_ID_ANNOTATION: &str = "orchestrator.ctf/challenge";

const MAX_LABEL_LENGTH: usize = 63;

/// Sanitize a string to be a valid Kubernetes label value.
///
/// Label values are at most 63 characters of `[A-Za-z0-9-_.]`, starting and ending
/// with an alphanumeric character.
pub fn sanitize_label_value(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = sanitized
        .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
        .trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

    if trimmed.len() > MAX_LABEL_LENGTH {
        trimmed[..MAX_LABEL_LENGTH]
            .trim_end_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_string()
    } else {
        trimmed.to_string()
    }
}

/// Label selector matching every namespace this orchestrator manages
pub fn managed_selector() -> String {
    format!("{MANAGED_BY}={MANAGER}")
}

/// Label selector matching the challenge pods of one instance
pub fn pod_selector(namespace: &str) -> String {
    format!("{MANAGED_BY}={MANAGER},{INSTANCE}={namespace}")
}

/// Generate standard labels for all resources
pub fn common_labels(spec: &InstanceSpec) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY.to_string(), MANAGER.to_string());
    labels.insert(COMPONENT.to_string(), "challenge".to_string());
    labels.insert(INSTANCE.to_string(), spec.namespace.clone());
    labels.insert(
        CHALLENGE_ID.to_string(),
        sanitize_label_value(&spec.challenge_id),
    );
    labels.insert(
        CANDIDATE_ID.to_string(),
        sanitize_label_value(&spec.candidate_id),
    );
    labels
}

/// Generate labels for pods
pub fn pod_labels(spec: &InstanceSpec) -> BTreeMap<String, String> {
    let mut labels = common_labels(spec);
    labels.extend(pod_selector_labels(spec));
    labels
}

/// Generate selector labels for pods
pub fn pod_selector_labels(spec: &InstanceSpec) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY.to_string(), MANAGER.to_string());
    labels.insert(COMPONENT.to_string(), "challenge-pod".to_string());
    labels.insert(INSTANCE.to_string(), spec.namespace.clone());
    labels
}
