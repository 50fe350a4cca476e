use super::{labels, InstanceSpec};
use crate::date_time::DateTime;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub fn build_namespace(spec: &InstanceSpec) -> Namespace {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        labels::EXPIRES_AT_ANNOTATION.to_string(),
        spec.expires_at.to_rfc3339(),
    );
    annotations.insert(
        labels::USERNAME_ANNOTATION.to_string(),
        spec.username.clone(),
    );
    annotations.insert(
        labels::CANDIDATE_ID_ANNOTATION.to_string(),
        spec.candidate_id.clone(),
    );
    annotations.insert(
        labels::CHALLENGE_ID_ANNOTATION.to_string(),
        spec.challenge_id.clone(),
    );

    Namespace {
        metadata: ObjectMeta {
            name: Some(spec.namespace.clone()),
            labels: Some(labels::common_labels(spec)),
            annotations: Some(annotations),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Expiry recorded on a namespace, if any
pub fn expires_at(namespace: &Namespace) -> Option<DateTime> {
    namespace
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::EXPIRES_AT_ANNOTATION))
        .and_then(|value| DateTime::parse(value))
}

/// (candidate, challenge) ids of the instance living in a namespace
pub fn instance_pair(namespace: &Namespace) -> Option<(String, String)> {
    let annotations = namespace.metadata.annotations.as_ref()?;
    let candidate = annotations.get(labels::CANDIDATE_ID_ANNOTATION)?;
    let challenge = annotations.get(labels::CHALLENGE_ID_ANNOTATION)?;
    Some((candidate.clone(), challenge.clone()))
}

/// Namespace is being torn down by the cluster
pub fn is_terminating(namespace: &Namespace) -> bool {
    namespace.metadata.deletion_timestamp.is_some()
        || namespace
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            == Some("Terminating")
}
