use super::{labels, InstanceSpec, WORKLOAD_NAME};
use crate::types::ResourceConfig;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Capabilities, Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe,
            ResourceRequirements, SecurityContext, TCPSocketAction,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity, apis::meta::v1::LabelSelector, util::intstr::IntOrString,
    },
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub fn build_deployment(spec: &InstanceSpec) -> Deployment {
    let config = &spec.config;

    // Build environment variables
    let mut env_vars: Vec<EnvVar> = config
        .environment()
        .iter()
        .map(|(key, value)| EnvVar {
            name: key.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    // Add instance metadata
    env_vars.push(EnvVar {
        name: "INSTANCE_NAMESPACE".to_string(),
        value: Some(spec.namespace.clone()),
        ..Default::default()
    });

    let ports = config
        .ports()
        .iter()
        .map(|port| ContainerPort {
            name: Some(port_name(*port)),
            container_port: i32::from(*port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: WORKLOAD_NAME.to_string(),
        image: Some(config.image().to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(env_vars),
        ports: Some(ports),
        resources: Some(build_resources(config.resources())),
        readiness_probe: config.ports().first().map(|port| readiness_probe(*port)),
        security_context: Some(build_security_context()),
        ..Default::default()
    };

    let pod_template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels::pod_labels(spec)),
            annotations: Some(BTreeMap::from([(
                "cluster-autoscaler.kubernetes.io/safe-to-evict".to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![container],
            enable_service_links: Some(false),
            automount_service_account_token: Some(false),
            termination_grace_period_seconds: Some(0),
            ..Default::default()
        }),
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(WORKLOAD_NAME.to_string()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels::common_labels(spec)),
            annotations: Some(BTreeMap::from([(
                labels::REPLICAS_ANNOTATION.to_string(),
                config.replicas().to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(config.replicas()),
            selector: LabelSelector {
                match_labels: Some(labels::pod_selector_labels(spec)),
                ..Default::default()
            },
            template: pod_template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Port name, unique per port and within the 15 character limit
pub fn port_name(port: u16) -> String {
    format!("port-{port}")
}

fn build_resources(resources: &ResourceConfig) -> ResourceRequirements {
    let mut limits = BTreeMap::new();
    let mut requests = BTreeMap::new();

    limits.insert("cpu".to_string(), Quantity(resources.cpu_limit.clone()));
    requests.insert("cpu".to_string(), Quantity(resources.cpu_request.clone()));
    limits.insert("memory".to_string(), Quantity(resources.memory_limit.clone()));
    requests.insert(
        "memory".to_string(),
        Quantity(resources.memory_request.clone()),
    );

    ResourceRequirements {
        limits: Some(limits),
        requests: Some(requests),
        ..Default::default()
    }
}

fn build_security_context() -> SecurityContext {
    SecurityContext {
        privileged: Some(false),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            add: None,
            drop: Some(vec!["NET_RAW".to_string()]),
        }),
        ..Default::default()
    }
}

fn readiness_probe(port: u16) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(i32::from(port)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(2),
        period_seconds: Some(3),
        failure_threshold: Some(20),
        ..Default::default()
    }
}

/// Replica count the workload should return to after a restart
pub fn desired_replicas(deployment: &Deployment) -> i32 {
    let annotated = deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(labels::REPLICAS_ANNOTATION))
        .and_then(|value| value.parse::<i32>().ok());
    let current = deployment.spec.as_ref().and_then(|s| s.replicas);
    annotated.or(current).unwrap_or(1).max(1)
}

/// Replica count currently requested on the workload
pub fn replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}
