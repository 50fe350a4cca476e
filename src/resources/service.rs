use super::{deployment::port_name, labels, InstanceSpec, WORKLOAD_NAME};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

pub fn build_service(spec: &InstanceSpec) -> Service {
    let ports = spec
        .config
        .ports()
        .iter()
        .map(|port| ServicePort {
            name: Some(port_name(*port)),
            port: i32::from(*port),
            target_port: Some(IntOrString::Int(i32::from(*port))),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(WORKLOAD_NAME.to_string()),
            namespace: Some(spec.namespace.clone()),
            labels: Some(labels::common_labels(spec)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(spec.service_type.clone()),
            selector: Some(labels::pod_selector_labels(spec)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// First externally reachable load balancer address of a service
pub fn load_balancer_address(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| {
            ingress
                .iter()
                .find_map(|i| i.ip.clone().or_else(|| i.hostname.clone()))
        })
        .filter(|address| !address.is_empty())
}
