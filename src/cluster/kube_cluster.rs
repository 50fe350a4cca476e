use super::{Applied, ClusterApi, ClusterEvent, ContainerUsage, EventType, PodMetricsData};
use crate::{
    error::{Error, Result},
    resources::{labels::MANAGER, WORKLOAD_NAME},
};
use async_trait::async_trait;
use futures::{future, stream::BoxStream, StreamExt};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{Namespace, Pod, Service},
};
use kube::{
    api::{
        Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams,
        Patch, PatchParams, PostParams,
    },
    runtime::{watcher, WatchStreamExt},
    Client, Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, future::Future, time::Duration};
use tracing::{debug, info};

/// [`ClusterApi`] over a real cluster. Every request is bounded by `call_timeout`.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    call_timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    async fn call<T, F>(&self, operation: &str, request: F) -> Result<T>
    where
        F: Future<Output = kube::Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, request).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
            }),
        }
    }

    /// Create the object, or server-side apply it when it already exists
    async fn create_or_apply<K>(&self, api: Api<K>, object: &K) -> Result<Applied>
    where
        K: Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::ResourceCreationError {
                resource_type: kind.clone(),
                reason: "object has no name".to_string(),
            })?;

        let post_params = PostParams {
            field_manager: Some(MANAGER.to_string()),
            ..Default::default()
        };

        match self
            .call(&format!("create {kind} {name}"), api.create(&post_params, object))
            .await
        {
            Ok(_) => {
                info!("Created {} {}", kind, name);
                Ok(Applied::Created)
            }
            Err(Error::KubeError(kube::Error::Api(ae))) if ae.code == 409 => {
                let patch_params = PatchParams::apply(MANAGER).force();
                self.call(
                    &format!("apply {kind} {name}"),
                    api.patch(&name, &patch_params, &Patch::Apply(object)),
                )
                .await?;
                info!("{} {} already exists, applied", kind, name);
                Ok(Applied::Patched)
            }
            Err(e) => Err(e),
        }
    }

    fn metrics_api(&self, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "pods");
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.call(&format!("get namespace {name}"), api.get_opt(name))
            .await
    }

    async fn list_namespaces(&self, label_selector: &str) -> Result<Vec<Namespace>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(label_selector);
        let list = self.call("list namespaces", api.list(&lp)).await?;
        Ok(list.items)
    }

    async fn apply_namespace(&self, namespace: &Namespace) -> Result<Applied> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.create_or_apply(api, namespace).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match self
            .call(
                &format!("delete namespace {name}"),
                api.delete(name, &DeleteParams::background()),
            )
            .await
        {
            Ok(_) => {
                info!("Deleting namespace {}", name);
                Ok(true)
            }
            Err(Error::KubeError(kube::Error::Api(ae))) if ae.code == 404 => {
                info!("Namespace {} already deleted", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.call(&format!("get deployment {namespace}/{name}"), api.get_opt(name))
            .await
    }

    async fn apply_deployment(&self, namespace: &str, deployment: &Deployment) -> Result<Applied> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        self.create_or_apply(api, deployment).await
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": {
                "replicas": replicas
            }
        });

        match self
            .call(
                &format!("scale deployment {namespace}/{name}"),
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)),
            )
            .await
        {
            Ok(_) => {
                info!("Scaled deployment {}/{} to {}", namespace, name, replicas);
                Ok(())
            }
            Err(Error::KubeError(kube::Error::Api(ae))) if ae.code == 404 => {
                Err(Error::InstanceNotFound {
                    namespace: namespace.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.call(&format!("get service {namespace}/{name}"), api.get_opt(name))
            .await
    }

    async fn apply_service(&self, namespace: &str, service: &Service) -> Result<Applied> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.create_or_apply(api, service).await
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(label_selector);
        match self
            .call(&format!("list pods in {namespace}"), api.list(&lp))
            .await
        {
            Ok(list) => Ok(list.items),
            Err(Error::KubeError(kube::Error::Api(ae))) if ae.code == 404 => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn pod_logs(&self, namespace: &str, pod: &str, tail_lines: i64) -> Result<String> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = LogParams {
            container: Some(WORKLOAD_NAME.to_string()),
            tail_lines: Some(tail_lines),
            ..Default::default()
        };
        self.call(&format!("logs of {namespace}/{pod}"), api.logs(pod, &lp))
            .await
    }

    async fn pod_metrics(&self, namespace: &str, pod: &str) -> Result<Vec<ContainerUsage>> {
        let api = self.metrics_api(namespace);
        let metrics = self
            .call(&format!("metrics of {namespace}/{pod}"), api.get(pod))
            .await?;
        let data: PodMetricsData = serde_json::from_value(metrics.data)?;
        debug!(pod, containers = data.containers.len(), "Fetched pod metrics");
        Ok(data.containers)
    }

    fn watch_events(&self, namespace: &str) -> BoxStream<'static, Result<ClusterEvent>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);

        let pod_events = watcher(pods, watcher::Config::default())
            .default_backoff()
            .filter_map(|event| {
                future::ready(map_event(event, |pod, event_type| {
                    ClusterEvent::from_pod(pod, event_type)
                }))
            });
        let service_events = watcher(services, watcher::Config::default())
            .default_backoff()
            .filter_map(|event| {
                future::ready(map_event(event, |service, event_type| {
                    ClusterEvent::from_service(service, event_type)
                }))
            });

        futures::stream::select(pod_events, service_events).boxed()
    }
}

fn map_event<K, F>(
    event: std::result::Result<watcher::Event<K>, watcher::Error>,
    convert: F,
) -> Option<Result<ClusterEvent>>
where
    F: Fn(&K, EventType) -> ClusterEvent,
{
    match event {
        Ok(watcher::Event::Apply(object)) | Ok(watcher::Event::InitApply(object)) => {
            Some(Ok(convert(&object, EventType::Applied)))
        }
        Ok(watcher::Event::Delete(object)) => Some(Ok(convert(&object, EventType::Deleted))),
        Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
        Err(e) => Some(Err(e.into())),
    }
}
