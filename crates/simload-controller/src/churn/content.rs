//! Synthetic object content per kind
//!
//! Core kinds are built from typed `k8s-openapi` structs; OpenShift kinds
//! (Route, ImageStream, BuildConfig) as dynamic objects with a JSON spec.

use std::collections::BTreeMap;

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::{DynamicObject, ObjectMeta};
use serde_json::json;

use simload_common::labels::{
    managed_of_type, APP_COMPONENT_LABEL, APP_NAME_LABEL, ASSOCIATED_NODE_LABEL,
    CREATED_BY_LABEL, NAMESPACE_INDEX_LABEL,
};
use simload_common::{Result, CREATED_BY};

use super::ChurnKind;
use crate::namespaces::ManagedNamespace;
use crate::random::RandomSource;
use crate::store::{to_dynamic, ResourceKind};

/// Port exposed by generated Services and targeted by Routes
pub const SERVICE_PORT: i32 = 8080;

const SAMPLE_IMAGE: &str = "quay.io/cloud-bulldozer/sampleapp:latest";
const SAMPLE_REPO: &str = "https://github.com/cloud-bulldozer/sampleapp.git";

/// Where generated objects go and who owns them
#[derive(Clone, Copy)]
pub struct Owner<'a> {
    /// ScaleLoadConfig name
    pub config_name: &'a str,
    /// Target namespace
    pub namespace: &'a ManagedNamespace,
}

impl Owner<'_> {
    fn metadata(&self, kind: ResourceKind, component: &str, name: String, index: u32) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(self.namespace.name.clone()),
            labels: Some(self.labels(kind, component, index)),
            ..Default::default()
        }
    }

    fn labels(&self, kind: ResourceKind, component: &str, index: u32) -> BTreeMap<String, String> {
        let mut labels = managed_of_type(self.config_name, kind.label_value());
        labels.insert(CREATED_BY_LABEL.to_string(), CREATED_BY.to_string());
        labels.insert(
            ASSOCIATED_NODE_LABEL.to_string(),
            self.namespace.associated_node.clone(),
        );
        if let Some(ns_index) = self.namespace.index {
            labels.insert(NAMESPACE_INDEX_LABEL.to_string(), ns_index.to_string());
        }
        labels.insert(APP_NAME_LABEL.to_string(), app_name(index));
        labels.insert(APP_COMPONENT_LABEL.to_string(), component.to_string());
        labels
    }

    fn dynamic(&self, kind: ResourceKind, component: &str, name: String, index: u32) -> DynamicObject {
        let mut obj = DynamicObject::new(&name, &kind.api_resource());
        obj.metadata = self.metadata(kind, component, name, index);
        obj
    }
}

fn app_name(index: u32) -> String {
    format!("load-app-{}", index)
}

/// Name of the Service paired with Route `index`
pub fn service_name(index: u32) -> String {
    format!("load-service-{}", index)
}

/// Build object `index` of `kind` with fresh random content
pub fn build(
    kind: ChurnKind,
    owner: Owner<'_>,
    index: u32,
    rng: &mut dyn RandomSource,
) -> Result<DynamicObject> {
    let name = kind.object_name(index);
    match kind {
        ChurnKind::ConfigMap => config_map(owner, name, index, rng),
        ChurnKind::Secret => secret(owner, name, index, rng),
        ChurnKind::Route => Ok(route(owner, name, index)),
        ChurnKind::ImageStream => Ok(image_stream(owner, name, index)),
        ChurnKind::BuildConfig => Ok(build_config(owner, name, index)),
    }
}

fn config_map(
    owner: Owner<'_>,
    name: String,
    index: u32,
    rng: &mut dyn RandomSource,
) -> Result<DynamicObject> {
    let properties = format!(
        "app.name={}\napp.version=1.0.{}\nserver.threads={}\ndb.pool.size={}\ndb.url=jdbc:postgresql://db:5432/app\n",
        app_name(index),
        rng.below(100),
        rng.range(1, 11),
        rng.range(5, 25),
    );
    let yaml = format!(
        "replicas: {}\nresources:\n  cpu: {}m\n  memory: {}Mi\nenv:\n  INSTANCE_ID: {}\n",
        rng.range(1, 6),
        rng.range(100, 600),
        rng.range(128, 640),
        rng.alnum(8),
    );
    let settings = json!({
        "enableTracing": rng.chance(0.5),
        "cacheSize": rng.range(100, 1100),
        "timeout": rng.range(5, 35),
        "retries": rng.range(1, 6),
    })
    .to_string();

    let cm = ConfigMap {
        metadata: owner.metadata(ResourceKind::ConfigMap, ChurnKind::ConfigMap.component(), name, index),
        data: Some(BTreeMap::from([
            ("app.properties".to_string(), properties),
            ("config.yaml".to_string(), yaml),
            ("settings.json".to_string(), settings),
        ])),
        ..Default::default()
    };
    to_dynamic(ResourceKind::ConfigMap, &cm)
}

fn secret(
    owner: Owner<'_>,
    name: String,
    index: u32,
    rng: &mut dyn RandomSource,
) -> Result<DynamicObject> {
    let password = URL_SAFE_NO_PAD.encode(rng.bytes(24));
    let api_key = URL_SAFE.encode(rng.bytes(32));
    let config = format!(
        "database:\n  user: user_{}\n  password: {}\n  host: db.internal\napi:\n  key: {}\n  endpoint: https://api.example.com\n",
        rng.alnum(6),
        rng.alnum(16),
        api_key,
    );

    let bytes = |s: String| ByteString(s.into_bytes());
    let secret = Secret {
        metadata: owner.metadata(ResourceKind::Secret, ChurnKind::Secret.component(), name, index),
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([
            ("username".to_string(), bytes(format!("user-{}", index))),
            ("password".to_string(), bytes(password)),
            ("api-key".to_string(), bytes(api_key)),
            ("config.yaml".to_string(), bytes(config)),
        ])),
        ..Default::default()
    };
    to_dynamic(ResourceKind::Secret, &secret)
}

/// Service backing Route `index`
pub fn service(owner: Owner<'_>, index: u32) -> Result<DynamicObject> {
    let svc = Service {
        metadata: owner.metadata(ResourceKind::Service, "backend", service_name(index), index),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(BTreeMap::from([(APP_NAME_LABEL.to_string(), app_name(index))])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(SERVICE_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    };
    to_dynamic(ResourceKind::Service, &svc)
}

fn route(owner: Owner<'_>, name: String, index: u32) -> DynamicObject {
    let mut obj = owner.dynamic(ResourceKind::Route, ChurnKind::Route.component(), name, index);
    obj.data = json!({
        "spec": {
            "to": { "kind": "Service", "name": service_name(index), "weight": 100 },
            "port": { "targetPort": SERVICE_PORT },
            "tls": {
                "termination": "edge",
                "insecureEdgeTerminationPolicy": "Redirect"
            }
        }
    });
    obj
}

fn image_stream(owner: Owner<'_>, name: String, index: u32) -> DynamicObject {
    let mut obj = owner.dynamic(
        ResourceKind::ImageStream,
        ChurnKind::ImageStream.component(),
        name,
        index,
    );
    obj.data = json!({
        "spec": {
            "lookupPolicy": { "local": false },
            "tags": [{
                "name": "latest",
                "from": { "kind": "DockerImage", "name": SAMPLE_IMAGE },
                "importPolicy": { "scheduled": true },
                "referencePolicy": { "type": "Source" }
            }]
        }
    });
    obj
}

fn build_config(owner: Owner<'_>, name: String, index: u32) -> DynamicObject {
    let mut obj = owner.dynamic(
        ResourceKind::BuildConfig,
        ChurnKind::BuildConfig.component(),
        name,
        index,
    );
    obj.data = json!({
        "spec": {
            "runPolicy": "Serial",
            "source": { "type": "Git", "git": { "uri": SAMPLE_REPO } },
            "strategy": { "type": "Docker", "dockerStrategy": {} },
            "output": {
                "to": {
                    "kind": "ImageStreamTag",
                    "name": format!("{}:latest", ChurnKind::ImageStream.object_name(index))
                }
            },
            "triggers": [{ "type": "ConfigChange" }]
        }
    });
    obj
}

/// Service named by a Route's `spec.to.name`
pub fn route_target(route: &DynamicObject) -> Option<String> {
    route
        .data
        .get("spec")
        .and_then(|s| s.get("to"))
        .and_then(|t| t.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
}
