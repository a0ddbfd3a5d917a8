//! Knative `Service` documents exchanged with the platform
//!
//! Only the fields the deployer sets or reads are modelled. Replacing a
//! service overwrites everything not present in the submitted document, so
//! [`service_document`] always renders the complete desired state from a
//! [`ServiceSpec`] and never looks at what is currently deployed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyport_common::{EnvVar, ServiceSpec};
use std::collections::BTreeMap;

pub const API_VERSION: &str = "serving.knative.dev/v1";
pub const KIND: &str = "Service";

/// Template annotation attaching a revision to a Serverless VPC connector
pub const VPC_CONNECTOR_ANNOTATION: &str = "run.googleapis.com/vpc-access-connector";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnativeService {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ServiceDocSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDocSpec {
    #[serde(default)]
    pub template: RevisionTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionTemplate {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: RevisionSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Status block reported by the platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    /// `"True"`, `"False"` or `"Unknown"`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Render the complete desired-state document for `spec` in `project`
pub fn service_document(project: &str, spec: &ServiceSpec) -> KnativeService {
    let mut template_annotations = BTreeMap::new();
    if let Some(connector) = spec.vpc_connector() {
        template_annotations.insert(VPC_CONNECTOR_ANNOTATION.to_string(), connector.to_string());
    }

    KnativeService {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        metadata: ObjectMeta {
            name: spec.canonical_name().to_string(),
            namespace: Some(project.to_string()),
            ..ObjectMeta::default()
        },
        spec: ServiceDocSpec {
            template: RevisionTemplate {
                metadata: ObjectMeta {
                    annotations: template_annotations,
                    ..ObjectMeta::default()
                },
                spec: RevisionSpec {
                    service_account_name: spec.service_account().map(str::to_string),
                    containers: vec![Container {
                        image: spec.image().to_string(),
                        env: spec.env().to_vec(),
                        args: spec.args().to_vec(),
                    }],
                },
            },
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> ServiceSpec {
        ServiceSpec::new("my_svc", "us-central1", "gcr.io/p/x:v1".parse().unwrap())
    }

    #[test]
    fn test_minimal_document() {
        let document = serde_json::to_value(service_document("proj", &spec())).unwrap();

        assert_eq!(
            document,
            json!({
                "apiVersion": "serving.knative.dev/v1",
                "kind": "Service",
                "metadata": { "name": "my-svc", "namespace": "proj" },
                "spec": {
                    "template": {
                        "metadata": {},
                        "spec": {
                            "containers": [{ "image": "gcr.io/p/x:v1" }]
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_full_document() {
        let spec = spec()
            .with_service_account(Some("runner@proj.iam.gserviceaccount.com".to_string()))
            .with_vpc_connector(Some("projects/proj/locations/us-central1/connectors/vpc".to_string()))
            .with_env(vec![EnvVar::new("B", "2"), EnvVar::new("A", "1")])
            .unwrap()
            .with_args(vec!["--serve".to_string()]);

        let document = serde_json::to_value(service_document("proj", &spec)).unwrap();
        let template = &document["spec"]["template"];

        assert_eq!(
            template["metadata"]["annotations"][VPC_CONNECTOR_ANNOTATION],
            "projects/proj/locations/us-central1/connectors/vpc"
        );
        assert_eq!(
            template["spec"]["serviceAccountName"],
            "runner@proj.iam.gserviceaccount.com"
        );
        assert_eq!(
            template["spec"]["containers"][0]["env"],
            json!([{ "name": "B", "value": "2" }, { "name": "A", "value": "1" }])
        );
        assert_eq!(template["spec"]["containers"][0]["args"], json!(["--serve"]));
    }

    #[test]
    fn test_document_is_deterministic() {
        let spec = spec()
            .with_vpc_connector(Some("vpc".to_string()))
            .with_env(vec![EnvVar::new("A", "1")])
            .unwrap();
        assert_eq!(
            service_document("proj", &spec),
            service_document("proj", &spec)
        );
    }

    #[test]
    fn test_parse_remote_status() {
        let service: KnativeService = serde_json::from_value(json!({
            "apiVersion": "serving.knative.dev/v1",
            "kind": "Service",
            "metadata": { "name": "my-svc", "namespace": "123", "generation": 3 },
            "spec": { "template": { "spec": { "containers": [{ "image": "gcr.io/p/x:v1" }] } } },
            "status": {
                "observedGeneration": 3,
                "url": "https://my-svc-xyz.a.run.app",
                "conditions": [{
                    "type": "Ready",
                    "status": "True",
                    "lastTransitionTime": "2024-05-01T12:00:00Z"
                }]
            }
        }))
        .unwrap();

        let status = service.status.unwrap();
        assert_eq!(status.url.as_deref(), Some("https://my-svc-xyz.a.run.app"));
        assert_eq!(status.conditions[0].kind, "Ready");
        assert_eq!(
            status.conditions[0].last_transition_time.unwrap().to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
    }
}
