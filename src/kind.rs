//! Identification of the resource kind whose events are aggregated.

use std::fmt;

use kube_core::{ApiResource, GroupVersionKind, Resource};

/// Uniquely identifies a type of resources in a cluster by group, version and kind.
///
/// All kind-specific behavior of an [`EventController`](crate::controller::EventController),
/// i.e. the server-side field selector and the counter name, derives from this value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKind {
    /// The group of the resource type, or empty string for the core group.
    pub group: String,
    /// The version of the resource type, e.g. `v1`.
    pub version: String,
    /// The kind name in CamelCase, e.g. `Pod`.
    pub kind: String,
}

impl ResourceKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// The descriptor of a statically typed resource such as `k8s_openapi::api::core::v1::Pod`.
    pub fn of<K: Resource<DynamicType = ()>>() -> Self {
        Self::new(K::group(&()), K::version(&()), K::kind(&()))
    }

    /// The `apiVersion` string as stored in `involvedObject.apiVersion`.
    ///
    /// Resources in the core group have no group prefix.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The field selector restricting the event watch to objects of this kind.
    pub fn field_selector(&self) -> String {
        format!(
            "involvedObject.kind={},involvedObject.apiVersion={}",
            self.kind,
            self.api_version()
        )
    }

    /// The lower-cased kind, used as the metric subsystem.
    pub fn metric_subsystem(&self) -> String {
        self.kind.to_lowercase()
    }

    pub fn controller_name(&self) -> String {
        format!("operatorpkg.{}.events", self.metric_subsystem())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.api_version())
    }
}

impl From<&GroupVersionKind> for ResourceKind {
    fn from(gvk: &GroupVersionKind) -> Self {
        Self::new(&gvk.group, &gvk.version, &gvk.kind)
    }
}

impl From<&ApiResource> for ResourceKind {
    fn from(resource: &ApiResource) -> Self {
        Self::new(&resource.group, &resource.version, &resource.kind)
    }
}
