//! The `FilePermissions` custom resource.
//!
//! One object records the need for, and outcome of, a permission-correction
//! job for a single claim. Objects are cluster-scoped and named after the
//! bound `PersistentVolume` so rebinding stays deterministic even when claim
//! and volume names differ; correlation back to the claim goes through
//! `pvcRefUID` instead of the name (both must agree).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prefix for `FilePermissions` object names.
pub const REQUEST_PREFIX: &str = "fp-";

#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "permissions.bigdata.wu.ac.at",
    version = "v1alpha1",
    kind = "FilePermissions",
    plural = "filepermissions"
)]
pub struct FilePermissionsSpec {
    /// Unique id of the bound `PersistentVolume`.
    #[serde(rename = "pvRefUID")]
    pub pv_ref_uid: String,
    /// Unique id of the claim; the correlation key for at-most-one semantics.
    #[serde(rename = "pvcRefUID")]
    pub pvc_ref_uid: String,
    #[serde(rename = "pvcNamespace")]
    pub pvc_namespace: String,
    #[serde(rename = "pvcName")]
    pub pvc_name: String,
    /// Set to true exactly once, after the repair job has succeeded.
    /// The object is inert from then on.
    #[serde(rename = "permissionsSet", default)]
    pub permissions_set: bool,
}

/// Deterministic `FilePermissions` name for a volume.
pub fn request_name(volume_name: &str) -> String {
    format!("{REQUEST_PREFIX}{volume_name}")
}
