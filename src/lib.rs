//! A controller that grants filesystem permissions on CSI-provisioned volumes.
//!
//! Workloads mounting volumes from certain CSI drivers lack the privilege to
//! fix their own directory permissions. This controller watches
//! `PersistentVolumeClaim`s bound to such volumes, records each one as a
//! cluster-scoped [`FilePermissions`](api::FilePermissions) object, and drives
//! a one-shot privileged [`Job`](k8s_openapi::api::batch::v1::Job) that
//! `chmod`s the mount before tearing its execution environment back down.

use thiserror::Error;

pub mod api;
pub mod bundle;
pub mod claims;
pub mod config;
pub mod controller;


/// Errors surfaced by the reconcilers.
///
/// Each variant names the operation that failed so a stuck `FilePermissions`
/// can be traced from logs alone. All variants except `MissingObjectKey`
/// wrap the underlying apiserver error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),
    #[error("ReadRequest: {0}")]
    ReadRequest(#[source] kube::Error),
    #[error("ReadClaim: {0}")]
    ReadClaim(#[source] kube::Error),
    #[error("ReadVolume: {0}")]
    ReadVolume(#[source] kube::Error),
    #[error("ListRequests: {0}")]
    ListRequests(#[source] kube::Error),
    #[error("CreateRequest: {0}")]
    CreateRequest(#[source] kube::Error),
    #[error("DeleteRequest: {0}")]
    DeleteRequest(#[source] kube::Error),
    #[error("ReadJob: {0}")]
    ReadJob(#[source] kube::Error),
    #[error("CreateBundle: {0}")]
    CreateBundle(#[source] kube::Error),
    #[error("UpdateRequest: {0}")]
    UpdateRequest(#[source] kube::Error),
    #[error("TeardownBundle: {0}")]
    TeardownBundle(#[source] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
