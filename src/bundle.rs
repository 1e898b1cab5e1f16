//! Permission job driver: drives one ephemeral execution bundle per
//! `FilePermissions` object.
//!
//! The bundle is a service account, a cluster role binding granting it the
//! configured unrestricted role, and a one-shot job that remounts the claim
//! and `chmod`s the mount path. Once the job reports success the request is
//! marked complete and the whole bundle, including the job's pods, is torn
//! down.

use k8s_openapi::api::{
    batch::v1::{Job, JobSpec},
    core::v1::{
        Container, PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec,
        PodTemplateSpec, ServiceAccount, Toleration, Volume, VolumeMount,
    },
    rbac::v1::{ClusterRoleBinding, RoleRef, Subject},
};
use kube::{
    api::{Api, DeleteParams, ObjectMeta, PostParams},
    error::ErrorResponse,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::{api::FilePermissions, controller::Context, Error, Result};

/// Where the job mounts the claim; the `chmod` target.
pub const MOUNT_PATH: &str = "/mnt/dirtochange";
const CHMOD_MODE: &str = "777";
const CONTAINER_NAME: &str = "test-container";
const JOB_LABEL_KEY: &str = "job";
const JOB_LABEL_VALUE: &str = "permissions.bigdata.wu.ac.at";
const TOLERATION_KEY: &str = "storage.provider";
const TOLERATION_VALUE: &str = "spectrum-scale";

/// Deterministic names of the bundle objects for one request.
pub struct BundleNames {
    pub job: String,
    pub service_account: String,
    pub role_binding: String,
    pub volume: String,
}

impl BundleNames {
    pub fn for_request(request_name: &str) -> Self {
        BundleNames {
            job: format!("test-job-{request_name}"),
            service_account: format!("test-serviceaccount-{request_name}"),
            role_binding: format!("test-crb-{request_name}"),
            volume: format!("test-volume-{request_name}"),
        }
    }
}

/// Advance an incomplete request one step.
///
/// No bundle job yet: create the bundle. Job succeeded: persist completion
/// and tear everything down. Job still running: do nothing and let the next
/// watch event or requeue re-enter.
pub async fn reconcile_request(ctx: &Context, request: &FilePermissions) -> Result<()> {
    let namespace = request.spec.pvc_namespace.clone();
    if namespace.is_empty() {
        return Err(Error::MissingObjectKey(".spec.pvcNamespace"));
    }
    let names = BundleNames::for_request(&request.name_any());
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), &namespace);

    match jobs.get_opt(&names.job).await.map_err(Error::ReadJob)? {
        None => create_bundle(ctx, request, &names, &namespace).await,
        Some(job) if job.status.as_ref().and_then(|s| s.succeeded) == Some(1) => {
            complete_request(ctx, request, &names, &namespace, &jobs).await
        }
        Some(_) => Ok(()),
    }
}

async fn create_bundle(
    ctx: &Context,
    request: &FilePermissions,
    names: &BundleNames,
    namespace: &str,
) -> Result<()> {
    info!(request = %request.name_any(), job = %names.job, "creating execution bundle");
    let owner = request.controller_owner_ref(&()).map(|oref| vec![oref]);

    let service_account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(names.service_account.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: owner.clone(),
            ..ObjectMeta::default()
        },
        ..ServiceAccount::default()
    };
    let service_accounts: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), namespace);
    create_or_adopt(&service_accounts, &service_account, &names.service_account)
        .await
        .map_err(Error::CreateBundle)?;

    let role_binding = ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(names.role_binding.clone()),
            owner_references: owner.clone(),
            ..ObjectMeta::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: ctx.config.privileged_role.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: names.service_account.clone(),
            namespace: Some(namespace.to_string()),
            ..Subject::default()
        }]),
    };
    let role_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    create_or_adopt(&role_bindings, &role_binding, &names.role_binding)
        .await
        .map_err(Error::CreateBundle)?;

    let job = repair_job(ctx, request, names, namespace, owner);
    let jobs: Api<Job> = Api::namespaced(ctx.client.clone(), namespace);
    create_or_adopt(&jobs, &job, &names.job)
        .await
        .map_err(Error::CreateBundle)
}

/// The one-shot job template. Transient `chmod` failures retry through the
/// job engine's own OnFailure pod restarts, not through reconciliation.
fn repair_job(
    ctx: &Context,
    request: &FilePermissions,
    names: &BundleNames,
    namespace: &str,
    owner: Option<Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference>>,
) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(names.job.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                [(JOB_LABEL_KEY.to_string(), JOB_LABEL_VALUE.to_string())]
                    .into_iter()
                    .collect(),
            ),
            owner_references: owner,
            ..ObjectMeta::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(ctx.config.job_image.clone()),
                        command: Some(vec![
                            "chmod".to_string(),
                            CHMOD_MODE.to_string(),
                            format!("{MOUNT_PATH}/"),
                        ]),
                        volume_mounts: Some(vec![VolumeMount {
                            name: names.volume.clone(),
                            mount_path: MOUNT_PATH.to_string(),
                            ..VolumeMount::default()
                        }]),
                        ..Container::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: names.volume.clone(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: request.spec.pvc_name.clone(),
                            read_only: None,
                        }),
                        ..Volume::default()
                    }]),
                    restart_policy: Some("OnFailure".to_string()),
                    service_account_name: Some(names.service_account.clone()),
                    // The repair must run as root to chmod a foreign mount.
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(false),
                        ..PodSecurityContext::default()
                    }),
                    // Land on nodes where the driver can attach the volume.
                    tolerations: Some(vec![Toleration {
                        key: Some(TOLERATION_KEY.to_string()),
                        value: Some(TOLERATION_VALUE.to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Toleration::default()
                    }]),
                    ..PodSpec::default()
                }),
            },
            ..JobSpec::default()
        }),
        ..Job::default()
    }
}

async fn complete_request(
    ctx: &Context,
    request: &FilePermissions,
    names: &BundleNames,
    namespace: &str,
    jobs: &Api<Job>,
) -> Result<()> {
    let requests: Api<FilePermissions> = Api::all(ctx.client.clone());
    let mut updated = request.clone();
    updated.spec.permissions_set = true;
    requests
        .replace(&request.name_any(), &PostParams::default(), &updated)
        .await
        .map_err(Error::UpdateRequest)?;

    delete_ignoring_absent(jobs, &names.job)
        .await
        .map_err(Error::TeardownBundle)?;

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), namespace);
    for pod in ctx.pod_store.state() {
        if owned_by_job(pod.as_ref(), &names.job, namespace) {
            delete_ignoring_absent(&pods, &pod.name_any())
                .await
                .map_err(Error::TeardownBundle)?;
        }
    }

    let service_accounts: Api<ServiceAccount> = Api::namespaced(ctx.client.clone(), namespace);
    delete_ignoring_absent(&service_accounts, &names.service_account)
        .await
        .map_err(Error::TeardownBundle)?;

    let role_bindings: Api<ClusterRoleBinding> = Api::all(ctx.client.clone());
    delete_ignoring_absent(&role_bindings, &names.role_binding)
        .await
        .map_err(Error::TeardownBundle)?;

    info!(request = %request.name_any(), "all permissions set");
    Ok(())
}

fn owned_by_job(pod: &Pod, job_name: &str, namespace: &str) -> bool {
    pod.namespace().as_deref() == Some(namespace)
        && pod
            .owner_references()
            .iter()
            .any(|oref| oref.kind == "Job" && oref.name == job_name)
}

/// A conflict on create means a previous pass got this far; adopt the
/// existing object and keep going.
async fn create_or_adopt<K>(api: &Api<K>, obj: &K, name: &str) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + Serialize + std::fmt::Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
            debug!(name, "bundle object already exists, adopting");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Double-deletes are expected across retries.
async fn delete_ignoring_absent<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) | Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
        Err(err) => Err(err),
    }
}
