//! Shared reconciliation entry point and controller wiring.
//!
//! Both watched kinds funnel into [`reconcile`]: an identity is first looked
//! up as a `FilePermissions` object (job driver path), then as a
//! `PersistentVolumeClaim` (claim projector path). Every invocation re-reads
//! live state, so redelivered or out-of-order events converge on the same
//! outcome.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{PersistentVolumeClaim, Pod},
};
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        reflector::{self, Store},
        watcher, WatchStreamExt,
    },
    Client, ResourceExt,
};
use tracing::{debug, warn};

use crate::{api::FilePermissions, bundle, claims, config::ControllerConfig, Error, Result};

/// Revisit interval for requests still waiting on their job.
const PENDING_REQUEUE: Duration = Duration::from_secs(5);
/// Revisit interval for completed, inert requests.
const COMPLETED_REQUEUE: Duration = Duration::from_secs(300);

/// State shared by every reconciliation.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: ControllerConfig,
    /// Watch-populated index used to find the pods a job spawned.
    pub pod_store: Store<Pod>,
}

/// Reconcile one object identity.
///
/// `namespace` is present for claim-triggered events and absent for
/// `FilePermissions`-triggered ones (the CRD is cluster-scoped).
pub async fn reconcile(ctx: &Context, namespace: Option<&str>, name: &str) -> Result<Action> {
    let requests: Api<FilePermissions> = Api::all(ctx.client.clone());
    if let Some(request) = requests.get_opt(name).await.map_err(Error::ReadRequest)? {
        if request.spec.permissions_set {
            // Terminal; nothing left to mutate.
            return Ok(Action::requeue(COMPLETED_REQUEUE));
        }
        bundle::reconcile_request(ctx, &request).await?;
        return Ok(Action::requeue(PENDING_REQUEUE));
    }

    match namespace {
        Some(ns) => claims::reconcile_claim(ctx, ns, name).await,
        // A deleted FilePermissions object; nothing to project from.
        None => Ok(Action::await_change()),
    }
}

async fn reconcile_request_event(
    request: Arc<FilePermissions>,
    ctx: Arc<Context>,
) -> Result<Action> {
    reconcile(&ctx, None, &request.name_any()).await
}

async fn reconcile_claim_event(
    claim: Arc<PersistentVolumeClaim>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let namespace = claim
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    reconcile(&ctx, Some(&namespace), &claim.name_any()).await
}

/// Log and lean on the scheduler; the apiserver retry story lives there.
fn error_policy<K>(_obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(%error, "reconciliation failed");
    Action::requeue(PENDING_REQUEUE)
}

/// Run both controllers and the pod index until shutdown.
pub async fn run(client: Client, config: ControllerConfig) {
    let requests: Api<FilePermissions> = Api::all(client.clone());
    let claims: Api<PersistentVolumeClaim> = Api::all(client.clone());
    let jobs: Api<Job> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client.clone());

    let (pod_store, pod_writer) = reflector::store();
    let ctx = Arc::new(Context { client, config, pod_store });

    // Job-spawned pods carry a job-name label; that is all the index holds.
    let pod_index = watcher(pods, watcher::Config::default().labels("job-name"))
        .default_backoff()
        .reflect(pod_writer)
        .applied_objects()
        .for_each(|res| async {
            if let Err(error) = res {
                warn!(%error, "pod watch error");
            }
        });

    let request_controller = Controller::new(requests, watcher::Config::default())
        .owns(jobs, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_request_event, error_policy, ctx.clone())
        .for_each(|res| async {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "reconciled"),
                Err(error) => warn!(%error, "request reconciliation errored"),
            }
        });

    let claim_controller = Controller::new(claims, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_claim_event, error_policy, ctx)
        .for_each(|res| async {
            match res {
                Ok((obj, _)) => debug!(object = %obj, "reconciled"),
                Err(error) => warn!(%error, "claim reconciliation errored"),
            }
        });

    tokio::select! {
        _ = futures::future::join(request_controller, claim_controller) => {},
        _ = pod_index => {},
    }
}
