//! Claim projector: `PersistentVolumeClaim` → at-most-one `FilePermissions`.

use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    error::ErrorResponse,
    runtime::controller::Action,
    ResourceExt,
};
use tracing::{debug, info};

use crate::{
    api::{request_name, FilePermissions, FilePermissionsSpec},
    controller::Context,
    Error, Result,
};

/// Project one claim into the `FilePermissions` collection.
///
/// Creates the request when a qualifying claim first appears, deletes every
/// correlated request once the claim carries a deletion timestamp, and does
/// nothing for claims bound to foreign drivers. Safe to re-run on every
/// redelivered event: the existence check goes through the claim uid.
pub async fn reconcile_claim(ctx: &Context, namespace: &str, name: &str) -> Result<Action> {
    let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    let Some(claim) = claims.get_opt(name).await.map_err(Error::ReadClaim)? else {
        // Already deleted; the request cleanup ran when the deletion
        // timestamp was first observed.
        return Ok(Action::await_change());
    };

    let Some(volume_name) = claim.spec.as_ref().and_then(|s| s.volume_name.clone()) else {
        // Unbound claim; a later binding update re-triggers us.
        return Ok(Action::await_change());
    };

    let volumes: Api<PersistentVolume> = Api::all(ctx.client.clone());
    let Some(volume) = volumes.get_opt(&volume_name).await.map_err(Error::ReadVolume)? else {
        return Ok(Action::await_change());
    };
    if !eligible(ctx, &claim, &volume) {
        return Ok(Action::await_change());
    }

    let claim_uid = claim.uid().ok_or(Error::MissingObjectKey(".metadata.uid"))?;
    let requests: Api<FilePermissions> = Api::all(ctx.client.clone());
    let correlated: Vec<FilePermissions> = requests
        .list(&ListParams::default())
        .await
        .map_err(Error::ListRequests)?
        .items
        .into_iter()
        .filter(|fp| fp.spec.pvc_ref_uid == claim_uid)
        .collect();

    if claim.metadata.deletion_timestamp.is_some() {
        // Normally zero or one, but delete whatever correlates.
        for request in correlated {
            let fp_name = request.name_any();
            info!(claim = name, request = %fp_name, "deleting permission request");
            match requests.delete(&fp_name, &DeleteParams::default()).await {
                Ok(_) | Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {}
                Err(err) => return Err(Error::DeleteRequest(err)),
            }
        }
        return Ok(Action::await_change());
    }

    if correlated.is_empty() {
        let volume_uid = volume.uid().ok_or(Error::MissingObjectKey(".metadata.uid"))?;
        let request = FilePermissions::new(&request_name(&volume.name_any()), FilePermissionsSpec {
            pv_ref_uid: volume_uid,
            pvc_ref_uid: claim_uid,
            pvc_namespace: namespace.to_string(),
            pvc_name: name.to_string(),
            permissions_set: false,
        });
        info!(claim = name, request = %request.name_any(), "creating permission request");
        match requests.create(&PostParams::default(), &request).await {
            Ok(_) => {}
            // Redelivery race; another pass already created it.
            Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
                debug!(request = %request.name_any(), "request already exists");
            }
            Err(err) => return Err(Error::CreateRequest(err)),
        }
    }

    Ok(Action::await_change())
}

fn eligible(ctx: &Context, claim: &PersistentVolumeClaim, volume: &PersistentVolume) -> bool {
    let driver_matches = volume
        .spec
        .as_ref()
        .and_then(|s| s.csi.as_ref())
        .is_some_and(|csi| csi.driver == ctx.config.csi_driver);
    let class_matches = match &ctx.config.storage_class {
        Some(class) => claim
            .spec
            .as_ref()
            .and_then(|s| s.storage_class_name.as_deref())
            .is_some_and(|sc| sc == class),
        None => true,
    };
    driver_matches && class_matches
}
