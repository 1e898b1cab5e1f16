//! Runtime configuration for the reconcilers.

/// CSI driver whose volumes are eligible for permission repair.
pub const DEFAULT_CSI_DRIVER: &str = "spectrumscale.csi.ibm.com";
/// Image the repair job runs; only needs a `chmod` binary.
pub const DEFAULT_JOB_IMAGE: &str = "busybox";
/// ClusterRole granting the job's service account unrestricted execution.
pub const DEFAULT_PRIVILEGED_ROLE: &str = "system-unrestricted-psp-role";

/// Filter and job parameters, threaded through the reconciler context.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Claims bound to volumes from any other driver are ignored.
    pub csi_driver: String,
    /// When set, additionally restricts eligibility to claims of this
    /// storage class.
    pub storage_class: Option<String>,
    pub job_image: String,
    pub privileged_role: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            csi_driver: DEFAULT_CSI_DRIVER.into(),
            storage_class: None,
            job_image: DEFAULT_JOB_IMAGE.into(),
            privileged_role: DEFAULT_PRIVILEGED_ROLE.into(),
        }
    }
}
