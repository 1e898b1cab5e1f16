use clap::Parser;
use kube::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use controller::config::{
    ControllerConfig, DEFAULT_CSI_DRIVER, DEFAULT_JOB_IMAGE, DEFAULT_PRIVILEGED_ROLE,
};

#[derive(Parser)]
#[command(about = "Grants filesystem permissions on CSI volumes via one-shot privileged jobs")]
struct Args {
    /// CSI driver whose volumes are eligible for permission repair
    #[arg(long, default_value = DEFAULT_CSI_DRIVER)]
    csi_driver: String,
    /// Restrict eligibility to claims of this storage class
    #[arg(long)]
    storage_class: Option<String>,
    /// Image the repair job runs
    #[arg(long, default_value = DEFAULT_JOB_IMAGE)]
    job_image: String,
    /// ClusterRole bound to the repair job's service account
    #[arg(long, default_value = DEFAULT_PRIVILEGED_ROLE)]
    privileged_role: String,
}

impl From<Args> for ControllerConfig {
    fn from(args: Args) -> Self {
        ControllerConfig {
            csi_driver: args.csi_driver,
            storage_class: args.storage_class,
            job_image: args.job_image,
            privileged_role: args.privileged_role,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ControllerConfig::from(args);
    info!(driver = %config.csi_driver, "starting filepermissions controller");

    let client = Client::try_default().await?;
    controller::controller::run(client, config).await;
    Ok(())
}
