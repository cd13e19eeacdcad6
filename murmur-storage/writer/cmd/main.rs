use anyhow::Result;
use murmur_im_core::utils::ServiceHelper;
use murmur_storage_writer::ApplicationBootstrap;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("MURMUR_CONFIG").ok();
    let app_config = ServiceHelper::bootstrap(config_path.as_deref())?;
    ApplicationBootstrap::run(app_config).await
}
