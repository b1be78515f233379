use log::info;
use translation_gateway::{GatewayConfig, GatewayService};

fn main() {
    env_logger::init();

    let config = GatewayConfig::from_env();
    info!(
        "starting translation gateway: ingress={} egress={} frame_ms={}",
        config.acs_ingress_url, config.acs_egress_url, config.frame_ms
    );

    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    runtime.block_on(run(config));
}

async fn run(config: GatewayConfig) {
    let service = GatewayService::new(config, uuid::Uuid::new_v4().to_string());
    service.attach_barge_in().await;

    tokio::select! {
        _ = service.run_ingress() => {
            info!("ingress loop ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    service.shutdown().await;
}
