//! IoT Hub 运行时：发布/订阅核心、TD 目录、历史记录与 MQTT 前端。

mod runtime;

use hub_config::HubConfig;
use hub_telemetry::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = HubConfig::from_env()?;
    init_tracing();

    let hub = runtime::Hub::start(&config).await?;
    let serving = hub.serve_mqtt(&config).await?;
    info!(target: "hub", mqtt_addr = %serving.local_addr, "hub_started");

    tokio::signal::ctrl_c().await?;
    info!(target: "hub", "shutdown_requested");
    serving.stop().await;
    hub.stop().await;
    Ok(())
}
