//! `chatrelay serve`: Start the HTTP gateway.

use chatrelay_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    println!("💬 ChatRelay Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Backend:   {:?} at {}",
        config.backend.kind,
        config.backend.resolved_base_url()
    );
    println!("   Model:     {}", config.generation.model_name);
    println!("   History:   {}", config.storage.history_dir.display());
    println!("   Knowledge: {}", config.storage.knowledge_dir.display());

    chatrelay_gateway::start(config).await?;

    Ok(())
}
