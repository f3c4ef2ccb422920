use anyhow::{Context, Result};
use rtcgate::config::{Config, GatewayConfig};
use rtcgate::core::GatewayCore;
use rtcgate::log::{LogLevel, Logger};
use rtcgate::plugin::echo::EchoTestPlugin;
use rtcgate::transport::{ChannelTransport, TransportCallbacks};
use rtcgate::transport::channel_transport::TransportEvent;
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let raw = match &config_path {
        Some(path) => Config::load(path).context("loading configuration")?,
        None => Config::empty(),
    };
    let gw_config = GatewayConfig::from_config(&raw).context("parsing configuration")?;

    let logfile = raw
        .get_non_empty("general", "log_file")
        .map(Path::new)
        .map(Path::to_path_buf);
    let logger = Logger::start(4096, true, logfile.as_deref());
    let sink = Arc::new(logger.handle());
    let _ = logger.try_log(
        LogLevel::Info,
        format!("rtcgate starting (config: {})", config_path.as_deref().unwrap_or("defaults")),
        module_path!(),
    );

    let core = GatewayCore::new(sink, gw_config).map_err(anyhow::Error::msg)?;
    core.setup_plugins(vec![Arc::new(EchoTestPlugin::new())], None);

    let (transport, events) = ChannelTransport::new();
    let transport = Arc::new(transport);
    core.register_transport(transport);

    // Signaling requests arrive on stdin as JSON lines and replies/events
    // leave on stdout; real deployments sit an HTTP/WebSocket transport in
    // front of the same TransportCallbacks surface.
    let core_for_stdin = Arc::clone(&core);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str(trimmed) {
                Ok(message) => core_for_stdin.incoming_request(
                    "gate.transport.channel",
                    1,
                    None,
                    false,
                    message,
                ),
                Err(e) => eprintln!("invalid request: {e}"),
            }
        }
    });

    for event in events {
        if let TransportEvent::Message { message, .. } = event {
            println!("{message}");
        }
    }

    core.destroy();
    Ok(())
}
