mod telemetry;

use clap::Parser;
use motion_ingestor::codec::FrameCodec;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use telemetry::Walk;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Publishes obfuscated position frames the way a field device does
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "MQTT_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_PASSWORD", default_value = "")]
    password: String,

    #[arg(long, env = "MQTT_TOPIC", default_value = "devices/positions")]
    topic: String,

    #[arg(long, env = "FRAME_KEY")]
    key: String,

    #[arg(long, env = "DEVICE_NAME", default_value = "Nomada")]
    device: String,

    #[arg(long, default_value_t = 40.4168, allow_negative_numbers = true)]
    lat: f64,

    #[arg(long, default_value_t = -3.7038, allow_negative_numbers = true)]
    lon: f64,

    /// Largest per-fix displacement in degrees
    #[arg(long, default_value_t = 0.0002)]
    step: f64,

    #[arg(long, default_value_t = 1.2)]
    hdop: f64,

    /// Report the motion flag as set
    #[arg(long)]
    moving: bool,

    /// Seconds between fixes
    #[arg(long, default_value_t = 20)]
    interval: u64,

    /// Number of fixes to send, 0 for unbounded
    #[arg(long, default_value_t = 3)]
    count: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let codec = match FrameCodec::new(&args.key) {
        Ok(codec) => codec,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Starting device simulator");
    info!(
        "Broker: {}:{}, topic: {}, device: {}",
        args.broker, args.port, args.topic, args.device
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(60));
    mqtt_options.set_clean_session(true);
    if let Some(username) = &args.username {
        mqtt_options.set_credentials(username, &args.password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    // Spawn eventloop handler
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let mut rng = rand::thread_rng();
    let mut walk = Walk::new(
        args.device.clone(),
        args.lat,
        args.lon,
        args.step,
        args.hdop,
        args.moving,
    );

    let mut sent = 0u64;
    loop {
        let fix = walk.next_fix(&mut rng);
        let csv = fix.to_csv();

        match client
            .publish(&args.topic, QoS::AtLeastOnce, false, codec.encode(&csv))
            .await
        {
            Ok(()) => {
                sent += 1;
                info!("Sent fix {}: {}", sent, csv);
            }
            Err(e) => warn!("Failed to publish: {}", e),
        }

        if args.count != 0 && sent >= args.count {
            break;
        }
        tokio::time::sleep(Duration::from_secs(args.interval)).await;
    }

    // Let the event loop flush outstanding publishes
    tokio::time::sleep(Duration::from_secs(1)).await;
    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    info!("Simulator finished after {} fixes", sent);
}
