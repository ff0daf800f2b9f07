use crate::errors::Result;
use crate::pipeline::IngestPipeline;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, error, info};

pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub persistent_session: bool,
    pub credentials: Option<(String, String)>,
    pub topic: String,
}

/// Consume the position topic, handing each frame to the pipeline in
/// arrival order. A frame is fully processed before the next is polled.
pub async fn run_mqtt(settings: BrokerSettings, pipeline: &IngestPipeline) -> Result<()> {
    info!(
        "Connecting to MQTT broker at {}:{}",
        settings.host, settings.port
    );

    let (client, mut eventloop) = AsyncClient::new(mqtt_options(&settings), 100);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Subscribe on every (re)connect
                client
                    .subscribe(settings.topic.as_str(), QoS::AtLeastOnce)
                    .await?;
                info!("Subscribed to {} with QoS 1", settings.topic);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                pipeline.handle_frame(&publish.payload).await;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn mqtt_options(settings: &BrokerSettings) -> MqttOptions {
    let mut options = MqttOptions::new(
        settings.client_id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(60));
    // Broker-side session only for a configured client id
    options.set_clean_session(!settings.persistent_session);
    if let Some((username, password)) = &settings.credentials {
        options.set_credentials(username.clone(), password.clone());
    }
    options
}
