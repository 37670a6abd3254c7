//! # MQTT Channel
//!
//! Everything that touches the message channel lives here: the embedded
//! broker, the publishing device simulator, and the subscribing ingestor.
//! The three are deliberately independent. Publisher and ingestor are
//! ordinary TCP clients of the broker and share no state with it beyond the
//! configured address and topic, so any of them can die and be rebuilt
//! without the others noticing more than a dropped connection.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── broker.rs      - embedded rumqttd broker (detached OS thread, fire-and-forget)
//! ├── publisher.rs   - SensorSimulator + DevicePublisher publish loop
//! └── subscriber.rs  - typestate Ingestor feeding the persistent store
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! SensorSimulator ──► ReadingCodec::encode ──► publish(topic)
//!                                                  │ (broker)
//! SensorStore ◄── ingest_payload ◄─── deliveries on topic
//! ```
//!
//! Failure policy: connection-level errors end the affected client's run and
//! surface to the supervisor, which rebuilds it with backoff. Per-message
//! problems never do; see `subscriber::ingest_payload`.

pub mod broker;
pub mod publisher;
pub mod subscriber;

pub use broker::MessageBroker;
pub use publisher::{DevicePublisher, SensorSimulator};
pub use subscriber::{ingest_payload, IngestError};

use crate::config::ChannelSettings;
use rumqttc::MqttOptions;
use std::time::Duration;
use thiserror::Error;

const KEEP_ALIVE_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Client-side request failure (publish/subscribe could not be issued).
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    /// Transport-level failure while polling the connection.
    #[error("mqtt transport error: {0}")]
    Transport(#[from] rumqttc::ConnectionError),

    /// The broker refused the session or the subscription.
    #[error("broker rejected the session: {0}")]
    Rejected(String),

    /// The rendered broker configuration did not deserialize.
    #[error("invalid broker configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The broker's OS thread could not be spawned.
    #[error("broker thread error: {0}")]
    Thread(#[from] std::io::Error),

    /// Shutdown was requested while the connection was still being set up.
    #[error("connection setup interrupted by shutdown")]
    Cancelled,
}

/// Client options shared by publisher and ingestor.
pub(crate) fn client_options(client_id: &str, channel: &ChannelSettings) -> MqttOptions {
    let mut options = MqttOptions::new(
        client_id,
        channel.connect_address.as_str(),
        channel.connect_port,
    );
    options.set_keep_alive(Duration::from_secs(KEEP_ALIVE_SECS));
    if let Some(credentials) = &channel.credentials {
        options.set_credentials(credentials.username.clone(), credentials.password.clone());
    }
    options
}
