//! Publishing side of the channel: the simulated sensor device.
//!
//! [`SensorSimulator`] stands in for the physical night-stand sensor and
//! draws each field independently from its configured range, rounded to two
//! decimals the way a fixed-point sensor would report.
//! [`DevicePublisher`] wraps it in a connect-and-publish loop with one
//! reading per interval tick.

use super::{client_options, ConnectionError};
use crate::codec::ReadingCodec;
use crate::config::{ChannelSettings, FieldRange, SimulatorSettings};
use crate::reading::SensorReading;
use rand::Rng;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Packet, QoS};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CLIENT_ID: &str = "nightsense-device";
const REQUEST_CAPACITY: usize = 10;

/// Synthetic source of sleep-environment readings.
#[derive(Debug, Clone)]
pub struct SensorSimulator {
    temperature: FieldRange,
    humidity: FieldRange,
    loudness: FieldRange,
    light_level: FieldRange,
}

impl SensorSimulator {
    pub fn new(settings: &SimulatorSettings) -> Self {
        Self {
            temperature: ordered(settings.temperature, "temperature"),
            humidity: ordered(settings.humidity, "humidity"),
            loudness: ordered(settings.loudness, "loudness"),
            light_level: ordered(settings.light_level, "light_level"),
        }
    }

    /// Draws one reading, each field uniform within its inclusive range.
    pub fn sample(&self) -> SensorReading {
        let mut rng = rand::thread_rng();
        SensorReading {
            temperature: round2(rng.gen_range(self.temperature.min..=self.temperature.max)),
            humidity: round2(rng.gen_range(self.humidity.min..=self.humidity.max)),
            loudness: round2(rng.gen_range(self.loudness.min..=self.loudness.max)),
            light_level: round2(rng.gen_range(self.light_level.min..=self.light_level.max)),
        }
    }
}

/// Sampling ranges must be non-empty or `gen_range` panics.
fn ordered(range: FieldRange, name: &str) -> FieldRange {
    if range.min <= range.max {
        range
    } else {
        warn!(
            "inverted {} range {}..{}; swapping bounds",
            name, range.min, range.max
        );
        FieldRange {
            min: range.max,
            max: range.min,
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Connects to the broker and publishes one sampled reading per tick.
pub struct DevicePublisher {
    channel: ChannelSettings,
    simulator: SensorSimulator,
    codec: ReadingCodec,
    interval: Duration,
}

impl DevicePublisher {
    pub fn new(
        channel: ChannelSettings,
        simulator: SensorSimulator,
        codec: ReadingCodec,
        interval: Duration,
    ) -> Self {
        Self {
            channel,
            simulator,
            codec,
            interval,
        }
    }

    /// Publish loop. Runs until cancelled (Ok) or until the transport fails
    /// (Err); a failed cycle is dropped with a warning, not retried in
    /// place, and connection loss surfaces through the event loop for the
    /// supervisor to rebuild the whole client.
    pub async fn run(self, token: CancellationToken) -> Result<(), ConnectionError> {
        let options = client_options(CLIENT_ID, &self.channel);
        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "device publisher connecting to {}:{}",
            self.channel.connect_address, self.channel.connect_port
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("device publisher stopping");
                    let _ = client.disconnect().await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let reading = self.simulator.sample();
                    match self.codec.encode(&reading) {
                        Ok(payload) => {
                            // try_publish never waits for queue space, so a
                            // wedged link costs this sample rather than the
                            // loop's responsiveness to cancellation.
                            let queued = client.try_publish(
                                self.channel.topic.as_str(),
                                QoS::AtLeastOnce,
                                false,
                                payload,
                            );
                            match queued {
                                Ok(()) => debug!("published reading {:?}", reading),
                                Err(e) => warn!("publish skipped: {}", e),
                            }
                        }
                        // Encoding failure is a key problem, not a transport
                        // problem; skip the cycle and keep the connection.
                        Err(e) => error!("failed to encode reading: {}", e),
                    }
                }
                event = eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code == ConnectReturnCode::Success {
                                info!("device publisher connected");
                            } else {
                                return Err(ConnectionError::Rejected(format!("{:?}", ack.code)));
                            }
                        }
                        Ok(_) => {}
                        Err(e) => return Err(ConnectionError::Transport(e)),
                    }
                }
            }
        }
    }
}
