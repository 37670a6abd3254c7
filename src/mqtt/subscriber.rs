//! Subscribing side of the channel: the ingestor persisting readings.
//!
//! The connection lifecycle is a statum state machine so that each phase
//! only exposes the operations that are valid in it:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Subscribed ──► Receiving
//!       ▲                                                          │
//!       └──────────── (machine dropped, supervisor redials) ◄──────┘
//! ```
//!
//! A connection-level failure in any state drops the machine (client and
//! event loop with it) and surfaces as an error; the supervisor rebuilds the
//! whole machine from `Disconnected`. A failure on a single *message* never
//! does: decode and insert run per delivery inside [`ingest_payload`], the
//! error is logged and the loop keeps receiving.

use super::{client_options, ConnectionError};
use crate::codec::{CodecError, ReadingCodec};
use crate::config::ChannelSettings;
use crate::storage::{SensorStore, StorageError};
use chrono::Local;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Packet, QoS, SubscribeReasonCode,
};
use statum::{machine, state};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CLIENT_ID: &str = "nightsense-ingest";
const REQUEST_CAPACITY: usize = 10;

/// Why one delivered message was dropped.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Decodes one payload and appends it to the store, stamped with the local
/// wall-clock time of ingestion.
///
/// This is the whole per-message contract of the ingestor; it is a free
/// function so the message-fault isolation can be exercised without a
/// running broker.
pub fn ingest_payload(
    codec: &ReadingCodec,
    store: &SensorStore,
    payload: &[u8],
) -> Result<i64, IngestError> {
    let reading = codec.decode(payload)?;
    let id = store.insert(&reading, Local::now().naive_local())?;
    Ok(id)
}

/// Connection lifecycle states for the ingestor.
#[state]
#[derive(Debug, Clone)]
pub enum IngestorState {
    Disconnected, // No client resources held
    Connecting,   // Client built, session not yet acknowledged
    Connected,    // Session acknowledged by the broker
    Subscribed,   // Topic subscription acknowledged
    Receiving,    // Pumping deliveries into the store
}

/// Ingestor with compile-time lifecycle safety via statum.
#[machine]
pub struct Ingestor<S: IngestorState> {
    channel: ChannelSettings,
    codec: ReadingCodec,
    store: SensorStore,
    token: CancellationToken,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
}

impl Ingestor<Disconnected> {
    pub fn create(
        channel: ChannelSettings,
        codec: ReadingCodec,
        store: SensorStore,
        token: CancellationToken,
    ) -> Self {
        Self::new(channel, codec, store, token, None, None)
    }

    /// Builds the client pair and transitions to Connecting.
    pub fn connect(mut self) -> Ingestor<Connecting> {
        info!(
            "ingestor connecting to {}:{}",
            self.channel.connect_address, self.channel.connect_port
        );
        let options = client_options(CLIENT_ID, &self.channel);
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        self.client = Some(client);
        self.eventloop = Some(eventloop);
        self.transition()
    }
}

impl Ingestor<Connecting> {
    /// Polls the transport until the broker acknowledges the session.
    pub async fn establish(mut self) -> Result<Ingestor<Connected>, ConnectionError> {
        loop {
            let event = {
                let eventloop = match &mut self.eventloop {
                    Some(eventloop) => eventloop,
                    None => {
                        return Err(ConnectionError::Rejected(
                            "event loop not initialized".to_string(),
                        ))
                    }
                };
                tokio::select! {
                    _ = self.token.cancelled() => return Err(ConnectionError::Cancelled),
                    event = eventloop.poll() => event,
                }
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("ingestor session established");
                        return Ok(self.transition());
                    }
                    return Err(ConnectionError::Rejected(format!("{:?}", ack.code)));
                }
                Ok(_) => {}
                Err(e) => return Err(ConnectionError::Transport(e)),
            }
        }
    }
}

impl Ingestor<Connected> {
    /// Subscribes to the configured topic and waits for the broker's
    /// acknowledgement.
    pub async fn subscribe(mut self) -> Result<Ingestor<Subscribed>, ConnectionError> {
        {
            let client = match &self.client {
                Some(client) => client,
                None => {
                    return Err(ConnectionError::Rejected(
                        "client not initialized".to_string(),
                    ))
                }
            };
            client
                .subscribe(self.channel.topic.as_str(), QoS::AtLeastOnce)
                .await?;
            debug!("subscription requested for {}", self.channel.topic);
        }

        loop {
            let event = {
                let eventloop = match &mut self.eventloop {
                    Some(eventloop) => eventloop,
                    None => {
                        return Err(ConnectionError::Rejected(
                            "event loop not initialized".to_string(),
                        ))
                    }
                };
                tokio::select! {
                    _ = self.token.cancelled() => return Err(ConnectionError::Cancelled),
                    event = eventloop.poll() => event,
                }
            };

            match event {
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let refused = ack
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure));
                    if refused {
                        return Err(ConnectionError::Rejected(
                            "subscription refused".to_string(),
                        ));
                    }
                    info!("ingestor subscribed to {}", self.channel.topic);
                    return Ok(self.transition());
                }
                Ok(_) => {}
                Err(e) => return Err(ConnectionError::Transport(e)),
            }
        }
    }
}

impl Ingestor<Subscribed> {
    /// Enters the receive loop. Returns Ok on orderly shutdown, Err on a
    /// transport failure.
    pub async fn receive(self) -> Result<(), ConnectionError> {
        let mut machine: Ingestor<Receiving> = self.transition();
        machine.pump().await
    }
}

impl Ingestor<Receiving> {
    async fn pump(&mut self) -> Result<(), ConnectionError> {
        info!("ingestor receiving on {}", self.channel.topic);
        loop {
            let event = {
                let eventloop = match &mut self.eventloop {
                    Some(eventloop) => eventloop,
                    None => {
                        return Err(ConnectionError::Rejected(
                            "event loop not initialized".to_string(),
                        ))
                    }
                };
                tokio::select! {
                    _ = self.token.cancelled() => {
                        info!("ingestor stopping");
                        return Ok(());
                    }
                    event = eventloop.poll() => event,
                }
            };

            match event {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic != self.channel.topic {
                        debug!("ignoring message on unrelated topic {}", publish.topic);
                        continue;
                    }
                    self.ingest(publish.payload.to_vec()).await;
                }
                Ok(_) => {}
                Err(e) => return Err(ConnectionError::Transport(e)),
            }
        }
    }

    /// Decode-and-insert for one delivery, isolated so one bad payload never
    /// ends the loop. Runs on the blocking pool; decryption and SQLite are
    /// both synchronous work. Takes `&mut self`: the event loop is not
    /// `Sync`, so a shared borrow may not be held across this await.
    async fn ingest(&mut self, payload: Vec<u8>) {
        let codec = self.codec.clone();
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || ingest_payload(&codec, &store, &payload)).await {
            Ok(Ok(id)) => debug!("stored reading {}", id),
            Ok(Err(e)) => warn!("reading dropped: {}", e),
            Err(e) => warn!("ingest worker failed: {}", e),
        }
    }
}

/// Full ingestor lifecycle: build, establish, subscribe, receive.
///
/// Ok means an orderly, cancellation-driven stop; Err means the machine was
/// torn down by a connection failure and the caller should redial.
pub async fn run(
    channel: ChannelSettings,
    codec: ReadingCodec,
    store: SensorStore,
    token: CancellationToken,
) -> Result<(), ConnectionError> {
    let machine = Ingestor::create(channel, codec, store, token).connect();
    let result = async move {
        let machine = machine.establish().await?;
        let machine = machine.subscribe().await?;
        machine.receive().await
    }
    .await;

    match result {
        Err(ConnectionError::Cancelled) => {
            info!("ingestor stopped during connection setup");
            Ok(())
        }
        other => other,
    }
}
