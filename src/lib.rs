//! # nightsense
//!
//! Sleep-environment telemetry core. An embedded MQTT broker, a simulated
//! bedside sensor publishing readings, and a subscribing ingestor that
//! persists every reading to SQLite run side by side under one supervisor;
//! a backup scheduler periodically snapshots the database and can offload
//! the snapshots to an FTP file-drop. Payloads cross the broker as JSON,
//! optionally sealed with RSA-OAEP.
//!
//! ## Module Architecture
//!
//! ```text
//! supervisor ── restart policies, start order, graceful drain
//!     ├── mqtt::broker     embedded rumqttd listener
//!     ├── mqtt::publisher  simulated device, interval publishing
//!     ├── mqtt::subscriber ingest state machine (statum)
//!     └── backup           snapshot + FTP offload scheduler
//! codec ── JSON encoding, optional RSA sealing (codec::keys)
//! storage ── SQLite store: insert, recent, latest, snapshot, seed
//! reading ── wire/storage data model shared by all of the above
//! config ── layered TOML configuration for every component
//! ```

pub mod backup;
pub mod codec;
pub mod config;
pub mod mqtt;
pub mod reading;
pub mod storage;
pub mod supervisor;
