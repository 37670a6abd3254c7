//! End-to-end pipeline checks: sealing, ingestion and backup run against
//! real key files and a real database, plus one full publisher-to-store
//! pass over a live embedded broker on a loopback port.

use chrono::NaiveDateTime;
use nightsense::backup::BackupScheduler;
use nightsense::codec::keys::KeyMaterial;
use nightsense::codec::ReadingCodec;
use nightsense::config::{
    BackupSettings, BrokerSettings, ChannelSettings, FieldRange, SimulatorSettings,
};
use nightsense::mqtt::{
    ingest_payload, subscriber, DevicePublisher, IngestError, MessageBroker, SensorSimulator,
};
use nightsense::reading::{SensorReading, TIMESTAMP_FORMAT};
use nightsense::storage::{LatestValue, SensorStore};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn sealed_codec() -> ReadingCodec {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let keys = KeyMaterial::load(&dir).expect("fixture keys must load");
    ReadingCodec::sealed(keys)
}

fn sample_reading() -> SensorReading {
    SensorReading {
        temperature: 21.0,
        humidity: 55.0,
        loudness: 30.0,
        light_level: 120.0,
    }
}

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).expect("test timestamp")
}

#[test]
fn sealed_codec_round_trips_a_reading() {
    let codec = sealed_codec();
    let payload = codec.encode(&sample_reading()).expect("encode");
    // RSA-OAEP over a 2048-bit modulus: one 256-byte block.
    assert_eq!(payload.len(), 256);
    assert_eq!(codec.decode(&payload).expect("decode"), sample_reading());
}

#[test]
fn sealed_ciphertexts_differ_between_encodes() {
    let codec = sealed_codec();
    let first = codec.encode(&sample_reading()).expect("encode");
    let second = codec.encode(&sample_reading()).expect("encode");

    // OAEP padding is randomized, so equal readings never collide on the
    // wire, yet both decode to the same value.
    assert_ne!(first, second);
    assert_eq!(
        codec.decode(&first).expect("decode"),
        codec.decode(&second).expect("decode")
    );
}

#[test]
fn sealed_payload_lands_in_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SensorStore::open(dir.path().join("sensordata.db")).expect("open store");
    let codec = sealed_codec();

    let payload = codec.encode(&sample_reading()).expect("encode");
    ingest_payload(&codec, &store, &payload).expect("ingest");

    assert_eq!(
        store.latest("humidity").expect("latest"),
        Some(LatestValue::Measurement(55.0))
    );
    assert!(matches!(
        store.latest("timestamp").expect("latest"),
        Some(LatestValue::Timestamp(_))
    ));
}

#[test]
fn corrupt_payload_is_dropped_without_poisoning_the_stream() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SensorStore::open(dir.path().join("sensordata.db")).expect("open store");
    let codec = sealed_codec();

    let mut corrupt = codec.encode(&sample_reading()).expect("encode");
    corrupt.truncate(corrupt.len() - 7);
    let err = ingest_payload(&codec, &store, &corrupt).unwrap_err();
    assert!(matches!(err, IngestError::Codec(_)));
    assert!(store.recent(10).is_empty());

    // The next well-formed payload still goes through.
    let good = codec.encode(&sample_reading()).expect("encode");
    ingest_payload(&codec, &store, &good).expect("ingest");
    assert_eq!(store.recent(10).len(), 1);
}

#[test]
fn mode_mismatch_fails_per_message_not_silently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SensorStore::open(dir.path().join("sensordata.db")).expect("open store");

    let sealed = sealed_codec();
    let plaintext = ReadingCodec::plaintext();

    let payload = sealed.encode(&sample_reading()).expect("encode");
    let err = ingest_payload(&plaintext, &store, &payload).unwrap_err();
    assert!(matches!(err, IngestError::Codec(_)));
    assert!(store.recent(10).is_empty());
}

#[tokio::test]
async fn reading_crosses_the_broker_into_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SensorStore::open(dir.path().join("sensordata.db")).expect("open store");
    let codec = sealed_codec();

    let broker_settings = BrokerSettings {
        bind_port: 18931,
        ..BrokerSettings::default()
    };
    MessageBroker::spawn(&broker_settings).expect("spawn broker");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let channel = ChannelSettings {
        connect_port: 18931,
        ..ChannelSettings::default()
    };
    let token = CancellationToken::new();
    let ingest = tokio::spawn(subscriber::run(
        channel.clone(),
        codec.clone(),
        store.clone(),
        token.clone(),
    ));
    // The ingestor must reach its subscription before the first publish;
    // nothing is retained for late subscribers.
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Degenerate ranges pin every sampled field to a known value.
    let simulator_settings = SimulatorSettings {
        publish_interval_secs: 1,
        temperature: FieldRange {
            min: 21.0,
            max: 21.0,
        },
        humidity: FieldRange {
            min: 55.0,
            max: 55.0,
        },
        loudness: FieldRange {
            min: 30.0,
            max: 30.0,
        },
        light_level: FieldRange {
            min: 120.0,
            max: 120.0,
        },
        ..SimulatorSettings::default()
    };
    let publisher = DevicePublisher::new(
        channel,
        SensorSimulator::new(&simulator_settings),
        codec,
        simulator_settings.publish_interval(),
    );
    let publish = tokio::spawn(publisher.run(token.clone()));

    let mut landed = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(value) = store.latest("humidity").expect("latest") {
            landed = Some(value);
            break;
        }
    }
    assert_eq!(landed, Some(LatestValue::Measurement(55.0)));
    assert_eq!(
        store.latest("temperature").expect("latest"),
        Some(LatestValue::Measurement(21.0))
    );

    token.cancel();
    publish.await.expect("join publisher").expect("publisher run");
    ingest.await.expect("join ingestor").expect("ingestor run");
}

#[tokio::test]
async fn backup_scheduler_produces_loadable_snapshots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SensorStore::open(dir.path().join("sensordata.db")).expect("open store");
    for i in 0..5 {
        let stamp = ts(&format!("2024-03-01 10:00:0{}", i));
        store.insert(&sample_reading(), stamp).expect("insert");
    }

    let backup_dir = dir.path().join("backups");
    let settings = BackupSettings {
        interval_secs: 1,
        local_dir: backup_dir.clone(),
        remote: None,
    };
    let token = CancellationToken::new();
    let scheduler = BackupScheduler::new(store.clone(), settings);
    let handle = tokio::spawn(scheduler.run(token.clone()));

    // Long enough for exactly one 1 s cycle to fire.
    tokio::time::sleep(Duration::from_millis(1400)).await;
    token.cancel();
    handle.await.expect("join").expect("scheduler run");

    let snapshots: Vec<_> = std::fs::read_dir(&backup_dir)
        .expect("read backup dir")
        .collect::<Result<_, _>>()
        .expect("dir entries");
    assert!(!snapshots.is_empty());

    let copy = SensorStore::open(snapshots[0].path()).expect("open snapshot");
    assert_eq!(copy.recent(100).len(), 5);
}
