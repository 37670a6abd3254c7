//! Embedded MQTT broker.
//!
//! Runs a rumqttd instance inside the daemon so the pipeline needs no
//! external broker process. The broker is configured by rendering a small
//! TOML document and deserializing it into `rumqttd::Config`, the same path
//! a standalone rumqttd takes through its config file. That keeps us off the
//! crate's unstable struct internals.
//!
//! `Broker::start` blocks its thread for the life of the listener and
//! rumqttd exposes no stop handle, so the broker runs on a detached OS
//! thread that simply ends with the process. The blocking pool is not an
//! option here: the runtime joins outstanding blocking tasks on shutdown,
//! and this one never returns. A bind or configuration failure is fatal to
//! the broker thread alone; clients keep retrying through their own restart
//! policies.

use super::ConnectionError;
use crate::config::BrokerSettings;
use rumqttd::Broker;
use tracing::{error, info, warn};

pub struct MessageBroker;

impl MessageBroker {
    /// Validates the settings and starts the broker on a detached OS thread.
    ///
    /// The bind address must be an IP literal; rumqttd parses the listen
    /// field as a socket address.
    pub fn spawn(
        settings: &BrokerSettings,
    ) -> Result<std::thread::JoinHandle<()>, ConnectionError> {
        let rendered = Self::render_config(settings);
        let config: rumqttd::Config = toml::from_str(&rendered)?;
        let bind = format!("{}:{}", settings.bind_address, settings.bind_port);

        let handle = std::thread::Builder::new()
            .name("mqtt-broker".to_string())
            .spawn(move || {
                let mut broker = Broker::new(config);
                info!("message broker listening on {}", bind);
                if let Err(e) = broker.start() {
                    error!("message broker stopped: {:?}", e);
                }
            })?;
        Ok(handle)
    }

    /// Renders the rumqttd TOML for a single v4 listener.
    ///
    /// Router limits are the stock rumqttd values; only the listener address
    /// and the auth table come from our settings. The auth table is emitted
    /// when anonymous access is disabled and credentials exist. Disabling
    /// anonymous access without credentials would lock every client out, so
    /// that combination degrades to anonymous with a warning.
    fn render_config(settings: &BrokerSettings) -> String {
        let mut auth = String::new();
        if !settings.allow_anonymous {
            match &settings.credentials {
                Some(credentials) => {
                    // toml::Value renders a quoted, escaped TOML string, so
                    // credentials cannot break the document syntax.
                    auth = format!(
                        "\n[v4.main.connections.auth]\n{} = {}\n",
                        toml::Value::String(credentials.username.clone()),
                        toml::Value::String(credentials.password.clone()),
                    );
                }
                None => warn!(
                    "broker disallows anonymous access but has no credentials; keeping anonymous access"
                ),
            }
        }

        format!(
            r#"id = 0

[router]
id = 0
max_connections = 10010
max_outgoing_packet_count = 200
max_segment_size = 104857600
max_segment_count = 10

[v4.main]
name = "main"
listen = "{}:{}"
next_connection_delay_ms = 1

[v4.main.connections]
connection_timeout_ms = 60000
max_payload_size = 20480
max_inflight_count = 100
dynamic_filters = true
{}"#,
            settings.bind_address, settings.bind_port, auth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    #[test]
    fn rendered_config_deserializes_into_rumqttd() {
        let rendered = MessageBroker::render_config(&BrokerSettings::default());
        let config: rumqttd::Config =
            toml::from_str(&rendered).expect("rumqttd must accept the rendered config");
        assert_eq!(config.id, 0);
        assert_eq!(config.router.max_connections, 10010);
    }

    #[test]
    fn auth_table_present_only_when_anonymous_disabled() {
        let mut settings = BrokerSettings::default();
        assert!(!MessageBroker::render_config(&settings).contains("auth"));

        settings.allow_anonymous = false;
        settings.credentials = Some(Credentials {
            username: "night".to_string(),
            password: "sense".to_string(),
        });
        let rendered = MessageBroker::render_config(&settings);
        assert!(rendered.contains("[v4.main.connections.auth]"));
        assert!(rendered.contains("\"night\" = \"sense\""));
        toml::from_str::<rumqttd::Config>(&rendered).expect("auth config must still parse");
    }

    #[test]
    fn missing_credentials_degrade_to_anonymous() {
        let settings = BrokerSettings {
            allow_anonymous: false,
            credentials: None,
            ..BrokerSettings::default()
        };
        assert!(!MessageBroker::render_config(&settings).contains("auth"));
    }

    #[test]
    fn listener_uses_the_configured_address() {
        let settings = BrokerSettings {
            bind_port: 2883,
            ..BrokerSettings::default()
        };
        let rendered = MessageBroker::render_config(&settings);
        assert!(rendered.contains("listen = \"127.0.0.1:2883\""));
    }

    #[test]
    fn credentials_with_special_characters_render_valid_toml() {
        let settings = BrokerSettings {
            allow_anonymous: false,
            credentials: Some(Credentials {
                username: "ni\"ght".to_string(),
                password: "pa\\ss\"word".to_string(),
            }),
            ..BrokerSettings::default()
        };
        let rendered = MessageBroker::render_config(&settings);
        toml::from_str::<rumqttd::Config>(&rendered)
            .expect("escaped credentials must stay parseable");
    }

    // A broker parked on the blocking pool would hang this test at runtime
    // teardown; on a detached thread the test ends normally.
    #[tokio::test]
    async fn spawn_runs_the_broker_off_the_runtime() {
        let settings = BrokerSettings {
            bind_port: 18845,
            ..BrokerSettings::default()
        };
        let handle: std::thread::JoinHandle<()> =
            MessageBroker::spawn(&settings).expect("spawn broker");
        assert!(!handle.is_finished());
    }
}
