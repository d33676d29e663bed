//! Connection configuration.
//!
//! [`QslConfig`] holds the timing and addressing knobs of a connection and is
//! fully defaulted, so an empty YAML mapping is a valid config.
//! [`NetworkConfig`] is what the application passes to `connect`.

use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use qsl_protocol::{
    JoinKey, DEFAULT_DEST_IP, DEFAULT_DEST_PORT, DEFAULT_NET_ID, INBOX_PORT, INVALID_NET_ID,
};

use crate::error::ConfigError;

/// How the `Resetting` state brings the mote back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetMode {
    /// Issue `reset`. Fastest.
    #[default]
    Reset,
    /// Issue `disconnect` first, falling back to `reset` if it is refused.
    Graceful,
}

/// Timing and addressing configuration for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QslConfig {
    /// Overall deadline for a blocking `connect`.
    pub connect_timeout_ms: u64,
    /// Overall deadline for a blocking `send`.
    pub send_timeout_ms: u64,
    /// Spacing between consecutive commands.
    pub command_period_ms: u64,
    /// How long to wait for each reply.
    pub response_timeout_ms: u64,
    /// Idle wait between steps when nothing was due.
    pub run_interval_ms: u64,
    /// Local port the inbox socket binds to.
    pub inbox_port: u16,
    /// Destination port used when `send` is given port 0.
    pub default_dest_port: u16,
    /// Destination address for outbound datagrams.
    pub dest_addr: Ipv6Addr,
    /// Reset strategy.
    pub reset_mode: ResetMode,
}

impl Default for QslConfig {
    fn default() -> Self {
        QslConfig {
            connect_timeout_ms: 180_000,
            send_timeout_ms: 1_000,
            command_period_ms: 10,
            response_timeout_ms: 500,
            run_interval_ms: 10,
            inbox_port: INBOX_PORT,
            default_dest_port: DEFAULT_DEST_PORT,
            dest_addr: Ipv6Addr::from(DEFAULT_DEST_IP),
            reset_mode: ResetMode::Reset,
        }
    }
}

impl QslConfig {
    /// Check that every duration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("send_timeout_ms", self.send_timeout_ms),
            ("command_period_ms", self.command_period_ms),
            ("response_timeout_ms", self.response_timeout_ms),
            ("run_interval_ms", self.run_interval_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroDuration(name));
        }
        if self.response_timeout_ms > self.connect_timeout_ms {
            return Err(ConfigError::ResponseTimeoutTooLong {
                response_ms: self.response_timeout_ms,
                connect_ms: self.connect_timeout_ms,
            });
        }
        Ok(())
    }

    /// Destination address as raw octets.
    pub fn dest_addr_octets(&self) -> [u8; 16] {
        self.dest_addr.octets()
    }
}

/// Network credentials and bandwidth request passed to `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network to join. 0 selects the default network, 0xFFFF is invalid.
    pub network_id: u16,
    /// Join key, hex encoded in config files. Absent selects the default key.
    #[serde(with = "hex_key", skip_serializing_if = "Option::is_none")]
    pub join_key: Option<JoinKey>,
    /// Requested packet interval. 0 skips the bandwidth request.
    pub service_ms: u32,
}

impl NetworkConfig {
    /// Credentials for `network_id` with the default key and no service request.
    pub fn new(network_id: u16) -> Self {
        NetworkConfig {
            network_id,
            ..Default::default()
        }
    }

    /// Use a specific join key.
    pub fn with_join_key(mut self, key: JoinKey) -> Self {
        self.join_key = Some(key);
        self
    }

    /// Request a packet interval after joining.
    pub fn with_service_ms(mut self, service_ms: u32) -> Self {
        self.service_ms = service_ms;
        self
    }

    /// Whether the network id is usable.
    pub fn is_valid(&self) -> bool {
        self.network_id != INVALID_NET_ID
    }

    /// Network id after default substitution.
    pub fn effective_network_id(&self) -> u16 {
        match self.network_id {
            0 => DEFAULT_NET_ID,
            id => id,
        }
    }

    /// Join key after default substitution.
    pub fn effective_join_key(&self) -> JoinKey {
        self.join_key.unwrap_or_default()
    }
}

mod hex_key {
    use qsl_protocol::{JoinKey, JOIN_KEY_LEN};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<JoinKey>, serializer: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => serializer.serialize_some(&hex::encode(key.as_bytes())),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<JoinKey>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        text.map(|text| {
            let bytes = hex::decode(text.trim()).map_err(D::Error::custom)?;
            JoinKey::from_slice(&bytes).ok_or_else(|| {
                D::Error::custom(format!(
                    "join key must be {} bytes, got {}",
                    JOIN_KEY_LEN,
                    bytes.len()
                ))
            })
        })
        .transpose()
    }
}
