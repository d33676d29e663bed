//! Scriptable mote behavior.

use qsl_protocol::{CommandKind, JoinKey, MoteState, ResultCode};
use serde::{Deserialize, Serialize};

// ============================================================================
// Faults
// ============================================================================

/// Answer a command with a fixed result code instead of executing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyOverride {
    /// Command to intercept.
    pub command: CommandKind,
    /// Result code to answer with.
    pub rc: ResultCode,
    /// How many times to apply. `None` applies forever.
    #[serde(default)]
    pub times: Option<u32>,
}

/// Drop or corrupt the reply to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFault {
    /// Command whose reply is affected.
    pub command: CommandKind,
    /// How many times to apply. `None` applies forever.
    #[serde(default)]
    pub times: Option<u32>,
}

/// Something that applies to a command a bounded number of times.
pub(crate) trait Counted {
    fn command(&self) -> CommandKind;
    fn times_mut(&mut self) -> &mut Option<u32>;
}

impl Counted for ReplyOverride {
    fn command(&self) -> CommandKind {
        self.command
    }

    fn times_mut(&mut self) -> &mut Option<u32> {
        &mut self.times
    }
}

impl Counted for ReplyFault {
    fn command(&self) -> CommandKind {
        self.command
    }

    fn times_mut(&mut self) -> &mut Option<u32> {
        &mut self.times
    }
}

/// Consume one use of the first entry for `kind`. Entries whose count runs
/// out are removed.
pub(crate) fn take_matching<T: Counted + Clone>(entries: &mut Vec<T>, kind: CommandKind) -> Option<T> {
    let index = entries.iter().position(|entry| entry.command() == kind)?;
    let entry = entries[index].clone();
    let exhausted = match entries[index].times_mut() {
        Some(remaining) => {
            *remaining = remaining.saturating_sub(1);
            *remaining == 0
        }
        None => false,
    };
    if exhausted {
        entries.remove(index);
    }
    Some(entry)
}

// ============================================================================
// Behavior
// ============================================================================

/// How a simulated mote answers commands and how long things take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoteBehavior {
    /// Delay between a command and its reply.
    pub reply_latency_ms: u64,
    /// Time from an accepted join to the operational event.
    pub join_duration_ms: u64,
    /// Time from a reset or disconnect to the boot event.
    pub boot_delay_ms: u64,
    /// Time from an accepted service request to the service-change event.
    pub service_delay_ms: u64,
    /// How many service queries report "pending" before completing.
    pub service_pending_polls: u32,
    /// Interval the manager grants. `None` grants what was asked for.
    pub granted_service_ms: Option<u32>,
    /// Mote state at power-up.
    pub initial_state: MoteState,
    /// Only this network accepts the mote. `None` accepts any.
    pub accepted_network_id: Option<u16>,
    /// Only this key is accepted. `None` accepts any.
    #[serde(with = "hex_key_opt")]
    pub accepted_join_key: Option<JoinKey>,
    /// How many sockets can be open at once.
    pub max_sockets: u8,
    /// Forced result codes.
    pub overrides: Vec<ReplyOverride>,
    /// Replies that never arrive.
    pub dropped_replies: Vec<ReplyFault>,
    /// Replies truncated to their command id.
    pub malformed_replies: Vec<ReplyFault>,
    /// Probability that any reply is lost.
    pub reply_loss: f64,
    /// Seed for `reply_loss`.
    pub seed: u64,
    /// Echo every sent datagram back as a receive notification.
    pub loopback: bool,
}

impl Default for MoteBehavior {
    fn default() -> Self {
        MoteBehavior {
            reply_latency_ms: 5,
            join_duration_ms: 200,
            boot_delay_ms: 50,
            service_delay_ms: 100,
            service_pending_polls: 1,
            granted_service_ms: None,
            initial_state: MoteState::Idle,
            accepted_network_id: None,
            accepted_join_key: None,
            max_sockets: 1,
            overrides: Vec::new(),
            dropped_replies: Vec::new(),
            malformed_replies: Vec::new(),
            reply_loss: 0.0,
            seed: 0,
            loopback: false,
        }
    }
}

impl MoteBehavior {
    /// Answer `command` with `rc` the next `times` times (forever if `None`).
    pub fn with_override(mut self, command: CommandKind, rc: ResultCode, times: Option<u32>) -> Self {
        self.overrides.push(ReplyOverride { command, rc, times });
        self
    }

    /// Drop the next `times` replies to `command`.
    pub fn with_dropped(mut self, command: CommandKind, times: Option<u32>) -> Self {
        self.dropped_replies.push(ReplyFault { command, times });
        self
    }

    /// Corrupt the next `times` replies to `command`.
    pub fn with_malformed(mut self, command: CommandKind, times: Option<u32>) -> Self {
        self.malformed_replies.push(ReplyFault { command, times });
        self
    }
}

mod hex_key_opt {
    use qsl_protocol::JoinKey;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<JoinKey>, s: S) -> Result<S::Ok, S::Error> {
        match key {
            Some(key) => s.serialize_some(&hex::encode(key.as_bytes())),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<JoinKey>, D::Error> {
        let Some(text) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        let bytes = hex::decode(text.trim()).map_err(D::Error::custom)?;
        JoinKey::from_slice(&bytes)
            .map(Some)
            .ok_or_else(|| D::Error::custom("join key must be 16 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_matching_counts_down() {
        let mut faults = vec![ReplyFault {
            command: CommandKind::Join,
            times: Some(2),
        }];
        assert!(take_matching(&mut faults, CommandKind::Reset).is_none());
        assert!(take_matching(&mut faults, CommandKind::Join).is_some());
        assert_eq!(faults.len(), 1);
        assert!(take_matching(&mut faults, CommandKind::Join).is_some());
        assert!(faults.is_empty());
        assert!(take_matching(&mut faults, CommandKind::Join).is_none());
    }

    #[test]
    fn test_unbounded_fault_persists() {
        let mut faults = vec![ReplyFault {
            command: CommandKind::SendTo,
            times: None,
        }];
        for _ in 0..5 {
            assert!(take_matching(&mut faults, CommandKind::SendTo).is_some());
        }
        assert_eq!(faults.len(), 1);
    }

    #[test]
    fn test_behavior_from_yaml() {
        let yaml = r#"
join_duration_ms: 1000
granted_service_ms: 5000
accepted_network_id: 4660
accepted_join_key: "000102030405060708090a0b0c0d0e0f"
overrides:
  - command: send_to
    rc: no_resources
    times: 1
dropped_replies:
  - command: join
"#;
        let behavior: MoteBehavior = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(behavior.join_duration_ms, 1000);
        assert_eq!(behavior.reply_latency_ms, 5);
        assert_eq!(behavior.granted_service_ms, Some(5000));
        assert_eq!(behavior.accepted_network_id, Some(0x1234));
        assert_eq!(behavior.accepted_join_key.map(|k| k.as_bytes()[15]), Some(0x0F));
        assert_eq!(behavior.overrides[0].rc, ResultCode::NoResources);
        assert_eq!(behavior.dropped_replies[0].times, None);
        assert_eq!(behavior.initial_state, MoteState::Idle);
    }

    #[test]
    fn test_bad_join_key_is_rejected() {
        let yaml = "accepted_join_key: \"abc\"\n";
        assert!(serde_yaml::from_str::<MoteBehavior>(yaml).is_err());
    }
}
