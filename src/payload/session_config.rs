//! Session-configuration bodies and the heartbeat parameters derived from
//! them.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Top-level marker of every session-configuration body.
pub const SIGNAL_CONFIG: &str = "ietf-dots-signal-channel:signal-config";

/// Which half of the server's configuration drives the heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionConfigMode {
    /// Parameters used while no mitigation is active.
    #[default]
    Idle,
    /// Parameters used while a mitigation is active.
    Mitigating,
}

impl FromStr for SessionConfigMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "mitigating" => Ok(Self::Mitigating),
            other => Err(format!("unknown session config mode '{other}'")),
        }
    }
}

impl fmt::Display for SessionConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Mitigating => f.write_str("mitigating"),
        }
    }
}

/// Reply to a session-configuration read, also pushed as a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationResponse {
    /// Current configuration.
    #[serde(rename = "ietf-dots-signal-channel:signal-config")]
    pub signal_config: SignalConfigs,
}

/// Both configuration halves.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SignalConfigs {
    /// Values applied while mitigating.
    pub mitigating_config: SignalConfig,
    /// Values applied while idle.
    pub idle_config: SignalConfig,
}

/// One configuration half.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SignalConfig {
    /// Heartbeat interval in seconds.
    pub heartbeat_interval: IntParameter,
    /// Consecutive missed heartbeats tolerated.
    pub missing_hb_allowed: IntParameter,
    /// Maximum retransmissions of a confirmable message.
    pub max_retransmit: IntParameter,
    /// Initial acknowledgement timeout in seconds.
    pub ack_timeout: DecimalParameter,
    /// Random factor applied to the acknowledgement timeout.
    pub ack_random_factor: DecimalParameter,
}

/// Integer parameter with its permitted range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct IntParameter {
    /// Upper bound accepted by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<u32>,
    /// Lower bound accepted by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<u32>,
    /// Value in force.
    pub current_value: u32,
}

/// Decimal parameter with its permitted range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DecimalParameter {
    /// Upper bound accepted by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    /// Lower bound accepted by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    /// Value in force.
    pub current_value: f64,
}

/// Session-configuration request body, echoed by the server for methods
/// other than GET.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfigRequest {
    /// Requested configuration.
    #[serde(rename = "ietf-dots-signal-channel:signal-config")]
    pub signal_config: RequestedSignalConfig,
}

/// Requested configuration values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RequestedSignalConfig {
    /// Session-configuration identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<u32>,
    /// Values for the mitigating half.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mitigating_config: Option<SignalConfig>,
    /// Values for the idle half.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_config: Option<SignalConfig>,
}

/// Heartbeat and retransmission values selected from a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatParams {
    /// Keepalive period.
    pub interval: Duration,
    /// Consecutive missed acknowledgements tolerated.
    pub missing_hb_allowed: u32,
    /// Maximum retransmissions of a confirmable message.
    pub max_retransmit: u32,
    /// Initial acknowledgement timeout.
    pub ack_timeout: Duration,
    /// Random factor applied to the acknowledgement timeout.
    pub ack_random_factor: f64,
}

impl ConfigurationResponse {
    /// Select the configuration half for `mode`.
    #[must_use]
    pub const fn config_for(&self, mode: SessionConfigMode) -> &SignalConfig {
        match mode {
            SessionConfigMode::Idle => &self.signal_config.idle_config,
            SessionConfigMode::Mitigating => &self.signal_config.mitigating_config,
        }
    }

    /// Heartbeat parameters for `mode`. Decimal values are rounded to two
    /// places.
    #[must_use]
    pub fn heartbeat_params(&self, mode: SessionConfigMode) -> HeartbeatParams {
        let cfg = self.config_for(mode);
        let ack_timeout = round2(cfg.ack_timeout.current_value).max(0.0);
        HeartbeatParams {
            interval: Duration::from_secs(u64::from(cfg.heartbeat_interval.current_value)),
            missing_hb_allowed: cfg.missing_hb_allowed.current_value,
            max_retransmit: cfg.max_retransmit.current_value,
            ack_timeout: Duration::try_from_secs_f64(ack_timeout).unwrap_or_default(),
            ack_random_factor: round2(cfg.ack_random_factor.current_value),
        }
    }
}

fn round2(value: f64) -> f64 { (value * 100.0).round() / 100.0 }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn config(interval: u32, allowed: u32) -> SignalConfig {
        SignalConfig {
            heartbeat_interval: IntParameter {
                current_value: interval,
                ..IntParameter::default()
            },
            missing_hb_allowed: IntParameter {
                current_value: allowed,
                ..IntParameter::default()
            },
            max_retransmit: IntParameter {
                current_value: 3,
                ..IntParameter::default()
            },
            ack_timeout: DecimalParameter {
                current_value: 2.004,
                ..DecimalParameter::default()
            },
            ack_random_factor: DecimalParameter {
                current_value: 1.5,
                ..DecimalParameter::default()
            },
        }
    }

    #[rstest]
    #[case(SessionConfigMode::Idle, 30, 5)]
    #[case(SessionConfigMode::Mitigating, 15, 3)]
    fn mode_selects_configuration_half(
        #[case] mode: SessionConfigMode,
        #[case] interval: u64,
        #[case] allowed: u32,
    ) {
        let response = ConfigurationResponse {
            signal_config: SignalConfigs {
                mitigating_config: config(15, 3),
                idle_config: config(30, 5),
            },
        };

        let params = response.heartbeat_params(mode);

        assert_eq!(params.interval, Duration::from_secs(interval));
        assert_eq!(params.missing_hb_allowed, allowed);
        assert_eq!(params.ack_timeout, Duration::from_secs(2));
        assert_eq!(params.max_retransmit, 3);
    }

    #[rstest]
    fn mode_parses_from_text() {
        assert_eq!("Mitigating".parse(), Ok(SessionConfigMode::Mitigating));
        assert!("busy".parse::<SessionConfigMode>().is_err());
    }
}
