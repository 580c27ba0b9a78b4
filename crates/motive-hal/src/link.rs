//! Transport selection from configuration.

use std::path::PathBuf;

use motive_protocol::transport::Transport;
use motive_types::MotiveError;
use serde::{Deserialize, Serialize};

use crate::replay::ReplayTransport;
use crate::serial::{DEFAULT_BAUD, SerialTransport};
use crate::sim::SimRobot;
use crate::tcp::TcpTransport;

/// Which link to build, as written in the configuration file:
///
/// ```toml
/// [transport]
/// kind = "serial"
/// port = "/dev/ttyUSB0"
/// baud = 9600
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSpec {
    Serial {
        port: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    Tcp {
        addr: String,
    },
    Replay {
        path: PathBuf,
        #[serde(default)]
        looping: bool,
    },
    #[default]
    Sim,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

impl TransportSpec {
    /// Build from a kind keyword plus its single parameter, as used by
    /// environment overrides.
    pub fn from_parts(
        kind: &str,
        target: Option<&str>,
        baud: Option<u32>,
    ) -> Result<Self, MotiveError> {
        let need = |what: &str| {
            target
                .map(str::to_string)
                .ok_or_else(|| MotiveError::Config(format!("transport '{kind}' needs {what}")))
        };
        match kind {
            "serial" => Ok(TransportSpec::Serial {
                port: need("a port")?,
                baud: baud.unwrap_or(DEFAULT_BAUD),
            }),
            "tcp" => Ok(TransportSpec::Tcp {
                addr: need("an address")?,
            }),
            "replay" => Ok(TransportSpec::Replay {
                path: PathBuf::from(need("a log path")?),
                looping: false,
            }),
            "sim" => Ok(TransportSpec::Sim),
            other => Err(MotiveError::Config(format!("unknown transport kind '{other}'"))),
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            TransportSpec::Serial { port, baud } => format!("serial {port} @ {baud}"),
            TransportSpec::Tcp { addr } => format!("tcp {addr}"),
            TransportSpec::Replay { path, .. } => format!("replay {}", path.display()),
            TransportSpec::Sim => "simulator".to_string(),
        }
    }
}

/// Construct the (unopened) link described by `spec`.
pub fn open_transport(spec: &TransportSpec) -> Box<dyn Transport> {
    match spec {
        TransportSpec::Serial { port, baud } => Box::new(SerialTransport::new(port.clone(), *baud)),
        TransportSpec::Tcp { addr } => Box::new(TcpTransport::new(addr.clone())),
        TransportSpec::Replay { path, looping } => {
            Box::new(ReplayTransport::new(path).looping(*looping))
        }
        TransportSpec::Sim => Box::new(SimRobot::new()),
    }
}

#[cfg(test)]
mod tests {
    use motive_protocol::transport::TransportStatus;

    use super::*;

    #[test]
    fn from_parts_builds_each_kind() {
        assert_eq!(
            TransportSpec::from_parts("serial", Some("/dev/ttyS0"), None).unwrap(),
            TransportSpec::Serial {
                port: "/dev/ttyS0".into(),
                baud: DEFAULT_BAUD
            }
        );
        assert_eq!(
            TransportSpec::from_parts("tcp", Some("10.0.0.5:8101"), None).unwrap(),
            TransportSpec::Tcp {
                addr: "10.0.0.5:8101".into()
            }
        );
        assert_eq!(TransportSpec::from_parts("sim", None, None).unwrap(), TransportSpec::Sim);
    }

    #[test]
    fn from_parts_rejects_missing_target_and_unknown_kind() {
        assert!(matches!(
            TransportSpec::from_parts("serial", None, None),
            Err(MotiveError::Config(_))
        ));
        assert!(TransportSpec::from_parts("carrier-pigeon", None, None).is_err());
    }

    #[test]
    fn built_links_start_unopened() {
        for spec in [
            TransportSpec::Serial {
                port: "/dev/null-motive".into(),
                baud: 9600,
            },
            TransportSpec::Tcp {
                addr: "127.0.0.1:1".into(),
            },
            TransportSpec::Sim,
        ] {
            let link = open_transport(&spec);
            assert_eq!(link.status(), TransportStatus::NotOpened, "{}", spec.describe());
        }
    }
}
