//! Configuration Vault – reads/writes `~/.motive/config.toml`.
//!
//! ```toml
//! [transport]
//! kind = "serial"
//! port = "/dev/ttyUSB0"
//!
//! [cycle]
//! period_ms = 100
//!
//! [stack]
//! cruise_speed = 300.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use motive_hal::TransportSpec;
use motive_protocol::HandshakeConfig;
use motive_runtime::CycleConfig;
use motive_types::MotiveError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The behaviors the CLI attaches at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Forward speed (mm/s) of the cruise behavior; `0` leaves it out.
    pub cruise_speed: f64,
    /// Keep the start-up heading while cruising.
    pub hold_heading: bool,
    pub max_forward: f64,
    pub max_backward: f64,
    /// Sonar range (mm) at which forward motion is forbidden.
    pub obstacle_stop_mm: f64,
    /// Sonar range (mm) below which forward speed is scaled down.
    pub obstacle_slow_mm: f64,
    /// Reverse speed (mm/s) after a front bump.
    pub bumper_backoff: f64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            cruise_speed: 0.0,
            hold_heading: true,
            max_forward: 750.0,
            max_backward: 250.0,
            obstacle_stop_mm: 250.0,
            obstacle_slow_mm: 1000.0,
            bumper_backoff: 100.0,
        }
    }
}

/// Persisted user configuration stored in `~/.motive/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportSpec,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub stack: StackConfig,
}

/// Return the path to `~/.motive/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".motive").join("config.toml")
}

/// Load the config with environment overrides applied.  Returns `None` if
/// the file does not exist.
pub fn load() -> Result<Option<Config>, MotiveError> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, MotiveError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| MotiveError::Config(format!("cannot read {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| MotiveError::Config(format!("cannot parse {}: {e}", path.display())))?;
    cfg.cycle.validate()?;
    Ok(Some(cfg))
}

/// Apply `MOTIVE_*` environment variable overrides to `cfg`.
///
/// | Variable | Effect |
/// |---|---|
/// | `MOTIVE_TRANSPORT` | Transport kind: `serial`, `tcp`, `replay` or `sim` |
/// | `MOTIVE_SERIAL_PORT` | Serial device |
/// | `MOTIVE_BAUD` | Serial baud rate |
/// | `MOTIVE_TCP_ADDR` | `host[:port]` of a TCP controller |
/// | `MOTIVE_REPLAY_PATH` | Hex log to replay |
/// | `MOTIVE_PERIOD_MS` | Control cycle period |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let (current_kind, current_target, current_baud) = transport_parts(&cfg.transport);
    let kind = var("MOTIVE_TRANSPORT").unwrap_or_else(|| current_kind.to_string());
    let target = match kind.as_str() {
        "serial" => var("MOTIVE_SERIAL_PORT"),
        "tcp" => var("MOTIVE_TCP_ADDR"),
        "replay" => var("MOTIVE_REPLAY_PATH"),
        _ => None,
    }
    .or_else(|| (kind == current_kind).then_some(current_target).flatten());
    let baud = match var("MOTIVE_BAUD") {
        Some(v) => match v.parse::<u32>() {
            Ok(b) => Some(b),
            Err(_) => {
                warn!(value = %v, "ignoring invalid MOTIVE_BAUD");
                current_baud
            }
        },
        None => current_baud,
    };

    match TransportSpec::from_parts(&kind, target.as_deref(), baud) {
        Ok(TransportSpec::Replay { path, .. }) => {
            let looping = matches!(cfg.transport, TransportSpec::Replay { looping: true, .. });
            cfg.transport = TransportSpec::Replay { path, looping };
        }
        Ok(spec) => cfg.transport = spec,
        Err(e) => warn!(error = %e, "ignoring transport override"),
    }

    if let Some(v) = var("MOTIVE_PERIOD_MS") {
        match v.parse::<u64>() {
            Ok(ms) if ms > 0 => cfg.cycle.period_ms = ms,
            _ => warn!(value = %v, "ignoring invalid MOTIVE_PERIOD_MS"),
        }
    }
}

fn transport_parts(spec: &TransportSpec) -> (&'static str, Option<String>, Option<u32>) {
    match spec {
        TransportSpec::Serial { port, baud } => ("serial", Some(port.clone()), Some(*baud)),
        TransportSpec::Tcp { addr } => ("tcp", Some(addr.clone()), None),
        TransportSpec::Replay { path, .. } => ("replay", Some(path.display().to_string()), None),
        TransportSpec::Sim => ("sim", None, None),
    }
}

/// Save the config to disk, creating `~/.motive/` if necessary.
pub fn save(cfg: &Config) -> Result<(), MotiveError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), MotiveError> {
    let io_err = |what: &str, e: std::io::Error| MotiveError::Config(format!("{what}: {e}"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("cannot create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("cannot restrict config directory", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| MotiveError::Config(format!("cannot serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("cannot write {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err(&format!("cannot write {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn default_config_uses_the_simulator() {
        let cfg = Config::default();
        assert_eq!(cfg.transport, TransportSpec::Sim);
        assert_eq!(cfg.cycle.period_ms, 100);
        assert_eq!(cfg.stack.max_forward, 750.0);
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.transport = TransportSpec::Tcp {
            addr: "10.0.0.5:8101".into(),
        };
        cfg.cycle.stop_on_disconnect = true;
        cfg.stack.cruise_speed = 300.0;
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.transport, cfg.transport);
        assert!(loaded.cycle.stop_on_disconnect);
        assert_eq!(loaded.stack.cruise_speed, 300.0);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[transport]\nkind = \"serial\"\nport = \"/dev/ttyUSB0\"\n\n[cycle]\nperiod_ms = 50\n",
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(
            cfg.transport,
            TransportSpec::Serial {
                port: "/dev/ttyUSB0".into(),
                baud: 9600
            }
        );
        assert_eq!(cfg.cycle.period_ms, 50);
        assert_eq!(cfg.cycle.pulse_interval_ms, 1000);
        assert_eq!(cfg.handshake.attempts, 5);
    }

    #[test]
    fn invalid_cycle_settings_are_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[cycle]\nperiod_ms = 0\n").unwrap();
        assert!(matches!(load_from(&path), Err(MotiveError::Config(_))));
    }

    #[test]
    fn config_path_points_to_motive_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".motive"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn overrides_switch_transport() {
        let mut cfg = Config::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("MOTIVE_TRANSPORT", "serial"),
                ("MOTIVE_SERIAL_PORT", "/dev/ttyS1"),
                ("MOTIVE_BAUD", "115200"),
            ]),
        );
        assert_eq!(
            cfg.transport,
            TransportSpec::Serial {
                port: "/dev/ttyS1".into(),
                baud: 115200
            }
        );
    }

    #[test]
    fn overrides_adjust_the_current_transport() {
        let mut cfg = Config::default();
        cfg.transport = TransportSpec::Serial {
            port: "/dev/ttyUSB0".into(),
            baud: 9600,
        };
        apply_overrides(&mut cfg, vars(&[("MOTIVE_BAUD", "38400")]));
        assert_eq!(
            cfg.transport,
            TransportSpec::Serial {
                port: "/dev/ttyUSB0".into(),
                baud: 38400
            }
        );
    }

    #[test]
    fn incomplete_transport_override_is_ignored() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, vars(&[("MOTIVE_TRANSPORT", "tcp")]));
        assert_eq!(cfg.transport, TransportSpec::Sim);
    }

    #[test]
    fn overrides_change_period_and_ignore_garbage() {
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, vars(&[("MOTIVE_PERIOD_MS", "20")]));
        assert_eq!(cfg.cycle.period_ms, 20);

        apply_overrides(&mut cfg, vars(&[("MOTIVE_PERIOD_MS", "fast")]));
        assert_eq!(cfg.cycle.period_ms, 20);
        apply_overrides(&mut cfg, vars(&[("MOTIVE_PERIOD_MS", "0")]));
        assert_eq!(cfg.cycle.period_ms, 20);
    }
}
