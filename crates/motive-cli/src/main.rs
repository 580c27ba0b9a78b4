//! `motive` – drives a mobile-base controller from the command line.
//!
//! 1. Loads `~/.motive/config.toml`, writing the defaults on first run.
//! 2. Opens the configured link and runs the SYNC handshake.
//! 3. Attaches the stock behavior stack and starts the control cycle.
//! 4. Prints alerts as they happen and a status line every second.
//! 5. **Ctrl-C** queues an emergency stop and shuts the cycle down.

mod config;

use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use colored::Colorize;
use tracing::warn;

use motive_hal::open_transport;
use motive_kernel::Behavior;
use motive_kernel::stock::{BumperStop, ConstantVelocity, HoldHeading, SpeedLimiter};
use motive_middleware::Topic;
use motive_protocol::Command;
use motive_runtime::{ControlCycle, CycleExit, RobotCore, init_tracing};
use motive_types::{Alert, EventPayload};

use config::{Config, StackConfig};

const STATUS_INTERVAL: Duration = Duration::from_secs(1);

fn main() -> ExitCode {
    let _tracing = init_tracing("motive");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => first_run(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };

    println!("  Link: {}", cfg.transport.describe().bold());
    let mut cycle = match ControlCycle::new(open_transport(&cfg.transport), cfg.cycle.clone()) {
        Ok(cycle) => cycle,
        Err(e) => {
            println!("{}: {}", "Invalid cycle settings".red(), e);
            return ExitCode::FAILURE;
        }
    };

    match cycle.connect(&cfg.handshake) {
        Ok(identity) => println!(
            "  Connected to {} {} ({})",
            identity.kind.bold(),
            identity.subtype,
            identity.name.cyan()
        ),
        Err(e) => {
            println!("{}: {}", "Handshake failed".red().bold(), e);
            return ExitCode::FAILURE;
        }
    }

    {
        let robot = cycle.robot();
        let mut guard = robot.lock();
        for (behavior, priority) in default_stack(&cfg.stack) {
            let name = behavior.name().to_string();
            guard.attach(behavior, priority);
            println!("    • {} {}", name.bold(), format!("(priority {priority})").dimmed());
        }
    }

    spawn_alert_printer(&cycle);

    let running = cycle.running_flag();
    let robot = cycle.robot();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        robot.lock().queue_command(Command::EStop);
        running.store(false, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the cycle must be stopped externally");
    }

    let handle = match cycle.spawn() {
        Ok(handle) => handle,
        Err(e) => {
            println!("{}: {}", "Cannot start control cycle".red(), e);
            return ExitCode::FAILURE;
        }
    };
    println!();
    println!("  Control cycle running. Press {} to stop.\n", "Ctrl-C".bold().cyan());

    while handle.is_running() {
        thread::sleep(STATUS_INTERVAL);
        if let Some(guard) = handle.robot().try_lock_for(STATUS_INTERVAL / 2) {
            println!("{}", status_line(&guard));
        }
    }

    match handle.wait_for_exit() {
        CycleExit::Stopped => {
            println!("{}", "  ✓ Robot stopped. Exiting.".green());
            ExitCode::SUCCESS
        }
        CycleExit::Disconnected(e) => {
            println!("{}: {}", "Link lost".red().bold(), e);
            ExitCode::FAILURE
        }
        CycleExit::Panicked(details) => {
            println!("{}: {}", "Control cycle crashed".red().bold(), details);
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "  ┌───────────────────────────┐".bold().cyan());
    println!("{}", "  │   motive · robot control  │".bold().cyan());
    println!("{}", "  └───────────────────────────┘".bold().cyan());
    println!();
}

fn first_run() -> Config {
    let cfg = Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  No configuration found; defaults written to {}",
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Could not save default config".yellow(), e),
    }
    cfg
}

/// The stock behaviors, lowest priority last.  A full-strength proposal from
/// a later behavior overrides earlier ones, so the safety behaviors sit at
/// the bottom.
fn default_stack(stack: &StackConfig) -> Vec<(Box<dyn Behavior>, i32)> {
    let mut behaviors: Vec<(Box<dyn Behavior>, i32)> = Vec::new();
    if stack.cruise_speed != 0.0 {
        behaviors.push((Box::new(ConstantVelocity::new(stack.cruise_speed)), 50));
        if stack.hold_heading {
            behaviors.push((Box::new(HoldHeading::new()), 40));
        }
    }
    behaviors.push((
        Box::new(
            SpeedLimiter::new(stack.max_forward, stack.max_backward)
                .with_obstacle_slowdown(stack.obstacle_stop_mm, stack.obstacle_slow_mm),
        ),
        20,
    ));
    behaviors.push((Box::new(BumperStop::new(stack.bumper_backoff)), 10));
    behaviors
}

fn spawn_alert_printer(cycle: &ControlCycle) {
    let mut alerts = cycle.bus().subscribe_to(Topic::SystemAlerts);
    let spawned = thread::Builder::new()
        .name("motive-alerts".into())
        .spawn(move || {
            while let Some(event) = alerts.blocking_recv() {
                if let EventPayload::Alert(alert) = event.payload {
                    println!("  {}", describe_alert(&alert));
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "alert printer not started");
    }
}

fn describe_alert(alert: &Alert) -> String {
    match alert {
        Alert::ConnectionLost { silent_ms } => {
            format!("✗ connection lost ({silent_ms} ms without a frame)")
                .red()
                .bold()
                .to_string()
        }
        Alert::ConnectionRestored => "✓ connection restored".green().to_string(),
        Alert::BehaviorFault { behavior, details } => {
            format!("⚠ behavior '{behavior}' faulted: {details}").yellow().to_string()
        }
        Alert::CycleOverrun { cycle, elapsed_ms } => {
            format!("⚠ cycle {cycle} overran ({elapsed_ms} ms)").yellow().to_string()
        }
        Alert::TransportFault { details } => {
            format!("⚠ transport fault: {details}").yellow().to_string()
        }
    }
}

fn status_line(core: &RobotCore) -> String {
    let t = core.telemetry();
    let cmd = core.last_command();
    let stats = core.stats();
    format!(
        "  #{:<6} x={:>8.0} y={:>8.0} th={:>6.1}  v={:>6.0} w={:>6.1}  bat={:>4.1}V  {}  frames={} sent={}",
        core.cycle(),
        t.pose.x,
        t.pose.y,
        t.pose.th,
        t.trans_vel,
        t.rot_vel,
        t.battery_volts,
        if cmd.is_idle() { "idle".dimmed() } else { "active".green() },
        stats.frames_delivered,
        stats.commands_sent,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(stack: &[(Box<dyn Behavior>, i32)]) -> Vec<(String, i32)> {
        stack
            .iter()
            .map(|(b, p)| (b.name().to_string(), *p))
            .collect()
    }

    #[test]
    fn idle_stack_only_guards() {
        let stack = default_stack(&StackConfig::default());
        let names = names(&stack);
        assert_eq!(names.len(), 2);
        assert_eq!(names[1].1, 10);
        assert!(names[0].1 > names[1].1);
    }

    #[test]
    fn cruising_stack_puts_safety_last() {
        let cfg = StackConfig {
            cruise_speed: 300.0,
            ..StackConfig::default()
        };
        let stack = names(&default_stack(&cfg));
        assert_eq!(stack.len(), 4);
        assert!(stack.windows(2).all(|w| w[0].1 > w[1].1));
        assert!(stack.iter().any(|(n, _)| n == "hold_heading"));
    }

    #[test]
    fn hold_heading_is_optional() {
        let cfg = StackConfig {
            cruise_speed: 300.0,
            hold_heading: false,
            ..StackConfig::default()
        };
        let stack = names(&default_stack(&cfg));
        assert_eq!(stack.len(), 3);
        assert!(!stack.iter().any(|(n, _)| n == "hold_heading"));
    }

    #[test]
    fn alerts_render_their_details() {
        colored::control::set_override(false);
        let text = describe_alert(&Alert::BehaviorFault {
            behavior: "wander".into(),
            details: "boom".into(),
        });
        assert!(text.contains("wander"));
        assert!(text.contains("boom"));
        assert!(describe_alert(&Alert::ConnectionLost { silent_ms: 2000 }).contains("2000"));
    }
}
