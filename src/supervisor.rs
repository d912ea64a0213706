//! Process supervision for the simulated flight components.
//!
//! The supervisor owns the bus, spawns one OS process per component, and
//! runs the control loop: drain the bus, integrate the aggregated state,
//! reap exited children, restart them. Restarts are unconditional and
//! unbounded — a component that crash-loops keeps getting restarted, on
//! the theory that in this domain a flapping sensor is better than a
//! permanently absent one. Every reap and respawn is logged so the
//! flapping is at least visible.

use std::io;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::bus::Bus;
use crate::config::SimConfig;
use crate::error::SupervisorError;
use crate::messages::{unix_time, ComponentId, Message, MessageKind, Payload};
use crate::shm::RegionToken;
use crate::state::ExtendedFlightState;

/// Spawn order. Sensors come after the autopilot so its subscriptions are
/// in place before position traffic starts.
pub const SPAWN_ORDER: [ComponentId; 5] = [
    ComponentId::Autopilot,
    ComponentId::Gps,
    ComponentId::Ins,
    ComponentId::LandingRadio,
    ComponentId::SatCom,
];

/// Grace period between SIGTERM and SIGKILL at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(100);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_signo: i32) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM into a flag the main loop polls, so teardown
/// happens on the loop's own stack instead of inside a handler.
pub fn install_shutdown_handler() -> Result<(), nix::Error> {
    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Seam for spawning component processes, so supervision logic is testable
/// without re-executing the real binary.
pub trait Launcher {
    fn spawn(
        &self,
        component: ComponentId,
        token: &RegionToken,
        config: &SimConfig,
    ) -> io::Result<Child>;
}

/// Production launcher: re-execs the current binary with the hidden
/// `child` subcommand carrying the component name and the attach token.
pub struct ExecLauncher;

impl Launcher for ExecLauncher {
    fn spawn(
        &self,
        component: ComponentId,
        token: &RegionToken,
        config: &SimConfig,
    ) -> io::Result<Child> {
        let exe = std::env::current_exe()?;
        Command::new(exe)
            .arg("child")
            .arg("--component")
            .arg(component.name())
            .arg("--bus")
            .arg(token.as_path())
            .arg("--config")
            .arg(config.to_json())
            .spawn()
    }
}

struct ManagedChild {
    id: ComponentId,
    /// `None` between a failed respawn and the retry on the next tick.
    process: Option<Child>,
    restarts: u64,
}

/// The flight controller: bus owner, process table, aggregated state.
pub struct Supervisor<L: Launcher> {
    bus: Bus,
    launcher: L,
    config: SimConfig,
    children: Vec<ManagedChild>,
    state: ExtendedFlightState,
}

impl<L: Launcher> Supervisor<L> {
    /// Create the bus and register the controller's subscriptions. No
    /// processes are spawned yet.
    pub fn new(config: SimConfig, launcher: L) -> Result<Self, SupervisorError> {
        let bus = Bus::create()?;
        for kind in [
            MessageKind::PositionUpdate,
            MessageKind::StateRequest,
            MessageKind::AutopilotCommand,
            MessageKind::SystemStatus,
        ] {
            bus.subscribe(ComponentId::FlightController, kind)?;
        }
        Ok(Self {
            bus,
            launcher,
            config,
            children: Vec::with_capacity(SPAWN_ORDER.len()),
            state: ExtendedFlightState::default(),
        })
    }

    pub fn state(&self) -> &ExtendedFlightState {
        &self.state
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Total restarts across all components, for the status display.
    pub fn total_restarts(&self) -> u64 {
        self.children.iter().map(|c| c.restarts).sum()
    }

    pub fn restarts_of(&self, id: ComponentId) -> u64 {
        self.children
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.restarts)
            .unwrap_or(0)
    }

    pub fn is_running(&self, id: ComponentId) -> bool {
        self.children
            .iter()
            .any(|c| c.id == id && c.process.is_some())
    }

    /// Spawn every component in [`SPAWN_ORDER`], pausing briefly after
    /// each so the child can attach and subscribe before its consumers
    /// start publishing. A spawn failure aborts the whole startup:
    /// already-spawned children are terminated and reaped before the
    /// error is returned, so no child outlives a failed start.
    pub fn start_all(&mut self) -> Result<(), SupervisorError> {
        let token = self.bus.token();
        for component in SPAWN_ORDER {
            let process = match self.launcher.spawn(component, &token, &self.config) {
                Ok(process) => process,
                Err(source) => {
                    error!(
                        component = component.name(),
                        error = %source,
                        "spawn failed, aborting startup"
                    );
                    self.terminate_children();
                    return Err(SupervisorError::Spawn { component, source });
                }
            };
            info!(component = component.name(), pid = process.id(), "spawned");
            self.state.apply_connectivity(component, true);
            self.children.push(ManagedChild {
                id: component,
                process: Some(process),
                restarts: 0,
            });
            std::thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    }

    /// One control-loop iteration: drain the bus, then reap and restart.
    pub fn tick(&mut self) {
        self.process_messages();
        self.reap_and_restart();
        self.advance_kinematics();
    }

    /// Drain every pending message addressed to the controller.
    fn process_messages(&mut self) {
        while let Some(message) = self.bus.try_receive(ComponentId::FlightController) {
            self.handle_message(&message);
        }
    }

    fn handle_message(&mut self, message: &Message) {
        let now = unix_time();
        match message.payload {
            Payload::PositionUpdate(update) => {
                self.state
                    .apply_position(message.header.sender, update.position, now);
                // Push the refreshed snapshot to the autopilot so its
                // control loops see new fixes without polling for them.
                let snapshot = self.state.to_flight_state(now);
                let push = Message::state_response(ComponentId::Autopilot, snapshot);
                if let Err(e) = self.bus.publish(&push) {
                    debug!(error = %e, "skipped autopilot state push");
                }
            }
            Payload::StateRequest => {
                let snapshot = self.state.to_flight_state(now);
                let reply = Message::state_response(message.header.sender, snapshot);
                if let Err(e) = self.bus.publish(&reply) {
                    warn!(
                        requester = message.header.sender.name(),
                        error = %e,
                        "dropping state response"
                    );
                }
            }
            Payload::AutopilotCommand(cmd) => {
                self.state.apply_autopilot_command(
                    cmd.target_heading,
                    cmd.target_speed,
                    cmd.target_altitude,
                );
            }
            Payload::SystemStatus(status) => {
                self.state.apply_system_status(status.active, now);
            }
            Payload::StateResponse(_) => {
                // The controller produces these; one arriving here means a
                // component published with the wrong constructor.
                debug!(sender = message.header.sender.name(), "ignoring state response");
            }
        }
    }

    /// Non-blocking reap of every child, with immediate respawn. A failed
    /// respawn leaves the slot empty and is retried on the next tick.
    fn reap_and_restart(&mut self) {
        let token = self.bus.token();
        for child in self.children.iter_mut() {
            let exited = match child.process.as_mut() {
                Some(process) => match process.try_wait() {
                    Ok(Some(status)) => {
                        warn!(
                            component = child.id.name(),
                            %status,
                            restarts = child.restarts,
                            "component exited"
                        );
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        error!(component = child.id.name(), error = %e, "wait failed");
                        true
                    }
                },
                None => true,
            };
            if !exited {
                continue;
            }
            child.process = None;
            self.state.apply_connectivity(child.id, false);
            match self.launcher.spawn(child.id, &token, &self.config) {
                Ok(process) => {
                    child.restarts += 1;
                    info!(
                        component = child.id.name(),
                        pid = process.id(),
                        restarts = child.restarts,
                        "component restarted"
                    );
                    child.process = Some(process);
                    self.state.apply_connectivity(child.id, true);
                }
                Err(e) => {
                    error!(component = child.id.name(), error = %e, "respawn failed, will retry");
                }
            }
        }
    }

    /// Slew the simulated kinematics toward the autopilot targets within
    /// the configured envelope. One step per tick, tick period 10ms.
    fn advance_kinematics(&mut self) {
        if !self.state.autopilot_engaged {
            return;
        }
        let limits = self.config.autopilot.limits;
        let dt = 0.010;

        let mut heading_err = self.state.target_heading - self.state.heading;
        // Turn the short way around the compass.
        if heading_err > 180.0 {
            heading_err -= 360.0;
        } else if heading_err < -180.0 {
            heading_err += 360.0;
        }
        let max_turn = limits.max_turn_rate_deg_per_s * dt;
        self.state.heading += heading_err.clamp(-max_turn, max_turn);
        self.state.heading = self.state.heading.rem_euclid(360.0);

        let speed_err = self.state.target_speed - self.state.speed;
        let step = speed_err.clamp(
            -limits.max_decel_kts_per_s * dt,
            limits.max_accel_kts_per_s * dt,
        );
        self.state.speed =
            (self.state.speed + step).clamp(limits.min_speed_kts, limits.max_speed_kts);

        let now = unix_time();
        let altitude = self
            .state
            .best_position(now)
            .map(|(_, p)| p.altitude)
            .unwrap_or(self.state.target_altitude);
        let altitude_err = self.state.target_altitude - altitude;
        // Commanded vertical speed is proportional to the altitude error,
        // clamped to the climb/descent envelope.
        self.state.vertical_speed = (altitude_err * 0.5)
            .clamp(-limits.max_descent_rate_fpm, limits.max_climb_rate_fpm);
    }

    /// SIGTERM every tracked child, wait out the grace period, SIGKILL
    /// the stragglers, reap everything, and clear the process table.
    /// Connectivity flags go down with the processes.
    fn terminate_children(&mut self) {
        for child in self.children.iter() {
            if let Some(process) = child.process.as_ref() {
                let pid = Pid::from_raw(process.id() as i32);
                if let Err(e) = kill(pid, Signal::SIGTERM) {
                    warn!(component = child.id.name(), error = %e, "SIGTERM failed");
                }
            }
        }

        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            let mut alive = 0usize;
            for child in self.children.iter_mut() {
                if let Some(process) = child.process.as_mut() {
                    match process.try_wait() {
                        Ok(Some(_)) => child.process = None,
                        Ok(None) => alive += 1,
                        Err(_) => child.process = None,
                    }
                }
            }
            if alive == 0 || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        for child in self.children.iter_mut() {
            if let Some(mut process) = child.process.take() {
                warn!(component = child.id.name(), "killing unresponsive component");
                let _ = process.kill();
                let _ = process.wait();
            }
        }

        let ids: Vec<ComponentId> = self.children.iter().map(|c| c.id).collect();
        self.children.clear();
        for id in ids {
            self.state.apply_connectivity(id, false);
        }
    }

    /// Graceful teardown: terminate every child, then remove the bus
    /// region outright.
    pub fn shutdown(mut self) {
        info!("shutting down {} components", self.children.len());
        self.terminate_children();
        // All children are dead and reaped; stale attach counts from
        // force-killed processes must not keep the region file around.
        self.bus.teardown();
        info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Launcher that runs real (tiny) processes without re-exec.
    struct CommandLauncher {
        program: &'static str,
        args: &'static [&'static str],
    }

    impl Launcher for CommandLauncher {
        fn spawn(
            &self,
            _component: ComponentId,
            _token: &RegionToken,
            _config: &SimConfig,
        ) -> io::Result<Child> {
            Command::new(self.program).args(self.args).spawn()
        }
    }

    /// Launcher whose first spawn succeeds and the rest fail, for the
    /// partial-startup path.
    struct PartialLauncher {
        spawned: std::cell::Cell<usize>,
    }

    impl Launcher for PartialLauncher {
        fn spawn(
            &self,
            _component: ComponentId,
            _token: &RegionToken,
            _config: &SimConfig,
        ) -> io::Result<Child> {
            if self.spawned.get() > 0 {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such binary"));
            }
            self.spawned.set(self.spawned.get() + 1);
            Command::new("sleep").arg("30").spawn()
        }
    }

    /// Launcher that always fails, for the retry path.
    struct FailingLauncher;

    impl Launcher for FailingLauncher {
        fn spawn(
            &self,
            _component: ComponentId,
            _token: &RegionToken,
            _config: &SimConfig,
        ) -> io::Result<Child> {
            Err(io::Error::new(io::ErrorKind::NotFound, "no such binary"))
        }
    }

    #[test]
    fn exited_children_are_reaped_and_restarted() {
        let launcher = CommandLauncher {
            program: "true",
            args: &[],
        };
        let mut sup = Supervisor::new(SimConfig::default(), launcher).expect("supervisor");
        sup.start_all().expect("start");
        assert_eq!(sup.total_restarts(), 0);

        // `true` exits immediately, so after a settle every child has been
        // reaped and respawned at least once.
        std::thread::sleep(Duration::from_millis(50));
        sup.tick();
        assert!(sup.total_restarts() >= SPAWN_ORDER.len() as u64);
        sup.shutdown();
    }

    #[test]
    fn long_lived_children_are_left_alone() {
        let launcher = CommandLauncher {
            program: "sleep",
            args: &["30"],
        };
        let mut sup = Supervisor::new(SimConfig::default(), launcher).expect("supervisor");
        sup.start_all().expect("start");
        sup.tick();
        sup.tick();
        assert_eq!(sup.total_restarts(), 0);
        for component in SPAWN_ORDER {
            assert!(sup.is_running(component));
        }
        sup.shutdown();
    }

    #[test]
    fn failed_startup_terminates_already_spawned_children() {
        let launcher = PartialLauncher {
            spawned: std::cell::Cell::new(0),
        };
        let mut sup = Supervisor::new(SimConfig::default(), launcher).expect("supervisor");
        let err = sup.start_all().expect_err("second spawn must fail");
        assert!(matches!(
            err,
            SupervisorError::Spawn {
                component: ComponentId::Gps,
                ..
            }
        ));

        // The autopilot process that did start must not survive the
        // failed startup: it is killed, reaped, and untracked.
        for component in SPAWN_ORDER {
            assert!(!sup.is_running(component));
        }
        sup.shutdown();
    }

    #[test]
    fn spawn_failure_aborts_startup() {
        let mut sup = Supervisor::new(SimConfig::default(), FailingLauncher).expect("supervisor");
        let err = sup.start_all().expect_err("spawn must fail");
        assert!(matches!(
            err,
            SupervisorError::Spawn {
                component: ComponentId::Autopilot,
                ..
            }
        ));
        sup.shutdown();
    }

    #[test]
    fn state_requests_get_a_response() {
        let launcher = CommandLauncher {
            program: "sleep",
            args: &["30"],
        };
        let mut sup = Supervisor::new(SimConfig::default(), launcher).expect("supervisor");
        sup.bus()
            .subscribe(ComponentId::SatCom, MessageKind::StateResponse)
            .unwrap();
        sup.bus()
            .publish(&Message::state_request(ComponentId::SatCom))
            .unwrap();

        sup.tick();
        let reply = sup
            .bus()
            .try_receive(ComponentId::SatCom)
            .expect("state response");
        assert_eq!(reply.kind(), MessageKind::StateResponse);
        assert_eq!(reply.header.receiver, ComponentId::SatCom);
        sup.shutdown();
    }
}
