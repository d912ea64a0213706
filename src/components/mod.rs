//! Simulated flight components, one OS process each.
//!
//! Every component runs the same loop: attach to the bus, register
//! subscriptions, then tick at 100Hz until the supervisor's SIGTERM flips
//! the shutdown flag. Dropping the bus handle on the way out detaches
//! cleanly, so an orderly exit never leaks the region.

use std::time::Duration;

use tracing::{info, warn};

use crate::bus::Bus;
use crate::config::SimConfig;
use crate::error::BusError;
use crate::messages::ComponentId;
use crate::shm::RegionToken;
use crate::supervisor::{install_shutdown_handler, shutdown_requested};

mod autopilot;
mod gps;
mod ins;
mod radio;
mod satcom;

pub use autopilot::Autopilot;
pub use gps::Gps;
pub use ins::Ins;
pub use radio::LandingRadio;
pub use satcom::SatCom;

/// Tick period shared by every component loop.
pub const TICK: Duration = Duration::from_millis(10);

/// One simulated device. `setup` registers subscriptions; `tick` runs one
/// 10ms step and must never block.
pub trait Component {
    fn id(&self) -> ComponentId;

    fn setup(&mut self, bus: &Bus) -> Result<(), BusError>;

    fn tick(&mut self, bus: &Bus);
}

fn build(id: ComponentId, config: &SimConfig) -> Option<Box<dyn Component>> {
    match id {
        ComponentId::Autopilot => Some(Box::new(Autopilot::new(config.autopilot))),
        ComponentId::Gps => Some(Box::new(Gps::new(config.initial_position))),
        ComponentId::Ins => Some(Box::new(Ins::new(config.initial_position))),
        ComponentId::LandingRadio => Some(Box::new(LandingRadio::new())),
        ComponentId::SatCom => Some(Box::new(SatCom::new())),
        // The controller is the parent process, never spawned.
        ComponentId::FlightController => None,
    }
}

/// Entry point for a spawned child process.
pub fn run_component(
    id: ComponentId,
    token: &RegionToken,
    config: &SimConfig,
) -> Result<(), BusError> {
    let mut component = build(id, config)
        .ok_or_else(|| BusError::UnknownComponent(id.name().to_string()))?;

    if let Err(e) = install_shutdown_handler() {
        warn!(error = %e, "signal handler not installed; relying on SIGKILL");
    }

    let bus = Bus::attach(token)?;
    component.setup(&bus)?;
    info!(component = id.name(), "component running");

    while !shutdown_requested() {
        component.tick(&bus);
        std::thread::sleep(TICK);
    }

    info!(component = id.name(), "component stopping");
    // `bus` drops here: detach, and never the last reference while the
    // supervisor lives.
    Ok(())
}
