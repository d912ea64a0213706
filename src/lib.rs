//! # Flight Bus Simulator
//!
//! A multi-process flight control simulation library built around a
//! shared-memory message bus, a supervising flight controller, and
//! priority-fused navigation state.
//!
//! ## Features
//!
//! - **Shared-memory message bus**: Bounded pub/sub queue mapped into every
//!   process, with subscription filtering and age-based pruning
//! - **Process supervision**: One OS process per component, non-blocking
//!   reaping, unconditional restart, graceful SIGTERM/SIGKILL shutdown
//! - **Navigation fusion**: GPS over INS over landing radio, with
//!   disconnect invalidation and staleness cutoff
//! - **Simulated components**: GPS, inertial navigation, landing radio,
//!   satcom link, and a PID autopilot flying a canned plan
//!
//! ## Quick Start
//!
//! ```no_run
//! use flightbus::{ExecLauncher, SimConfig, Supervisor};
//!
//! let mut supervisor = Supervisor::new(SimConfig::default(), ExecLauncher)
//!     .expect("bus creation");
//! supervisor.start_all().expect("component spawn");
//!
//! loop {
//!     supervisor.tick();
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - Cross-process publish/subscribe queue in shared memory
//! - [`shm`] - Region mapping and the in-region spin lock
//! - [`messages`] - `#[repr(C)]` message types crossing process boundaries
//! - [`supervisor`] - Process table, reap/restart, shutdown sequencing
//! - [`state`] - Aggregated flight state and source fusion
//! - [`components`] - The five simulated component processes
//! - [`status`] - 1Hz terminal status rendering

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod bus;
pub mod components;
pub mod config;
pub mod error;
pub mod messages;
pub mod shm;
pub mod state;
pub mod status;
pub mod supervisor;

// Re-export main public types for convenience
pub use bus::{Bus, BUS_CAPACITY, MAX_SUBSCRIPTIONS, MESSAGE_TIMEOUT_SECS};
pub use config::SimConfig;
pub use error::{BusError, ConfigError, SupervisorError};
pub use messages::{ComponentId, FlightState, Message, MessageKind, Payload, Position};
pub use shm::RegionToken;
pub use state::{ExtendedFlightState, STATE_STALENESS_SECS};
pub use supervisor::{ExecLauncher, Launcher, Supervisor, SPAWN_ORDER};
