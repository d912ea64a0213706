//! 1Hz terminal status snapshot.
//!
//! Rendering is split from printing so tests can assert on the text
//! without capturing stdout.

use colored::Colorize;

use crate::messages::ComponentId;
use crate::state::ExtendedFlightState;
use crate::supervisor::{Launcher, Supervisor, SPAWN_ORDER};

fn up_down(up: bool) -> String {
    if up {
        "UP".green().to_string()
    } else {
        "DOWN".red().to_string()
    }
}

/// One status block: component table, fused position, kinematics, link.
pub fn render<L: Launcher>(sup: &Supervisor<L>, now: u64) -> String {
    let state: &ExtendedFlightState = sup.state();
    let mut out = String::new();

    out.push_str(&format!("{}\n", "── flight status ──".bold()));
    for component in SPAWN_ORDER {
        let restarts = sup.restarts_of(component);
        out.push_str(&format!(
            "  {:<16} {}  restarts: {}\n",
            component.name(),
            up_down(sup.is_running(component)),
            restarts
        ));
    }

    match state.best_position(now) {
        Some((source, p)) => {
            let tag = match source {
                ComponentId::Gps => "GPS".green(),
                ComponentId::Ins => "INS".yellow(),
                _ => "RADIO".red(),
            };
            out.push_str(&format!(
                "  position [{}]    {:>9.4}, {:>9.4}  alt {:>7.0} ft\n",
                tag, p.latitude, p.longitude, p.altitude
            ));
        }
        None => {
            out.push_str(&format!("  position {}\n", "NO VALID SOURCE".red().bold()));
        }
    }

    out.push_str(&format!(
        "  heading {:>5.1}°  speed {:>5.1} kts  vs {:>+6.0} fpm\n",
        state.heading, state.speed, state.vertical_speed
    ));
    if state.autopilot_engaged {
        out.push_str(&format!(
            "  autopilot {}    targets hdg {:.0}° spd {:.0} alt {:.0}\n",
            "ENGAGED".green(),
            state.target_heading,
            state.target_speed,
            state.target_altitude
        ));
    } else {
        out.push_str(&format!("  autopilot {}\n", "STANDBY".yellow()));
    }
    out.push_str(&format!("  satcom link {}\n", up_down(state.satcom_active)));
    out
}

pub fn print<L: Launcher>(sup: &Supervisor<L>, now: u64) {
    print!("{}", render(sup, now));
}
