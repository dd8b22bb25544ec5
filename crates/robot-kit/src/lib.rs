//! Robot control toolkit for ReachyClaw.
//!
//! Wraps a Reachy Mini style desktop robot (head with 6 DoF, two antennas,
//! camera, microphone, speaker) behind the [`RobotDriver`] trait so the
//! conversation loop and the gateway tool bridge never talk to hardware
//! directly.
//!
//! ## Design
//! - Trait-driven driver abstraction (`RobotDriver`) with an explicit
//!   [`Capabilities`] descriptor resolved once at connection time
//! - Safety limits clamp every head command before it reaches the robot
//! - `SimulatedRobot` records commands (no hardware, used in tests and demo mode)
//! - `DaemonRobot` drives a real robot through the Reachy Mini daemon REST API
//! - Expressive animations run until a `CancellationToken` fires and always
//!   finish in the neutral pose

pub mod animation;
pub mod daemon;
pub mod driver;
pub mod error;
pub mod safety;
pub mod simulated;

pub use daemon::DaemonRobot;
pub use driver::{Capabilities, ConnectionMode, Frame, HeadPose, RobotDriver};
pub use error::RobotError;
pub use safety::SafetyLimits;
pub use simulated::{RobotCommand, SimulatedRobot};

use std::sync::Arc;

/// Connect to a robot for the given mode, falling back to the simulator.
///
/// A missing or unreachable daemon is not fatal: the conversation loop keeps
/// working without motion, the same way the robot is optional on a laptop.
pub async fn connect_or_simulate(
    mode: ConnectionMode,
    daemon_url: Option<&str>,
    limits: SafetyLimits,
) -> Arc<dyn RobotDriver> {
    match DaemonRobot::connect(mode, daemon_url, limits).await {
        Ok(robot) => {
            tracing::info!(base_url = %robot.base_url(), "Connected to Reachy Mini daemon");
            Arc::new(robot)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Reachy Mini not reachable, running in simulation mode");
            Arc::new(SimulatedRobot::new(limits))
        }
    }
}
