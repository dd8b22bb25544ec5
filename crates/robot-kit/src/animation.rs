//! Expressive animations driven by conversation state.
//!
//! Antenna positions are in radians (0.7 rad ≈ 40°), head angles in degrees.
//! Looping animations stop when their [`CancellationToken`] fires, which is
//! checked at every sleep, and always leave the robot in the neutral pose.
//! Driver failures inside a loop are logged and never abort the loop.

use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::driver::{HeadPose, RobotDriver};

/// Antenna opening for claw gestures (radians).
pub const CLAW_OPEN: f64 = 0.7;

/// Pause between claw snap positions.
pub const SNAP_STEP: Duration = Duration::from_millis(200);

/// Half-period of the thinking claw loop.
pub const THINKING_STEP: Duration = Duration::from_millis(350);

/// Head bob amplitude while speaking (degrees).
pub const BOB_PITCH: f64 = 3.0;

/// Half-period of the speaking head bob.
pub const BOB_STEP: Duration = Duration::from_millis(250);

/// Interval between idle fidget rolls of the dice.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// Probability of fidgeting on each idle tick.
pub const IDLE_PROBABILITY: f64 = 0.3;

/// Duration of an idle fidget move.
pub const IDLE_MOVE_DURATION: Duration = Duration::from_secs(2);

/// Small head moves picked at random while idle (roll, pitch).
const IDLE_MOVES: [(f64, f64); 4] = [(5.0, 0.0), (-5.0, 0.0), (0.0, 5.0), (0.0, -5.0)];

/// Sleep for `step` unless cancelled first. Returns `false` when cancelled.
async fn pause(token: &CancellationToken, step: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(step) => true,
    }
}

async fn antennas(robot: &dyn RobotDriver, left: f64, right: f64) {
    if let Err(e) = robot.set_antenna_positions(left, right).await {
        tracing::debug!(error = %e, "Antenna command failed");
    }
}

/// Return antennas to center.
pub async fn reset_antennas(robot: &dyn RobotDriver) {
    antennas(robot, 0.0, 0.0).await;
}

/// Return the head to the neutral pose.
pub async fn reset_head(robot: &dyn RobotDriver) {
    if let Err(e) = robot.set_head_pose(HeadPose::NEUTRAL).await {
        tracing::debug!(error = %e, "Head reset failed");
    }
}

/// One quick open/close/center snap of the antenna "claws".
///
/// Played on startup and when the wake word is heard.
pub async fn claw_snap(robot: &dyn RobotDriver) {
    antennas(robot, CLAW_OPEN, -CLAW_OPEN).await;
    tokio::time::sleep(SNAP_STEP).await;
    antennas(robot, -CLAW_OPEN, CLAW_OPEN).await;
    tokio::time::sleep(SNAP_STEP).await;
    reset_antennas(robot).await;
}

/// Open and close the claws until cancelled, e.g. while the gateway thinks.
pub async fn thinking_claws(robot: Arc<dyn RobotDriver>, token: CancellationToken) {
    tracing::info!("🦞 Starting thinking claw animation");
    loop {
        antennas(robot.as_ref(), CLAW_OPEN, -CLAW_OPEN).await;
        if !pause(&token, THINKING_STEP).await {
            break;
        }
        antennas(robot.as_ref(), -CLAW_OPEN, CLAW_OPEN).await;
        if !pause(&token, THINKING_STEP).await {
            break;
        }
    }
    reset_antennas(robot.as_ref()).await;
    tracing::info!("🦞 Claw animation stopped");
}

/// Nod the head slightly up and down until cancelled, simulating talking.
pub async fn head_bob(robot: Arc<dyn RobotDriver>, token: CancellationToken) {
    let mut up = true;
    loop {
        let pitch = if up { BOB_PITCH } else { -BOB_PITCH };
        up = !up;
        if let Err(e) = robot.set_head_pose(HeadPose::pitch(pitch)).await {
            tracing::debug!(error = %e, "Head bob command failed");
        }
        if !pause(&token, BOB_STEP).await {
            break;
        }
    }
    reset_head(robot.as_ref()).await;
    tracing::debug!("Head bob animation stopped");
}

/// Pick the next idle fidget, or `None` to stay still this tick.
pub fn pick_idle_move<R: Rng>(rng: &mut R) -> Option<HeadPose> {
    if !rng.random_bool(IDLE_PROBABILITY) {
        return None;
    }
    IDLE_MOVES
        .choose(rng)
        .map(|&(roll, pitch)| HeadPose::roll_pitch(roll, pitch))
}

/// Occasional small head moves while `is_idle` reports true, until cancelled.
pub async fn idle_fidget<F>(robot: Arc<dyn RobotDriver>, token: CancellationToken, is_idle: F)
where
    F: Fn() -> bool + Send,
{
    loop {
        if is_idle() {
            // rng is not Send; keep it out of the await below
            let next = pick_idle_move(&mut rand::rng());
            if let Some(pose) = next {
                if let Err(e) = robot.goto_head_pose(pose, IDLE_MOVE_DURATION).await {
                    tracing::debug!(error = %e, "Idle animation error");
                }
            }
        }
        if !pause(&token, IDLE_INTERVAL).await {
            break;
        }
    }
    reset_head(robot.as_ref()).await;
}
