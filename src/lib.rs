//! ReachyClaw: a voice bridge between a Reachy Mini robot and an OpenClaw
//! gateway.
//!
//! Speech is captured on the robot, transcribed, sent to the gateway over a
//! WebSocket session, and the reply is spoken back with small expressive
//! animations. The gateway may also drive the robot directly through
//! `tool.request` frames handled by [`tools::RobotTools`].

pub mod config;
pub mod gateway;
pub mod stt;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use gateway::{GatewayClient, GatewayError, GatewayOptions};
