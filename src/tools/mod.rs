//! Robot tools the gateway agent can invoke over `tool.request` frames.
//!
//! Each tool owns its JSON parameter schema and returns a JSON object with
//! a `status` of `"success"` or `"error"`. [`RobotTools`] is the registry
//! installed on the [`GatewayClient`](crate::gateway::GatewayClient) as its
//! [`ToolHandler`].

pub mod robot;

use async_trait::async_trait;
use reachyclaw_robot_kit::{ConnectionMode, RobotDriver, SafetyLimits};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::gateway::ToolHandler;

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `arguments` object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> anyhow::Result<Value>;
}

/// What every robot tool needs to run.
pub struct ToolContext {
    pub robot: Arc<dyn RobotDriver>,
    pub limits: SafetyLimits,
    pub connection_mode: ConnectionMode,
    pub default_duration: Duration,
    pub antenna_duration: Duration,
    pub capture_dir: PathBuf,
}

impl ToolContext {
    pub fn from_config(robot: Arc<dyn RobotDriver>, config: &Config) -> Self {
        Self {
            robot,
            limits: config.robot.safety_limits(),
            connection_mode: config.robot.connection_mode,
            default_duration: positive_secs(config.robot.default_duration, 1.0),
            antenna_duration: positive_secs(config.robot.antenna_duration, 0.5),
            capture_dir: config.capture_dir(),
        }
    }
}

/// Longest movement a tool may ask for.
pub(crate) const MAX_MOVE_DURATION: Duration = Duration::from_secs(60);

/// Seconds as a `Duration`, or `fallback` when missing, zero or not finite.
/// Capped at [`MAX_MOVE_DURATION`].
pub(crate) fn positive_secs(secs: f64, fallback: f64) -> Duration {
    let secs = if secs.is_finite() && secs > 0.0 { secs } else { fallback };
    Duration::try_from_secs_f64(secs.min(MAX_MOVE_DURATION.as_secs_f64())).unwrap_or(Duration::ZERO)
}

pub(crate) fn success(mut fields: Value) -> Value {
    if let Some(map) = fields.as_object_mut() {
        map.insert("status".into(), json!("success"));
    }
    fields
}

pub(crate) fn failure(message: impl std::fmt::Display) -> Value {
    json!({ "status": "error", "message": message.to_string() })
}

/// Decode tool arguments; a missing/null argument object means "all defaults".
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> anyhow::Result<T> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| anyhow::anyhow!("Invalid arguments: {e}"))
}

// ── Registry ───────────────────────────────────────────────────────

/// The full robot tool set.
pub struct RobotTools {
    tools: Vec<Box<dyn Tool>>,
}

impl RobotTools {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            tools: robot::all_tools(Arc::new(ctx)),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| &**t)
    }

    /// Name, description and schema of every tool.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name(),
                    "description": t.description(),
                    "parameters": t.parameters_schema(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl ToolHandler for RobotTools {
    async fn handle(&self, tool: &str, arguments: Value) -> anyhow::Result<Value> {
        let Some(found) = self.get(tool) else {
            tracing::warn!(tool = tool, "Unknown tool requested");
            return Ok(failure(format!("Unknown tool: {tool}")));
        };
        match found.execute(arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                tracing::warn!(tool = tool, error = %e, "Robot tool failed");
                Ok(failure(e))
            }
        }
    }
}
