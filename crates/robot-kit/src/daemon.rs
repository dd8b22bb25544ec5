//! Reachy Mini daemon client.
//!
//! The Reachy Mini daemon exposes motion control over a small REST API
//! (default port 8000). This driver translates [`RobotDriver`] commands into
//! those calls:
//!
//! | Command            | Route                                              |
//! |--------------------|----------------------------------------------------|
//! | status probe       | `GET  /api/daemon/status`                          |
//! | wake / sleep       | `POST /api/move/play/wake_up`, `/goto_sleep`       |
//! | interpolated move  | `POST /api/move/goto`                              |
//! | immediate target   | `POST /api/move/set_target`                        |
//! | emotion / dance    | `POST /api/move/play/recorded-move-dataset/{ds}/{move}` |
//!
//! Angles go over the wire in radians and the head height in metres.
//! Camera, microphone and speaker are not exposed by the REST API, so the
//! capability descriptor leaves them off.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::driver::{Capabilities, ConnectionMode, HeadPose, RobotDriver};
use crate::error::RobotError;
use crate::safety::SafetyLimits;

/// Daemon address on the robot itself.
pub const LOCALHOST_DAEMON_URL: &str = "http://127.0.0.1:8000";

/// mDNS name advertised by the wireless robot.
pub const NETWORK_DAEMON_URL: &str = "http://reachy-mini.local:8000";

const EMOTIONS_DATASET: &str = "pollen-robotics/reachy-mini-emotions-library";
const DANCES_DATASET: &str = "pollen-robotics/reachy-mini-dances-library";

/// Timeout for the reachability probe.
const PROBE_TIMEOUT_SECS: u64 = 3;

/// Timeout for motion commands.
const COMMAND_TIMEOUT_SECS: u64 = 10;

/// REST-backed driver for a real robot.
pub struct DaemonRobot {
    client: reqwest::Client,
    base_url: String,
    limits: SafetyLimits,
}

impl DaemonRobot {
    /// Locate a daemon for `mode` and verify it answers.
    ///
    /// An explicit `daemon_url` overrides the mode's candidate list.
    pub async fn connect(
        mode: ConnectionMode,
        daemon_url: Option<&str>,
        limits: SafetyLimits,
    ) -> Result<Self, RobotError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(COMMAND_TIMEOUT_SECS))
            .build()?;

        let candidates: Vec<String> = match daemon_url {
            Some(url) => vec![url.trim_end_matches('/').to_string()],
            None => candidate_urls(mode).iter().map(|s| (*s).to_string()).collect(),
        };

        let mut last_error = String::from("no daemon candidates");
        for base_url in candidates {
            let probe = client
                .get(format!("{base_url}/api/daemon/status"))
                .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
                .send()
                .await;
            match probe {
                Ok(resp) if resp.status().is_success() => {
                    return Ok(Self {
                        client,
                        base_url,
                        limits,
                    });
                }
                Ok(resp) => {
                    last_error = format!("{base_url} answered HTTP {}", resp.status().as_u16());
                }
                Err(e) => {
                    last_error = format!("{base_url}: {e}");
                }
            }
            tracing::debug!(error = %last_error, "Reachy Mini daemon probe failed");
        }

        Err(RobotError::Unreachable(last_error))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, route: &str, body: Option<serde_json::Value>) -> Result<(), RobotError> {
        let url = format!("{}{route}", self.base_url);
        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!(route = route, status = status.as_u16(), "Reachy Mini daemon rejected command");
        Err(RobotError::Http {
            status: status.as_u16(),
            body,
        })
    }

    fn head_pose_body(&self, pose: HeadPose) -> serde_json::Value {
        let pose = self.limits.clamp(pose);
        json!({
            "x": 0.0,
            "y": 0.0,
            "z": pose.z / 1000.0,
            "roll": pose.roll.to_radians(),
            "pitch": pose.pitch.to_radians(),
            "yaw": pose.yaw.to_radians(),
        })
    }
}

fn candidate_urls(mode: ConnectionMode) -> &'static [&'static str] {
    match mode {
        ConnectionMode::Auto => &[LOCALHOST_DAEMON_URL, NETWORK_DAEMON_URL],
        ConnectionMode::LocalhostOnly => &[LOCALHOST_DAEMON_URL],
        ConnectionMode::Network => &[NETWORK_DAEMON_URL],
    }
}

#[async_trait]
impl RobotDriver for DaemonRobot {
    fn name(&self) -> &str {
        "reachy-mini-daemon"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            emotions: true,
            dance: true,
            camera: false,
            speech: false,
            microphone: false,
        }
    }

    async fn wake(&self) -> Result<(), RobotError> {
        self.post("/api/move/play/wake_up", None).await
    }

    async fn sleep(&self) -> Result<(), RobotError> {
        self.post("/api/move/play/goto_sleep", None).await
    }

    async fn set_head_pose(&self, pose: HeadPose) -> Result<(), RobotError> {
        let body = json!({ "target_head_pose": self.head_pose_body(pose) });
        self.post("/api/move/set_target", Some(body)).await
    }

    async fn goto_head_pose(&self, pose: HeadPose, duration: Duration) -> Result<(), RobotError> {
        let body = json!({
            "head_pose": self.head_pose_body(pose),
            "duration": duration.as_secs_f64(),
        });
        self.post("/api/move/goto", Some(body)).await
    }

    async fn set_antenna_positions(&self, left: f64, right: f64) -> Result<(), RobotError> {
        let body = json!({ "target_antennas": [left, right] });
        self.post("/api/move/set_target", Some(body)).await
    }

    async fn goto_antennas(
        &self,
        left: f64,
        right: f64,
        duration: Duration,
    ) -> Result<(), RobotError> {
        let body = json!({
            "antennas": [left, right],
            "duration": duration.as_secs_f64(),
        });
        self.post("/api/move/goto", Some(body)).await
    }

    async fn play_emotion(&self, name: &str) -> Result<(), RobotError> {
        let route = format!("/api/move/play/recorded-move-dataset/{EMOTIONS_DATASET}/{name}");
        self.post(&route, None).await
    }

    async fn dance(&self, name: &str) -> Result<(), RobotError> {
        let route = format!("/api/move/play/recorded-move-dataset/{DANCES_DATASET}/{name}");
        self.post(&route, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn daemon() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/daemon/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "running"})))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn candidate_urls_follow_mode() {
        assert_eq!(candidate_urls(ConnectionMode::LocalhostOnly), &[LOCALHOST_DAEMON_URL]);
        assert_eq!(candidate_urls(ConnectionMode::Network), &[NETWORK_DAEMON_URL]);
        assert_eq!(candidate_urls(ConnectionMode::Auto).len(), 2);
    }

    #[tokio::test]
    async fn connect_probes_status_route() {
        let server = daemon().await;
        let robot = DaemonRobot::connect(
            ConnectionMode::Auto,
            Some(&server.uri()),
            SafetyLimits::default(),
        )
        .await
        .unwrap();
        assert_eq!(robot.base_url(), server.uri());
        assert!(robot.capabilities().emotions);
        assert!(!robot.capabilities().camera);
    }

    #[tokio::test]
    async fn connect_fails_when_probe_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/daemon/status"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = DaemonRobot::connect(
            ConnectionMode::Auto,
            Some(&server.uri()),
            SafetyLimits::default(),
        )
        .await;
        assert!(matches!(result, Err(RobotError::Unreachable(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn goto_sends_clamped_radians() {
        let server = daemon().await;
        Mock::given(method("POST"))
            .and(path("/api/move/goto"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let robot = DaemonRobot::connect(
            ConnectionMode::Auto,
            Some(&server.uri()),
            SafetyLimits::default(),
        )
        .await
        .unwrap();
        robot
            .goto_head_pose(
                HeadPose {
                    pitch: 90.0,
                    ..HeadPose::NEUTRAL
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let goto = requests
            .iter()
            .find(|r| r.url.path() == "/api/move/goto")
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&goto.body).unwrap();
        let pitch = body["head_pose"]["pitch"].as_f64().unwrap();
        assert!((pitch - 30f64.to_radians()).abs() < 1e-9);
        assert_eq!(body["duration"], 1.0);
    }

    #[tokio::test]
    async fn rejected_command_surfaces_http_error() {
        let server = daemon().await;
        Mock::given(method("POST"))
            .and(path(format!(
                "/api/move/play/recorded-move-dataset/{EMOTIONS_DATASET}/nope"
            )))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown move"))
            .mount(&server)
            .await;

        let robot = DaemonRobot::connect(
            ConnectionMode::Auto,
            Some(&server.uri()),
            SafetyLimits::default(),
        )
        .await
        .unwrap();
        let err = robot.play_emotion("nope").await.unwrap_err();
        assert!(matches!(err, RobotError::Http { status: 404, .. }));
    }
}
