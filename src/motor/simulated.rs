//! In-memory motor subsystem
//!
//! Keeps a table of joint positions and properties so the dispatcher can be
//! run and exercised without servo hardware attached.

use super::Motor;
use crate::message::MessageEnvelope;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bert_shared::{keys, RequestType, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Joints of the bert body
pub const DEFAULT_JOINTS: [&str; 14] = [
    "neck_y",
    "neck_z",
    "left_shoulder_x",
    "left_shoulder_y",
    "left_elbow_y",
    "right_shoulder_x",
    "right_shoulder_y",
    "right_elbow_y",
    "left_hip_y",
    "left_knee_y",
    "left_ankle_y",
    "right_hip_y",
    "right_knee_y",
    "right_ankle_y",
];

const POSITION: &str = "position";

#[derive(Debug, Default, Clone)]
struct JointState {
    position: f64,
    properties: HashMap<String, String>,
}

/// Motor subsystem backed by an in-memory joint table
pub struct SimulatedMotor {
    joints: RwLock<HashMap<String, JointState>>,
    handled: AtomicU64,
    stopped: AtomicBool,
}

impl SimulatedMotor {
    /// Create a motor with the given joints, all at position zero
    pub fn new<I, S>(joints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            joints: RwLock::new(
                joints
                    .into_iter()
                    .map(|j| (j.into(), JointState::default()))
                    .collect(),
            ),
            handled: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn with_default_joints() -> Self {
        Self::new(DEFAULT_JOINTS)
    }

    /// Current position of a joint
    pub async fn position(&self, joint: &str) -> Option<f64> {
        self.joints.read().await.get(joint).map(|j| j.position)
    }

    /// Number of requests carried out so far
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::SeqCst)
    }

    async fn set_pose(&self, envelope: &MessageEnvelope) -> Result<String> {
        let request = envelope.payload().ok_or_else(|| anyhow!("Request has no payload"))?;
        let pose = request.property(keys::POSE);

        if request.joint_targets.is_empty() {
            bail!("No joint targets for pose {}", pose.unwrap_or("(unnamed)"));
        }

        let mut joints = self.joints.write().await;
        if let Some(unknown) = request.joint_targets.keys().find(|j| !joints.contains_key(*j)) {
            bail!("Unknown joint: {}", unknown);
        }
        for (joint, target) in &request.joint_targets {
            if let Some(state) = joints.get_mut(joint) {
                state.position = *target;
            }
        }

        Ok(match pose {
            Some(name) => format!("I am now in the {} pose", name),
            None => format!("Moved {} joints", request.joint_targets.len()),
        })
    }

    async fn set_property(&self, envelope: &MessageEnvelope) -> Result<String> {
        let request = envelope.payload().ok_or_else(|| anyhow!("Request has no payload"))?;
        let joint = required(request.property(keys::JOINT), keys::JOINT)?;
        let property = required(request.property(keys::PROPERTY), keys::PROPERTY)?;
        let value = required(request.property(keys::VALUE), keys::VALUE)?;

        let mut joints = self.joints.write().await;
        let state = joints
            .get_mut(joint)
            .ok_or_else(|| anyhow!("Unknown joint: {}", joint))?;

        if property.eq_ignore_ascii_case(POSITION) {
            state.position = value
                .parse()
                .map_err(|_| anyhow!("Invalid position for {}: {}", joint, value))?;
        } else {
            state
                .properties
                .insert(property.to_ascii_lowercase(), value.to_string());
        }

        Ok(format!("Set the {} of {} to {}", property, joint, value))
    }

    async fn get_property(&self, envelope: &MessageEnvelope) -> Result<String> {
        let request = envelope.payload().ok_or_else(|| anyhow!("Request has no payload"))?;
        let joint = required(request.property(keys::JOINT), keys::JOINT)?;
        let property = required(request.property(keys::PROPERTY), keys::PROPERTY)?;

        let joints = self.joints.read().await;
        let state = joints
            .get(joint)
            .ok_or_else(|| anyhow!("Unknown joint: {}", joint))?;

        let value = if property.eq_ignore_ascii_case(POSITION) {
            format!("{:.1}", state.position)
        } else {
            state
                .properties
                .get(&property.to_ascii_lowercase())
                .cloned()
                .ok_or_else(|| anyhow!("The {} of {} is not set", property, joint))?
        };

        Ok(format!("The {} of {} is {}", property, joint, value))
    }
}

fn required<'a>(value: Option<&'a str>, key: &str) -> Result<&'a str> {
    value.ok_or_else(|| anyhow!("Missing property: {}", key))
}

#[async_trait]
impl Motor for SimulatedMotor {
    async fn process_request(&self, envelope: &MessageEnvelope) -> Result<Response> {
        if self.stopped.load(Ordering::SeqCst) {
            bail!("Motor subsystem is stopped");
        }

        let request_type = envelope.request_type();
        debug!(
            "[MOTOR] Envelope {} {:?} chain={:?}",
            envelope.id(),
            request_type,
            envelope.chain()
        );

        let text = match request_type {
            RequestType::SetPose => self.set_pose(envelope).await?,
            RequestType::SetMotorProperty => self.set_property(envelope).await?,
            RequestType::GetMotorProperty => self.get_property(envelope).await?,
            other => bail!("Motor cannot handle {:?} requests", other),
        };

        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(Response::text(envelope.id(), request_type, text))
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        info!("[MOTOR] Stopped after {} requests", self.handled());
        Ok(())
    }
}
