//! ReplicatedApp CRD
//!
//! Declares a replicated application: how many replicas of which image
//! should be running. The controller drives `status.availableReplicas`
//! toward `spec.replicas`.

use crate::error::CrdError;
use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported on every reconciled ReplicatedApp.
pub const CONDITION_READY: &str = "Ready";

/// Reason used when the spec cannot be acted upon.
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "apps.microscaler.io",
    version = "v1alpha1",
    kind = "ReplicatedApp",
    namespaced,
    shortname = "rapp",
    status = "ReplicatedAppStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Available", "type":"integer", "jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedAppSpec {
    /// Desired number of replicas (must not be negative)
    pub replicas: i32,

    /// Container image every replica runs
    pub image: String,
}

impl ReplicatedAppSpec {
    /// Creates a spec for `replicas` copies of `image`.
    pub fn new(replicas: i32, image: impl Into<String>) -> Self {
        Self {
            replicas,
            image: image.into(),
        }
    }

    /// Checks the spec can be acted upon.
    ///
    /// All problems are collected into a single `CrdError::InvalidSpec`
    /// so the status condition can show them at once.
    pub fn validate(&self) -> Result<(), CrdError> {
        let mut problems = Vec::new();
        if self.replicas < 0 {
            problems.push(format!("replicas must be >= 0, got {}", self.replicas));
        }
        if self.image.trim().is_empty() {
            problems.push("image must not be empty".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CrdError::InvalidSpec(problems.join("; ")))
        }
    }

    /// Desired replica count, or `None` when negative.
    pub fn desired_replicas(&self) -> Option<u32> {
        u32::try_from(self.replicas).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedAppStatus {
    /// Replicas the workload driver reports as available
    #[serde(default)]
    pub available_replicas: u32,

    /// Generation of the spec this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Coarse lifecycle phase
    #[serde(default)]
    pub phase: AppPhase,

    /// Detailed conditions (currently only `Ready`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<AppCondition>,

    /// Last time the phase changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<DateTime<Utc>>,
}

impl ReplicatedAppStatus {
    /// Looks up a condition by type.
    pub fn condition(&self, type_: &str) -> Option<&AppCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Inserts or replaces the condition of the same type.
    ///
    /// `lastTransitionTime` is carried over when the condition status did not
    /// change, so repeated passes produce an identical status.
    pub fn set_condition(&mut self, mut condition: AppCondition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Compares two statuses ignoring timestamps.
    ///
    /// Used to decide whether a status write is needed at all.
    pub fn same_observation(&self, other: &Self) -> bool {
        self.available_replicas == other.available_replicas
            && self.observed_generation == other.observed_generation
            && self.phase == other.phase
            && self.conditions.len() == other.conditions.len()
            && self.conditions.iter().zip(&other.conditions).all(|(a, b)| {
                a.type_ == b.type_
                    && a.status == b.status
                    && a.reason == b.reason
                    && a.message == b.message
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
/// Lifecycle phase of a ReplicatedApp
///
/// Serializes as PascalCase ("Available", "Failed", etc.) but deserializes
/// lowercase as well.
#[serde(rename_all = "PascalCase")]
pub enum AppPhase {
    /// Not reconciled yet
    #[default]
    #[serde(alias = "pending")]
    Pending,

    /// Actions issued, waiting for the driver to report availability
    #[serde(alias = "progressing")]
    Progressing,

    /// Available replicas match the desired count
    #[serde(alias = "available")]
    Available,

    /// Spec is invalid; reconciliation is parked until it changes
    #[serde(alias = "failed")]
    Failed,
}

impl std::fmt::Display for AppPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AppPhase::Pending => "Pending",
            AppPhase::Progressing => "Progressing",
            AppPhase::Available => "Available",
            AppPhase::Failed => "Failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppCondition {
    /// Condition type, e.g. "Ready"
    #[serde(rename = "type")]
    pub type_: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    /// Machine-readable reason in CamelCase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl AppCondition {
    /// Builds a `Ready` condition stamped with the current time.
    pub fn ready(ready: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: CONDITION_READY.to_string(),
            status: if ready { "True" } else { "False" }.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
            last_transition_time: Some(Utc::now()),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}
