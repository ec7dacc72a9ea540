//! Wire protocol for the Message Hub (C8): the length-delimited JSON frames
//! exchanged between a connected client and the daemon over a WebSocket.
//!
//! Grounded on the teacher's `BridgeMessage` discriminated union — one enum,
//! `#[serde(tag = "type", content = "payload")]`, each variant a distinct
//! wire message — generalized from bead/agent/KPI payloads to task-run,
//! plan, agent, and lock payloads.

use nightfall_core::types::{AgentState, FileLock, TaskPlan, TaskRun, TaskRunStatus};
use serde::{Deserialize, Serialize};

/// Provider startup state machine, broadcast as `LIFECYCLE` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Detecting,
    Starting,
    Ready,
    CheckingModel { model: String },
    PullingModel { model: String, progress: u8 },
    ValidatingApiKey,
    ApiKeyValid,
    ModelReady {
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context_length: Option<u32>,
    },
    Fatal { message: String },
}

/// One frame of the hub protocol, in either direction.
///
/// Client-originated: `SubmitTask`, `ApprovePlan`, `RejectPlan`, `Interrupt`,
/// `SlashCommand`. Hub-originated: everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeMessage {
    // ---- client -> hub ----
    SubmitTask {
        prompt: String,
    },
    ApprovePlan {
        #[serde(skip_serializing_if = "Option::is_none")]
        edited_plan: Option<TaskPlan>,
    },
    RejectPlan {},
    Interrupt {},
    SlashCommand {
        command: String,
        args: String,
    },

    // ---- hub -> client ----
    Lifecycle(LifecycleEvent),
    TaskState(TaskRun),
    PlanReady(TaskPlan),
    TaskComplete {
        status: TaskRunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    AgentUpdate(AgentState),
    LockUpdate(Vec<FileLock>),
    SlashResult {
        command: String,
        output: serde_json::Value,
    },
    Error {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &BridgeMessage) {
        let json = serde_json::to_string(msg).expect("serialize");
        let back: BridgeMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(format!("{:?}", msg), format!("{:?}", back));
    }

    #[test]
    fn submit_task_roundtrips() {
        roundtrip(&BridgeMessage::SubmitTask {
            prompt: "add a feature".into(),
        });
    }

    #[test]
    fn approve_plan_without_edit_roundtrips() {
        roundtrip(&BridgeMessage::ApprovePlan { edited_plan: None });
    }

    #[test]
    fn reject_plan_and_interrupt_roundtrip() {
        roundtrip(&BridgeMessage::RejectPlan {});
        roundtrip(&BridgeMessage::Interrupt {});
    }

    #[test]
    fn slash_command_roundtrips() {
        roundtrip(&BridgeMessage::SlashCommand {
            command: "history".into(),
            args: "rollback abc123".into(),
        });
    }

    #[test]
    fn task_complete_roundtrips() {
        roundtrip(&BridgeMessage::TaskComplete {
            status: TaskRunStatus::Completed,
            summary: Some("done".into()),
        });
    }

    #[test]
    fn lock_update_roundtrips() {
        roundtrip(&BridgeMessage::LockUpdate(Vec::new()));
    }

    #[test]
    fn error_roundtrips() {
        roundtrip(&BridgeMessage::Error {
            message: "no task is awaiting approval".into(),
        });
    }

    #[test]
    fn lifecycle_variants_roundtrip() {
        roundtrip(&BridgeMessage::Lifecycle(LifecycleEvent::Detecting));
        roundtrip(&BridgeMessage::Lifecycle(LifecycleEvent::PullingModel {
            model: "llama3".into(),
            progress: 42,
        }));
        roundtrip(&BridgeMessage::Lifecycle(LifecycleEvent::ModelReady {
            model: "llama3".into(),
            context_length: Some(8192),
        }));
        roundtrip(&BridgeMessage::Lifecycle(LifecycleEvent::Fatal {
            message: "no provider configured".into(),
        }));
    }

    #[test]
    fn json_uses_screaming_snake_case_tags() {
        let json = serde_json::to_value(&BridgeMessage::RejectPlan {}).unwrap();
        assert_eq!(json["type"], "REJECT_PLAN");

        let json = serde_json::to_value(&BridgeMessage::Interrupt {}).unwrap();
        assert_eq!(json["type"], "INTERRUPT");
    }

    #[test]
    fn slash_result_carries_arbitrary_json() {
        roundtrip(&BridgeMessage::SlashResult {
            command: "status".into(),
            output: serde_json::json!({"version": "0.1.0"}),
        });
    }
}
