use chrono::Utc;
use nightfall_bridge::protocol::{BridgeMessage, LifecycleEvent};
use nightfall_core::types::{
    AgentState, FileLock, PlanComplexity, Role, Subtask, TaskPlan, TaskRunStatus,
};

#[test]
fn submit_task_wire_shape_has_no_extra_fields() {
    let msg = BridgeMessage::SubmitTask {
        prompt: "add retry logic to the http client".into(),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "SUBMIT_TASK");
    assert_eq!(json["payload"]["prompt"], "add retry logic to the http client");
}

#[test]
fn approve_plan_with_edited_plan_roundtrips_subtasks() {
    let plan = TaskPlan {
        subtasks: vec![Subtask {
            id: "1".into(),
            description: "write the retry wrapper".into(),
            files: Some(vec!["src/http.rs".into()]),
            success_criteria: Some("requests retry on 5xx".into()),
            constraints: None,
            status: Default::default(),
            depends_on: Vec::new(),
            assigned_to: None,
            files_touched: Vec::new(),
        }],
        complexity: PlanComplexity::Simple,
        estimated_engineers: 1,
    };
    let msg = BridgeMessage::ApprovePlan {
        edited_plan: Some(plan),
    };

    let json = serde_json::to_string(&msg).unwrap();
    let back: BridgeMessage = serde_json::from_str(&json).unwrap();
    match back {
        BridgeMessage::ApprovePlan {
            edited_plan: Some(plan),
        } => {
            assert_eq!(plan.subtasks.len(), 1);
            assert_eq!(plan.subtasks[0].id, "1");
            assert_eq!(
                plan.subtasks[0].files.as_deref(),
                Some(&["src/http.rs".to_string()][..])
            );
        }
        other => panic!("expected ApprovePlan with a plan, got {other:?}"),
    }
}

#[test]
fn agent_update_carries_role_and_status() {
    let state = AgentState::new("engineer-1", Role::Engineer);
    let msg = BridgeMessage::AgentUpdate(state);

    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "AGENT_UPDATE");
    assert_eq!(json["payload"]["role"], "engineer");
    assert_eq!(json["payload"]["status"], "idle");
}

#[test]
fn lock_update_lists_every_held_lock() {
    let locks = vec![
        FileLock {
            path: "src/http.rs".into(),
            locked_by: "engineer-1".into(),
            locked_at: Utc::now(),
        },
        FileLock {
            path: "src/lib.rs".into(),
            locked_by: "engineer-2".into(),
            locked_at: Utc::now(),
        },
    ];
    let msg = BridgeMessage::LockUpdate(locks);

    let json = serde_json::to_value(&msg).unwrap();
    let payload = json["payload"].as_array().unwrap();
    assert_eq!(payload.len(), 2);
    assert_eq!(payload[0]["path"], "src/http.rs");
    assert_eq!(payload[0]["lockedBy"], "engineer-1");
}

#[test]
fn task_complete_without_summary_omits_the_field() {
    let msg = BridgeMessage::TaskComplete {
        status: TaskRunStatus::ReworkLimitReached,
        summary: None,
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["payload"]["status"], "rework_limit_reached");
    assert!(!json["payload"].as_object().unwrap().contains_key("summary"));
}

#[test]
fn lifecycle_model_ready_omits_missing_context_length() {
    let msg = BridgeMessage::Lifecycle(LifecycleEvent::ModelReady {
        model: "llama3".into(),
        context_length: None,
    });
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["payload"]["state"], "model_ready");
    assert!(!json["payload"].as_object().unwrap().contains_key("context_length"));
}

#[test]
fn slash_command_carries_raw_args_string() {
    let msg = BridgeMessage::SlashCommand {
        command: "history".into(),
        args: "rollback 3f9c confirm".into(),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["payload"]["command"], "history");
    assert_eq!(json["payload"]["args"], "rollback 3f9c confirm");
}

#[test]
fn unknown_wire_shape_fails_to_deserialize() {
    let bogus = serde_json::json!({"type": "NOT_A_MESSAGE", "payload": {}});
    let result: Result<BridgeMessage, _> = serde_json::from_value(bogus);
    assert!(result.is_err());
}
