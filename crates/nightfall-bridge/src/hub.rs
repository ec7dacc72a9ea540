//! Message Hub (C8): a WebSocket endpoint that broadcasts Task Orchestrator
//! and lock-registry events to every connected client and routes client
//! frames (submit/approve/reject/interrupt/slash-command) back into the
//! orchestrator and command dispatcher.
//!
//! Grounded on the teacher's axum WebSocket upgrade handler and
//! `event_bus::EventBus`'s flume multi-subscriber broadcast. One JSON value
//! per WebSocket text frame stands in for the length-delimited framing the
//! spec describes over a raw socket.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use nightfall_agents::orchestrator::{EventSink, Orchestrator, OrchestratorConfig, OrchestratorEvent};
use nightfall_core::config::Config;
use nightfall_core::locks::LockRegistry;
use nightfall_core::types::{TaskPlan, TaskRun, TaskRunStatus};
use nightfall_harness::provider::CompletionProvider;
use nightfall_harness::shutdown::ShutdownSignal;
use nightfall_harness::tools::ToolRegistry;

use crate::commands::{self, CommandError, CommandState};
use crate::event_bus::EventBus;
use crate::protocol::BridgeMessage;

/// Shared hub state: the orchestrator, the event bus clients subscribe to,
/// and the single pending-approval task / active cancellation controller
/// the spec allows at any one time.
struct HubState {
    orchestrator: Arc<Orchestrator>,
    commands: CommandState,
    bus: EventBus,
    pending_approval: Mutex<Option<TaskRun>>,
    active: Mutex<Option<ShutdownSignal>>,
}

/// Owns the orchestrator and exposes an axum router for the WebSocket route.
pub struct Hub {
    state: Arc<HubState>,
}

impl Hub {
    pub fn new(
        project_root: impl Into<PathBuf>,
        provider: Arc<dyn CompletionProvider>,
        tools: Arc<ToolRegistry>,
        config: Config,
    ) -> Self {
        let project_root = project_root.into();
        let (locks, lock_events) = LockRegistry::new();
        locks.clone().spawn_sweeper();

        let orch_config = OrchestratorConfig::from(&config);
        let orchestrator = Arc::new(Orchestrator::new(
            project_root.clone(),
            provider,
            tools,
            locks.clone(),
            orch_config,
        ));

        let bus = EventBus::new();
        spawn_lock_forwarder(locks, lock_events, bus.clone());

        let commands = CommandState::new(project_root, config);
        let state = Arc::new(HubState {
            orchestrator,
            commands,
            bus,
            pending_approval: Mutex::new(None),
            active: Mutex::new(None),
        });
        Self { state }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

fn spawn_lock_forwarder(
    locks: LockRegistry,
    lock_events: flume::Receiver<nightfall_core::locks::LockEvent>,
    bus: EventBus,
) {
    tokio::spawn(async move {
        while lock_events.recv_async().await.is_ok() {
            let snapshot = locks.snapshot().await;
            bus.publish(BridgeMessage::LockUpdate(snapshot));
        }
    });
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HubState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<HubState>) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<BridgeMessage>();

    let mut writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&msg) else {
                continue;
            };
            if sink.send(WsMessage::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let broadcast_rx = state.bus.subscribe();
    let broadcast_tx = out_tx.clone();
    let mut broadcaster = tokio::spawn(async move {
        while let Ok(msg) = broadcast_rx.recv_async().await {
            if broadcast_tx.send(msg).is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<BridgeMessage>(&text) {
            Ok(msg) => handle_client_message(&state, msg, &out_tx).await,
            Err(err) => {
                let _ = out_tx.send(BridgeMessage::Error {
                    message: format!("invalid frame: {err}"),
                });
            }
        }
    }

    broadcaster.abort();
    writer.abort();
}

async fn handle_client_message(
    state: &Arc<HubState>,
    msg: BridgeMessage,
    out_tx: &mpsc::UnboundedSender<BridgeMessage>,
) {
    match msg {
        BridgeMessage::SubmitTask { prompt } => {
            let busy = {
                let active = state.active.lock().await;
                let pending = state.pending_approval.lock().await;
                active.is_some() || pending.is_some()
            };
            if busy {
                let _ = out_tx.send(BridgeMessage::Error {
                    message: "a task is already in progress".into(),
                });
                return;
            }
            tokio::spawn(submit_task(state.clone(), prompt));
        }
        BridgeMessage::ApprovePlan { edited_plan } => {
            let run = state.pending_approval.lock().await.take();
            let Some(run) = run else {
                let _ = out_tx.send(BridgeMessage::Error {
                    message: "no task is awaiting approval".into(),
                });
                return;
            };
            let shutdown = state.active.lock().await.clone();
            let Some(shutdown) = shutdown else {
                let _ = out_tx.send(BridgeMessage::Error {
                    message: "no active cancellation controller for this task".into(),
                });
                return;
            };
            tokio::spawn(approve_task(state.clone(), run, edited_plan, shutdown));
        }
        BridgeMessage::RejectPlan {} => {
            let dropped = state.pending_approval.lock().await.take().is_some();
            if !dropped {
                let _ = out_tx.send(BridgeMessage::Error {
                    message: "no task is awaiting approval".into(),
                });
                return;
            }
            *state.active.lock().await = None;
        }
        BridgeMessage::Interrupt {} => {
            let shutdown = state.active.lock().await.clone();
            match shutdown {
                Some(shutdown) => shutdown.trigger(),
                None => {
                    let _ = out_tx.send(BridgeMessage::Error {
                        message: "no active task to interrupt".into(),
                    });
                }
            }
        }
        BridgeMessage::SlashCommand { command, args } => {
            handle_slash_command(state, command, args, out_tx).await;
        }
        other => {
            let _ = out_tx.send(BridgeMessage::Error {
                message: format!("unexpected client message: {other:?}"),
            });
        }
    }
}

async fn handle_slash_command(
    state: &Arc<HubState>,
    command: String,
    args: String,
    out_tx: &mpsc::UnboundedSender<BridgeMessage>,
) {
    match commands::dispatch(&state.commands, &command, &args).await {
        Ok(output) => {
            let _ = out_tx.send(BridgeMessage::SlashResult { command, output });
        }
        Err(CommandError::Unknown(name)) => {
            let _ = out_tx.send(BridgeMessage::Error {
                message: format!("unknown command: /{name}"),
            });
        }
        Err(err) => {
            let _ = out_tx.send(BridgeMessage::SlashResult {
                command,
                output: serde_json::json!({"type": "error", "message": err.to_string()}),
            });
        }
    }
}

async fn submit_task(state: Arc<HubState>, prompt: String) {
    let shutdown = ShutdownSignal::new();
    *state.active.lock().await = Some(shutdown.clone());

    let sink = make_sink(state.clone());
    let run = state.orchestrator.submit(&prompt, &shutdown, sink).await;

    if run.status == TaskRunStatus::AwaitingApproval {
        *state.pending_approval.lock().await = Some(run);
    } else {
        *state.active.lock().await = None;
    }
}

async fn approve_task(
    state: Arc<HubState>,
    run: TaskRun,
    edited_plan: Option<TaskPlan>,
    shutdown: ShutdownSignal,
) {
    let sink = make_sink(state.clone());
    let _ = state
        .orchestrator
        .approve_and_run(run, edited_plan, &shutdown, sink)
        .await;
    *state.active.lock().await = None;
}

/// Fans orchestrator events out to every connected client and keeps the
/// command dispatcher's view of the active task run current.
fn make_sink(state: Arc<HubState>) -> EventSink {
    Arc::new(move |event: OrchestratorEvent| {
        if let OrchestratorEvent::TaskState(run) = &event {
            let run = run.clone();
            let state = state.clone();
            tokio::spawn(async move {
                *state.commands.current_run.write().await = Some(run);
            });
        }
        state.bus.publish(to_bridge_message(event));
    })
}

fn to_bridge_message(event: OrchestratorEvent) -> BridgeMessage {
    match event {
        OrchestratorEvent::TaskState(run) => BridgeMessage::TaskState(run),
        OrchestratorEvent::PlanReady(plan) => BridgeMessage::PlanReady(plan),
        OrchestratorEvent::AgentUpdate(state) => BridgeMessage::AgentUpdate(state),
        OrchestratorEvent::TaskComplete { status, summary } => {
            BridgeMessage::TaskComplete { status, summary }
        }
    }
}

#[allow(dead_code)]
fn unused_warn_anchor() {
    warn!("hub module loaded");
}
