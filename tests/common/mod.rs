//! Shared helpers for engine tests: activation builders, a host-side driver,
//! and assertions over decoded command sequences.
#![allow(dead_code)]

use sandcastle::proto::{
    self, resolve_activity, wf_activation_job::Variant, workflow_command, ActivityCanceled,
    ActivityCompleted, ActivityFailed, CancelWorkflow, FireTimer, QueryWorkflow, RemoveFromCache,
    ResolveActivity, SignalWorkflow, StartWorkflow, UpdateRandomSeed, WfActivation,
    WfActivationJob, WorkflowCommand,
};
use sandcastle::{
    Conclusion, EngineError, JobOutcome, JsonPayloadConverter, Payload, PayloadConverter,
    WorkflowDefinition, WorkflowEngine, WorkflowInfo,
};
use serde_json::Value;
use std::collections::HashMap;

pub const RUN_ID: &str = "run-1";
pub const WORKFLOW_TYPE: &str = "TestWorkflow";

pub fn test_info() -> WorkflowInfo {
    WorkflowInfo {
        workflow_id: "wf-1".to_string(),
        run_id: RUN_ID.to_string(),
        workflow_type: WORKFLOW_TYPE.to_string(),
        task_queue: "test-queue".to_string(),
        namespace: "default".to_string(),
        is_replaying: false,
    }
}

/// Install a test subscriber once; RUST_LOG controls verbosity.
pub fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn engine_for(definition: WorkflowDefinition) -> WorkflowEngine {
    init_test_tracing();
    WorkflowEngine::builder(definition, test_info())
        .randomness_seed(b"test-seed".to_vec())
        .build()
}

// ============================================================================
// Payload helpers
// ============================================================================

pub fn json_payload(value: Value) -> Payload {
    JsonPayloadConverter.to_payload(&value).unwrap()
}

pub fn payload_json(payload: &Payload) -> Value {
    JsonPayloadConverter.from_payload(payload).unwrap()
}

// ============================================================================
// Job builders
// ============================================================================

pub fn start_job() -> Variant {
    Variant::StartWorkflow(StartWorkflow {
        workflow_type: WORKFLOW_TYPE.to_string(),
        arguments: vec![],
        headers: HashMap::new(),
    })
}

pub fn start_job_with_args(arguments: Vec<Value>) -> Variant {
    Variant::StartWorkflow(StartWorkflow {
        workflow_type: WORKFLOW_TYPE.to_string(),
        arguments: arguments.into_iter().map(json_payload).collect(),
        headers: HashMap::new(),
    })
}

pub fn headers_map(entries: Vec<(&str, Value)>) -> HashMap<String, Payload> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), json_payload(value)))
        .collect()
}

pub fn start_job_with_headers(headers: Vec<(&str, Value)>) -> Variant {
    Variant::StartWorkflow(StartWorkflow {
        workflow_type: WORKFLOW_TYPE.to_string(),
        arguments: vec![],
        headers: headers_map(headers),
    })
}

pub fn signal_job_with_headers(
    signal_name: &str,
    input: Vec<Value>,
    headers: Vec<(&str, Value)>,
) -> Variant {
    Variant::SignalWorkflow(SignalWorkflow {
        signal_name: signal_name.to_string(),
        input: input.into_iter().map(json_payload).collect(),
        headers: headers_map(headers),
    })
}

pub fn cancel_workflow_job() -> Variant {
    Variant::CancelWorkflow(CancelWorkflow {})
}

pub fn fire_timer_job(seq: u64) -> Variant {
    Variant::FireTimer(FireTimer {
        timer_id: seq.to_string(),
    })
}

pub fn resolve_activity_ok(seq: u64, result: Value) -> Variant {
    Variant::ResolveActivity(ResolveActivity {
        activity_id: seq.to_string(),
        status: Some(resolve_activity::Status::Completed(ActivityCompleted {
            result: Some(json_payload(result)),
        })),
    })
}

pub fn resolve_activity_raw(seq: u64, result: Option<Payload>) -> Variant {
    Variant::ResolveActivity(ResolveActivity {
        activity_id: seq.to_string(),
        status: Some(resolve_activity::Status::Completed(ActivityCompleted {
            result,
        })),
    })
}

pub fn resolve_activity_failed(seq: u64, message: &str) -> Variant {
    Variant::ResolveActivity(ResolveActivity {
        activity_id: seq.to_string(),
        status: Some(resolve_activity::Status::Failed(ActivityFailed {
            failure: Some(proto::UserCodeFailure {
                message: message.to_string(),
            }),
        })),
    })
}

pub fn resolve_activity_canceled(seq: u64) -> Variant {
    Variant::ResolveActivity(ResolveActivity {
        activity_id: seq.to_string(),
        status: Some(resolve_activity::Status::Canceled(ActivityCanceled {})),
    })
}

pub fn query_job(query_id: &str, query_type: &str, arguments: Vec<Value>) -> Variant {
    Variant::QueryWorkflow(QueryWorkflow {
        query_id: query_id.to_string(),
        query_type: query_type.to_string(),
        arguments: arguments.into_iter().map(json_payload).collect(),
    })
}

pub fn signal_job(signal_name: &str, input: Vec<Value>) -> Variant {
    Variant::SignalWorkflow(SignalWorkflow {
        signal_name: signal_name.to_string(),
        input: input.into_iter().map(json_payload).collect(),
        headers: HashMap::new(),
    })
}

pub fn update_random_seed_job(seed: &[u8]) -> Variant {
    Variant::UpdateRandomSeed(UpdateRandomSeed {
        randomness_seed: seed.to_vec(),
    })
}

pub fn remove_from_cache_job() -> Variant {
    Variant::RemoveFromCache(RemoveFromCache {})
}

pub fn encode_jobs(timestamp_ms: u64, is_replaying: bool, jobs: &[Variant]) -> Vec<u8> {
    proto::encode_activation(&WfActivation {
        run_id: RUN_ID.to_string(),
        timestamp_ms,
        is_replaying,
        jobs: jobs
            .iter()
            .map(|v| WfActivationJob {
                variant: Some(v.clone()),
            })
            .collect(),
    })
}

// ============================================================================
// Host-side driver
// ============================================================================

/// Dispatch every job of one activation, in order.
pub fn deliver(
    engine: &mut WorkflowEngine,
    timestamp_ms: u64,
    jobs: Vec<Variant>,
) -> Result<Vec<JobOutcome>, EngineError> {
    let bytes = encode_jobs(timestamp_ms, false, &jobs);
    let mut outcomes = Vec::new();
    for i in 0..jobs.len() {
        outcomes.push(engine.activate(&bytes, i)?);
    }
    Ok(outcomes)
}

/// Deliver jobs and conclude, expecting a completed activation; returns the
/// decoded command sequence.
pub fn deliver_and_conclude(
    engine: &mut WorkflowEngine,
    timestamp_ms: u64,
    jobs: Vec<Variant>,
) -> Vec<WorkflowCommand> {
    deliver(engine, timestamp_ms, jobs).expect("activation should succeed");
    conclude_complete(engine)
}

/// Conclude, expecting the complete outcome; returns decoded commands.
pub fn conclude_complete(engine: &mut WorkflowEngine) -> Vec<WorkflowCommand> {
    match engine.conclude().expect("conclude should succeed") {
        Conclusion::Complete { encoded } => {
            let completion = proto::decode_completion(&encoded).expect("completion should decode");
            assert_eq!(completion.run_id, RUN_ID);
            completion.successful.expect("successful outcome").commands
        }
        Conclusion::Pending { external_calls } => {
            panic!("expected complete conclusion, got pending: {external_calls:?}")
        }
    }
}

// ============================================================================
// Command assertions
// ============================================================================

pub fn variant(command: &WorkflowCommand) -> &workflow_command::Variant {
    command.variant.as_ref().expect("command missing variant")
}

pub fn assert_start_timer(command: &WorkflowCommand, timer_id: &str, timeout_ms: u64) {
    match variant(command) {
        workflow_command::Variant::StartTimer(t) => {
            assert_eq!(t.timer_id, timer_id, "unexpected timer id");
            assert_eq!(t.start_to_fire_timeout_ms, timeout_ms, "unexpected timeout");
        }
        other => panic!("expected StartTimer, got {other:?}"),
    }
}

pub fn assert_cancel_timer(command: &WorkflowCommand, timer_id: &str) {
    match variant(command) {
        workflow_command::Variant::CancelTimer(t) => {
            assert_eq!(t.timer_id, timer_id, "unexpected timer id");
        }
        other => panic!("expected CancelTimer, got {other:?}"),
    }
}

pub fn assert_schedule_activity(command: &WorkflowCommand, activity_id: &str, activity_type: &str) {
    match variant(command) {
        workflow_command::Variant::ScheduleActivity(a) => {
            assert_eq!(a.activity_id, activity_id, "unexpected activity id");
            assert_eq!(a.activity_type, activity_type, "unexpected activity type");
        }
        other => panic!("expected ScheduleActivity, got {other:?}"),
    }
}

pub fn assert_request_cancel_activity(command: &WorkflowCommand, activity_id: &str) {
    match variant(command) {
        workflow_command::Variant::RequestCancelActivity(a) => {
            assert_eq!(a.activity_id, activity_id, "unexpected activity id");
        }
        other => panic!("expected RequestCancelActivity, got {other:?}"),
    }
}

pub fn assert_completed_with(command: &WorkflowCommand, expected: Value) {
    match variant(command) {
        workflow_command::Variant::CompleteWorkflowExecution(c) => {
            let payload = c.result.as_ref().expect("completion result payload");
            assert_eq!(payload_json(payload), expected, "unexpected workflow result");
        }
        other => panic!("expected CompleteWorkflowExecution, got {other:?}"),
    }
}

pub fn assert_failed_with(command: &WorkflowCommand, expected_substr: &str) {
    match variant(command) {
        workflow_command::Variant::FailWorkflowExecution(f) => {
            let message = f.failure.as_ref().map(|u| u.message.as_str()).unwrap_or("");
            assert!(
                message.contains(expected_substr),
                "expected failure containing '{expected_substr}', got '{message}'"
            );
        }
        other => panic!("expected FailWorkflowExecution, got {other:?}"),
    }
}

pub fn assert_query_succeeded(command: &WorkflowCommand, query_id: &str, expected: Value) {
    match variant(command) {
        workflow_command::Variant::RespondToQuery(r) => {
            assert_eq!(r.query_id, query_id, "unexpected query id");
            match r.result.as_ref().expect("query result") {
                proto::respond_to_query::QueryResult::Succeeded(s) => {
                    let payload = s.response.as_ref().expect("query response payload");
                    assert_eq!(payload_json(payload), expected, "unexpected query response");
                }
                other => panic!("expected succeeded query, got {other:?}"),
            }
        }
        other => panic!("expected RespondToQuery, got {other:?}"),
    }
}

pub fn assert_query_failed(command: &WorkflowCommand, query_id: &str, expected_substr: &str) {
    match variant(command) {
        workflow_command::Variant::RespondToQuery(r) => {
            assert_eq!(r.query_id, query_id, "unexpected query id");
            match r.result.as_ref().expect("query result") {
                proto::respond_to_query::QueryResult::FailedWithMessage(f) => {
                    assert!(
                        f.message.contains(expected_substr),
                        "expected query failure containing '{expected_substr}', got '{}'",
                        f.message
                    );
                }
                other => panic!("expected failed query, got {other:?}"),
            }
        }
        other => panic!("expected RespondToQuery, got {other:?}"),
    }
}
