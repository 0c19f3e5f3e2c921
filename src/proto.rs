//! Wire types for the host boundary.
//!
//! Activations arrive and completions leave as length-delimited protobuf.
//! The messages are declared by hand with `prost` derives; the shapes are
//! small enough that generated code would add a build step for no benefit.
//!
//! An activation is `WfActivation { run_id, timestamp, is_replaying,
//! jobs[] }` where every job is a oneof over the eight variants the
//! activator understands. A completion is `WfActivationCompletion { run_id,
//! successful { commands[] } }`. Failures during activation are not encoded
//! here; they are re-raised to the host.

use prost::Message;
use std::collections::HashMap;

/// Opaque value crossing the sandbox boundary. The `metadata` map carries at
/// least the encoding tag (`"encoding"`); `data` is the encoded bytes.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct Payload {
    #[prost(map = "string, bytes", tag = "1")]
    pub metadata: HashMap<String, Vec<u8>>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

/// Serializable form of a user-code failure.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct UserCodeFailure {
    #[prost(string, tag = "1")]
    pub message: String,
}

/// Retry policy attached to a scheduled activity. Interpreted by the worker,
/// never by the core. Fields not meaningful for the backoff kind are zero.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RetryPolicy {
    #[prost(uint32, tag = "1")]
    pub maximum_attempts: u32,
    #[prost(enumeration = "BackoffKind", tag = "2")]
    pub backoff_kind: i32,
    /// Fixed delay, linear base, or exponential base depending on the kind.
    #[prost(uint64, tag = "3")]
    pub base_interval_ms: u64,
    #[prost(double, tag = "4")]
    pub backoff_coefficient: f64,
    #[prost(uint64, tag = "5")]
    pub maximum_interval_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum BackoffKind {
    None = 0,
    Fixed = 1,
    Linear = 2,
    Exponential = 3,
}

// ---------------------------------------------------------------------------
// Activation (host -> core)
// ---------------------------------------------------------------------------

/// A batch of state-transition jobs for one workflow run.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WfActivation {
    #[prost(string, tag = "1")]
    pub run_id: String,
    /// Deterministic time for this activation, milliseconds since epoch.
    #[prost(uint64, tag = "2")]
    pub timestamp_ms: u64,
    #[prost(bool, tag = "3")]
    pub is_replaying: bool,
    #[prost(message, repeated, tag = "4")]
    pub jobs: Vec<WfActivationJob>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WfActivationJob {
    #[prost(oneof = "wf_activation_job::Variant", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
    pub variant: Option<wf_activation_job::Variant>,
}

pub mod wf_activation_job {
    /// Job discriminant. The activator dispatches on this.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "1")]
        StartWorkflow(super::StartWorkflow),
        #[prost(message, tag = "2")]
        CancelWorkflow(super::CancelWorkflow),
        #[prost(message, tag = "3")]
        FireTimer(super::FireTimer),
        #[prost(message, tag = "4")]
        ResolveActivity(super::ResolveActivity),
        #[prost(message, tag = "5")]
        QueryWorkflow(super::QueryWorkflow),
        #[prost(message, tag = "6")]
        SignalWorkflow(super::SignalWorkflow),
        #[prost(message, tag = "7")]
        UpdateRandomSeed(super::UpdateRandomSeed),
        #[prost(message, tag = "8")]
        RemoveFromCache(super::RemoveFromCache),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartWorkflow {
    #[prost(string, tag = "1")]
    pub workflow_type: String,
    #[prost(message, repeated, tag = "2")]
    pub arguments: Vec<Payload>,
    #[prost(map = "string, message", tag = "3")]
    pub headers: HashMap<String, Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelWorkflow {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FireTimer {
    /// Decimal-encoded sequence number.
    #[prost(string, tag = "1")]
    pub timer_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResolveActivity {
    /// Decimal-encoded sequence number.
    #[prost(string, tag = "1")]
    pub activity_id: String,
    #[prost(oneof = "resolve_activity::Status", tags = "2, 3, 4")]
    pub status: Option<resolve_activity::Status>,
}

pub mod resolve_activity {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Status {
        #[prost(message, tag = "2")]
        Completed(super::ActivityCompleted),
        #[prost(message, tag = "3")]
        Failed(super::ActivityFailed),
        #[prost(message, tag = "4")]
        Canceled(super::ActivityCanceled),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivityCompleted {
    /// Absent result payload is distinct from a present-but-null payload and
    /// rejects the waiting future with a payload error.
    #[prost(message, optional, tag = "1")]
    pub result: Option<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivityFailed {
    #[prost(message, optional, tag = "1")]
    pub failure: Option<UserCodeFailure>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActivityCanceled {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryWorkflow {
    #[prost(string, tag = "1")]
    pub query_id: String,
    #[prost(string, tag = "2")]
    pub query_type: String,
    #[prost(message, repeated, tag = "3")]
    pub arguments: Vec<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignalWorkflow {
    #[prost(string, tag = "1")]
    pub signal_name: String,
    #[prost(message, repeated, tag = "2")]
    pub input: Vec<Payload>,
    #[prost(map = "string, message", tag = "3")]
    pub headers: HashMap<String, Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateRandomSeed {
    #[prost(bytes = "vec", tag = "1")]
    pub randomness_seed: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveFromCache {}

// ---------------------------------------------------------------------------
// Completion (core -> host)
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WfActivationCompletion {
    #[prost(string, tag = "1")]
    pub run_id: String,
    #[prost(message, optional, tag = "2")]
    pub successful: Option<Success>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Success {
    #[prost(message, repeated, tag = "1")]
    pub commands: Vec<WorkflowCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowCommand {
    #[prost(oneof = "workflow_command::Variant", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub variant: Option<workflow_command::Variant>,
}

pub mod workflow_command {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Variant {
        #[prost(message, tag = "1")]
        StartTimer(super::StartTimer),
        #[prost(message, tag = "2")]
        CancelTimer(super::CancelTimer),
        #[prost(message, tag = "3")]
        ScheduleActivity(super::ScheduleActivity),
        #[prost(message, tag = "4")]
        RequestCancelActivity(super::RequestCancelActivity),
        #[prost(message, tag = "5")]
        RespondToQuery(super::RespondToQuery),
        #[prost(message, tag = "6")]
        CompleteWorkflowExecution(super::CompleteWorkflowExecution),
        #[prost(message, tag = "7")]
        FailWorkflowExecution(super::FailWorkflowExecution),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StartTimer {
    #[prost(string, tag = "1")]
    pub timer_id: String,
    #[prost(uint64, tag = "2")]
    pub start_to_fire_timeout_ms: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CancelTimer {
    #[prost(string, tag = "1")]
    pub timer_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScheduleActivity {
    #[prost(string, tag = "1")]
    pub activity_id: String,
    #[prost(string, tag = "2")]
    pub activity_type: String,
    #[prost(message, repeated, tag = "3")]
    pub arguments: Vec<Payload>,
    #[prost(string, tag = "4")]
    pub task_queue: String,
    /// Zero means unset for the three timeout fields.
    #[prost(uint64, tag = "5")]
    pub schedule_to_close_timeout_ms: u64,
    #[prost(uint64, tag = "6")]
    pub start_to_close_timeout_ms: u64,
    #[prost(uint64, tag = "7")]
    pub heartbeat_timeout_ms: u64,
    #[prost(message, optional, tag = "8")]
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestCancelActivity {
    #[prost(string, tag = "1")]
    pub activity_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RespondToQuery {
    #[prost(string, tag = "1")]
    pub query_id: String,
    #[prost(oneof = "respond_to_query::QueryResult", tags = "2, 3")]
    pub result: Option<respond_to_query::QueryResult>,
}

pub mod respond_to_query {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum QueryResult {
        #[prost(message, tag = "2")]
        Succeeded(super::QuerySuccess),
        #[prost(message, tag = "3")]
        FailedWithMessage(super::UserCodeFailure),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QuerySuccess {
    #[prost(message, optional, tag = "1")]
    pub response: Option<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CompleteWorkflowExecution {
    #[prost(message, optional, tag = "1")]
    pub result: Option<Payload>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FailWorkflowExecution {
    #[prost(message, optional, tag = "1")]
    pub failure: Option<UserCodeFailure>,
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Decode a length-delimited activation.
pub fn decode_activation(buf: &[u8]) -> Result<WfActivation, prost::DecodeError> {
    WfActivation::decode_length_delimited(buf)
}

/// Encode a length-delimited activation. Used by hosts and tests.
pub fn encode_activation(activation: &WfActivation) -> Vec<u8> {
    activation.encode_length_delimited_to_vec()
}

/// Encode a length-delimited activation completion.
pub fn encode_completion(completion: &WfActivationCompletion) -> Vec<u8> {
    completion.encode_length_delimited_to_vec()
}

/// Decode a length-delimited activation completion. Used by hosts and tests.
pub fn decode_completion(buf: &[u8]) -> Result<WfActivationCompletion, prost::DecodeError> {
    WfActivationCompletion::decode_length_delimited(buf)
}
