//! Cancellation-scope behavior: handle-driven cancels, tree fan-out,
//! shielding, and timer sequence parity.

mod common;

use common::*;
use sandcastle::{WorkflowDefinition, WorkflowFailure};
use serde_json::{json, Value};
use std::time::Duration;

/// Cancelling a scope through its handle cancels the timer opened inside
/// it, exactly once, even when cancel is invoked twice.
#[test]
fn scope_handle_cancels_inner_timer_once() {
    let definition = WorkflowDefinition::builder(WORKFLOW_TYPE)
        .main(|ctx, _args| async move {
            let scope = ctx.cancellation_scope({
                let ctx = ctx.clone();
                async move { ctx.start_timer(Duration::from_secs(600)).await }
            });
            let handle = scope.cancel_handle();
            let short = ctx.start_timer(Duration::from_millis(10));
            match ctx.select2(scope, short).await {
                sandcastle::Either2::Second(Ok(())) => {
                    handle.cancel();
                    handle.cancel();
                    ctx.to_payload(&"short won")
                }
                other => Err(WorkflowFailure::Application(format!(
                    "expected short timer to win, got {other:?}"
                ))),
            }
        })
        .build()
        .unwrap();
    let mut engine = engine_for(definition);

    let commands = deliver_and_conclude(&mut engine, 1_000, vec![start_job()]);
    // Short timer is created before the scope body first polls.
    assert_eq!(commands.len(), 2);
    assert_start_timer(&commands[0], "0", 10);
    assert_start_timer(&commands[1], "1", 600_000);

    let commands = deliver_and_conclude(&mut engine, 1_010, vec![fire_timer_job(0)]);
    assert_eq!(commands.len(), 2, "exactly one cancel despite two handle cancels");
    assert_cancel_timer(&commands[0], "1");
    assert_completed_with(&commands[1], json!("short won"));
    assert_eq!(engine.completion_table_len(), 0);
}

/// External workflow cancel fans out through a nested scope and rejects
/// every pending timer in creation order.
#[test]
fn workflow_cancel_fans_out_to_nested_timers() {
    let definition = WorkflowDefinition::builder(WORKFLOW_TYPE)
        .main(|ctx, _args| async move {
            let scope = ctx.cancellation_scope({
                let ctx = ctx.clone();
                async move {
                    let t1 = ctx.start_timer(Duration::from_secs(600));
                    let t2 = ctx.start_timer(Duration::from_secs(700));
                    ctx.join(vec![t1, t2]).await
                }
            });
            match scope.await {
                Err(failure) if failure.is_cancellation() => ctx.to_payload(&"outer cancelled"),
                other => Err(WorkflowFailure::Application(format!(
                    "expected cancellation, got {other:?}"
                ))),
            }
        })
        .build()
        .unwrap();
    let mut engine = engine_for(definition);

    let commands = deliver_and_conclude(&mut engine, 1_000, vec![start_job()]);
    assert_eq!(commands.len(), 2);
    assert_start_timer(&commands[0], "0", 600_000);
    assert_start_timer(&commands[1], "1", 700_000);

    let commands = deliver_and_conclude(&mut engine, 2_000, vec![cancel_workflow_job()]);
    assert_eq!(commands.len(), 3);
    assert_cancel_timer(&commands[0], "0");
    assert_cancel_timer(&commands[1], "1");
    assert_completed_with(&commands[2], json!("outer cancelled"));
    assert_eq!(engine.completion_table_len(), 0);
    assert!(engine.scope_stack_is_quiescent());
}

/// A shielded scope is not a cancellable child: external cancel leaves its
/// timer running and the workflow finishes normally.
#[test]
fn shielded_scope_survives_external_cancel() {
    let definition = WorkflowDefinition::builder(WORKFLOW_TYPE)
        .main(|ctx, _args| async move {
            let shielded = ctx.shielded({
                let ctx = ctx.clone();
                async move { ctx.start_timer(Duration::from_secs(60)).await }
            });
            let inner = shielded.await?;
            inner?;
            ctx.to_payload(&"survived")
        })
        .build()
        .unwrap();
    let mut engine = engine_for(definition);

    deliver_and_conclude(&mut engine, 1_000, vec![start_job()]);

    let commands = deliver_and_conclude(&mut engine, 2_000, vec![cancel_workflow_job()]);
    assert!(
        commands.is_empty(),
        "no cancel command may reach the shielded timer, got {commands:?}"
    );
    assert!(engine.is_cancelled());
    assert!(!engine.is_completed());

    let commands = deliver_and_conclude(&mut engine, 3_000, vec![fire_timer_job(0)]);
    assert_eq!(commands.len(), 1);
    assert_completed_with(&commands[0], json!("survived"));
}

/// Cancelling a timer consumes a sequence number, so the next operation
/// skips one: ids 0, then 2.
#[test]
fn timer_cancellation_preserves_sequence_parity() {
    let definition = WorkflowDefinition::builder(WORKFLOW_TYPE)
        .main(|ctx, _args| async move {
            let t0 = ctx.start_timer(Duration::from_secs(10));
            ctx.cancel_timer(&t0);
            let t1 = ctx.start_timer(Duration::from_millis(5));
            t1.await?;
            ctx.to_payload(&Value::Null)
        })
        .build()
        .unwrap();
    let mut engine = engine_for(definition);

    let commands = deliver_and_conclude(&mut engine, 1_000, vec![start_job()]);
    assert_eq!(commands.len(), 3);
    assert_start_timer(&commands[0], "0", 10_000);
    assert_cancel_timer(&commands[1], "0");
    assert_start_timer(&commands[2], "2", 5);

    let commands = deliver_and_conclude(&mut engine, 1_005, vec![fire_timer_job(2)]);
    assert_completed_with(&commands[0], Value::Null);
}

/// Cancelling a timer that already fired does nothing: the await still
/// observes the firing.
#[test]
fn cancelling_a_fired_timer_is_a_noop() {
    let definition = WorkflowDefinition::builder(WORKFLOW_TYPE)
        .main(|ctx, _args| async move {
            let t0 = ctx.start_timer(Duration::from_millis(5));
            let t1 = ctx.start_timer(Duration::from_millis(20));
            t1.await?;
            ctx.cancel_timer(&t0);
            t0.await?;
            ctx.to_payload(&"both fired")
        })
        .build()
        .unwrap();
    let mut engine = engine_for(definition);

    deliver_and_conclude(&mut engine, 1_000, vec![start_job()]);
    // t0 fires before t1 resumes the workflow; the later cancel sees a
    // fired timer and must not emit anything.
    let commands = deliver_and_conclude(
        &mut engine,
        1_020,
        vec![fire_timer_job(0), fire_timer_job(1)],
    );
    assert_eq!(commands.len(), 1, "no cancel command expected, got {commands:?}");
    assert_completed_with(&commands[0], json!("both fired"));
}

/// Once the run is cancelled, new cancellable work under the root is
/// stillborn: no command is emitted and the await rejects immediately.
#[test]
fn new_work_after_workflow_cancel_is_stillborn() {
    let definition = WorkflowDefinition::builder(WORKFLOW_TYPE)
        .main(|ctx, _args| async move {
            let scope = ctx.cancellation_scope({
                let ctx = ctx.clone();
                async move { ctx.start_timer(Duration::from_secs(600)).await }
            });
            match scope.await {
                Err(failure) if failure.is_cancellation() => {
                    let late = ctx.start_timer(Duration::from_secs(1));
                    match late.await {
                        Err(f) if f.is_cancellation() => ctx.to_payload(&"fully cancelled"),
                        other => Err(WorkflowFailure::Application(format!(
                            "late timer should be stillborn, got {other:?}"
                        ))),
                    }
                }
                other => Err(WorkflowFailure::Application(format!(
                    "expected cancellation, got {other:?}"
                ))),
            }
        })
        .build()
        .unwrap();
    let mut engine = engine_for(definition);

    deliver_and_conclude(&mut engine, 1_000, vec![start_job()]);
    let commands = deliver_and_conclude(&mut engine, 2_000, vec![cancel_workflow_job()]);
    assert_eq!(commands.len(), 2);
    assert_cancel_timer(&commands[0], "0");
    assert_completed_with(&commands[1], json!("fully cancelled"));
    assert_eq!(engine.completion_table_len(), 0);
}

/// Request-cancelling an activity emits the cancel command but leaves the
/// await pending until the service acknowledges.
#[test]
fn activity_request_cancel_defers_rejection_until_ack() {
    let definition = WorkflowDefinition::builder(WORKFLOW_TYPE)
        .main(|ctx, _args| async move {
            let activity = ctx.schedule_activity("Upload", vec![]);
            let gate = ctx.start_timer(Duration::from_millis(1));
            gate.await?;
            ctx.request_cancel_activity(&activity);
            match activity.await {
                Err(failure) if failure.is_cancellation() => ctx.to_payload(&"upload cancelled"),
                other => Err(WorkflowFailure::Application(format!(
                    "expected cancellation, got {other:?}"
                ))),
            }
        })
        .build()
        .unwrap();
    let mut engine = engine_for(definition);

    let commands = deliver_and_conclude(&mut engine, 1_000, vec![start_job()]);
    assert_eq!(commands.len(), 2);
    assert_schedule_activity(&commands[0], "0", "Upload");
    assert_start_timer(&commands[1], "1", 1);

    let commands = deliver_and_conclude(&mut engine, 1_001, vec![fire_timer_job(1)]);
    assert_eq!(commands.len(), 1, "request only, no completion yet");
    assert_request_cancel_activity(&commands[0], "0");
    assert!(!engine.is_completed());

    let commands = deliver_and_conclude(&mut engine, 1_002, vec![resolve_activity_canceled(0)]);
    assert_eq!(commands.len(), 1);
    assert_completed_with(&commands[0], json!("upload cancelled"));
    assert_eq!(engine.completion_table_len(), 0);
}
