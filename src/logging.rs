//! Replay-guarded logging macros for workflow code.
//!
//! These forward to the context trace helpers, which suppress output while
//! the activation is replaying so logs are emitted exactly once per run.

#[macro_export]
macro_rules! wf_info {
    ($ctx:expr, $($arg:tt)+) => {{
        $ctx.trace_info(format!($($arg)+));
    }};
}

#[macro_export]
macro_rules! wf_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        $ctx.trace_warn(format!($($arg)+));
    }};
}

#[macro_export]
macro_rules! wf_error {
    ($ctx:expr, $($arg:tt)+) => {{
        $ctx.trace_error(format!($($arg)+));
    }};
}

#[macro_export]
macro_rules! wf_debug {
    ($ctx:expr, $($arg:tt)+) => {{
        $ctx.trace_debug(format!($($arg)+));
    }};
}
