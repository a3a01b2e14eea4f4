// Panic isolation helpers
// Unit workers and batch items run in their own tasks; a panic surfaces as a
// JoinError and is turned into an ordinary failure message here.
use std::any::Any;
use tokio::task::JoinError;
use tracing::error;

/// Best-effort text of a panic payload
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Describe why a spawned task did not return
pub fn describe_join_error(err: JoinError) -> String {
    if err.is_panic() {
        let msg = panic_message(err.into_panic());
        error!(panic_msg = %msg, "Task panicked");
        format!("panicked: {}", msg)
    } else {
        "task was cancelled".to_string()
    }
}
