use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Run `future` and turn a panic inside it into `Err(message)`.
///
/// Background tasks spawned by the engine wrap their work in this so a panic
/// is reported on the event queue instead of silently killing the task.
///
/// ```ignore
/// tokio::spawn(async move {
///     let event = match catch_task_panic(work).await {
///         Ok(event) => event,
///         Err(error) => SyncEvent::TaskPanicked { task, error },
///     };
///     let _ = tx.send(event).await;
/// });
/// ```
pub async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(panic_message)
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = panic.downcast_ref::<Box<dyn std::error::Error + Send>>() {
        e.to_string()
    } else {
        format!("Unknown panic: {:?}", (*panic).type_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_through_normal_result() {
        assert_eq!(catch_task_panic(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn test_static_str_panic() {
        let result = catch_task_panic(async {
            panic!("boom");
        })
        .await;
        assert_eq!(result, Err::<(), _>("boom".to_string()));
    }

    #[tokio::test]
    async fn test_formatted_panic() {
        let id = 42;
        let result: Result<(), String> = catch_task_panic(async move {
            panic!("bad record {}", id);
        })
        .await;
        assert_eq!(result.unwrap_err(), "bad record 42");
    }
}
