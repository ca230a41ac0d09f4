//! Consumer side of a task: the event sequence served to one stream client.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::TaskEvent;
use crate::registry::TaskRegistry;

/// Events of `task_id` in production order, ending after `end`.
///
/// Waits up to `attach_timeout` for the task to be registered. An unknown task
/// or a second consumer gets a single global `error` event instead. Dropping
/// the stream before `end` cancels the task.
pub fn task_events(
    registry: Arc<TaskRegistry>,
    task_id: Uuid,
    attach_timeout: Option<Duration>,
) -> impl Stream<Item = TaskEvent> + Send {
    async_stream::stream! {
        let mut subscription = match registry.attach(task_id, attach_timeout).await {
            Ok(subscription) => subscription,
            Err(e) => {
                info!(%task_id, error = %e, "Stream could not attach to task");
                yield TaskEvent::error(e.to_string());
                return;
            }
        };
        debug!(%task_id, "Stream attached");

        while let Some(event) = subscription.next().await {
            yield event;
        }
        debug!(%task_id, "Stream finished");
    }
}
