use tokio::sync::mpsc;

use crate::error::RequestError;
use crate::models::RequestId;

/// Everything the manager tells its caller.
///
/// Per request: zero or more `Chunk`s, then exactly one of `Completed` or
/// `Error`. The one exception is `Error(RateLimited)`, which is not
/// terminal; the request stays queued.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    Queued { id: RequestId, depth: usize },
    Started { id: RequestId },
    Chunk { id: RequestId, text: String },
    Completed { id: RequestId, text: String, cached: bool },
    Error { id: RequestId, error: RequestError },
}

// Where events (errors included) are reported
pub trait EventSink: Send {
    fn emit(&self, event: ManagerEvent);
}

impl EventSink for mpsc::UnboundedSender<ManagerEvent> {
    fn emit(&self, event: ManagerEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.send(event);
    }
}
