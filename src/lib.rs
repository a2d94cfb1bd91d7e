//! Client-side request manager for a streaming chat-completion API.
//!
//! Prompts are queued FIFO, admitted through a sliding-window rate limiter,
//! answered from a bounded cache when possible and otherwise sent one at a
//! time. Streamed (SSE) responses are turned into incremental text chunks.
//!
//! ```rust,ignore
//! let (handle, mut events, _task) = ai_request_manager::spawn(Settings::default())?;
//! handle.set_api_key("sk-...")?;
//! handle.queue_request("Explain this diff", "You are a code reviewer").await?;
//! while let Some(event) = events.recv().await {
//!     // ManagerEvent::Chunk { .. }, ManagerEvent::Completed { .. }, ...
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod sse;
pub mod worker;

pub use clock::{Clock, SystemClock};
pub use config::Settings;
pub use dispatch::{Dispatcher, HttpDispatcher};
pub use error::{DispatchError, RequestError, SetupError, WorkerGone};
pub use events::{EventSink, ManagerEvent};
pub use manager::{RequestManager, RequestSlot};
pub use models::{ApiRequest, Completion, HttpResponse, PendingRequest, RequestId};
pub use worker::{ManagerHandle, spawn, start};
