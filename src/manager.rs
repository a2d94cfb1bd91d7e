//! The request manager state machine.
//!
//! Owns the FIFO queue, the sliding-window limiter, the response cache and
//! the single in-flight slot. It performs no I/O itself: requests go out
//! through a [`Dispatcher`], results come back through
//! [`RequestManager::handle_completion`], and everything the caller needs to
//! know is reported through an [`EventSink`].

use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{ResponseCache, make_cache_key};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::dispatch::Dispatcher;
use crate::error::RequestError;
use crate::events::{EventSink, ManagerEvent};
use crate::metrics::{
    CACHE_HITS, CACHE_MISSES, CACHE_SIZE, QUEUE_DEPTH, RATE_LIMITED, REQUESTS_DISPATCHED,
    REQUESTS_QUEUED, REQUEST_ERRORS, REQUEST_LATENCY,
};
use crate::models::{ApiRequest, ChatMessage, Completion, MessagesRequest, PendingRequest, RequestId};
use crate::rate_limit::RateLimiter;
use crate::sse;

/// The single in-flight slot
#[derive(Debug)]
pub enum RequestSlot {
    Idle,
    InFlight {
        request: PendingRequest,
        dispatched_at: Instant,
    },
}

pub struct RequestManager<D, S, C = SystemClock> {
    settings: Settings,
    queue: VecDeque<PendingRequest>,
    limiter: RateLimiter,
    cache: ResponseCache,
    slot: RequestSlot,
    next_id: u64,
    dispatcher: D,
    sink: S,
    clock: C,
}

impl<D: Dispatcher, S: EventSink> RequestManager<D, S, SystemClock> {
    pub fn new(settings: Settings, dispatcher: D, sink: S) -> Self {
        Self::with_clock(settings, dispatcher, sink, SystemClock)
    }
}

impl<D: Dispatcher, S: EventSink, C: Clock> RequestManager<D, S, C> {
    pub fn with_clock(settings: Settings, dispatcher: D, sink: S, clock: C) -> Self {
        Self {
            queue: VecDeque::new(),
            limiter: RateLimiter::new(settings.max_requests_per_minute, settings.rate_window),
            cache: ResponseCache::new(settings.max_cache_size, settings.cache_ttl),
            slot: RequestSlot::Idle,
            next_id: 1,
            dispatcher,
            sink,
            clock,
            settings,
        }
    }

    /// Replace the credential used for later dispatches. An in-flight request
    /// keeps the key it was sent with.
    pub fn set_api_key(&mut self, key: impl Into<String>) {
        self.settings.api_key = key.into();
        debug!(configured = !self.settings.api_key.is_empty(), "API key updated");
    }

    /// Queue a prompt. A live cache hit is answered right away and never
    /// touches the queue, the limiter or the network.
    pub fn queue_request(
        &mut self,
        prompt: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> RequestId {
        let prompt = prompt.into();
        let system_prompt = system_prompt.into();
        let id = RequestId(self.next_id);
        self.next_id += 1;

        let cache_key = make_cache_key(&prompt, &system_prompt);
        let now = self.clock.now();

        if let Some(cached) = self.cache.get(&cache_key, now) {
            CACHE_HITS.inc();
            debug!(%id, "cache hit");
            let text = cached.to_string();
            self.sink.emit(ManagerEvent::Chunk {
                id,
                text: text.clone(),
            });
            self.sink.emit(ManagerEvent::Completed {
                id,
                text,
                cached: true,
            });
            return id;
        }
        CACHE_MISSES.inc();
        REQUESTS_QUEUED.inc();

        self.queue.push_back(PendingRequest {
            id,
            prompt,
            system_prompt,
            cache_key,
            enqueued_at: now,
        });
        let depth = self.queue.len();
        QUEUE_DEPTH.set(depth as f64);
        debug!(%id, depth, "cache miss, request queued");
        self.sink.emit(ManagerEvent::Queued { id, depth });

        self.advance();
        id
    }

    /// Re-run admission for the head of the queue.
    pub fn retry_pending(&mut self) {
        self.advance();
    }

    /// Periodic upkeep: drop stale history and retry a stalled queue head.
    pub fn sweep(&mut self) {
        let now = self.clock.now();
        self.limiter.prune(now);
        debug!(history = self.limiter.len(), queued = self.queue.len(), "history swept");
        self.advance();
    }

    /// Result of the exchange started by the current request.
    pub fn handle_completion(&mut self, completion: Completion) {
        let (request, dispatched_at) = match std::mem::replace(&mut self.slot, RequestSlot::Idle) {
            RequestSlot::InFlight {
                request,
                dispatched_at,
            } if request.id == completion.id => (request, dispatched_at),
            other => {
                warn!(id = %completion.id, "completion for a request that is not current, dropped");
                self.slot = other;
                return;
            }
        };

        let now = self.clock.now();
        REQUEST_LATENCY.observe(now.saturating_duration_since(dispatched_at).as_secs_f64());
        let id = request.id;

        let outcome = match completion.result {
            Err(message) => Err(RequestError::DispatchFailure(message)),
            Ok(res) if res.status != 200 => Err(RequestError::from_status(res.status, &res.body)),
            Ok(res) => {
                let sink = &self.sink;
                sse::parse_body(&res.body, |text| {
                    sink.emit(ManagerEvent::Chunk {
                        id,
                        text: text.to_string(),
                    })
                })
            }
        };

        match outcome {
            Ok(text) => {
                self.cache.insert(request.cache_key, text.clone(), now);
                CACHE_SIZE.set(self.cache.len() as f64);
                info!(%id, chars = text.len(), "request completed");
                self.sink.emit(ManagerEvent::Completed {
                    id,
                    text,
                    cached: false,
                });
            }
            Err(error) => self.report_error(id, error),
        }

        self.advance();
    }

    // Admission / advance step
    fn advance(&mut self) {
        loop {
            if !self.is_idle() {
                return;
            }
            let Some(head) = self.queue.front() else {
                return;
            };
            let head_id = head.id;

            let now = self.clock.now();
            if let Err(wait) = self.limiter.check(now) {
                RATE_LIMITED.inc();
                // stays queued; the next enqueue, completion or sweep tries again
                self.report_error(head_id, RequestError::RateLimited { wait });
                return;
            }

            let Some(request) = self.queue.pop_front() else {
                return;
            };
            QUEUE_DEPTH.set(self.queue.len() as f64);
            self.sink.emit(ManagerEvent::Started { id: request.id });

            if self.settings.api_key.is_empty() {
                self.report_error(request.id, RequestError::MissingCredential);
                continue;
            }

            let api_request = self.build_request(&request);
            let waited = now.saturating_duration_since(request.enqueued_at);
            self.slot = RequestSlot::InFlight {
                request,
                dispatched_at: now,
            };

            match self.dispatcher.dispatch(api_request) {
                Ok(()) => {
                    self.limiter.record(now);
                    REQUESTS_DISPATCHED.inc();
                    info!(
                        id = %head_id,
                        waited_ms = waited.as_millis() as u64,
                        history = self.limiter.len(),
                        "request dispatched"
                    );
                    return;
                }
                Err(e) => {
                    self.slot = RequestSlot::Idle;
                    self.report_error(head_id, RequestError::DispatchFailure(e.to_string()));
                }
            }
        }
    }

    fn build_request(&self, request: &PendingRequest) -> ApiRequest {
        let system = if request.system_prompt.is_empty() {
            None
        } else {
            Some(request.system_prompt.clone())
        };

        ApiRequest {
            id: request.id,
            api_key: self.settings.api_key.clone(),
            body: MessagesRequest {
                model: self.settings.model.clone(),
                messages: vec![ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                }],
                max_tokens: self.settings.max_tokens,
                stream: true,
                temperature: self.settings.temperature,
                system,
            },
        }
    }

    fn report_error(&self, id: RequestId, error: RequestError) {
        REQUEST_ERRORS.with_label_values(&[error.kind()]).inc();
        warn!(%id, error = %error, "request error");
        self.sink.emit(ManagerEvent::Error { id, error });
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.slot, RequestSlot::Idle)
    }

    pub fn current_request(&self) -> Option<&PendingRequest> {
        match &self.slot {
            RequestSlot::InFlight { request, .. } => Some(request),
            RequestSlot::Idle => None,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn history_len(&self) -> usize {
        self.limiter.len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Live cached response for a prompt pair, if any
    pub fn cached_response(&self, prompt: &str, system_prompt: &str) -> Option<&str> {
        self.cache
            .get(&make_cache_key(prompt, system_prompt), self.clock.now())
    }
}
