//! Drives the synchronous manager with a recording transport, a recording
//! sink and a hand-cranked clock.

use ai_request_manager::{
    ApiRequest, Clock, Completion, DispatchError, Dispatcher, EventSink, HttpResponse,
    ManagerEvent, RequestError, RequestId, RequestManager, Settings,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct ManualClock(Arc<Mutex<Instant>>);

impl ManualClock {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock().unwrap()
    }
}

#[derive(Clone, Default)]
struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<ApiRequest>>>,
    refuse: Arc<AtomicBool>,
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&mut self, request: ApiRequest) -> Result<(), DispatchError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(DispatchError::ChannelClosed);
        }
        self.sent.lock().unwrap().push(request);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<ManagerEvent>>>);

impl EventSink for RecordingSink {
    fn emit(&self, event: ManagerEvent) {
        self.0.lock().unwrap().push(event);
    }
}

struct Harness {
    manager: RequestManager<RecordingDispatcher, RecordingSink, ManualClock>,
    dispatcher: RecordingDispatcher,
    sink: RecordingSink,
    clock: ManualClock,
}

impl Harness {
    fn new(settings: Settings) -> Self {
        let dispatcher = RecordingDispatcher::default();
        let sink = RecordingSink::default();
        let clock = ManualClock::new();
        let manager =
            RequestManager::with_clock(settings, dispatcher.clone(), sink.clone(), clock.clone());
        Self {
            manager,
            dispatcher,
            sink,
            clock,
        }
    }

    fn with_key() -> Self {
        Self::new(Settings {
            api_key: "sk-test".to_string(),
            ..Settings::default()
        })
    }

    fn sent(&self) -> Vec<ApiRequest> {
        self.dispatcher.sent.lock().unwrap().clone()
    }

    fn events(&self) -> Vec<ManagerEvent> {
        self.sink.0.lock().unwrap().clone()
    }

    fn clear_events(&self) {
        self.sink.0.lock().unwrap().clear();
    }

    fn chunks_for(&self, id: RequestId) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ManagerEvent::Chunk { id: chunk_id, text } if chunk_id == id => Some(text),
                _ => None,
            })
            .collect()
    }

    fn errors_for(&self, id: RequestId) -> Vec<RequestError> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ManagerEvent::Error { id: err_id, error } if err_id == id => Some(error),
                _ => None,
            })
            .collect()
    }

    fn respond(&mut self, id: RequestId, status: u16, body: &str) {
        self.manager.handle_completion(Completion {
            id,
            result: Ok(HttpResponse {
                status,
                body: body.to_string(),
            }),
        });
    }
}

fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::from(
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n\
event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0}\n\n",
    );
    for text in deltas {
        let event = serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": text}
        });
        body.push_str(&format!("event: content_block_delta\ndata: {}\n\n", event));
    }
    body.push_str(
        "event: content_block_stop\ndata: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
event: message_delta\ndata: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":5}}\n\n\
event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    );
    body
}

#[test]
fn test_cache_hit_skips_network() {
    let mut h = Harness::with_key();

    let first = h.manager.queue_request("explain", "reviewer");
    assert_eq!(h.sent().len(), 1);
    h.respond(first, 200, &sse_body(&["cached ", "answer"]));
    assert_eq!(h.manager.history_len(), 1);
    h.clear_events();

    let second = h.manager.queue_request("explain", "reviewer");
    assert_ne!(first, second);
    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.manager.history_len(), 1);
    assert_eq!(h.manager.queue_len(), 0);
    assert_eq!(
        h.events(),
        vec![
            ManagerEvent::Chunk {
                id: second,
                text: "cached answer".to_string()
            },
            ManagerEvent::Completed {
                id: second,
                text: "cached answer".to_string(),
                cached: true
            },
        ]
    );
}

#[test]
fn test_expired_cache_entry_goes_back_to_network() {
    let mut h = Harness::with_key();
    let id = h.manager.queue_request("p", "s");
    h.respond(id, 200, &sse_body(&["old"]));

    h.clock.advance(Duration::from_secs(3600));
    assert_eq!(h.manager.cached_response("p", "s"), None);

    h.manager.queue_request("p", "s");
    assert_eq!(h.sent().len(), 2);
}

#[test]
fn test_cache_is_bounded_by_insertion_order() {
    let mut h = Harness::new(Settings {
        api_key: "sk-test".to_string(),
        max_cache_size: 3,
        ..Settings::default()
    });

    for i in 0..4 {
        let id = h.manager.queue_request(format!("prompt {i}"), "sys");
        h.respond(id, 200, &sse_body(&[&format!("answer {i}")]));
    }

    assert_eq!(h.manager.cache_len(), 3);
    assert_eq!(h.manager.cached_response("prompt 0", "sys"), None);
    for i in 1..4 {
        assert_eq!(
            h.manager.cached_response(&format!("prompt {i}"), "sys"),
            Some(format!("answer {i}").as_str())
        );
    }
}

#[test]
fn test_rate_limit_keeps_request_queued() {
    let mut h = Harness::with_key();

    for i in 0..20 {
        let id = h.manager.queue_request(format!("prompt {i}"), "");
        h.respond(id, 200, &sse_body(&["ok"]));
    }
    assert_eq!(h.sent().len(), 20);
    assert_eq!(h.manager.history_len(), 20);

    h.clock.advance(Duration::from_secs(10));
    let limited = h.manager.queue_request("one too many", "");

    assert_eq!(h.sent().len(), 20);
    assert_eq!(h.manager.queue_len(), 1);
    assert!(h.manager.is_idle());
    assert_eq!(
        h.errors_for(limited),
        vec![RequestError::RateLimited {
            wait: Duration::from_secs(50)
        }]
    );

    // window still full
    h.manager.retry_pending();
    assert_eq!(h.sent().len(), 20);

    h.clock.advance(Duration::from_secs(50));
    h.manager.sweep();
    assert_eq!(h.sent().len(), 21);
    assert_eq!(h.sent()[20].body.messages[0].content, "one too many");
    assert_eq!(h.manager.queue_len(), 0);
    assert_eq!(h.manager.current_request().map(|r| r.id), Some(limited));
}

#[test]
fn test_rate_limit_hit_after_completion() {
    let mut h = Harness::new(Settings {
        api_key: "sk-test".to_string(),
        max_requests_per_minute: 2,
        ..Settings::default()
    });

    let a = h.manager.queue_request("a", "");
    let b = h.manager.queue_request("b", "");
    let c = h.manager.queue_request("c", "");
    h.respond(a, 200, &sse_body(&["A"]));
    h.respond(b, 200, &sse_body(&["B"]));

    // c was refused when b finished
    assert_eq!(h.sent().len(), 2);
    assert!(matches!(
        h.errors_for(c).as_slice(),
        [RequestError::RateLimited { .. }]
    ));
    assert_eq!(h.manager.queue_len(), 1);
}

#[test]
fn test_fifo_dispatch_order() {
    let mut h = Harness::with_key();
    let a = h.manager.queue_request("A", "");
    let b = h.manager.queue_request("B", "");

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, a);
    assert_eq!(sent[0].body.messages[0].content, "A");

    h.respond(a, 200, &sse_body(&["done"]));
    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].id, b);
    assert_eq!(sent[1].body.messages[0].content, "B");
}

#[test]
fn test_single_flight() {
    let mut h = Harness::with_key();
    let a = h.manager.queue_request("A", "");
    h.manager.queue_request("B", "");
    h.manager.queue_request("C", "");
    h.manager.retry_pending();

    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.manager.queue_len(), 2);
    assert_eq!(h.manager.current_request().map(|r| r.id), Some(a));

    let queued_depths: Vec<usize> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ManagerEvent::Queued { depth, .. } => Some(depth),
            _ => None,
        })
        .collect();
    assert_eq!(queued_depths, vec![1, 1, 2]);

    h.respond(a, 500, "");
    assert_eq!(h.sent().len(), 2);
}

#[test]
fn test_sse_chunks_are_forwarded_and_cached() {
    let mut h = Harness::with_key();
    let id = h.manager.queue_request("diff", "");
    h.respond(id, 200, &sse_body(&["one ", "two ", "three"]));

    assert_eq!(h.chunks_for(id), vec!["one ", "two ", "three"]);
    assert_eq!(h.manager.cached_response("diff", ""), Some("one two three"));
    assert!(h.events().contains(&ManagerEvent::Completed {
        id,
        text: "one two three".to_string(),
        cached: false
    }));
    assert!(h.manager.is_idle());
}

#[test]
fn test_non_streaming_fallback() {
    let mut h = Harness::with_key();
    let id = h.manager.queue_request("diff", "");
    h.respond(
        id,
        200,
        r#"{"id":"msg_1","type":"message","role":"assistant","content":[{"type":"text","text":"X"}]}"#,
    );

    assert_eq!(h.chunks_for(id), vec!["X"]);
    assert_eq!(h.manager.cached_response("diff", ""), Some("X"));
}

#[test]
fn test_stream_error_event_is_not_cached() {
    let mut h = Harness::with_key();
    let id = h.manager.queue_request("diff", "");
    h.respond(
        id,
        200,
        "data: {\"type\":\"message_start\"}\n\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
    );

    assert_eq!(
        h.errors_for(id),
        vec![RequestError::Api {
            kind: "overloaded_error".to_string(),
            message: "Overloaded".to_string()
        }]
    );
    assert_eq!(h.manager.cache_len(), 0);
    assert!(h.manager.is_idle());
}

#[test]
fn test_http_status_errors_then_next_request_runs() {
    let mut h = Harness::with_key();
    let a = h.manager.queue_request("a", "");
    let b = h.manager.queue_request("b", "");
    let c = h.manager.queue_request("c", "");

    h.respond(a, 401, r#"{"error":{"message":"invalid x-api-key"}}"#);
    h.respond(b, 429, "");
    h.respond(c, 503, "");

    assert_eq!(h.errors_for(a), vec![RequestError::InvalidApiKey]);
    assert_eq!(h.errors_for(b), vec![RequestError::ServerRateLimited]);
    assert_eq!(h.errors_for(c), vec![RequestError::ServerError { code: 503 }]);
    assert_eq!(h.sent().len(), 3);
    assert_eq!(h.manager.cache_len(), 0);
    // each one reached the network
    assert_eq!(h.manager.history_len(), 3);
}

#[test]
fn test_transport_failure() {
    let mut h = Harness::with_key();
    let id = h.manager.queue_request("a", "");
    h.manager.handle_completion(Completion {
        id,
        result: Err("request timed out".to_string()),
    });

    assert_eq!(
        h.errors_for(id),
        vec![RequestError::DispatchFailure("request timed out".to_string())]
    );
    assert!(h.manager.is_idle());
}

#[test]
fn test_unparseable_body() {
    let mut h = Harness::with_key();
    let id = h.manager.queue_request("a", "");
    h.respond(id, 200, "<html>oops</html>");

    assert!(matches!(
        h.errors_for(id).as_slice(),
        [RequestError::ParseFailure(_)]
    ));
    assert_eq!(h.manager.cache_len(), 0);
}

#[test]
fn test_refused_dispatch_moves_on() {
    let mut h = Harness::with_key();
    h.dispatcher.refuse.store(true, Ordering::SeqCst);

    let a = h.manager.queue_request("a", "");
    assert!(matches!(
        h.errors_for(a).as_slice(),
        [RequestError::DispatchFailure(_)]
    ));
    assert!(h.manager.is_idle());
    assert_eq!(h.manager.history_len(), 0);

    h.dispatcher.refuse.store(false, Ordering::SeqCst);
    h.manager.queue_request("b", "");
    assert_eq!(h.sent().len(), 1);
    assert_eq!(h.manager.history_len(), 1);
}

#[test]
fn test_missing_api_key() {
    let mut h = Harness::new(Settings::default());
    let id = h.manager.queue_request("a", "");

    assert_eq!(
        h.events(),
        vec![
            ManagerEvent::Queued { id, depth: 1 },
            ManagerEvent::Started { id },
            ManagerEvent::Error {
                id,
                error: RequestError::MissingCredential
            },
        ]
    );
    assert!(h.sent().is_empty());
    assert_eq!(h.manager.history_len(), 0);

    h.manager.set_api_key("sk-later");
    h.manager.queue_request("a", "");
    assert_eq!(h.sent()[0].api_key, "sk-later");
}

#[test]
fn test_request_body() {
    let mut h = Harness::with_key();
    h.manager.queue_request("with system", "be terse");
    let id = h.sent()[0].id;
    h.respond(id, 200, &sse_body(&["ok"]));
    h.manager.queue_request("without system", "");

    let sent = h.sent();
    let body = &sent[0].body;
    assert_eq!(body.model, Settings::default().model);
    assert_eq!(body.max_tokens, 4096);
    assert!(body.stream);
    assert_eq!(body.temperature, 0.7);
    assert_eq!(body.system.as_deref(), Some("be terse"));
    assert_eq!(body.messages[0].role, "user");

    assert_eq!(sent[1].body.system, None);
    assert_eq!(sent[1].api_key, "sk-test");
}

#[test]
fn test_stray_completion_is_ignored() {
    let mut h = Harness::with_key();
    let id = h.manager.queue_request("a", "");
    h.clear_events();

    h.respond(RequestId(id.0 + 99), 200, &sse_body(&["nope"]));
    assert!(h.events().is_empty());
    assert_eq!(h.manager.current_request().map(|r| r.id), Some(id));
    assert_eq!(h.manager.cache_len(), 0);
}
