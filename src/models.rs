use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// Monotonic id handed out by queue_request, carried on every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// A prompt waiting in the queue (or sitting in the current slot)
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub id: RequestId,
    pub prompt: String,
    pub system_prompt: String,
    pub cache_key: String,
    pub enqueued_at: Instant,
}

// Messages API request format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub stream: bool,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

// Everything the transport needs to perform one exchange
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub id: RequestId,
    pub api_key: String,
    pub body: MessagesRequest,
}

// What came back from the transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

// Completion posted back to the control task
#[derive(Debug, Clone)]
pub struct Completion {
    pub id: RequestId,
    pub result: Result<HttpResponse, String>, // Err = transport failure
}

// Non-streaming response format - only the text blocks matter
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageResponse {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect()
    }
}
