use clap::Parser;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const MAX_REQUESTS_PER_MINUTE: usize = 20;
pub const MAX_CACHE_SIZE: usize = 100;

// Everything the manager and the HTTP dispatcher need
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub endpoint: String,
    pub api_version: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_requests_per_minute: usize,
    pub rate_window: Duration,
    pub max_cache_size: usize,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub sweep_interval: Duration, // periodic history prune
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            max_requests_per_minute: MAX_REQUESTS_PER_MINUTE,
            rate_window: Duration::from_secs(60),
            max_cache_size: MAX_CACHE_SIZE,
            cache_ttl: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

// CLI argument structure
#[derive(Parser, Debug, Clone)]
#[command(name = "ai-request-manager")]
#[command(about = "Queued, rate limited and cached prompts against a chat-completion API")]
pub struct Args {
    // Prompts to send, in order
    #[arg(required = true)]
    pub prompts: Vec<String>,

    // System prompt applied to every prompt
    #[arg(short, long, default_value = "")]
    pub system: String,

    // API key (falls back to ANTHROPIC_API_KEY)
    #[arg(long, env = "ANTHROPIC_API_KEY", default_value = "", hide_env_values = true)]
    pub api_key: String,

    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    #[arg(long, default_value_t = 4096)]
    pub max_tokens: u32,

    #[arg(long, default_value_t = 0.7)]
    pub temperature: f32,

    // Rate limit max requests per window
    #[arg(long, default_value_t = MAX_REQUESTS_PER_MINUTE, value_parser = positive_usize())]
    pub rate_limit: usize,

    // Rate limit window in seconds
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub rate_window: u64,

    #[arg(long, default_value_t = MAX_CACHE_SIZE, value_parser = positive_usize())]
    pub cache_size: usize,

    // Cache TTL in seconds
    #[arg(short, long, default_value_t = 3600)]
    pub cache_ttl: u64,

    // Whole-request timeout in seconds
    #[arg(long, default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    // Print prometheus metrics to stderr when done
    #[arg(long)]
    pub metrics: bool,
}

// Counts that must be at least 1
fn positive_usize() -> clap::builder::RangedU64ValueParser<usize> {
    clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
}

impl Args {
    pub fn settings(&self) -> Settings {
        Settings {
            api_key: self.api_key.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            max_requests_per_minute: self.rate_limit,
            rate_window: Duration::from_secs(self.rate_window),
            max_cache_size: self.cache_size,
            cache_ttl: Duration::from_secs(self.cache_ttl),
            request_timeout: Duration::from_secs(self.timeout),
            ..Settings::default()
        }
    }
}
