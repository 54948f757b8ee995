pub mod assembler;
pub mod config;
pub mod delivery;
pub mod error;
pub mod feed;
pub mod fetcher;
mod markup;
pub mod models;
pub mod pipeline;
pub mod poller;
pub mod sanitizer;
pub mod segmenter;
pub mod storage;
pub mod strings;

pub use assembler::Assembler;
pub use config::{AppConfig, FeedConfig, FeedFormat, FetchConfig, MessageLimits, PollConfig, RetryPolicy, SkipRule};
pub use delivery::{fan_out, DeliveryReport, Transport};
pub use error::{
    ConfigError, DeliveryError, ExtractionError, FanOutError, FetchError, PipelineError, PollError,
    SanitizationError, StorageError, StringsError,
};
pub use feed::ItemSelector;
pub use fetcher::{with_backoff, Fetch, HttpFetcher};
pub use markup::{escape_attr, escape_text, ALLOWED_TAGS};
pub use models::{Control, FeedItem, MessageUnit, Publication, UnitKind};
pub use pipeline::Pipeline;
pub use poller::{poll_once, spawn_poller, Event, PollerHandle};
pub use sanitizer::{Sanitized, Sanitizer};
pub use segmenter::Segmenter;
pub use storage::{
    ChatId, ChatMetadata, ChatRegistry, JsonChatRegistry, JsonStateStore, MemoryStateStore,
    StateStore,
};
pub use strings::{Labels, Strings};
