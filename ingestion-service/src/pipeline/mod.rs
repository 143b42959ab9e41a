use std::{pin::Pin, sync::Arc, time::{Duration, SystemTime}};

use futures::{Stream, StreamExt};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }

    /// Replace the payload, keeping the original receive time.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            payload: f(self.payload),
            received_at: self.received_at,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid period: start {start} is after end {end}")]
    InvalidPeriod {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
    #[error("upstream error (status {status:?}, transient: {transient}): {message}")]
    Upstream {
        status: Option<u16>,
        transient: bool,
        message: String,
    },
    #[error("upstream rate limited the request (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("malformed entry: {0}")]
    MalformedEntry(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Whether re-running the same command later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { transient, .. } => *transient,
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidPeriod { .. } => "invalid_period",
            Self::Upstream { .. } => "upstream",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedEntry(_) => "malformed_entry",
            Self::Persistence(_) => "persistence",
            Self::Config(_) => "config",
        }
    }
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

/// Terminal stage. A sink consumes the whole stream and stops at the first
/// error it sees; nothing is skipped.
#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    type Output: Send;

    async fn run<S>(&self, input: S) -> Result<Self::Output, PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

pub struct Pipeline<S, I, O, K> {
    pub source: S,
    pub transform: Arc<dyn Transform<I, O> + Send + Sync>,
    pub sink: K,
}

impl<S, I, O, K> Pipeline<S, I, O, K>
where
    I: Send + 'static,
    O: Send + 'static,
    S: Source<I> + Send + Sync + 'static,
    K: Sink<O> + Send + Sync,
{
    pub async fn run(self) -> Result<K::Output, PipelineError> {
        let stream = self.source.stream().await;

        let transform = self.transform;
        let stream: EnvelopeStream<O> = Box::pin(stream.then(move |item| {
            let t = Arc::clone(&transform);
            async move {
                match item {
                    Ok(env) => t.apply(env).await,
                    Err(e) => Err(e),
                }
            }
        }));

        self.sink.run(stream).await
    }
}
