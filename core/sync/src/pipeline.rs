//! Item pipeline: a chain of async stream stages.

use futures::stream::{self, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use tracing::{error, info};

use bucketsync_common::{ContentItem, Disposition, Error, Result};

/// Stream of content items flowing between stages.
pub type ItemStream = Pin<Box<dyn Stream<Item = Result<ContentItem>> + Send>>;

/// A pipeline stage: consumes an item stream and produces one.
///
/// Stages forward upstream errors unchanged.
pub trait Stage {
    /// Attach this stage to `input`.
    fn apply(self, input: ItemStream) -> ItemStream;
}

/// Build an item stream from a fixed set of items.
pub fn from_items(items: impl IntoIterator<Item = ContentItem>) -> ItemStream {
    let items: Vec<Result<ContentItem>> = items.into_iter().map(Ok).collect();
    Box::pin(stream::iter(items))
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Items that reached the end of the pipeline, in order.
    pub items: Vec<ContentItem>,
    /// Items per disposition.
    pub counts: HashMap<Disposition, usize>,
}

impl RunSummary {
    /// Number of items with disposition `d`.
    pub fn count(&self, d: Disposition) -> usize {
        self.counts.get(&d).copied().unwrap_or(0)
    }

    /// Find an item by path.
    pub fn item(&self, path: &str) -> Option<&ContentItem> {
        self.items.iter().find(|i| i.path == path)
    }

    fn record(&mut self, item: ContentItem) {
        if let Some(d) = item.disposition {
            *self.counts.entry(d).or_insert(0) += 1;
        }
        self.items.push(item);
    }
}

/// A source stream with stages attached.
pub struct Pipeline {
    stream: ItemStream,
}

impl Pipeline {
    /// Start a pipeline from a source stream.
    pub fn new(source: ItemStream) -> Self {
        Self { stream: source }
    }

    /// Start a pipeline from a fixed set of items.
    pub fn from_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        Self::new(from_items(items))
    }

    /// Attach a stage.
    pub fn pipe<S: Stage>(self, stage: S) -> Self {
        Self {
            stream: stage.apply(self.stream),
        }
    }

    /// Unwrap the composed stream.
    pub fn into_stream(self) -> ItemStream {
        self.stream
    }

    /// Drive the pipeline to completion.
    ///
    /// Fails with the first error, but only once the stream is exhausted, so
    /// end-of-stream work such as the final cache flush still runs after an
    /// item fails. Later errors are logged.
    pub async fn run(self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut first_error: Option<Error> = None;
        let mut stream = self.stream;

        while let Some(next) = stream.next().await {
            match next {
                Ok(item) => summary.record(item),
                Err(e) => {
                    error!("Pipeline error: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Pipeline finished: {} items ({} created, {} updated, {} skipped, {} cached, \
             {} put, {} deleted)",
            summary.items.len(),
            summary.count(Disposition::Create),
            summary.count(Disposition::Update),
            summary.count(Disposition::Skip),
            summary.count(Disposition::Cache),
            summary.count(Disposition::Put),
            summary.count(Disposition::Delete),
        );

        Ok(summary)
    }
}
