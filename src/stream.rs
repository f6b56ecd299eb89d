//! Concurrent multi-document ingestion.
//!
//! [`ingest_stream`] yields each document's result as soon as it is ready;
//! with `concurrency > 1` results arrive in completion order, tagged with the
//! request URI. [`ingest_many`] collects the same stream and restores input
//! order.
//!
//! Documents share nothing but the `Arc`ed, read-only [`PipelineContext`].

use crate::error::CatalogError;
use crate::ingest::{ingest, IngestRequest, PipelineContext};
use crate::model::IngestionOutput;
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::info;

/// One finished document: its URI and outcome.
pub type IngestItem = (String, Result<IngestionOutput, CatalogError>);

/// A boxed stream of finished documents.
pub type IngestStream = Pin<Box<dyn Stream<Item = IngestItem> + Send>>;

/// Ingest `requests` concurrently, `ctx.config.concurrency` at a time.
pub fn ingest_stream(ctx: Arc<PipelineContext>, requests: Vec<IngestRequest>) -> IngestStream {
    let concurrency = ctx.config.concurrency.max(1);
    info!(
        documents = requests.len(),
        concurrency, "Starting concurrent ingestion"
    );
    let s = stream::iter(requests.into_iter().map(move |req| {
        let ctx = Arc::clone(&ctx);
        async move {
            let uri = req.uri.clone();
            let result = ingest(&ctx, req).await;
            (uri, result)
        }
    }))
    .buffer_unordered(concurrency);
    Box::pin(s)
}

/// Ingest `requests` concurrently and return results in input order.
pub async fn ingest_many(
    ctx: Arc<PipelineContext>,
    requests: Vec<IngestRequest>,
) -> Vec<Result<IngestionOutput, CatalogError>> {
    let concurrency = ctx.config.concurrency.max(1);
    let mut indexed: Vec<(usize, Result<IngestionOutput, CatalogError>)> =
        stream::iter(requests.into_iter().enumerate().map(|(i, req)| {
            let ctx = Arc::clone(&ctx);
            async move { (i, ingest(&ctx, req).await) }
        }))
        .buffer_unordered(concurrency)
        .collect()
        .await;
    indexed.sort_by_key(|(i, _)| *i);
    indexed.into_iter().map(|(_, r)| r).collect()
}
