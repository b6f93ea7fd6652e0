//! Per-row enrichment through an external service.
//!
//! Models that call out to a rate-limited service (an LLM tagging product
//! descriptions, for instance) run each row through a [`RowEnricher`]. Calls
//! go through a bounded pool of `max_workers` in-flight requests; a
//! rate-limited call is retried with exponential backoff and, once retries
//! are exhausted, the row gets an error sentinel instead of failing the
//! batch.

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::emit;
use crate::error::EnrichError;
use crate::metrics::events::{EnrichmentRetried, EnrichmentRowFailed};

/// Value written for a row whose retries were exhausted.
pub const RATE_LIMIT_SENTINEL: &str = "Error: Rate limit exceeded";

/// A single external call per row.
#[async_trait]
pub trait RowEnricher: Send + Sync {
    async fn enrich(&self, input: &str) -> Result<String, EnrichError>;
}

pub type RowEnricherRef = Arc<dyn RowEnricher>;

/// Backoff for rate-limited calls: `base_delay * 2^attempt`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per row.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl From<&EnrichmentConfig> for RetryPolicy {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
        }
    }
}

type RowFuture<'a> = Pin<Box<dyn Future<Output = (usize, Option<String>)> + Send + 'a>>;

/// Call `enricher` until it succeeds, fails for a non-rate-limit reason, or
/// runs out of attempts. Never returns an error: failures become sentinels.
async fn enrich_row(enricher: &dyn RowEnricher, input: &str, policy: RetryPolicy) -> String {
    for attempt in 0..policy.max_retries {
        match enricher.enrich(input).await {
            Ok(output) => return output,
            Err(EnrichError::RateLimited) => {
                if attempt + 1 == policy.max_retries {
                    break;
                }
                let wait = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    wait_secs = wait.as_secs_f64(),
                    "Rate limit hit, retrying"
                );
                emit!(EnrichmentRetried {
                    attempt: attempt + 1
                });
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                warn!(error = %e, "Enrichment call failed");
                emit!(EnrichmentRowFailed);
                return format!("Error: {e}");
            }
        }
    }

    warn!("Max retries reached, skipping row");
    emit!(EnrichmentRowFailed);
    RATE_LIMIT_SENTINEL.to_string()
}

/// Enrich every value, at most `max_workers` calls at a time.
///
/// The output has the same length and order as `values`; `None` inputs are
/// passed through without a call.
pub async fn enrich_values(
    enricher: RowEnricherRef,
    values: Vec<Option<String>>,
    config: &EnrichmentConfig,
) -> Vec<Option<String>> {
    let policy = RetryPolicy::from(config);
    let max_workers = config.max_workers.max(1);
    let mut results: Vec<Option<String>> = vec![None; values.len()];

    let mut pending = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| value.map(|v| (index, v)));

    let spawn = |index: usize, input: String| -> RowFuture<'static> {
        let enricher = enricher.clone();
        Box::pin(async move {
            let output = enrich_row(enricher.as_ref(), &input, policy).await;
            (index, Some(output))
        })
    };

    let mut in_flight: FuturesUnordered<RowFuture<'static>> = FuturesUnordered::new();
    for (index, input) in pending.by_ref().take(max_workers) {
        in_flight.push(spawn(index, input));
    }

    while let Some((index, output)) = in_flight.next().await {
        results[index] = output;
        if let Some((next, input)) = pending.next() {
            in_flight.push(spawn(next, input));
        }
    }

    debug!(rows = results.len(), "Enrichment complete");
    results
}

/// Enrich the Utf8 column `column` of `batch`, appending the results as a
/// nullable Utf8 column named `output_column`.
pub async fn enrich_batch(
    batch: &RecordBatch,
    column: &str,
    output_column: &str,
    enricher: RowEnricherRef,
    config: &EnrichmentConfig,
) -> Result<RecordBatch, EnrichError> {
    let input = batch
        .column_by_name(column)
        .and_then(|array| array.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| EnrichError::InputColumn {
            column: column.to_string(),
        })?;

    let values: Vec<Option<String>> = (0..input.len())
        .map(|i| input.is_valid(i).then(|| input.value(i).to_string()))
        .collect();

    let enriched = enrich_values(enricher, values, config).await;

    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(output_column, DataType::Utf8, true));

    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    columns.push(Arc::new(StringArray::from(enriched)));

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).map_err(|e| {
        EnrichError::AppendColumn {
            column: output_column.to_string(),
            message: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    /// Tags a description, sleeping proportionally to its length.
    struct Tagger {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl Tagger {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RowEnricher for Tagger {
        async fn enrich(&self, input: &str) -> Result<String, EnrichError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10 * input.len() as u64)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(format!("tags:{input}"))
        }
    }

    /// Rate-limited for the first `limited` calls, then succeeds.
    struct Throttled {
        limited: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RowEnricher for Throttled {
        async fn enrich(&self, input: &str) -> Result<String, EnrichError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.limited {
                Err(EnrichError::RateLimited)
            } else {
                Ok(input.to_uppercase())
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl RowEnricher for Broken {
        async fn enrich(&self, _input: &str) -> Result<String, EnrichError> {
            Err(EnrichError::Request {
                message: "invalid api key".to_string(),
            })
        }
    }

    fn owned(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::from(&EnrichmentConfig::default());
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_row_order() {
        let tagger = Tagger::new();
        let values = owned(&[Some("long description"), Some("a"), None, Some("mid text")]);

        let out = enrich_values(tagger.clone(), values, &EnrichmentConfig::default()).await;

        assert_eq!(
            out,
            owned(&[
                Some("tags:long description"),
                Some("tags:a"),
                None,
                Some("tags:mid text")
            ])
        );
        assert_eq!(tagger.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let tagger = Tagger::new();
        let values: Vec<Option<String>> = (0..12).map(|i| Some("x".repeat(i + 1))).collect();
        let config = EnrichmentConfig {
            max_workers: 3,
            ..EnrichmentConfig::default()
        };

        let out = enrich_values(tagger.clone(), values, &config).await;

        assert_eq!(out.len(), 12);
        assert_eq!(tagger.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retried_with_backoff() {
        let enricher = Arc::new(Throttled {
            limited: 2,
            calls: AtomicUsize::new(0),
        });
        let start = Instant::now();

        let out = enrich_values(
            enricher.clone(),
            owned(&[Some("drill")]),
            &EnrichmentConfig::default(),
        )
        .await;

        assert_eq!(out, owned(&[Some("DRILL")]));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 3);
        // 5s after the first attempt, 10s after the second.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(15));
        assert!(elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_yield_sentinel() {
        let enricher = Arc::new(Throttled {
            limited: usize::MAX,
            calls: AtomicUsize::new(0),
        });

        let out = enrich_values(
            enricher.clone(),
            owned(&[Some("drill")]),
            &EnrichmentConfig::default(),
        )
        .await;

        assert_eq!(out, owned(&[Some(RATE_LIMIT_SENTINEL)]));
        assert_eq!(enricher.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_other_errors_become_sentinel_without_retry() {
        let out = enrich_values(
            Arc::new(Broken),
            owned(&[Some("drill"), Some("saw")]),
            &EnrichmentConfig::default(),
        )
        .await;

        assert_eq!(
            out,
            owned(&[Some("Error: invalid api key"), Some("Error: invalid api key")])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_batch_appends_column() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("customer_product_id", DataType::Int64, false),
            Field::new("product_description", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec![Some("cordless drill"), None])),
            ],
        )
        .unwrap();

        let out = enrich_batch(
            &batch,
            "product_description",
            "llm_tags",
            Tagger::new(),
            &EnrichmentConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(out.num_columns(), 3);
        assert_eq!(out.schema().field(2).name(), "llm_tags");
        let tags = out
            .column(2)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(tags.value(0), "tags:cordless drill");
        assert!(tags.is_null(1));
    }

    #[tokio::test]
    async fn test_enrich_batch_requires_string_column() {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(vec![1]))]).unwrap();

        let err = enrich_batch(
            &batch,
            "id",
            "llm_tags",
            Tagger::new(),
            &EnrichmentConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EnrichError::InputColumn { .. }));
    }
}
