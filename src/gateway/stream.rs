use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;

use crate::error::GatewayError;
use crate::providers::cost::{Pricing, cost_cents, estimate_tokens};
use crate::providers::health::CircuitBreakerRegistry;
use crate::providers::types::{StreamFragment, TokenUsage};
use crate::providers::{DeltaStream, ProviderKind};
use crate::usage::{UsageRecord, UsageRecorder};

/// Stream of content fragments handed to a streaming caller.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, GatewayError>> + Send>>;

/// Everything needed to account for a stream once it ends.
pub(crate) struct StreamAccounting {
    pub recorder: UsageRecorder,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub kind: ProviderKind,
    pub model: String,
    pub pricing: Pricing,
    /// Usage record prefilled with subject, request id, provider and
    /// metadata; tokens, cost and outcome are filled in at the end.
    pub template: UsageRecord,
    pub prompt_chars: usize,
    pub start: Instant,
}

// ---------------------------------------------------------------------------
// MeteredStream
// ---------------------------------------------------------------------------

/// Wraps an adapter's delta stream, forwarding content fragments while
/// accumulating output length. Records exactly one usage entry when the
/// stream ends, errors, or is dropped by the caller.
pub struct MeteredStream {
    inner: DeltaStream,
    accounting: Option<StreamAccounting>,
    completion_chars: usize,
    reported: Option<TokenUsage>,
    error: Option<String>,
    finished: bool,
}

impl MeteredStream {
    pub(crate) fn new(inner: DeltaStream, accounting: StreamAccounting) -> Self {
        Self {
            inner,
            accounting: Some(accounting),
            completion_chars: 0,
            reported: None,
            error: None,
            finished: false,
        }
    }

    /// Token counts for what was actually produced. Provider-reported usage
    /// wins; otherwise both sides are estimated from character length.
    fn tokens(&self, prompt_chars: usize) -> TokenUsage {
        match self.reported {
            Some(usage) => usage,
            None => TokenUsage::new(estimate_tokens(prompt_chars), estimate_tokens(self.completion_chars)),
        }
    }

    fn finalize(&mut self, cancelled: bool) {
        let Some(acc) = self.accounting.take() else {
            return;
        };

        let tokens = self.tokens(acc.prompt_chars);
        let produced = self.completion_chars > 0 || tokens.completion > 0;
        // Nothing generated, nothing charged.
        let cost = if produced { cost_cents(&acc.pricing, &tokens) } else { 0 };
        let latency_ms = u64::try_from(acc.start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut record = acc
            .template
            .with_usage(tokens, cost)
            .with_latency(latency_ms)
            .with_meta("estimated", self.reported.is_none())
            .with_meta("cancelled", cancelled);

        match self.error.take() {
            Some(message) => {
                acc.breakers.record_failure(acc.kind);
                record = record.failed(message);
            }
            None => acc.breakers.record_success(acc.kind),
        }

        tracing::info!(
            provider = %acc.kind,
            model = %acc.model,
            request_id = %record.request_id,
            completion_tokens = record.completion_tokens,
            cost_cents = record.cost_cents,
            cancelled,
            latency_ms,
            "Stream finished"
        );
        acc.recorder.record(record);
    }
}

impl Stream for MeteredStream {
    type Item = Result<StreamFragment, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(delta))) => {
                    if let Some(usage) = delta.usage {
                        this.reported = Some(usage);
                    }
                    if delta.content.is_empty() {
                        continue;
                    }
                    this.completion_chars += delta.content.chars().count();
                    return Poll::Ready(Some(Ok(StreamFragment { content: delta.content })));
                }
                Poll::Ready(Some(Err(e))) => {
                    tracing::error!(error = %e, "Stream chunk error");
                    let provider = this
                        .accounting
                        .as_ref()
                        .map(|a| a.kind.to_string())
                        .unwrap_or_default();
                    let err = GatewayError::provider(provider, &e);
                    this.error = Some(e.to_string());
                    this.finished = true;
                    this.finalize(false);
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    this.finalize(false);
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for MeteredStream {
    fn drop(&mut self) {
        // Still holding accounting here means the caller walked away early.
        self.finalize(true);
    }
}
