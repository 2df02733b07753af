//! Drives the aggregator from an inbound transport stream.

use futures::{pin_mut, Stream, StreamExt};
use serde_json::Value;

use roundtable_error::RoundtableError;
use roundtable_events::TokenFragment;

use crate::aggregator::StreamAggregator;

/// Consume raw transport payloads until the stream ends.
///
/// Payloads convert with field-defaulting semantics ([`TokenFragment::from_value`]),
/// so malformed events degrade instead of failing. Transport-level failures
/// abort the drive with [`RoundtableError::Transport`]; if the aggregator was
/// shut down while the stream is still producing, the drive stops with
/// [`RoundtableError::Closed`] so the caller can stop pulling the transport.
pub async fn run<S>(aggregator: &StreamAggregator, events: S) -> Result<(), RoundtableError>
where
    S: Stream<Item = Result<Value, RoundtableError>>,
{
    pin_mut!(events);
    while let Some(event) = events.next().await {
        let payload = event?;
        if aggregator.closed().await {
            return Err(RoundtableError::Closed);
        }
        aggregator
            .handle_fragment(TokenFragment::from_value(payload))
            .await;
    }
    Ok(())
}
