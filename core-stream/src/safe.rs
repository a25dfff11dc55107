//! Per-source failure isolation.
//!
//! Multi-account connectors routinely hit accounts or regions the supplied
//! credentials cannot read. Those sources should drop out quietly instead of
//! failing the whole resync.

use connector_traits::BatchStream;
use futures::stream::StreamExt;
use tracing::info;

/// Wrap a producer so an access-denied error ends just that producer.
///
/// The denied source is logged at info level and its stream terminates
/// without yielding the error. Any other error is passed through untouched
/// and will abort the merge as usual.
pub fn safe_stream(inner: BatchStream, context: impl Into<String>) -> BatchStream {
    let context = context.into();
    inner
        .scan((), move |(), item| {
            let next = match item {
                Err(e) if e.is_access_denied() => {
                    info!(source = %context, error = %e, "Source access denied, skipping remainder");
                    None
                }
                other => Some(other),
            };
            futures::future::ready(next)
        })
        .boxed()
}
