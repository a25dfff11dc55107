//! Fan-in merge of paginated producers.
//!
//! Combines N independent batch streams into one. Batches keep their source
//! order within a producer; across producers whichever batch is ready first
//! wins.

use connector_traits::BatchStream;
use futures::stream::{self, StreamExt};

/// Merge zero or more batch producers into a single batch stream.
///
/// - Zero producers yields an empty stream.
/// - One producer is passed through without merge overhead.
/// - N producers are multiplexed fairly: a batch is yielded as soon as any
///   live producer has one ready, and exhaustion of one producer does not
///   stop the others.
///
/// The merge is not fault-isolating: an error item from any producer is
/// yielded to the consumer like any other item. Wrap producers with
/// [`crate::safe_stream`] first when a source's access failures should be
/// absorbed instead.
pub fn merge_batches(mut producers: Vec<BatchStream>) -> BatchStream {
    match producers.len() {
        0 => stream::empty().boxed(),
        1 => producers.pop().unwrap_or_else(|| stream::empty().boxed()),
        _ => stream::select_all(producers).boxed(),
    }
}
