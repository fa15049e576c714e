// Combinators over outcome streams.

use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::future;
use futures_util::stream::BoxStream;
use tokio::sync::watch;

use super::Outcome;

/// Extension methods for streams of [`Outcome`]s.
pub trait FlowStreamExt<S, F, P>: Stream<Item = Outcome<S, F, P>> + Sized + Send + 'static
where
    S: Send + 'static,
    F: Send + 'static,
    P: Send + 'static,
{
    /// Only the success channel.
    fn successes(self) -> BoxStream<'static, S> {
        self.filter_map(|o| future::ready(o.success())).boxed()
    }

    /// Only the failure channel.
    fn failures(self) -> BoxStream<'static, F> {
        self.filter_map(|o| future::ready(o.failure())).boxed()
    }

    /// Only the pending channel.
    fn pendings(self) -> BoxStream<'static, P> {
        self.filter_map(|o| future::ready(o.pending())).boxed()
    }

    /// Pass outcomes through up to and including the first success or
    /// failure, then end without polling the source again.
    fn until_terminal(self) -> BoxStream<'static, Outcome<S, F, P>> {
        async_stream::stream! {
            let mut source = std::pin::pin!(self);
            while let Some(outcome) = source.next().await {
                let terminal = outcome.is_terminal();
                yield outcome;
                if terminal {
                    break;
                }
            }
        }
        .boxed()
    }

    /// Mirror the run into `loading`: `true` now, `false` once a terminal
    /// outcome passes through.
    fn track_loading(self, loading: watch::Sender<bool>) -> BoxStream<'static, Outcome<S, F, P>> {
        loading.send_replace(true);
        self.inspect(move |outcome| {
            if outcome.is_terminal() {
                loading.send_replace(false);
            }
        })
        .boxed()
    }
}

impl<St, S, F, P> FlowStreamExt<S, F, P> for St
where
    St: Stream<Item = Outcome<S, F, P>> + Sized + Send + 'static,
    S: Send + 'static,
    F: Send + 'static,
    P: Send + 'static,
{
}
