// ── Flow primitives ──
//
// A flow turns an input stream into a stream of three-channel outcomes
// (success, pending, failure). Flows are lazy: nothing runs until the
// output stream is polled, and an input that never yields produces an
// output that never yields. Every run gets its own tracing span, so flows
// started from inside another flow nest under it.

mod ext;
mod fork;

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use strum::Display;
use tracing::{Span, debug, info, info_span, warn};

pub use ext::FlowStreamExt;
pub use fork::{Fork, fork};

// ── Outcome ──────────────────────────────────────────────────────

/// Which channel an outcome was emitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Pending,
    Failure,
}

/// One emission of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<S, F, P = Infallible> {
    Success(S),
    Pending(P),
    Failure(F),
}

impl<S, F, P> Outcome<S, F, P> {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::Pending(_) => OutcomeKind::Pending,
            Self::Failure(_) => OutcomeKind::Failure,
        }
    }

    /// Success and failure end a run; pending does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending(_))
    }

    pub fn success(self) -> Option<S> {
        match self {
            Self::Success(s) => Some(s),
            _ => None,
        }
    }

    pub fn failure(self) -> Option<F> {
        match self {
            Self::Failure(f) => Some(f),
            _ => None,
        }
    }

    pub fn pending(self) -> Option<P> {
        match self {
            Self::Pending(p) => Some(p),
            _ => None,
        }
    }

    pub fn map_success<T>(self, f: impl FnOnce(S) -> T) -> Outcome<T, F, P> {
        match self {
            Self::Success(s) => Outcome::Success(f(s)),
            Self::Pending(p) => Outcome::Pending(p),
            Self::Failure(e) => Outcome::Failure(e),
        }
    }

    pub fn map_failure<T>(self, f: impl FnOnce(F) -> T) -> Outcome<S, T, P> {
        match self {
            Self::Success(s) => Outcome::Success(s),
            Self::Pending(p) => Outcome::Pending(p),
            Self::Failure(e) => Outcome::Failure(f(e)),
        }
    }

    pub fn map_pending<T>(self, f: impl FnOnce(P) -> T) -> Outcome<S, F, T> {
        match self {
            Self::Success(s) => Outcome::Success(s),
            Self::Pending(p) => Outcome::Pending(f(p)),
            Self::Failure(e) => Outcome::Failure(e),
        }
    }
}

impl<S, F> Outcome<S, F, Infallible> {
    /// Widen a two-channel outcome to any pending type.
    pub fn with_pending<P>(self) -> Outcome<S, F, P> {
        match self {
            Self::Success(s) => Outcome::Success(s),
            Self::Failure(e) => Outcome::Failure(e),
            Self::Pending(never) => match never {},
        }
    }
}

impl<S, F, P> From<Result<S, F>> for Outcome<S, F, P> {
    fn from(result: Result<S, F>) -> Self {
        match result {
            Ok(s) => Self::Success(s),
            Err(e) => Self::Failure(e),
        }
    }
}

/// The output of a flow run.
pub type FlowStream<S, F, P = Infallible> = BoxStream<'static, Outcome<S, F, P>>;

// ── Flow ─────────────────────────────────────────────────────────

type Builder<I, S, F, P> = dyn Fn(BoxStream<'static, I>) -> FlowStream<S, F, P> + Send + Sync;

/// A named, reusable stream transformation.
///
/// The builder is invoked once per [`run`](Self::run); two runs share no
/// state unless the builder captures some.
pub struct Flow<I, S, F, P = Infallible> {
    name: &'static str,
    builder: Arc<Builder<I, S, F, P>>,
}

impl<I, S, F, P> Clone for Flow<I, S, F, P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            builder: Arc::clone(&self.builder),
        }
    }
}

impl<I, S, F, P> fmt::Debug for Flow<I, S, F, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow").field("name", &self.name).finish()
    }
}

impl<I, S, F, P> Flow<I, S, F, P>
where
    I: Send + 'static,
    S: fmt::Debug + Send + 'static,
    F: fmt::Debug + Send + 'static,
    P: fmt::Debug + Send + 'static,
{
    pub fn new<B>(name: &'static str, builder: B) -> Self
    where
        B: Fn(BoxStream<'static, I>) -> FlowStream<S, F, P> + Send + Sync + 'static,
    {
        Self {
            name,
            builder: Arc::new(builder),
        }
    }

    /// A flow that handles each input with one async call, in input order.
    pub fn from_fn<Fun, Fut>(name: &'static str, handler: Fun) -> Self
    where
        Fun: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<S, F, P>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(name, move |input| {
            let handler = Arc::clone(&handler);
            input.then(move |item| (*handler)(item)).boxed()
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run the flow over `input`.
    pub fn run<In>(&self, input: In) -> FlowStream<S, F, P>
    where
        In: Stream<Item = I> + Send + 'static,
    {
        let span = info_span!("flow", flow = self.name);
        let output = span.in_scope(|| (self.builder)(input.boxed()));
        let name = self.name;
        Instrumented {
            inner: output.inspect(move |outcome| log_outcome(name, outcome)),
            span,
        }
        .boxed()
    }

    /// Run the flow over a single input.
    pub fn run_once(&self, input: I) -> FlowStream<S, F, P> {
        self.run(futures_util::stream::once(futures_util::future::ready(input)))
    }
}

/// Shorthand for [`Flow::new`].
pub fn flow<I, S, F, P, B>(name: &'static str, builder: B) -> Flow<I, S, F, P>
where
    I: Send + 'static,
    S: fmt::Debug + Send + 'static,
    F: fmt::Debug + Send + 'static,
    P: fmt::Debug + Send + 'static,
    B: Fn(BoxStream<'static, I>) -> FlowStream<S, F, P> + Send + Sync + 'static,
{
    Flow::new(name, builder)
}

fn log_outcome<S: fmt::Debug, F: fmt::Debug, P: fmt::Debug>(
    name: &'static str,
    outcome: &Outcome<S, F, P>,
) {
    match outcome {
        Outcome::Success(_) => info!(flow = name, "success"),
        Outcome::Pending(p) => debug!(flow = name, pending = ?p, "pending"),
        Outcome::Failure(f) => warn!(flow = name, failure = ?f, "failure"),
    }
}

/// Polls the inner stream inside `span`.
struct Instrumented<St> {
    inner: St,
    span: Span,
}

impl<St: Stream + Unpin> Stream for Instrumented<St> {
    type Item = St::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let _entered = this.span.enter();
        this.inner.poll_next_unpin(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::stream;
    use pretty_assertions::assert_eq;

    use super::*;

    fn doubler() -> Flow<u32, u32, String> {
        Flow::from_fn("doubler", |n: u32| async move {
            if n < 100 {
                Outcome::Success(n * 2)
            } else {
                Outcome::Failure(format!("{n} is too large"))
            }
        })
    }

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let outcomes: Vec<_> = doubler().run(stream::iter([1, 500, 3])).collect().await;
        assert_eq!(
            outcomes,
            vec![
                Outcome::Success(2),
                Outcome::Failure("500 is too large".into()),
                Outcome::Success(6),
            ]
        );
    }

    #[tokio::test]
    async fn silent_input_produces_silent_output() {
        let outcomes: Vec<_> = doubler().run(stream::empty()).collect().await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn builder_runs_once_per_invocation() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let flow: Flow<u32, u32, ()> = Flow::new("counting", move |input| {
            counter.fetch_add(1, Ordering::SeqCst);
            input.map(Outcome::Success).boxed()
        });

        let _a = flow.run(stream::iter([1]));
        let _b = flow.clone().run(stream::iter([2]));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn nested_flows_compose() {
        let inner = doubler();
        let outer: Flow<u32, u32, String> = Flow::new("outer", move |input| {
            let inner = inner.clone();
            input
                .flat_map(move |n| inner.run_once(n + 1))
                .boxed()
        });

        let outcomes: Vec<_> = outer.run(stream::iter([1, 2])).collect().await;
        assert_eq!(outcomes, vec![Outcome::Success(4), Outcome::Success(6)]);
    }

    #[test]
    fn outcome_helpers() {
        let ok: Outcome<u8, &str> = Ok(1).into();
        assert!(ok.is_terminal());
        assert_eq!(ok.kind(), OutcomeKind::Success);
        assert_eq!(ok.clone().map_success(|n| n + 1).success(), Some(2));

        let pending: Outcome<u8, &str, &str> = Outcome::Pending("wait");
        assert!(!pending.is_terminal());
        assert_eq!(pending.kind().to_string(), "pending");
        assert_eq!(ok.with_pending::<&str>().kind(), OutcomeKind::Success);
    }
}
