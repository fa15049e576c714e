// Routing of raw responses onto outcome channels.
//
// Success is checked first, then pending; anything matching neither is a
// failure. Every input lands on exactly one channel.

use futures_core::Stream;
use futures_util::StreamExt;

use super::{FlowStream, Outcome};

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Classifier for one kind of response.
pub struct Fork<T> {
    success: Predicate<T>,
    pending: Option<Predicate<T>>,
}

impl<T> Fork<T> {
    pub fn new<P>(success: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            success: Box::new(success),
            pending: None,
        }
    }

    /// Route values matching `pending` to the pending channel.
    pub fn with_pending<P>(mut self, pending: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.pending = Some(Box::new(pending));
        self
    }

    pub fn classify(&self, value: T) -> Outcome<T, T, T> {
        if (self.success)(&value) {
            Outcome::Success(value)
        } else if self.pending.as_ref().is_some_and(|pending| pending(&value)) {
            Outcome::Pending(value)
        } else {
            Outcome::Failure(value)
        }
    }
}

/// Classify every item of `responses`, consuming the stream once.
pub fn fork<T, St>(responses: St, fork: Fork<T>) -> FlowStream<T, T, T>
where
    T: Send + 'static,
    St: Stream<Item = T> + Send + 'static,
{
    responses.map(move |value| fork.classify(value)).boxed()
}
