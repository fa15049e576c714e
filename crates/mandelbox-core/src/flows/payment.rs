// Subscription gate. No network: the status is a claim in the access token.

use futures_util::StreamExt;

use crate::flow::{Flow, Fork, Outcome, fork};
use crate::model::{AuthState, PaymentFailure, SubscriptionStatus};
use crate::token;

/// Status as currently claimed by the access token, falling back to what
/// the auth flow recorded.
fn claimed_status(state: &AuthState) -> Option<SubscriptionStatus> {
    token::subscription_status(&state.access_token).or_else(|| state.subscription_status.clone())
}

pub fn payment_flow() -> Flow<AuthState, AuthState, PaymentFailure> {
    Flow::new("checkPayment", |input| {
        let gate = Fork::new(|state: &AuthState| {
            claimed_status(state).is_some_and(|status| status.is_valid())
        });
        fork(input, gate)
            .map(|outcome| match outcome {
                Outcome::Success(state) => Outcome::Success(state),
                Outcome::Pending(state) | Outcome::Failure(state) => {
                    Outcome::Failure(PaymentFailure {
                        status: claimed_status(&state),
                        state,
                    })
                }
            })
            .boxed()
    })
}
