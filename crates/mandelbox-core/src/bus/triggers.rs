// ── Trigger catalogue ──
//
// The closed set of triggers the application publishes. Each trigger is a
// zero-sized marker type bound to one payload type, so publishing the
// wrong payload on a name is a compile error.

use std::sync::Arc;

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use super::Channel;
use crate::model;

/// A named event stream on the [`SignalBus`](super::SignalBus).
pub trait Trigger: 'static {
    type Payload: Clone + Send + Sync + 'static;
    const NAME: TriggerName;

    #[doc(hidden)]
    fn channel(channels: &Channels) -> &Arc<Channel<Self::Payload>>;
}

macro_rules! triggers {
    ($( $(#[$meta:meta])* $name:ident($field:ident): $payload:ty; )*) => {
        /// Every trigger name the bus knows about.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr,
        )]
        #[strum(serialize_all = "camelCase")]
        pub enum TriggerName {
            $( $name, )*
        }

        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl Trigger for $name {
                type Payload = $payload;
                const NAME: TriggerName = TriggerName::$name;

                fn channel(channels: &Channels) -> &Arc<Channel<$payload>> {
                    &channels.$field
                }
            }
        )*

        /// One channel per trigger, created up front.
        #[doc(hidden)]
        pub struct Channels {
            $( $field: Arc<Channel<$payload>>, )*
        }

        impl Channels {
            pub(crate) fn new(capacity: usize) -> Self {
                Self {
                    $( $field: Arc::new(Channel::new(capacity)), )*
                }
            }
        }
    };
}

triggers! {
    /// The process finished starting up.
    AppReady(app_ready): ();
    /// Credentials from storage or a fresh login.
    AuthInfo(auth_info): model::AuthRequest;
    AuthFlowSuccess(auth_flow_success): model::AuthState;
    AuthFlowFailure(auth_flow_failure): model::AuthFailure;
    /// Background refresh after a successful launch.
    AuthRefreshSuccess(auth_refresh_success): model::AuthState;
    CheckPaymentFlowSuccess(check_payment_flow_success): model::AuthState;
    CheckPaymentFlowFailure(check_payment_flow_failure): model::PaymentFailure;
    /// The user finished paying; refresh tokens to pick up the new claim.
    StripeAuthRefresh(stripe_auth_refresh): model::AuthState;
    ConfigFlowSuccess(config_flow_success): model::AuthState;
    /// Re-run region probing.
    AwsPingRefresh(aws_ping_refresh): ();
    MandelboxFlowStart(mandelbox_flow_start): ();
    MandelboxCreateSuccess(mandelbox_create_success): model::MandelboxAssignment;
    MandelboxCreateFailure(mandelbox_create_failure): model::CreateFailure;
    HostSpinUpSuccess(host_spin_up_success): model::HostSpinUpResult;
    HostSpinUpFailure(host_spin_up_failure): model::HostFailure;
    MandelboxFlowSuccess(mandelbox_flow_success): model::HostSpinUpResult;
    MandelboxFlowFailure(mandelbox_flow_failure): model::MandelboxFailure;
    /// Process id of the freshly spawned protocol.
    ProtocolLaunched(protocol_launched): Option<u32>;
    ProtocolClosed(protocol_closed): model::ProtocolClosed;
    /// Whether connection parameters have been handed to the protocol.
    ProtocolConnection(protocol_connection): bool;
    /// The protocol crashed more often than it may be restarted.
    ProtocolError(protocol_error): ();
    NetworkUnstable(network_unstable): bool;
    PowerSuspend(power_suspend): ();
    RelaunchAction(relaunch_action): ();
    SignoutAction(signout_action): ();
    QuitAction(quit_action): ();
    /// A URL to open inside the streamed browser.
    OpenUrl(open_url): String;
    ErrorWindow(error_window): model::ErrorWindow;
    UpdateAvailable(update_available): ();
    UpdateNotAvailable(update_not_available): ();
}
