// mandelbox-core: Launch pipeline between mandelbox-api and the binary.
// Signal bus, flow primitives, stage flows and the protocol process manager.

pub mod bus;
pub mod config;
pub mod crypto;
pub mod error;
pub mod flow;
pub mod flows;
pub mod launcher;
pub mod model;
pub mod protocol;
pub mod providers;
pub mod token;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod fakes;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{Publisher, SignalBus, Subscription, Trigger, TriggerName, triggers};
pub use config::{LauncherConfig, PollPolicy, ProtocolConfig, RegionPolicy};
pub use error::CoreError;
pub use flow::{Flow, FlowStream, FlowStreamExt, Fork, Outcome, OutcomeKind};
pub use launcher::{LaunchStage, Launcher, Providers};
pub use protocol::{ProtocolManager, ProtocolState};

// Domain types used across the bus.
pub use model::{
    AuthFailure, AuthFailureKind, AuthRequest, AuthState, CreateFailure, ErrorWindow,
    HostFailure, HostInfo, HostSpinUpResult, ImportPayload, MandelboxAssignment,
    MandelboxFailure, MandelboxPorts, PaymentFailure, ProtocolClosed, StoredConfigToken,
    SubscriptionStatus,
};
