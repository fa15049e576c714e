// ── Launch stages ──
//
// Each stage is a `Flow` built over provider traits. The launcher chains
// them; nothing here touches the signal bus.

pub mod auth;
pub mod host;
pub mod mandelbox;
pub mod payment;
pub mod region;

pub use auth::{auth_flow, auth_refresh_flow, login_flow, request_from_state};
pub use host::{HostRequest, PollCount, host_config_flow, host_info_flow, host_spin_up_flow};
pub use mandelbox::{ClientIdentity, CreateRequest, create_flow};
pub use payment::payment_flow;
pub use region::region_flow;
