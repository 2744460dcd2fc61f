//! Messages of the root consensus protocol.

mod block;
mod ir_change;
mod msg;
mod quorum_cert;
mod round;
mod state;
mod timeout;
mod trust_base;
mod vote;

pub use block::*;
pub use ir_change::*;
pub use msg::*;
pub use quorum_cert::*;
pub use round::*;
pub use state::*;
pub use timeout::*;
pub use trust_base::*;
pub use vote::*;
