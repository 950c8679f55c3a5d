pub mod fsm;
pub mod protocol;

pub use self::{fsm::FiniteStateMachine, protocol::Protocol};
