pub mod command;
pub mod fsm;
pub mod state;

pub use command::Command;
pub use fsm::GameStateMachine;
pub use state::{Game, Phase, SnapshotBlob};
