mod controller;
mod listener;
mod state;

pub use controller::CallSessionController;
pub use listener::{CallListener, StubListener};
pub use state::{CallSessionState, ParticipantRecord};
