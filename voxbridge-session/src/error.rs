#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("unable to join meeting: {0}")]
    Join(String),

    #[error("unable to update inputs: {0}")]
    InputsUpdate(String),

    #[error("virtual device error: {0}")]
    Device(String),

    #[error("unable to send app message: {0}")]
    AppMessage(String),

    #[error("session is not connected")]
    NotConnected,
}
