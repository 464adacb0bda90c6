use voxbridge_session::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or contradictory settings; raised before any network or audio work.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The hosted API refused to create the call.
    #[error("call creation failed with status {status}: {message}")]
    CallCreation { status: u16, message: String },

    #[error("unable to join meeting: {0}")]
    Join(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("app message delivery failed: {0}")]
    MessageDelivery(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
