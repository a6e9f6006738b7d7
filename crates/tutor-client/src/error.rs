/// Errors surfaced by the tutor client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("proxy returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream read error: {0}")]
    Stream(String),

    #[error("message is empty")]
    EmptyMessage,

    #[error("a request is already in flight")]
    Busy,
}

pub type Result<T> = std::result::Result<T, Error>;
