use shared::codec::CodecError;
use thiserror::Error;

/// Failures on a single connection. Any of these ends the connection.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Backlogged,
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::Codec(CodecError::Io(e))
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no free spawn position left in the world")]
    NoSpawnPosition,

    #[error("server is stopped")]
    Stopped,
}

impl ServerError {
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        ServerError::Bind {
            addr: addr.into(),
            source,
        }
    }
}
