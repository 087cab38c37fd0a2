use head_codec::EncodeError;
use head_session::SessionError;
use head_tx::BuildError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("engine builder is missing {0}")]
    Missing(&'static str),
}
