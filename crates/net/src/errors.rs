//! Transport-level errors.  Parse failures carry the detailed status so
//! the statistics can count them by kind.

use thiserror::Error;

use crate::message::ParseStatus;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("connection closed by remote")]
    Closed,

    #[error("syn cookie check failed")]
    BadCookie,

    #[error("message failed to parse: {0:?}")]
    Parse(ParseStatus),
}
