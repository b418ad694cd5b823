use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffer is too short")]
    BufTooShort,

    #[error("Maximum length exceeded")]
    MaxLengthOverflow,

    #[error("Invalid data in buffer")]
    InvalidData,
}
