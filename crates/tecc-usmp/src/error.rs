use thiserror::Error;

use crate::buffer::BufferInfoId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsmpError {
    #[error("buffer {id} is not part of this set")]
    UnknownBuffer { id: BufferInfoId },

    #[error("`{buffer}` conflicts with `{other}` but not the other way around")]
    AsymmetricConflict { buffer: String, other: String },

    #[error("`{buffer}` cannot conflict with itself")]
    SelfConflict { buffer: String },
}

pub type UsmpResult<T> = Result<T, UsmpError>;
