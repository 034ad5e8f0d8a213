use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictError {
    Duplicate,
    NotFound,
}

impl fmt::Display for DictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictError::Duplicate => write!(f, "key already exists"),
            DictError::NotFound => write!(f, "key not found"),
        }
    }
}

impl std::error::Error for DictError {}

pub type DictResult<T> = Result<T, DictError>;
