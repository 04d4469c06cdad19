use thiserror::Error;

/// Recoverable failures of the ambient surfaces (allocation, configuration).
///
/// Broken ownership invariants are never reported through this type; they go
/// through [`crate::memory::violation::fatal`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("a group must contain at least one object")]
    EmptyGroup,

    #[error("object size {size} is smaller than the {min} byte ownership header")]
    ObjectTooSmall { size: usize, min: usize },

    #[error("group layout overflows: {objects} objects of {object_size} bytes")]
    LayoutOverflow { object_size: usize, objects: usize },

    #[error("allocator returned no memory for a {size} byte group block")]
    OutOfMemory { size: usize },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Error {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
