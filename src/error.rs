use thiserror::Error;

#[derive(Error, Debug)]
pub enum GmmError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Out of graphics memory")]
    OutOfMemory,

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("No chunk found at 0x{0:x}")]
    NotFound(u64),

    #[error("Chunk at offset 0x{0:x} is already free")]
    DoubleFree(u64),

    #[error("Imported memory misuse at offset 0x{0:x}")]
    ImportMisuse(u64),
}

// A convenient alias
pub type GmmResult<T> = Result<T, GmmError>;
