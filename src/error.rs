use std::borrow::Cow;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad output target or an identifier that cannot be generated.
    Config,
    /// An opcode the translator has no template for.
    Unsupported,
    /// Structurally invalid bytecode, e.g. a jump out of bounds.
    Bytecode,
    /// A chunk file that cannot be decoded.
    Chunk,
    /// Raised by a primitive operation while running code.
    Runtime,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Bytecode => "malformed bytecode",
            ErrorKind::Chunk => "invalid chunk",
            ErrorKind::Runtime => "runtime error",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Cow<'static, str>,
}

impl Error {
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cold]
pub fn error(kind: ErrorKind, message: impl Into<Cow<'static, str>>) -> Error {
    Error {
        kind,
        message: message.into(),
    }
}

#[cold]
pub fn runtime_error(message: impl Into<Cow<'static, str>>) -> Error {
    error(ErrorKind::Runtime, message)
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            // runtime messages already carry their `chunk:line:` prefix
            ErrorKind::Runtime => f.write_str(&self.message),
            kind => write!(f, "{}: {}", kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for Error {}
