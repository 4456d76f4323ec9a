use thiserror::Error;

/// The errors that may occur when reading boxes.
#[derive(Debug, Error)]
pub enum Error {
    /// A payload ended before a field could be read.
    #[error("Cannot read {0}.")]
    Read(String),

    /// A field was read but its value makes no sense.
    #[error("Cannot decode {0}.")]
    Decode(String),

    #[error("{0}.")]
    Other(String),
}

impl Error {
    /// Create a new uncategorized error.
    pub fn new<T: Into<String>>(reason: T) -> Self {
        Self::Other(reason.into())
    }

    /// Create a new read error.
    pub fn new_read_err<T: Into<String>>(reason: T) -> Self {
        Self::Read(reason.into())
    }

    /// Create a new decode error.
    pub fn new_decode_err<T: Into<String>>(reason: T) -> Self {
        Self::Decode(reason.into())
    }

    /// Returns true if the error is a read error.
    pub fn is_read_err(&self) -> bool {
        matches!(self, Self::Read(_))
    }

    /// Returns true if the error is a decode error.
    pub fn is_decode_err(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Read(format!("box payload ({value})"))
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::Decode(format!("box type as utf-8 ({value})"))
    }
}

#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::new_decode_err(format!($($arg)*)))
    };
}
