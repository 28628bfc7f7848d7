use parse_display::Display;


pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors reported by the durable store and the operations built on it.
#[non_exhaustive]
#[derive(Debug, Display)]
pub enum Error {
    #[display("storage error: {0}")]
    Storage(redb::Error),

    #[display("serialization error: {0}")]
    Serialization(serde_json::Error),

    #[display("io error: {0}")]
    Io(std::io::Error),

    #[display("database `{database}` has schema version {found}, expected {expected}")]
    SchemaVersion {
        database: String,
        found: u64,
        expected: u64,
    },

    #[display("`{0}` is a reserved name")]
    ReservedName(String),

    #[display("`{0}` is not a valid database name")]
    InvalidName(String),

    /// An error from a [`KvStore`](crate::KvStore) implementation outside this crate.
    #[display("{0}")]
    Backend(Box<dyn std::error::Error>),

    /// The operation was dropped before it completed, usually because the `Runtime` was dropped.
    #[display("operation canceled")]
    Canceled,
}

impl Error {
    pub fn backend(e: impl std::error::Error + 'static) -> Self {
        Error::Backend(Box::new(e))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Storage(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Backend(e) => e.source(),
            Error::SchemaVersion { .. }
            | Error::ReservedName(_)
            | Error::InvalidName(_)
            | Error::Canceled => None,
        }
    }
}

macro_rules! from_redb {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Error {
                fn from(e: $t) -> Self {
                    Error::Storage(e.into())
                }
            }
        )*
    };
}
from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(e)
    }
}
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e)
    }
}
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
