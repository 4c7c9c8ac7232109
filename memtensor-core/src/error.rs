use std::{convert::Infallible, fmt::Display};

use crate::DataType;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Cuda(Box<dyn std::error::Error + Send + Sync>),

    #[error("Message: {0}")]
    Msg(String),

    #[error("{inner}\n{backtrace}")]
    WithBacktrace {
        inner: Box<Self>,
        backtrace: Box<std::backtrace::Backtrace>,
    },

    /// Arbitrary errors wrapping.
    #[error(transparent)]
    Wrapped(Box<dyn std::error::Error + Send + Sync>),

    /// Arbitrary errors wrapping with context.
    #[error("{wrapped:?}\n{context:?}")]
    WrappedContext {
        wrapped: Box<dyn std::error::Error + Send + Sync>,
        context: String,
    },

    #[error("tensor has no storage")]
    NullStorage,

    #[error("tensor has no allocator to create storage with")]
    NoAllocator,

    #[error("dim out of range: {index} >= {rank}")]
    DimOutOfRange { index: usize, rank: usize },

    #[error("cannot {op} {kind} storage, use {hint} instead")]
    WrongResizePath {
        op: &'static str,
        kind: &'static str,
        hint: &'static str,
    },

    #[error("tensor (source op {name}): current physical image shape: {physical:?} < logical image shape: {logical:?}")]
    ImageBounds {
        name: String,
        physical: [usize; 2],
        logical: [usize; 2],
    },

    #[error("images cannot be resized, destroy and recreate the image")]
    ImageResize,

    #[error("allocator does not support images")]
    ImageUnsupported,

    #[error("{required} bytes required but storage holds {capacity}")]
    CapacityExceeded { required: usize, capacity: usize },

    #[error("slice [{offset}, {offset}+{len}) exceeds parent buffer of {parent} bytes")]
    SliceOutOfBounds {
        offset: usize,
        len: usize,
        parent: usize,
    },

    #[error("shape {shape:?} of {dtype} does not fit in the address space")]
    ShapeOverflow { shape: Vec<usize>, dtype: DataType },

    #[error("storage is mapped elsewhere, writers need exclusive access")]
    MapConflict,

    #[error("copy src and dst with different size: {src} vs {dst}")]
    LengthMismatch { src: usize, dst: usize },

    #[error("data type not set or unsupported: {0:?}")]
    InvalidDType(DataType),

    #[error("accelerator storage is not mapped for host access")]
    NotMapped,

    #[error("cannot resize storage while it is mapped")]
    MappedResize,

    #[error("failed to allocate {nbytes} bytes")]
    Allocation { nbytes: usize },

    #[error("storage at {addr:#x} is not aligned for {dtype}")]
    Misaligned { addr: usize, dtype: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a new error based on a printable error message.
    ///
    /// If the message implements `std::error::Error`, prefer using [`Error::wrap`] instead.
    pub fn msg<M: Display>(msg: M) -> Self {
        Self::Msg(msg.to_string()).bt()
    }

    pub fn wrap(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Wrapped(Box::new(err)).bt()
    }

    pub fn bt(self) -> Self {
        let backtrace = std::backtrace::Backtrace::capture();
        match backtrace.status() {
            std::backtrace::BacktraceStatus::Disabled
            | std::backtrace::BacktraceStatus::Unsupported => self,
            _ => Self::WithBacktrace {
                inner: Box::new(self),
                backtrace: Box::new(backtrace),
            },
        }
    }

    /// The error without any backtrace wrapper, for matching on the kind.
    pub fn inner(&self) -> &Self {
        match self {
            Self::WithBacktrace { inner, .. } => inner.inner(),
            other => other,
        }
    }
}

#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::Error::Msg(format!($msg).into()).bt())
    };
    ($err:expr $(,)?) => {
        return Err($crate::Error::Msg(format!($err).into()).bt())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($fmt, $($arg)*).into()).bt())
    };
}

pub(crate) mod private {
    pub trait Sealed {}

    impl<T, E> Sealed for std::result::Result<T, E> where E: std::error::Error {}
    impl<T> Sealed for Option<T> {}
}

/// Attach more context to an error.
///
/// Inspired by [`anyhow::Context`].
pub trait Context<T, E>: private::Sealed {
    /// Wrap the error value with additional context.
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static;

    /// Wrap the error value with additional context that is evaluated lazily
    /// only once an error does occur.
    fn with_context<C, F>(self, f: F) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> Context<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Ok(ok) => Ok(ok),
            Err(error) => Err(Error::WrappedContext {
                wrapped: Box::new(error),
                context: context.to_string(),
            }),
        }
    }

    fn with_context<C, F>(self, context: F) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        match self {
            Ok(ok) => Ok(ok),
            Err(error) => Err(Error::WrappedContext {
                wrapped: Box::new(error),
                context: context().to_string(),
            }),
        }
    }
}

impl<T> Context<T, Infallible> for Option<T> {
    fn context<C>(self, context: C) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        // Not using ok_or_else to save 2 useless frames off the captured
        // backtrace.
        match self {
            Some(ok) => Ok(ok),
            None => Err(Error::msg(context)),
        }
    }

    fn with_context<C, F>(self, context: F) -> std::result::Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        match self {
            Some(ok) => Ok(ok),
            None => Err(Error::msg(context())),
        }
    }
}
