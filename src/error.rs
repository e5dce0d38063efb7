//! Error and Result module.

use std::error::Error as StdError;
use std::fmt;

/// Result type often returned from methods that can have foxhole `Error`s.
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// Represents errors that can occur while serving HTTP.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// Error parsing an incoming request head or body.
    Parse(Parse),
    /// A message reached EOF, but is not complete.
    IncompleteMessage,
    /// An `io::Error` while reading or writing a network stream.
    Io,
    /// Error creating the listening socket.
    Listen,
    /// Error accepting a connection on the listening socket.
    Accept,
    /// No route matched the request.
    NotHandled,
    /// The server went away while a waiter was suspended on it.
    ChannelClosed,
    /// A deadline elapsed.
    Timeout,
    /// A WebSocket handshake or frame violated the protocol.
    WebSocket(Ws),
    User(User),
}

#[derive(Debug)]
pub(crate) enum Parse {
    Method,
    Version,
    Uri,
    Header,
    TooLarge,
    ContentLength,
    Chunk,
}

#[derive(Debug)]
pub(crate) enum Ws {
    /// A client frame arrived without a mask.
    UnmaskedFrame,
    /// Reserved or unknown opcode.
    Opcode,
    /// A control frame carried more than 125 payload bytes.
    ControlTooLarge,
}

#[derive(Debug)]
pub(crate) enum User {
    /// Error returned from a user's handler.
    Handler,
    /// `start()` was called while already listening.
    AlreadyListening,
}

/// Sentinel cause for errors produced by an elapsed deadline.
#[derive(Debug)]
pub(crate) struct TimedOut;

/// Sentinel cause a handler returns to decline a request.
///
/// The connection loop answers `404 Not Found` for this error instead of
/// the `500` any other handler error produces.
#[derive(Debug, Default)]
pub struct NotHandled;

impl Error {
    /// Returns true if this was an HTTP parse error.
    pub fn is_parse(&self) -> bool {
        matches!(self.inner.kind, Kind::Parse(_))
    }

    /// Returns true if this error was caused by user code.
    pub fn is_user(&self) -> bool {
        matches!(self.inner.kind, Kind::User(_))
    }

    /// Returns true if the error was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout) || self.find_source::<TimedOut>().is_some()
    }

    /// Returns true if no route (or handler) accepted the request.
    pub fn is_not_handled(&self) -> bool {
        matches!(self.inner.kind, Kind::NotHandled) || self.find_source::<NotHandled>().is_some()
    }

    /// Returns true if the connection closed before a message could complete.
    pub fn is_incomplete_message(&self) -> bool {
        matches!(self.inner.kind, Kind::IncompleteMessage)
    }

    /// Returns true if the error came from the listening socket.
    pub fn is_listen(&self) -> bool {
        matches!(self.inner.kind, Kind::Listen)
    }

    /// Consumes the error, returning its cause.
    pub fn into_cause(self) -> Option<Box<dyn StdError + Send + Sync>> {
        self.inner.cause
    }

    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn find_source<E: StdError + 'static>(&self) -> Option<&E> {
        let mut cause = self.source();
        while let Some(err) = cause {
            if let Some(typed) = err.downcast_ref() {
                return Some(typed);
            }
            cause = err.source();
        }

        // else
        None
    }

    pub(crate) fn new_listen<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Listen).with(cause)
    }

    pub(crate) fn new_accept<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::Accept).with(cause)
    }

    pub(crate) fn new_io(cause: std::io::Error) -> Error {
        Error::new(Kind::Io).with(cause)
    }

    pub(crate) fn new_incomplete() -> Error {
        Error::new(Kind::IncompleteMessage)
    }

    pub(crate) fn new_too_large() -> Error {
        Error::new(Kind::Parse(Parse::TooLarge))
    }

    pub(crate) fn new_not_handled() -> Error {
        Error::new(Kind::NotHandled)
    }

    pub(crate) fn new_closed() -> Error {
        Error::new(Kind::ChannelClosed)
    }

    pub(crate) fn new_timeout() -> Error {
        Error::new(Kind::Timeout).with(TimedOut)
    }

    pub(crate) fn new_ws(ws: Ws) -> Error {
        Error::new(Kind::WebSocket(ws))
    }

    pub(crate) fn new_user_handler<E: Into<Cause>>(cause: E) -> Error {
        Error::new(Kind::User(User::Handler)).with(cause)
    }

    pub(crate) fn new_already_listening() -> Error {
        Error::new(Kind::User(User::AlreadyListening))
    }

    fn description(&self) -> &str {
        match self.inner.kind {
            Kind::Parse(Parse::Method) => "invalid HTTP method parsed",
            Kind::Parse(Parse::Version) => "invalid HTTP version parsed",
            Kind::Parse(Parse::Uri) => "invalid URI",
            Kind::Parse(Parse::Header) => "invalid HTTP header parsed",
            Kind::Parse(Parse::TooLarge) => "message head is too large",
            Kind::Parse(Parse::ContentLength) => "invalid content-length parsed",
            Kind::Parse(Parse::Chunk) => "invalid chunk size line",
            Kind::IncompleteMessage => "connection closed before message completed",
            Kind::Io => "connection error",
            Kind::Listen => "error creating server listener",
            Kind::Accept => "error accepting connection",
            Kind::NotHandled => "no route matched the request",
            Kind::ChannelClosed => "server dropped while waiting",
            Kind::Timeout => "deadline elapsed",
            Kind::WebSocket(Ws::UnmaskedFrame) => "client websocket frame was not masked",
            Kind::WebSocket(Ws::Opcode) => "unknown websocket opcode",
            Kind::WebSocket(Ws::ControlTooLarge) => "websocket control frame too large",
            Kind::User(User::Handler) => "handler returned an error",
            Kind::User(User::AlreadyListening) => "server is already listening",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_tuple("foxhole::Error");
        f.field(&self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            f.field(cause);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref cause) = self.inner.cause {
            write!(f, "{}: {}", self.description(), cause)
        } else {
            f.write_str(self.description())
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<httparse::Error> for Error {
    fn from(err: httparse::Error) -> Error {
        let parse = match err {
            httparse::Error::HeaderName | httparse::Error::HeaderValue => Parse::Header,
            httparse::Error::Status => Parse::Method,
            httparse::Error::Version => Parse::Version,
            _ => Parse::Header,
        };
        Error::new(Kind::Parse(parse)).with(err)
    }
}

impl From<http::method::InvalidMethod> for Error {
    fn from(err: http::method::InvalidMethod) -> Error {
        Error::new(Kind::Parse(Parse::Method)).with(err)
    }
}

impl From<http::uri::InvalidUri> for Error {
    fn from(err: http::uri::InvalidUri) -> Error {
        Error::new(Kind::Parse(Parse::Uri)).with(err)
    }
}

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

impl fmt::Display for NotHandled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("request was not handled")
    }
}

impl StdError for NotHandled {}
