//! Logging sinks and the server's log message formats.

use std::fmt;
use std::io::{self, Write};

use crate::net::Endpoint;

/// A sink for the server's diagnostic output.
///
/// The default sink forwards to the [`tracing`] dispatcher, so the host
/// application's subscriber decides where lines end up. [`PrintLogger`]
/// is the unconditional stderr fallback.
pub trait Logger: Send + Sync {
    /// Routine lifecycle output.
    fn log_info(&self, message: &str);
    /// Recoverable, per-connection failures.
    fn log_error(&self, message: &str);
    /// Failures that stop the server.
    fn log_critical(&self, message: &str);
}

/// Forwards log lines as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceLogger;

impl Logger for TraceLogger {
    fn log_info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn log_error(&self, message: &str) {
        tracing::error!("{}", message);
    }

    fn log_critical(&self, message: &str) {
        tracing::error!(critical = true, "{}", message);
    }
}

/// Prints log lines to stderr, one per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrintLogger;

impl PrintLogger {
    fn print(&self, message: &str) {
        let stderr = io::stderr();
        let mut out = stderr.lock();
        let _ = writeln!(out, "{}", message);
    }
}

impl Logger for PrintLogger {
    fn log_info(&self, message: &str) {
        self.print(message);
    }

    fn log_error(&self, message: &str) {
        self.print(message);
    }

    fn log_critical(&self, message: &str) {
        self.print(message);
    }
}

/// The startup line: `starting server`, plus the bound address when one
/// decodes. Wildcard IP addresses print only the port, specific addresses
/// print `addr:port`, unix sockets print the path.
pub(crate) fn startup_message(endpoint: Option<&Endpoint>) -> String {
    let mut message = String::from("starting server");
    match endpoint {
        Some(Endpoint::Ip(addr)) if addr.ip().is_unspecified() => {
            message.push_str(&format!(" port: {}", addr.port()));
        }
        Some(Endpoint::Ip(addr)) => {
            message.push_str(&format!(" {}", addr));
        }
        #[cfg(unix)]
        Some(Endpoint::Unix(path)) => {
            message.push_str(&format!(" path: {}", path.display()));
        }
        None => {}
    }
    message
}

pub(crate) fn open_message(id: &str) -> String {
    format!("<{}> open connection", id)
}

pub(crate) fn close_message(id: &str) -> String {
    format!("<{}> close connection", id)
}

pub(crate) fn request_message(id: &str, method: &http::Method, path: &str) -> String {
    format!("<{}> request: {} {}", id, method, path)
}

pub(crate) fn error_message(id: &str, error: &dyn fmt::Display) -> String {
    format!("<{}> error: {}", id, error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_wildcard_prints_port() {
        let endpoint = Endpoint::ip4([0, 0, 0, 0], 1234);
        assert_eq!(
            startup_message(Some(&endpoint)),
            "starting server port: 1234"
        );

        let endpoint = Endpoint::ip6([0; 8], 8080);
        assert_eq!(
            startup_message(Some(&endpoint)),
            "starting server port: 8080"
        );
    }

    #[test]
    fn startup_specific_prints_address() {
        let endpoint = Endpoint::ip4([8, 8, 8, 8], 1234);
        assert_eq!(startup_message(Some(&endpoint)), "starting server 8.8.8.8:1234");
    }

    #[cfg(unix)]
    #[test]
    fn startup_unix_prints_path() {
        let endpoint = Endpoint::unix("/var/fox/xyz");
        assert_eq!(
            startup_message(Some(&endpoint)),
            "starting server path: /var/fox/xyz"
        );
    }

    #[test]
    fn startup_without_endpoint() {
        assert_eq!(startup_message(None), "starting server");
    }

    #[test]
    fn connection_messages() {
        assert_eq!(open_message("fish.com"), "<fish.com> open connection");
        assert_eq!(close_message("fish.com"), "<fish.com> close connection");
        assert_eq!(
            request_message("fish.com", &http::Method::GET, "/chips"),
            "<fish.com> request: GET /chips"
        );
    }
}
