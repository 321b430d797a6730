//! Single backend connection.

use std::{io, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream},
    net::TcpStream,
};

use super::resp::{encode_command, read_value, RespValue};
use crate::source::FetchCause;

/// Error communicating with a backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Network or protocol failure. The connection is unusable afterwards.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The backend answered with an error reply.
    #[error("backend error: {0}")]
    Backend(String),
    /// The backend answered with a reply of an unexpected type.
    #[error("unexpected {actual} reply to `{command}`")]
    UnexpectedReply {
        /// Command name.
        command: &'static str,
        /// Kind of the received reply.
        actual: &'static str,
    },
    /// A text reply is not valid UTF-8.
    #[error("reply is not valid UTF-8")]
    InvalidUtf8,
    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl ConnectionError {
    /// Checks whether the connection that produced this error can be reused.
    pub(crate) fn keeps_connection(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<ConnectionError> for FetchCause {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Io(err) => Self::Io(err),
            ConnectionError::Backend(message) => Self::Backend(message),
            err @ ConnectionError::UnexpectedReply { .. } => Self::UnexpectedReply(err.to_string()),
            ConnectionError::InvalidUtf8 => Self::InvalidUtf8,
            ConnectionError::Timeout(timeout) => Self::Timeout(timeout),
        }
    }
}

/// Converts an `INFO` reply to text.
pub(crate) fn info_text(reply: RespValue) -> Result<String, ConnectionError> {
    match reply {
        RespValue::BulkString(bytes) => {
            String::from_utf8(bytes).map_err(|_| ConnectionError::InvalidUtf8)
        }
        other => Err(ConnectionError::UnexpectedReply {
            command: "INFO",
            actual: other.kind(),
        }),
    }
}

fn expect_ok(command: &'static str, reply: RespValue) -> Result<(), ConnectionError> {
    match reply {
        RespValue::SimpleString(status) if status == "OK" => Ok(()),
        other => Err(ConnectionError::UnexpectedReply {
            command,
            actual: other.kind(),
        }),
    }
}

/// Connection to a backend speaking RESP2. Requests are executed strictly one at a time.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    stream: BufStream<S>,
    write_buf: Vec<u8>,
}

impl Connection {
    /// Connects to the specified address, authenticates if `password` is provided
    /// and selects `database`.
    ///
    /// # Errors
    ///
    /// Returns I/O errors and error replies to `AUTH` / `SELECT`.
    pub async fn connect(
        address: &str,
        password: Option<&str>,
        database: u32,
    ) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let mut this = Self::from_stream(stream);
        if let Some(password) = password {
            this.auth(password).await?;
        }
        this.select(database).await?;
        tracing::debug!(address, database, "Connected to backend");
        Ok(this)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Wraps an established stream without issuing any commands.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            write_buf: Vec::with_capacity(64),
        }
    }

    /// Executes a raw command. Error replies are converted to [`ConnectionError::Backend`].
    ///
    /// # Errors
    ///
    /// Returns I/O errors and error replies.
    pub async fn command(&mut self, args: &[&[u8]]) -> Result<RespValue, ConnectionError> {
        self.write_buf.clear();
        encode_command(&mut self.write_buf, args);
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        match read_value(&mut self.stream).await? {
            RespValue::Error(message) => Err(ConnectionError::Backend(message)),
            reply => Ok(reply),
        }
    }

    async fn auth(&mut self, password: &str) -> Result<(), ConnectionError> {
        let reply = self.command(&[b"AUTH".as_slice(), password.as_bytes()]).await?;
        expect_ok("AUTH", reply)
    }

    async fn select(&mut self, database: u32) -> Result<(), ConnectionError> {
        let index = database.to_string();
        let reply = self.command(&[b"SELECT".as_slice(), index.as_bytes()]).await?;
        expect_ok("SELECT", reply)
    }

    /// Returns the raw text of `INFO <section>`.
    ///
    /// # Errors
    ///
    /// Returns I/O errors, error replies and non-text replies.
    pub async fn info(&mut self, section: &str) -> Result<String, ConnectionError> {
        let reply = self.command(&[b"INFO".as_slice(), section.as_bytes()]).await?;
        info_text(reply)
    }

    /// Sets a string key.
    ///
    /// # Errors
    ///
    /// Returns I/O errors and error replies.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<(), ConnectionError> {
        let reply = self
            .command(&[b"SET".as_slice(), key.as_bytes(), value.as_bytes()])
            .await?;
        expect_ok("SET", reply)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    use super::*;

    /// Reads the request sent to the backend end of the pipe and answers with `reply`.
    async fn respond(backend: &mut DuplexStream, expected_request: &[u8], reply: &[u8]) {
        let mut request = vec![0_u8; expected_request.len()];
        backend.read_exact(&mut request).await.unwrap();
        assert_eq!(request, expected_request);
        backend.write_all(reply).await.unwrap();
    }

    #[tokio::test]
    async fn fetching_info_section() {
        let (client, mut backend) = duplex(1_024);
        let mut connection = Connection::from_stream(client);

        let backend_task = tokio::spawn(async move {
            respond(
                &mut backend,
                b"*2\r\n$4\r\nINFO\r\n$7\r\nClients\r\n",
                b"$34\r\n# Clients\r\nconnected_clients:3\r\n\r\n\r\n",
            )
            .await;
            backend
        });
        let text = connection.info("Clients").await.unwrap();
        assert_eq!(text, "# Clients\r\nconnected_clients:3\r\n\r\n");
        backend_task.await.unwrap();
    }

    #[tokio::test]
    async fn error_reply_keeps_connection_usable() {
        let (client, mut backend) = duplex(1_024);
        let mut connection = Connection::from_stream(client);

        let backend_task = tokio::spawn(async move {
            respond(
                &mut backend,
                b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n",
                b"-READONLY replica\r\n",
            )
            .await;
            respond(
                &mut backend,
                b"*2\r\n$4\r\nINFO\r\n$5\r\nBogus\r\n",
                b"$0\r\n\r\n",
            )
            .await;
        });

        let err = connection.set("k", "v").await.unwrap_err();
        assert!(err.keeps_connection());
        assert_matches!(err, ConnectionError::Backend(message) if message == "READONLY replica");
        let text = connection.info("Bogus").await.unwrap();
        assert_eq!(text, "");
        backend_task.await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_info_reply() {
        let (client, mut backend) = duplex(1_024);
        let mut connection = Connection::from_stream(client);

        tokio::spawn(async move {
            respond(&mut backend, b"*2\r\n$4\r\nINFO\r\n$3\r\nAll\r\n", b":1\r\n").await;
        });
        let err = connection.info("All").await.unwrap_err();
        assert_matches!(
            err,
            ConnectionError::UnexpectedReply {
                command: "INFO",
                actual: "integer"
            }
        );
    }

    #[tokio::test]
    async fn closed_backend_is_io_error() {
        let (client, backend) = duplex(1_024);
        drop(backend);
        let mut connection = Connection::from_stream(client);
        let err = connection.info("Clients").await.unwrap_err();
        assert!(!err.keeps_connection());
        assert_matches!(err, ConnectionError::Io(_));
    }

    #[test]
    fn converting_to_fetch_cause() {
        let cause = FetchCause::from(ConnectionError::InvalidUtf8);
        assert_matches!(cause, FetchCause::InvalidUtf8);
        let cause = FetchCause::from(ConnectionError::Timeout(Duration::from_secs(1)));
        assert_matches!(cause, FetchCause::Timeout(timeout) if timeout == Duration::from_secs(1));
    }
}
