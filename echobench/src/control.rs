//! Line-delimited control channel helpers shared by client and controller.
//!
//! The control channel is plain ASCII, one command or reply per line,
//! terminated by `\n`. This module owns only the framing: splitting the
//! byte stream into lines and handing each one to `echobench_proto` for
//! parsing. Nothing here is server/client/controller specific.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use echobench_proto::{Command, Reply};

/// Errors reading or writing a line on the control channel.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The underlying socket returned an IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer closed the connection before a full line arrived.
    #[error("connection closed")]
    Closed,
    /// A line was read but did not parse as the expected kind.
    #[error("malformed command: {0}")]
    Command(#[from] echobench_proto::command::Error),
    /// A line was read but did not parse as the expected kind.
    #[error("malformed reply: {0}")]
    Reply(#[from] echobench_proto::reply::Error),
}

/// The read half of a control channel, buffered for line reads.
pub struct Reader {
    inner: BufReader<OwnedReadHalf>,
    line: String,
}

/// The write half of a control channel.
pub struct Writer {
    inner: OwnedWriteHalf,
}

/// Split a connected control-channel socket into its read and write halves.
#[must_use]
pub fn split(stream: TcpStream) -> (Reader, Writer) {
    let (read_half, write_half) = stream.into_split();
    (
        Reader {
            inner: BufReader::new(read_half),
            line: String::new(),
        },
        Writer { inner: write_half },
    )
}

impl Reader {
    async fn read_line(&mut self) -> Result<&str, Error> {
        self.line.clear();
        let n = self.inner.read_line(&mut self.line).await?;
        if n == 0 {
            return Err(Error::Closed);
        }
        Ok(self.line.trim_end_matches(['\r', '\n']))
    }

    /// Read one line and parse it as a [`Command`].
    pub async fn read_command(&mut self) -> Result<Command, Error> {
        let line = self.read_line().await?;
        Ok(Command::parse(line)?)
    }

    /// Read one line and parse it as a [`Reply`].
    pub async fn read_reply(&mut self) -> Result<Reply, Error> {
        let line = self.read_line().await?;
        Ok(Reply::parse(line)?)
    }
}

impl Writer {
    /// Write a [`Command`] as a single terminated line.
    pub async fn write_command(&mut self, command: &Command) -> Result<(), Error> {
        self.write_line(&command.to_line()).await
    }

    /// Write a [`Reply`] as a single terminated line.
    pub async fn write_reply(&mut self, reply: &Reply) -> Result<(), Error> {
        self.write_line(&reply.to_line()).await
    }

    /// Writes `line`, which must already carry its own trailing `\n` (as
    /// `Command::to_line`/`Reply::to_line` do), without appending another.
    async fn write_line(&mut self, line: &str) -> Result<(), Error> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use echobench_proto::TestCode;

    #[tokio::test]
    async fn command_round_trips_over_a_real_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = split(stream);
            reader.read_command().await.unwrap()
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (_reader, mut writer) = split(stream);
        writer
            .write_command(&Command::Target {
                addr: "10.0.0.1".parse().unwrap(),
                port: 7000,
            })
            .await
            .unwrap();

        let received = client.await.unwrap();
        assert_eq!(
            received,
            Command::Target {
                addr: "10.0.0.1".parse().unwrap(),
                port: 7000,
            }
        );
    }

    #[tokio::test]
    async fn reply_round_trips_over_a_real_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = split(stream);
            reader.read_reply().await.unwrap()
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let (_reader, mut writer) = split(stream);
        let reply = Reply::Result {
            code: TestCode::Success,
            min_ms: 0.1,
            max_ms: 5.0,
            sum_ms: 12.3,
        };
        writer.write_reply(&reply).await.unwrap();

        assert_eq!(server.await.unwrap(), reply);
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _writer) = split(stream);
            reader.read_command().await
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        drop(stream);

        assert!(matches!(server.await.unwrap(), Err(Error::Closed)));
    }
}
