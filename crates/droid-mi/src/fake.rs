//! In-process stand-in for a debugger backend, driven by tests.

use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

use crate::client::{ClientOptions, ProtocolClient};
use crate::session::ClientState;
use crate::transport::read_line;

pub(crate) struct Backend {
    lines: BufReader<ReadHalf<DuplexStream>>,
    out: WriteHalf<DuplexStream>,
    buf: String,
}

impl Backend {
    /// Next command written by the client.
    pub(crate) async fn recv(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), read_line(&mut self.lines, &mut self.buf))
            .await
            .expect("client wrote nothing")
            .expect("read failed")
            .expect("client closed the stream")
    }

    /// Next command, split into its token and text.
    pub(crate) async fn recv_tokened(&mut self) -> (u64, String) {
        let line = self.recv().await;
        split_token(&line)
    }

    /// True when the client writes nothing for `ms` milliseconds.
    pub(crate) async fn silent_for(&mut self, ms: u64) -> bool {
        tokio::time::timeout(
            Duration::from_millis(ms),
            read_line(&mut self.lines, &mut self.buf),
        )
        .await
        .is_err()
    }

    pub(crate) async fn send(&mut self, text: &str) {
        self.out.write_all(text.as_bytes()).await.unwrap();
        self.out.write_all(b"\n").await.unwrap();
        self.out.flush().await.unwrap();
    }
}

pub(crate) fn split_token(line: &str) -> (u64, String) {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    let token = line[..digits].parse().expect("command has no token");
    (token, line[digits..].to_string())
}

pub(crate) fn pair(options: ClientOptions) -> (ProtocolClient, Backend) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(near);
    let client = ProtocolClient::connect(reader, writer, options);
    let (far_reader, far_writer) = tokio::io::split(far);
    let backend = Backend {
        lines: BufReader::new(far_reader),
        out: far_writer,
        buf: String::new(),
    };
    (client, backend)
}

pub(crate) async fn wait_for_state(client: &ProtocolClient, want: ClientState) {
    let mut rx = client.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *rx.borrow_and_update() != want {
            rx.changed().await.expect("state channel closed");
        }
    })
    .await
    .expect("state not reached");
}
