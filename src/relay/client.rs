// Chat client: a peer that speaks the same wire contract as the server

use crate::relay::session::MAX_RELAYED;
use crate::relay::tls;
use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// A connected, named chat client
pub struct ChatClient {
    stream: TlsStream<TcpStream>,
}

impl ChatClient {
    /// Connect, complete the TLS handshake and declare `name`
    pub async fn connect(
        host: &str,
        port: u16,
        name: &str,
        connector: &TlsConnector,
    ) -> Result<Self> {
        let tcp = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;

        let server_name = tls::server_name(host)?;
        let stream = connector
            .connect(server_name, tcp)
            .await
            .context("TLS handshake with server failed")?;

        tracing::debug!("Connected to server at {}:{}", host, port);

        let mut client = Self { stream };
        client.send(name.as_bytes()).await.context("Failed to send name")?;
        Ok(client)
    }

    /// Send one payload
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive whatever the server sent next. `None` once the server closed.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_RELAYED];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    /// Close the connection cleanly
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Relay between the user and the server until either side is done.
    ///
    /// Every non-empty line of `input` is sent as one payload. Everything
    /// the server sends is written to `output`, one payload per line.
    pub async fn pump<I, O>(self, input: I, mut output: O) -> Result<()>
    where
        I: AsyncBufRead + Unpin,
        O: AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(self.stream);

        let read_task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_RELAYED];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        tracing::info!("Connection closed by server");
                        break;
                    }
                    Ok(n) => {
                        let written = async {
                            output.write_all(&buf[..n]).await?;
                            output.write_all(b"\n").await?;
                            output.flush().await
                        }
                        .await;
                        if written.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading from server: {}", e);
                        break;
                    }
                }
            }
        });

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await.context("Failed to read input")? {
            if line.is_empty() {
                continue;
            }
            if let Err(e) = async {
                writer.write_all(line.as_bytes()).await?;
                writer.flush().await
            }
            .await
            {
                tracing::error!("Error sending message: {}", e);
                break;
            }
        }

        // The server closes its side once it sees ours go away
        let _ = writer.shutdown().await;
        let _ = read_task.await;

        Ok(())
    }
}
