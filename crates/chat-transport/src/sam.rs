//! Client for the router's line-oriented control protocol.
//!
//! The anonymizing router exposes a SAM-style text protocol on a local TCP
//! port: every operation opens a control socket, greets the router with a
//! HELLO, issues one command, and reads one `RESULT=...` reply line. After
//! a successful `SESSION CREATE`, `STREAM CONNECT` or `STREAM ACCEPT` the
//! same socket becomes the session's control stream or the data stream.
//!
//! On an accepted stream the router writes the dialing peer's address as
//! one line before any peer data; `DEST GENERATE` replies carry the
//! printable address alongside the private key.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{LocalIdentity, StreamPair, Transport};

/// Transport implementation speaking the router's control protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamTransport;

impl SamTransport {
    pub fn new() -> Self {
        Self
    }

    /// Dials the router and performs the HELLO handshake.
    async fn open_control(
        &self,
        endpoint: SocketAddr,
    ) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
        let stream = TcpStream::connect(endpoint)
            .await
            .map_err(|e| Error::RouterConnectFailed(endpoint, e))?;
        let (read, write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut writer = write;

        send_command(&mut writer, "HELLO VERSION MIN=3.0 MAX=3.1").await?;
        let reply = read_reply(&mut reader).await?;
        match reply.get("RESULT").map(String::as_str) {
            Some("OK") => Ok((reader, writer)),
            _ => Err(Error::HandshakeFailed(format!("{reply:?}"))),
        }
    }
}

#[async_trait]
impl Transport for SamTransport {
    async fn new_identity(&self, endpoint: SocketAddr) -> Result<LocalIdentity> {
        let (mut reader, mut writer) = self.open_control(endpoint).await?;
        send_command(&mut writer, "DEST GENERATE SIGNATURE_TYPE=7").await?;
        let reply = read_reply(&mut reader).await?;

        let address = reply
            .get("ADDRESS")
            .cloned()
            .ok_or_else(|| Error::ProtocolError("DEST REPLY without ADDRESS".into()))?;
        let key = reply
            .get("PRIV")
            .cloned()
            .ok_or_else(|| Error::ProtocolError("DEST REPLY without PRIV".into()))?;

        debug!(%address, "generated local identity");
        Ok(LocalIdentity { key, address })
    }

    async fn create_session(
        &self,
        name: &str,
        identity: &LocalIdentity,
        endpoint: SocketAddr,
    ) -> Result<StreamPair> {
        let (mut reader, mut writer) = self.open_control(endpoint).await?;
        send_command(
            &mut writer,
            &format!(
                "SESSION CREATE STYLE=STREAM ID={name} DESTINATION={}",
                identity.key
            ),
        )
        .await?;
        let reply = read_reply(&mut reader).await?;
        check_result(&reply)?;

        debug!(session = name, "session created on the router");
        Ok((Box::new(reader), Box::new(writer)))
    }

    async fn accept_stream(&self, session_name: &str, endpoint: SocketAddr) -> Result<StreamPair> {
        let (mut reader, mut writer) = self.open_control(endpoint).await?;
        send_command(&mut writer, &format!("STREAM ACCEPT ID={session_name} SILENT=false")).await?;
        let reply = read_reply(&mut reader).await?;
        check_result(&reply)?;

        // The socket now waits for a dialing peer; the router will write
        // the peer's address line followed by the peer's data.
        Ok((Box::new(reader), Box::new(writer)))
    }

    async fn connect_stream(
        &self,
        session_name: &str,
        peer_address: &str,
        endpoint: SocketAddr,
    ) -> Result<StreamPair> {
        let (mut reader, mut writer) = self.open_control(endpoint).await?;
        send_command(
            &mut writer,
            &format!("STREAM CONNECT ID={session_name} DESTINATION={peer_address} SILENT=false"),
        )
        .await?;
        let reply = read_reply(&mut reader).await?;
        check_result(&reply)?;

        Ok((Box::new(reader), Box::new(writer)))
    }
}

async fn send_command(writer: &mut OwnedWriteHalf, command: &str) -> Result<()> {
    trace!(command, "router command");
    writer
        .write_all(format!("{command}\n").as_bytes())
        .await
        .map_err(Error::SendFailed)?;
    writer.flush().await.map_err(Error::SendFailed)?;
    Ok(())
}

async fn read_reply(reader: &mut BufReader<OwnedReadHalf>) -> Result<HashMap<String, String>> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(Error::ReceiveFailed)?;
    if read == 0 {
        return Err(Error::ProtocolError(
            "router closed the control stream".into(),
        ));
    }
    trace!(reply = line.trim_end(), "router reply");
    Ok(parse_reply(line.trim_end()))
}

/// Parses `VERB TOPIC KEY=VALUE ...` into its key/value pairs. Values may
/// be double-quoted; tokens without `=` are the verb and are skipped.
fn parse_reply(line: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for token in line.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            let value = value.trim_matches('"');
            params.insert(key.to_owned(), value.to_owned());
        }
    }
    params
}

fn check_result(reply: &HashMap<String, String>) -> Result<()> {
    match reply.get("RESULT").map(String::as_str) {
        Some("OK") => Ok(()),
        Some("INVALID_ID") => Err(Error::InvalidSessionId),
        Some("DUPLICATED_ID") => Err(Error::DuplicateSessionId),
        Some("CANT_REACH_PEER") | Some("TIMEOUT") => Err(Error::PeerUnreachable),
        Some("INVALID_KEY") => Err(Error::InvalidPeerAddress(
            reply.get("MESSAGE").cloned().unwrap_or_default(),
        )),
        other => Err(Error::ProtocolError(format!("RESULT={other:?}"))),
    }
}
