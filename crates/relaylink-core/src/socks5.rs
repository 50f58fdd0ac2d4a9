//! SOCKS5 relay handshake
//!
//! The subset of SOCKS5 (RFC 1928) spoken to a bytestream relay:
//!
//! ```text
//! client -> relay   05 01 00                      version, 1 method, no-auth
//! relay  -> client  05 00                         version, chosen method
//! client -> relay   05 01 00 03 len digest 00 00  CONNECT, domain = digest, port 0
//! relay  -> client  05 00 00 03 len digest 00 00  echo with status 00
//! ```
//!
//! The digest only serves as a session key for the relay, so the port is
//! always zero and the reply is verified by comparing it with the request.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

use crate::candidate::CandidateHost;
use crate::error::{CandidateFailure, HandshakeError};

/// Protocol version byte
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required" method
pub const METHOD_NO_AUTH: u8 = 0x00;

/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;

/// Reserved byte, always zero
pub const RESERVED: u8 = 0x00;

/// Domain name address type
pub const ADDR_TYPE_DOMAIN: u8 = 0x03;

/// Reply status "succeeded"
pub const REPLY_SUCCEEDED: u8 = 0x00;

/// Fixed part of a request or reply: version, command/status, reserved, type, length
const MESSAGE_HEADER_LEN: usize = 5;

/// Build the CONNECT request carrying `digest` as the domain name
///
/// # Errors
///
/// Returns [`HandshakeError::AddressTooLong`] if the digest exceeds 255 bytes.
pub fn connect_request(digest: &str) -> Result<Vec<u8>, HandshakeError> {
    let address = digest.as_bytes();
    let len = u8::try_from(address.len()).map_err(|_| HandshakeError::AddressTooLong(address.len()))?;

    let mut request = Vec::with_capacity(MESSAGE_HEADER_LEN + address.len() + 2);
    request.extend_from_slice(&[SOCKS_VERSION, CMD_CONNECT, RESERVED, ADDR_TYPE_DOMAIN, len]);
    request.extend_from_slice(address);
    request.extend_from_slice(&[0x00, 0x00]);
    Ok(request)
}

/// Read one request or reply from `stream`
///
/// Only the domain name address type is accepted.
///
/// # Errors
///
/// Returns [`HandshakeError::UnsupportedAddressType`] for other address types
/// and [`HandshakeError::Io`] if the stream ends early.
pub async fn read_message<S>(stream: &mut S) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; MESSAGE_HEADER_LEN];
    stream.read_exact(&mut header).await?;

    if header[3] != ADDR_TYPE_DOMAIN {
        return Err(HandshakeError::UnsupportedAddressType(header[3]));
    }

    let address_len = header[4] as usize;
    let mut message = Vec::with_capacity(MESSAGE_HEADER_LEN + address_len + 2);
    message.extend_from_slice(&header);
    message.resize(MESSAGE_HEADER_LEN + address_len + 2, 0);
    stream.read_exact(&mut message[MESSAGE_HEADER_LEN..]).await?;
    Ok(message)
}

/// Negotiate with a relay over an already connected stream
///
/// On error the caller must drop (close) the stream; no retries happen here.
///
/// # Errors
///
/// Returns [`HandshakeError`] if the relay rejects the method, replies with a
/// status other than success, or the stream fails.
pub async fn establish<S>(stream: &mut S, digest: &str) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method selection: offer exactly "no authentication"
    stream
        .write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH])
        .await?;
    stream.flush().await?;

    let mut selection = [0u8; 2];
    stream.read_exact(&mut selection).await?;
    if selection[0] != SOCKS_VERSION {
        return Err(HandshakeError::UnsupportedVersion(selection[0]));
    }
    if selection[1] != METHOD_NO_AUTH {
        return Err(HandshakeError::MethodRejected(selection[1]));
    }

    let mut request = connect_request(digest)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let reply = read_message(stream).await?;

    // A successful reply echoes the request with status 0 in the command slot
    request[1] = REPLY_SUCCEEDED;
    if reply != request {
        return Err(HandshakeError::ReplyMismatch);
    }

    Ok(())
}

/// Connect to `host` and run the handshake, all within `budget`
///
/// The TCP connect and the handshake share one deadline. The connection is
/// closed on every failure path.
///
/// # Errors
///
/// Returns the [`CandidateFailure`] describing which step failed.
pub async fn connect(
    host: &CandidateHost,
    digest: &str,
    budget: Duration,
) -> Result<TcpStream, CandidateFailure> {
    let deadline = Instant::now() + budget;

    let mut stream = time::timeout_at(
        deadline,
        TcpStream::connect((host.address.as_str(), host.port)),
    )
    .await
    .map_err(|_| CandidateFailure::ConnectTimeout)?
    .map_err(CandidateFailure::Connect)?;

    match time::timeout_at(deadline, establish(&mut stream, digest)).await {
        Ok(Ok(())) => Ok(stream),
        Ok(Err(e)) => Err(CandidateFailure::Handshake(e)),
        Err(_) => Err(CandidateFailure::HandshakeTimeout),
    }
}
