//! Client side of the Bolt handshake.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::version::describe_raw;
use super::{BoltVersion, HandshakeError, BOLT_MAGIC, HANDSHAKE_SIZE};
use crate::bolt::error::{BoltError, BoltResult};

/// Number of minor versions covered below the newest proposal (5.4 down to 5.1).
const PROPOSAL_RANGE: u8 = 3;

/// Build the 20 bytes the client sends: magic plus four version words.
///
/// The first word proposes the whole supported range; the other three are empty.
pub fn client_handshake() -> [u8; HANDSHAKE_SIZE] {
    let mut data = [0u8; HANDSHAKE_SIZE];
    data[0..4].copy_from_slice(&BOLT_MAGIC);
    let proposal = BoltVersion::ALL[0].range_proposal(PROPOSAL_RANGE);
    data[4..8].copy_from_slice(&proposal.to_be_bytes());
    data
}

/// Interpret the server's 4-byte answer.
pub fn interpret_response(raw: u32) -> BoltResult<BoltVersion> {
    if raw == BoltVersion::NO_VERSION {
        return Err(HandshakeError::NoCompatibleVersion.into());
    }
    if raw == BoltVersion::HTTP {
        return Err(HandshakeError::InvalidData(
            "Server responded HTTP. Make sure you are not trying to connect to the http endpoint \
             (HTTP defaults to port 7474 whereas BOLT defaults to port 7687)"
                .to_string(),
        )
        .into());
    }
    BoltVersion::from_raw(raw).ok_or(BoltError::UnsupportedVersion(raw))
}

/// Perform the handshake over a freshly connected stream.
pub async fn negotiate<S>(stream: &mut S, timeout: Duration) -> BoltResult<BoltVersion>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::time::timeout(timeout, exchange(stream)).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout.into()),
    }
}

async fn exchange<S>(stream: &mut S) -> BoltResult<BoltVersion>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("C: [Bolt Handshake] {:02X?}", &client_handshake()[4..8]);
    stream.write_all(&client_handshake()).await?;
    stream.flush().await?;

    let mut answer = [0u8; 4];
    if let Err(e) = stream.read_exact(&mut answer).await {
        return Err(match e.kind() {
            std::io::ErrorKind::UnexpectedEof => HandshakeError::ConnectionClosed.into(),
            _ => BoltError::Io(e),
        });
    }

    let raw = u32::from_be_bytes(answer);
    debug!("S: [Bolt Handshake] {}", describe_raw(raw));
    interpret_response(raw)
}
