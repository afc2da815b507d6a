//! TCP frame helpers shared by the bootstrap client and server.
//!
//! Requests reuse the datagram header; bodies are fixed-size per request
//! type.  Streamed entries are self-describing (`tag || len:u32 || body`)
//! because the tx and epoch payloads are variable-length; lists end with a
//! bare `not_a_block` / `not_an_epoch` tag.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use weave_net::message::{
    Message, MessageHeader, MessageType, NOT_AN_EPOCH_TERMINATOR, NOT_A_BLOCK_TERMINATOR,
};
use weave_net::NetError;
use weave_primitives::params::NetworkParams;
use weave_primitives::{Account, BlockHash, Buf32};
use weave_state::codec::{Reader, Writer};
use weave_state::{Block, BlockType, EpochBlock};

/// Default socket operation timeout.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest streamed entry body we accept.
const MAX_ENTRY_SIZE: usize = 1 << 20;

pub async fn with_timeout<T, F>(fut: F) -> Result<T, NetError>
where
    F: std::future::Future<Output = Result<T, NetError>>,
{
    timeout(IO_TIMEOUT, fut).await.map_err(|_| NetError::Timeout)?
}

/// Body size for each framed TCP request type.
fn request_body_size(message_type: MessageType) -> Option<usize> {
    Some(match message_type {
        MessageType::FrontierReq | MessageType::EpochReq => 32 + 4 + 4,
        MessageType::BulkPull | MessageType::EpochBulkPull => 64,
        MessageType::BulkPullBlocks => 32 + 32 + 1 + 4,
        MessageType::BulkPush | MessageType::EpochBulkPush => 0,
        _ => return None,
    })
}

pub async fn write_request<W: AsyncWrite + Unpin>(
    stream: &mut W,
    params: &NetworkParams,
    message: &Message,
) -> Result<(), NetError> {
    let bytes = message.serialize(params);
    with_timeout(async {
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok(())
    })
    .await
}

/// Reads one framed request off a server connection.
pub async fn read_request<R: AsyncRead + Unpin>(
    stream: &mut R,
    params: &NetworkParams,
) -> Result<Message, NetError> {
    let mut header_bytes = [0u8; 8];
    with_timeout(async {
        stream.read_exact(&mut header_bytes).await?;
        Ok(())
    })
    .await?;
    let mut r = Reader::new(&header_bytes);
    let header = MessageHeader::deserialize(params, &mut r).map_err(NetError::Parse)?;
    let body_size = request_body_size(header.message_type)
        .ok_or(NetError::Parse(weave_net::ParseStatus::InvalidMessageType))?;
    let mut body = vec![0u8; body_size];
    if body_size > 0 {
        with_timeout(async {
            stream.read_exact(&mut body).await?;
            Ok(())
        })
        .await?;
    }
    let mut r = Reader::new(&body);
    Message::deserialize_body(&header, &mut r).map_err(NetError::Parse)
}

pub async fn write_block_entry<W: AsyncWrite + Unpin>(
    stream: &mut W,
    block: &Block,
) -> Result<(), NetError> {
    let body = block.to_bytes();
    write_entry(stream, u8::from(block.block_type()), &body).await
}

pub async fn write_epoch_entry<W: AsyncWrite + Unpin>(
    stream: &mut W,
    epoch: &EpochBlock,
) -> Result<(), NetError> {
    write_entry(stream, BlockType::Epoch as u8, &epoch.to_bytes()).await
}

async fn write_entry<W: AsyncWrite + Unpin>(
    stream: &mut W,
    tag: u8,
    body: &[u8],
) -> Result<(), NetError> {
    let mut w = Writer::with_capacity(5 + body.len());
    w.write_u8(tag).write_u32_be(body.len() as u32).write_bytes(body);
    let bytes = w.into_bytes();
    with_timeout(async {
        stream.write_all(&bytes).await?;
        Ok(())
    })
    .await
}

pub async fn write_block_terminator<W: AsyncWrite + Unpin>(
    stream: &mut W,
) -> Result<(), NetError> {
    with_timeout(async {
        stream.write_all(&[NOT_A_BLOCK_TERMINATOR]).await?;
        stream.flush().await?;
        Ok(())
    })
    .await
}

pub async fn write_epoch_terminator<W: AsyncWrite + Unpin>(
    stream: &mut W,
) -> Result<(), NetError> {
    with_timeout(async {
        stream.write_all(&[NOT_AN_EPOCH_TERMINATOR]).await?;
        stream.flush().await?;
        Ok(())
    })
    .await
}

/// Reads one streamed block; `None` marks the end of the list.
pub async fn read_block_entry<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<Option<Block>, NetError> {
    let Some((tag, body)) = read_entry(stream, NOT_A_BLOCK_TERMINATOR).await? else {
        return Ok(None);
    };
    let block_type = BlockType::try_from(tag)
        .map_err(|_| NetError::Parse(weave_net::ParseStatus::InvalidPublishMessage))?;
    let block = Block::from_bytes(block_type, &body)
        .map_err(|_| NetError::Parse(weave_net::ParseStatus::InvalidPublishMessage))?;
    Ok(Some(block))
}

/// Reads one streamed epoch; `None` marks the end of the list.
pub async fn read_epoch_entry<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<Option<EpochBlock>, NetError> {
    let Some((tag, body)) = read_entry(stream, NOT_AN_EPOCH_TERMINATOR).await? else {
        return Ok(None);
    };
    if tag != BlockType::Epoch as u8 {
        return Err(NetError::Parse(
            weave_net::ParseStatus::InvalidEpochBulkPullMessage,
        ));
    }
    let epoch = EpochBlock::from_bytes(&body)
        .map_err(|_| NetError::Parse(weave_net::ParseStatus::InvalidEpochBulkPullMessage))?;
    Ok(Some(epoch))
}

async fn read_entry<R: AsyncRead + Unpin>(
    stream: &mut R,
    terminator: u8,
) -> Result<Option<(u8, Vec<u8>)>, NetError> {
    let mut tag = [0u8; 1];
    with_timeout(async {
        stream.read_exact(&mut tag).await?;
        Ok(())
    })
    .await?;
    if tag[0] == terminator {
        return Ok(None);
    }
    let mut len_bytes = [0u8; 4];
    with_timeout(async {
        stream.read_exact(&mut len_bytes).await?;
        Ok(())
    })
    .await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(NetError::Parse(weave_net::ParseStatus::InvalidHeader));
    }
    let mut body = vec![0u8; len];
    with_timeout(async {
        stream.read_exact(&mut body).await?;
        Ok(())
    })
    .await?;
    Ok(Some((tag[0], body)))
}

/// Frontier pairs are fixed-size; a zero pair ends the stream.
pub async fn write_frontier_pair<W: AsyncWrite + Unpin>(
    stream: &mut W,
    account: &Account,
    head: &BlockHash,
) -> Result<(), NetError> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(account.as_bytes());
    bytes[32..].copy_from_slice(head.as_bytes());
    with_timeout(async {
        stream.write_all(&bytes).await?;
        Ok(())
    })
    .await
}

pub async fn read_frontier_pair<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<Option<(Account, BlockHash)>, NetError> {
    let mut bytes = [0u8; 64];
    with_timeout(async {
        stream.read_exact(&mut bytes).await?;
        Ok(())
    })
    .await?;
    let account = Buf32::from_slice(&bytes[..32]).expect("32 bytes");
    let head = Buf32::from_slice(&bytes[32..]).expect("32 bytes");
    if account.is_zero() && head.is_zero() {
        return Ok(None);
    }
    Ok(Some((account, head)))
}

/// 32-byte entries for the epoch chain listing; zero ends the stream.
pub async fn write_hash_entry<W: AsyncWrite + Unpin>(
    stream: &mut W,
    hash: &Buf32,
) -> Result<(), NetError> {
    with_timeout(async {
        stream.write_all(hash.as_bytes()).await?;
        Ok(())
    })
    .await
}

pub async fn read_hash_entry<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<Option<Buf32>, NetError> {
    let mut bytes = [0u8; 32];
    with_timeout(async {
        stream.read_exact(&mut bytes).await?;
        Ok(())
    })
    .await?;
    let hash = Buf32(bytes);
    if hash.is_zero() {
        return Ok(None);
    }
    Ok(Some(hash))
}
