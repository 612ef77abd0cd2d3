//! Framed Envelope I/O

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::{Envelope, FrameHeader};
use crate::error::{Error, Result};

const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub async fn read_envelope<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    let len = header.length as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!("membership frame too large: {len} bytes")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::Protocol("membership frame checksum mismatch".into()));
    }

    Envelope::deserialize(&body).map_err(Error::Serialization)
}

pub async fn write_envelope<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    let body = envelope.serialize().map_err(Error::Serialization)?;
    let header = FrameHeader::new(&body);
    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
