//! WebSocket frame codec, RFC 6455 version 13.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Ws;

/// A frame's interpretation of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text payload.
    Text,
    /// Binary payload.
    Binary,
    /// Connection close.
    Close,
    /// Keep-alive probe.
    Ping,
    /// Keep-alive reply.
    Pong,
}

impl Opcode {
    fn from_u8(code: u8) -> crate::Result<Opcode> {
        match code {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(crate::Error::new_ws(Ws::Opcode)),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    /// Control frames may not be fragmented or carry large payloads.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// One wire frame. The payload is stored unmasked; `mask` records the key
/// a masked frame arrived with (or the key to apply when writing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment of its message.
    pub fin: bool,
    /// Payload interpretation.
    pub opcode: Opcode,
    /// Masking key. Client frames carry one; server frames must not.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// An unmasked, final frame.
    pub fn new(opcode: Opcode, payload: Bytes) -> Frame {
        Frame {
            fin: true,
            opcode,
            mask: None,
            payload,
        }
    }

    /// An unmasked close frame with an empty payload.
    pub fn close() -> Frame {
        Frame::new(Opcode::Close, Bytes::new())
    }

    /// Fails unless the frame arrived masked, as every client frame must.
    pub fn require_masked(&self) -> crate::Result<()> {
        if self.mask.is_some() {
            Ok(())
        } else {
            Err(crate::Error::new_ws(Ws::UnmaskedFrame))
        }
    }
}

/// Reads one frame, unmasking the payload if a mask is present.
///
/// `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<T>(io: &mut T) -> crate::Result<Option<Frame>>
where
    T: AsyncRead + Unpin,
{
    let first = match io.read_u8().await {
        Ok(byte) => byte,
        Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(crate::Error::new_io(err)),
    };
    let second = io.read_u8().await.map_err(crate::Error::new_io)?;

    let fin = first & 0x80 != 0;
    let opcode = Opcode::from_u8(first & 0x0F)?;
    let masked = second & 0x80 != 0;

    let len = match second & 0x7F {
        126 => u64::from(io.read_u16().await.map_err(crate::Error::new_io)?),
        127 => io.read_u64().await.map_err(crate::Error::new_io)?,
        len => u64::from(len),
    };
    if opcode.is_control() && len > 125 {
        return Err(crate::Error::new_ws(Ws::ControlTooLarge));
    }

    let mask = if masked {
        let mut key = [0u8; 4];
        io.read_exact(&mut key).await.map_err(crate::Error::new_io)?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    io.read_exact(&mut payload)
        .await
        .map_err(crate::Error::new_io)?;
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some(Frame {
        fin,
        opcode,
        mask,
        payload: Bytes::from(payload),
    }))
}

/// Writes one frame, applying `frame.mask` to the payload if present.
pub async fn write_frame<T>(io: &mut T, frame: &Frame) -> crate::Result<()>
where
    T: AsyncWrite + Unpin,
{
    let mut dst = BytesMut::with_capacity(frame.payload.len() + 14);

    let mut first = frame.opcode.as_u8();
    if frame.fin {
        first |= 0x80;
    }
    dst.put_u8(first);

    let mask_bit = if frame.mask.is_some() { 0x80 } else { 0 };
    let len = frame.payload.len();
    if len < 126 {
        dst.put_u8(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        dst.put_u8(mask_bit | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(mask_bit | 127);
        dst.put_u64(len as u64);
    }

    match frame.mask {
        Some(key) => {
            dst.put_slice(&key);
            let mut payload = frame.payload.to_vec();
            apply_mask(&mut payload, key);
            dst.put_slice(&payload);
        }
        None => dst.put_slice(&frame.payload),
    }

    io.write_all(&dst).await.map_err(crate::Error::new_io)?;
    io.flush().await.map_err(crate::Error::new_io)?;
    Ok(())
}

fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[index % 4];
    }
}
