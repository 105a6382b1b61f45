//! Async gob streams over a byte transport.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::decode::Decoder;
use super::encode::Encoder;
use super::error::{GobError, GobResult};
use super::types::{TypeId, WireType};
use super::value::Value;

/// Largest message accepted from a peer.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// A Rust type with a fixed gob representation.
pub trait GobMessage: Sized {
    /// Id this side uses for the type.
    const TYPE_ID: TypeId;

    /// Converts to a value tree for encoding.
    fn to_value(&self) -> Value;

    /// Converts from a decoded value tree.
    fn from_value(value: Value) -> GobResult<Self>;
}

/// A bidirectional gob stream: one encoder for what we write, one decoder
/// for what the peer writes.
#[derive(Debug)]
pub struct GobStream<S> {
    io: S,
    encoder: Encoder,
    decoder: Decoder,
    pending: Vec<u8>,
}

impl<S> GobStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a transport; `schema` lists the descriptors of every type we send.
    pub fn new(io: S, schema: impl IntoIterator<Item = WireType>) -> Self {
        Self {
            io,
            encoder: Encoder::new(schema),
            decoder: Decoder::new(),
            pending: Vec::new(),
        }
    }

    /// Queues a message; nothing is written until [`GobStream::flush`].
    pub fn queue<M: GobMessage>(&mut self, message: &M) -> GobResult<()> {
        let bytes = self.encoder.encode(M::TYPE_ID, &message.to_value())?;
        self.pending.extend_from_slice(&bytes);
        Ok(())
    }

    /// Writes every queued message.
    pub async fn flush(&mut self) -> GobResult<()> {
        if !self.pending.is_empty() {
            self.io.write_all(&self.pending).await?;
            self.pending.clear();
        }
        self.io.flush().await?;
        Ok(())
    }

    /// Reads the next value, consuming any type definitions before it.
    ///
    /// Returns `None` if the peer closed the stream between messages.
    pub async fn read_value(&mut self) -> GobResult<Option<(TypeId, Value)>> {
        loop {
            let Some(message) = read_message(&mut self.io).await? else {
                return Ok(None);
            };
            if let Some(value) = self.decoder.decode_message(&message)? {
                return Ok(Some(value));
            }
        }
    }

    /// Reads the next value as `M`; a closed stream is an error.
    pub async fn read<M: GobMessage>(&mut self) -> GobResult<M> {
        self.try_read().await?.ok_or(GobError::UnexpectedEof)
    }

    /// Reads the next value as `M`, or `None` if the peer closed the stream.
    pub async fn try_read<M: GobMessage>(&mut self) -> GobResult<Option<M>> {
        match self.read_value().await? {
            Some((_, value)) => M::from_value(value).map(Some),
            None => Ok(None),
        }
    }

    /// Gives the transport back.
    pub fn into_inner(self) -> S {
        self.io
    }
}

/// Reads one length-prefixed message.
///
/// Returns `None` on a clean end of stream before the first byte.
pub async fn read_message<R>(reader: &mut R) -> GobResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut first = [0_u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Ok(None);
    }

    let len = if first[0] < 0x80 {
        u64::from(first[0])
    } else {
        let count = usize::from(first[0].wrapping_neg());
        if count > 8 {
            return Err(GobError::corrupt(format!("message length with {count} bytes")));
        }
        let mut bytes = [0_u8; 8];
        read_exact(reader, &mut bytes[8 - count..]).await?;
        u64::from_be_bytes(bytes)
    };

    let size = usize::try_from(len)
        .ok()
        .filter(|size| *size <= MAX_MESSAGE_SIZE)
        .ok_or(GobError::MessageTooLarge {
            size: len,
            limit: MAX_MESSAGE_SIZE,
        })?;
    if size == 0 {
        return Err(GobError::corrupt("empty message"));
    }

    let mut message = vec![0_u8; size];
    read_exact(reader, &mut message).await?;
    Ok(Some(message))
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> GobResult<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(GobError::UnexpectedEof),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gob::encode::write_uint;
    use crate::gob::types::{FieldType, STRING};
    use crate::gob::value::FieldsExt;

    #[derive(Debug, PartialEq)]
    struct Greeting {
        text: String,
    }

    impl GobMessage for Greeting {
        const TYPE_ID: TypeId = 65;

        fn to_value(&self) -> Value {
            Value::structure([("Text", Value::String(self.text.clone()))])
        }

        fn from_value(value: Value) -> GobResult<Self> {
            let mut fields = value.into_fields()?;
            Ok(Self {
                text: fields.take_string("Text")?,
            })
        }
    }

    fn schema() -> Vec<WireType> {
        vec![WireType::structure(
            "Greeting",
            65,
            vec![FieldType::new("Text", STRING)],
        )]
    }

    #[tokio::test]
    async fn test_messages_cross_a_duplex_pipe() {
        let (left, right) = tokio::io::duplex(1024);
        let mut writer = GobStream::new(left, schema());
        let mut reader = GobStream::new(right, Vec::new());

        for text in ["hello", "again"] {
            writer
                .queue(&Greeting {
                    text: text.to_string(),
                })
                .unwrap();
        }
        writer.flush().await.unwrap();
        drop(writer);

        let first: Greeting = reader.read().await.unwrap();
        let second: Greeting = reader.read().await.unwrap();
        assert_eq!(first.text, "hello");
        assert_eq!(second.text, "again");
        assert!(reader.try_read::<Greeting>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let mut prefix = Vec::new();
        write_uint(&mut prefix, (MAX_MESSAGE_SIZE + 1) as u64);
        let mut input = prefix.as_slice();
        let err = read_message(&mut input).await.unwrap_err();
        assert!(matches!(err, GobError::MessageTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_stream_cut_inside_message() {
        let mut input: &[u8] = &[0x05, 0x01, 0x02];
        let err = read_message(&mut input).await.unwrap_err();
        assert!(matches!(err, GobError::UnexpectedEof));
    }
}
