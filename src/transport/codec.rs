//! Framing of messages on byte streams.
//!
//! Each message is written as one JSON object followed by a newline. The
//! decoder does not depend on the newline: it skips any whitespace between
//! objects (keepalive filler) and waits for more input while an object is
//! incomplete.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::Message;
use crate::utils::{Error, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Decoder for JsonCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        let Some(start) = src.iter().position(|b| !b.is_ascii_whitespace()) else {
            src.clear();
            return Ok(None);
        };
        src.advance(start);

        let (next, used) = {
            let mut values = serde_json::Deserializer::from_slice(&src[..]).into_iter::<Message>();
            let next = values.next();
            (next, values.byte_offset())
        };

        match next {
            Some(Ok(msg)) => {
                src.advance(used);
                Ok(Some(msg))
            }
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }
}

impl Encoder<Message> for JsonCodec {
    type Error = Error;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<()> {
        let data = serde_json::to_vec(&msg)?;
        dst.reserve(data.len() + 1);
        dst.extend_from_slice(&data);
        dst.put_u8(b'\n');
        Ok(())
    }
}
