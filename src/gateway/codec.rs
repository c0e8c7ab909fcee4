//! Line codec for the gateway control channel.
//!
//! Gateway commands are newline-separated UTF-8 fragments and every answer
//! is a single line. [`GatewayCodec`] wraps
//! [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving gateway cannot make the manager buffer without bound.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{GatewayError, Result};

/// Maximum answer length accepted from the gateway: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited codec for gateway commands and answers.
#[derive(Debug)]
pub struct GatewayCodec(LinesCodec);

impl GatewayCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for GatewayCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for GatewayCodec {
    type Item = String;
    type Error = GatewayError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for GatewayCodec {
    type Error = GatewayError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(err: LinesCodecError) -> GatewayError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            GatewayError::Channel(format!("line too long: exceeds {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io) => GatewayError::Io(io.to_string()),
    }
}
