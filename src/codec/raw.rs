//! Lossless in-memory codec for tests.

use super::{CodecInfo, TileCodec};
use crate::error::{Result, TilerError};
use crate::PixelBuffer;

/// Stores the pixels verbatim behind a width/height header.
///
/// Tiles whose top-left pixel equals `fail_on` fail to encode; tiles whose
/// top-left pixel equals `panic_on` panic.
#[derive(Debug, Default)]
pub(crate) struct RawCodec {
    pub fail_on: Option<[u8; 3]>,
    pub panic_on: Option<[u8; 3]>,
}

impl TileCodec for RawCodec {
    fn encode(&self, buffer: &PixelBuffer, _distance: f32, _effort: u8) -> Result<Vec<u8>> {
        if buffer.width > 0 && buffer.height > 0 {
            let first = buffer.pixel(0, 0);
            if self.fail_on == Some(first) {
                return Err(TilerError::Encode("encoder rejected tile".into()));
            }
            if self.panic_on == Some(first) {
                panic!("encoder crashed");
            }
        }
        let mut out = Vec::with_capacity(8 + buffer.raw_bytes() as usize);
        out.extend_from_slice(&buffer.width.to_le_bytes());
        out.extend_from_slice(&buffer.height.to_le_bytes());
        for y in 0..buffer.height as usize {
            out.extend_from_slice(buffer.row(y));
        }
        Ok(out)
    }

    fn decode(&self, data: &[u8]) -> Result<PixelBuffer> {
        if data.len() < 8 {
            return Err(TilerError::Decode("truncated header".into()));
        }
        let width = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        PixelBuffer::new(width, height, data[8..].to_vec())
            .map_err(|e| TilerError::Decode(e.to_string()))
    }

    fn info(&self) -> CodecInfo {
        CodecInfo {
            name: "raw",
            extension: "raw",
        }
    }
}
