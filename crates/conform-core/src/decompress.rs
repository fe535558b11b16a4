//! Chunked xz decompression
//!
//! Archives are read through a [`ChunkSource`] in fixed-size compressed
//! chunks and fed into one incremental xz decoder, so a blob is never held
//! in memory as a whole. [`DecompressedStream`] turns the decoder output
//! into UTF-8 text pieces, one per downloaded chunk.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use xz2::stream::{Action, Status, Stream};

use crate::error::DecompressionError;
use crate::store::StoreResult;

/// Compressed bytes requested per download
pub const DEFAULT_CHUNK_SIZE: usize = 256_000;

/// Memory the xz decoder may allocate
pub const DECODER_MEMLIMIT: u64 = 52_428_800;

/// Content type of archives that get validated
pub const XZ_CONTENT_TYPE: &str = "application/x-xz";

const OUTPUT_STEP: usize = 1 << 20;

/// Non-JSON text ahead of the first array of objects, never spanning an object
static PREAMBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^{]*?\[\{").expect("preamble pattern is valid"));

/// Sequential reader of compressed chunks
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk, `None` once the object is exhausted
    async fn next_chunk(&mut self) -> StoreResult<Option<Vec<u8>>>;
}

/// Chunks cut from an in-memory buffer
#[derive(Debug)]
pub struct MemoryChunks {
    data: Vec<u8>,
    chunk_size: usize,
    offset: usize,
}

impl MemoryChunks {
    pub fn new(data: Vec<u8>, chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size: chunk_size.max(1),
            offset: 0,
        }
    }
}

#[async_trait]
impl ChunkSource for MemoryChunks {
    async fn next_chunk(&mut self) -> StoreResult<Option<Vec<u8>>> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }
}

/// Incremental single-stream xz decoder
pub struct XzChunkDecoder {
    stream: Stream,
    ended: bool,
}

impl XzChunkDecoder {
    pub fn new() -> Result<Self, DecompressionError> {
        Ok(Self {
            stream: Stream::new_stream_decoder(DECODER_MEMLIMIT, 0)?,
            ended: false,
        })
    }

    /// True once the end of the xz stream was reached
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Decompress one chunk, returning whatever output it produced
    ///
    /// Input past the end of the xz stream is ignored.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<u8>, DecompressionError> {
        let mut output = Vec::with_capacity(OUTPUT_STEP);
        let mut consumed = 0usize;

        while !self.ended {
            if output.capacity() == output.len() {
                output.reserve(OUTPUT_STEP);
            }
            let in_before = self.stream.total_in();
            let out_before = output.len();

            let status = self
                .stream
                .process_vec(&input[consumed..], &mut output, Action::Run)?;
            consumed += (self.stream.total_in() - in_before) as usize;

            match status {
                Status::StreamEnd => self.ended = true,
                Status::MemNeeded => break,
                Status::Ok | Status::GetCheck => {}
            }

            let progressed =
                self.stream.total_in() != in_before || output.len() != out_before;
            if !progressed || (consumed >= input.len() && output.len() < output.capacity()) {
                break;
            }
        }

        Ok(output)
    }

    /// Flush the decoder after the last chunk
    ///
    /// Fails when the compressed stream stopped before its end marker.
    pub fn finish(&mut self) -> Result<Vec<u8>, DecompressionError> {
        let mut output = Vec::with_capacity(OUTPUT_STEP);
        while !self.ended {
            if output.capacity() == output.len() {
                output.reserve(OUTPUT_STEP);
            }
            let out_before = output.len();
            match self.stream.process_vec(&[], &mut output, Action::Finish)? {
                Status::StreamEnd => self.ended = true,
                _ if output.len() == out_before => {
                    return Err(DecompressionError::Codec(
                        "compressed data ended before the end of the xz stream".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Ok(output)
    }
}

/// Decompressed text of one archive, produced chunk by chunk
pub struct DecompressedStream {
    source: Box<dyn ChunkSource>,
    decoder: XzChunkDecoder,
    pending_utf8: Vec<u8>,
    preamble_stripped: bool,
    exhausted: bool,
    produced_bytes: u64,
}

impl DecompressedStream {
    pub fn new(source: Box<dyn ChunkSource>) -> Result<Self, DecompressionError> {
        Ok(Self {
            source,
            decoder: XzChunkDecoder::new()?,
            pending_utf8: Vec::new(),
            preamble_stripped: false,
            exhausted: false,
            produced_bytes: 0,
        })
    }

    /// Text decoded from the next compressed chunk
    ///
    /// The first non-empty text has everything before the first `[{`
    /// removed. A multi-byte character split across chunks is held back
    /// until its remaining bytes arrive. Returns `None` at the end.
    pub async fn next_text(&mut self) -> Result<Option<String>, DecompressionError> {
        if self.exhausted {
            return Ok(None);
        }

        let (bytes, last) = match self.source.next_chunk().await? {
            Some(chunk) => (self.decoder.feed(&chunk)?, false),
            None => {
                self.exhausted = true;
                (self.decoder.finish()?, true)
            }
        };
        self.produced_bytes += bytes.len() as u64;

        let mut text = self.decode(bytes, last)?;
        if last && text.is_empty() {
            return Ok(None);
        }
        if !self.preamble_stripped && !text.is_empty() {
            self.preamble_stripped = true;
            text = PREAMBLE.replace(&text, "[{").into_owned();
        }
        Ok(Some(text))
    }

    /// Decompressed bytes produced since the last call
    pub fn take_produced_bytes(&mut self) -> u64 {
        std::mem::take(&mut self.produced_bytes)
    }

    fn decode(&mut self, bytes: Vec<u8>, last: bool) -> Result<String, DecompressionError> {
        let mut buffer = std::mem::take(&mut self.pending_utf8);
        buffer.extend_from_slice(&bytes);

        match String::from_utf8(buffer) {
            Ok(text) => Ok(text),
            Err(err) => {
                let utf8 = err.utf8_error();
                // An incomplete sequence at the very end may still be completed
                if utf8.error_len().is_some() || last {
                    return Err(DecompressionError::InvalidUtf8(utf8.to_string()));
                }
                let valid = utf8.valid_up_to();
                let mut buffer = err.into_bytes();
                self.pending_utf8 = buffer.split_off(valid);
                String::from_utf8(buffer)
                    .map_err(|e| DecompressionError::InvalidUtf8(e.utf8_error().to_string()))
            }
        }
    }
}

/// Decompress a whole xz buffer at once
pub fn decompress_all(data: &[u8]) -> Result<Vec<u8>, DecompressionError> {
    let mut decoder = XzChunkDecoder::new()?;
    let mut output = decoder.feed(data)?;
    output.extend(decoder.finish()?);
    Ok(output)
}
