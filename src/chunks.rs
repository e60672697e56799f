//! Byte-chunk streams and adapters
//!
//! Every layer of the codec moves data as a lazy pull-sequence of byte
//! buffers: archive payloads are inflated chunk by chunk, the XML tokenizer
//! consumes chunks, and sinks receive chunks as they are produced. A chunk
//! stream is any `Iterator<Item = Result<ByteChunk>>`; delivered chunks are
//! never empty.

use crate::error::{Result, XlsxError};
use std::io::Read;

/// A single owned buffer handed from producer to consumer.
pub type ByteChunk = Vec<u8>;

/// Chunk size used when adapting readers into chunk streams.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Emit a string's UTF-8 encoding as a single chunk.
///
/// The empty string produces an empty stream.
pub fn string_to_chunks(text: &str) -> impl Iterator<Item = Result<ByteChunk>> {
    buffer_to_chunks(text.as_bytes().to_vec())
}

/// Emit a buffer as a single chunk. Empty buffers produce an empty stream.
pub fn buffer_to_chunks(buffer: Vec<u8>) -> impl Iterator<Item = Result<ByteChunk>> {
    let chunk = if buffer.is_empty() { None } else { Some(Ok(buffer)) };
    chunk.into_iter()
}

/// Concatenate a chunk stream into one contiguous buffer.
pub fn chunks_to_buffer<I>(chunks: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = Result<ByteChunk>>,
{
    let mut buffer = Vec::new();
    for chunk in chunks {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer)
}

/// Concatenate a chunk stream and decode it as UTF-8.
pub fn chunks_to_string<I>(chunks: I) -> Result<String>
where
    I: IntoIterator<Item = Result<ByteChunk>>,
{
    let buffer = chunks_to_buffer(chunks)?;
    String::from_utf8(buffer).map_err(|_| XlsxError::DecodeError("chunk stream"))
}

/// Adapts any [`Read`] into a chunk stream with [`CHUNK_SIZE`] buffers.
pub struct ReadChunks<R: Read> {
    reader: R,
    done: bool,
}

impl<R: Read> ReadChunks<R> {
    pub fn new(reader: R) -> Self {
        ReadChunks {
            reader,
            done: false,
        }
    }
}

impl<R: Read> Iterator for ReadChunks<R> {
    type Item = Result<ByteChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    chunk.truncate(n);
                    return Some(Ok(chunk));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_roundtrip() {
        let text = "héllo, wörld";
        let back = chunks_to_string(string_to_chunks(text)).unwrap();
        assert_eq!(back, text);
    }

    #[test]
    fn test_buffer_roundtrip() {
        let buffer = vec![0u8, 1, 2, 255, 254];
        let back = chunks_to_buffer(buffer_to_chunks(buffer.clone())).unwrap();
        assert_eq!(back, buffer);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert_eq!(string_to_chunks("").count(), 0);
        assert_eq!(buffer_to_chunks(Vec::new()).count(), 0);
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let result = chunks_to_string(buffer_to_chunks(vec![0xff, 0xfe]));
        assert!(matches!(result, Err(XlsxError::DecodeError(_))));
    }

    #[test]
    fn test_read_chunks_drains_reader() {
        let data = vec![7u8; CHUNK_SIZE + 100];
        let chunks: Vec<_> = ReadChunks::new(&data[..])
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), CHUNK_SIZE);
        assert_eq!(chunks[1].len(), 100);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }
}
