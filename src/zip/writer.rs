//! Forward-only streaming ZIP writer
//!
//! Compresses entry payloads on the fly and never seeks: sizes and CRCs go
//! into a data descriptor after each payload, and the central directory is
//! assembled in memory and emitted after the last entry.

use super::{
    CENTRAL_DIRECTORY_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE,
    END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE, METHOD_DEFLATE,
};
use crate::chunks::ByteChunk;
use crate::error::{Result, XlsxError};
use crc32fast::Hasher as Crc32;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::io::Write;

/// Entry recorded for the central directory
struct ZipEntryRecord {
    name: String,
    local_header_offset: u64,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
}

/// Writer that counts bytes and computes CRC-32 of the uncompressed stream
/// while the compressed stream goes to the sink
struct CrcCountingWriter<W: Write> {
    sink: W,
    crc: Crc32,
    uncompressed_count: u64,
    compressed_count: u64,
    position: u64,
}

impl<W: Write> CrcCountingWriter<W> {
    fn new(sink: W) -> Self {
        CrcCountingWriter {
            sink,
            crc: Crc32::new(),
            uncompressed_count: 0,
            compressed_count: 0,
            position: 0,
        }
    }

    fn reset_entry(&mut self) {
        self.crc = Crc32::new();
        self.uncompressed_count = 0;
        self.compressed_count = 0;
    }
}

impl<W: Write> Write for CrcCountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.sink.write(buf)?;
        self.compressed_count += n as u64;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }
}

enum EntryState<W: Write> {
    Idle(CrcCountingWriter<W>),
    Open(DeflateEncoder<CrcCountingWriter<W>>),
    // Transient state while an encoder is being opened or closed
    Poisoned,
}

/// Streaming ZIP writer over any forward-only sink.
pub struct ZipWriter<W: Write> {
    state: EntryState<W>,
    entries: Vec<ZipEntryRecord>,
    names: HashSet<String>,
    current_name: Option<(String, u64)>,
    compression: Compression,
}

impl<W: Write> ZipWriter<W> {
    pub fn new(sink: W) -> Self {
        Self::with_compression_level(sink, 6)
    }

    pub fn with_compression_level(sink: W, level: u32) -> Self {
        ZipWriter {
            state: EntryState::Idle(CrcCountingWriter::new(sink)),
            entries: Vec::new(),
            names: HashSet::new(),
            current_name: None,
            compression: Compression::new(level.min(9)),
        }
    }

    /// Start a new entry. Finishes the previous entry if one is open.
    pub fn start_entry(&mut self, name: &str) -> Result<()> {
        self.finish_current_entry()?;
        if !self.names.insert(name.to_string()) {
            return Err(XlsxError::DuplicateEntry(name.to_string()));
        }

        let EntryState::Idle(mut sink) = std::mem::replace(&mut self.state, EntryState::Poisoned)
        else {
            unreachable!("entry already finished");
        };
        let local_header_offset = sink.position;

        // Local file header with the data-descriptor flag (bit 3): sizes and
        // CRC are zero here and follow the payload.
        sink.write_all(&LOCAL_FILE_HEADER_SIGNATURE.to_le_bytes())?;
        sink.write_all(&[20, 0])?; // version needed
        sink.write_all(&[8, 0])?; // general purpose bit flag
        sink.write_all(&METHOD_DEFLATE.to_le_bytes())?;
        sink.write_all(&[0, 0, 0, 0])?; // mod time/date
        sink.write_all(&0u32.to_le_bytes())?; // crc32 placeholder
        sink.write_all(&0u32.to_le_bytes())?; // compressed size placeholder
        sink.write_all(&0u32.to_le_bytes())?; // uncompressed size placeholder
        sink.write_all(&(name.len() as u16).to_le_bytes())?;
        sink.write_all(&0u16.to_le_bytes())?; // extra len
        sink.write_all(name.as_bytes())?;

        sink.reset_entry();
        self.state = EntryState::Open(DeflateEncoder::new(sink, self.compression));
        self.current_name = Some((name.to_string(), local_header_offset));
        Ok(())
    }

    /// Write uncompressed payload bytes to the open entry.
    pub fn write_data(&mut self, data: &[u8]) -> Result<()> {
        let EntryState::Open(encoder) = &mut self.state else {
            return Err(XlsxError::Io(std::io::Error::other(
                "no archive entry started",
            )));
        };
        encoder.get_mut().crc.update(data);
        encoder.get_mut().uncompressed_count += data.len() as u64;
        encoder.write_all(data)?;
        Ok(())
    }

    /// Add a whole entry from a chunk stream.
    pub fn add_entry<I>(&mut self, name: &str, chunks: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<ByteChunk>>,
    {
        self.start_entry(name)?;
        for chunk in chunks {
            self.write_data(&chunk?)?;
        }
        Ok(())
    }

    fn finish_current_entry(&mut self) -> Result<()> {
        if !matches!(self.state, EntryState::Open(_)) {
            return Ok(());
        }
        let EntryState::Open(encoder) = std::mem::replace(&mut self.state, EntryState::Poisoned)
        else {
            unreachable!();
        };
        let mut sink = encoder.finish()?;

        let crc = sink.crc.clone().finalize();
        let compressed_size = sink.compressed_count;
        let uncompressed_size = sink.uncompressed_count;
        if compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64 {
            return Err(XlsxError::UnsupportedFeature("zip64 entry sizes on write"));
        }

        sink.write_all(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes())?;
        sink.write_all(&crc.to_le_bytes())?;
        sink.write_all(&(compressed_size as u32).to_le_bytes())?;
        sink.write_all(&(uncompressed_size as u32).to_le_bytes())?;
        self.state = EntryState::Idle(sink);

        let (name, local_header_offset) = self
            .current_name
            .take()
            .expect("open entry always has a name");
        self.entries.push(ZipEntryRecord {
            name,
            local_header_offset,
            crc32: crc,
            compressed_size,
            uncompressed_size,
        });
        Ok(())
    }

    /// Emit the central directory and end record, then return the sink.
    pub fn finish(mut self) -> Result<W> {
        self.finish_current_entry()?;
        let EntryState::Idle(mut sink) = std::mem::replace(&mut self.state, EntryState::Poisoned)
        else {
            unreachable!("finish_current_entry left the writer idle");
        };

        let central_dir_offset = sink.position;
        for entry in &self.entries {
            if entry.local_header_offset > u32::MAX as u64 {
                return Err(XlsxError::UnsupportedFeature("zip64 offsets on write"));
            }
            sink.write_all(&CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
            sink.write_all(&[20, 0])?; // version made by
            sink.write_all(&[20, 0])?; // version needed
            sink.write_all(&[8, 0])?; // general purpose bit flag
            sink.write_all(&METHOD_DEFLATE.to_le_bytes())?;
            sink.write_all(&[0, 0, 0, 0])?; // mod time/date
            sink.write_all(&entry.crc32.to_le_bytes())?;
            sink.write_all(&(entry.compressed_size as u32).to_le_bytes())?;
            sink.write_all(&(entry.uncompressed_size as u32).to_le_bytes())?;
            sink.write_all(&(entry.name.len() as u16).to_le_bytes())?;
            sink.write_all(&0u16.to_le_bytes())?; // extra len
            sink.write_all(&0u16.to_le_bytes())?; // comment len
            sink.write_all(&0u16.to_le_bytes())?; // disk number start
            sink.write_all(&0u16.to_le_bytes())?; // internal attrs
            sink.write_all(&0u32.to_le_bytes())?; // external attrs
            sink.write_all(&(entry.local_header_offset as u32).to_le_bytes())?;
            sink.write_all(entry.name.as_bytes())?;
        }
        let central_dir_size = sink.position - central_dir_offset;

        sink.write_all(&END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes())?;
        sink.write_all(&0u16.to_le_bytes())?; // disk number
        sink.write_all(&0u16.to_le_bytes())?; // disk with central dir
        sink.write_all(&(self.entries.len() as u16).to_le_bytes())?;
        sink.write_all(&(self.entries.len() as u16).to_le_bytes())?;
        sink.write_all(&(central_dir_size as u32).to_le_bytes())?;
        sink.write_all(&(central_dir_offset as u32).to_le_bytes())?;
        sink.write_all(&0u16.to_le_bytes())?; // comment len
        sink.flush()?;
        Ok(sink.sink)
    }
}

/// Writing to the `ZipWriter` itself appends to the open entry, which lets
/// XML writers sit directly on top of the archive.
impl<W: Write> Write for ZipWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_data(buf)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::string_to_chunks;
    use crate::zip::reader::ZipReader;
    use std::io::Cursor;

    #[test]
    fn test_write_then_read_back() {
        let mut writer = ZipWriter::new(Vec::new());
        writer
            .add_entry("hello.txt", string_to_chunks("hello zip"))
            .unwrap();
        writer
            .add_entry("dir/other.txt", string_to_chunks("second entry"))
            .unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.entries().len(), 2);
        assert_eq!(reader.read_entry("hello.txt").unwrap(), b"hello zip");
        assert_eq!(reader.read_entry("dir/other.txt").unwrap(), b"second entry");
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.start_entry("a.xml").unwrap();
        assert!(matches!(
            writer.start_entry("a.xml"),
            Err(XlsxError::DuplicateEntry(_))
        ));
    }

    #[test]
    fn test_empty_entry() {
        let mut writer = ZipWriter::new(Vec::new());
        writer.start_entry("empty").unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read_entry("empty").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_large_payload_roundtrip() {
        let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut writer = ZipWriter::new(Vec::new());
        writer.start_entry("big.bin").unwrap();
        writer.write_data(&payload).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = ZipReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read_entry("big.bin").unwrap(), payload);
    }
}
