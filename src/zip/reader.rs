//! Streaming ZIP reader
//!
//! Parses the central directory of a seekable byte source up front and
//! exposes each entry as an on-demand chunk stream of its inflated payload.
//! Payloads are CRC-checked as they drain.

use super::{
    CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE,
    METHOD_DEFLATE, METHOD_STORED, ZIP64_EOCD_LOCATOR_SIGNATURE, ZIP64_EOCD_SIGNATURE,
    ZIP64_SENTINEL,
};
use crate::chunks::{ByteChunk, CHUNK_SIZE};
use crate::error::{Result, XlsxError};
use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use std::io::{Read, Seek, SeekFrom, Take};

/// EOCD record length plus the maximum archive comment length.
const EOCD_SEARCH_SPAN: u64 = 22 + 65_535;

/// Entry in the ZIP central directory
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub header_offset: u64,
    /// Modification time in raw DOS (time, date) form
    pub modified: (u16, u16),
}

/// Archive reader over any seekable byte source.
pub struct ZipReader<R: Read + Seek> {
    source: R,
    entries: Vec<ZipEntry>,
}

impl<R: Read + Seek> ZipReader<R> {
    /// Parse the central directory of the archive.
    pub fn new(mut source: R) -> Result<Self> {
        let entries = read_central_directory(&mut source)?;
        Ok(ZipReader { source, entries })
    }

    /// All entries in central-directory order.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    /// Find an entry by name.
    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Whether the archive contains an entry of this name.
    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Open an entry as a chunk stream of its decompressed payload.
    ///
    /// May be called repeatedly for the same entry; every call restarts
    /// from the entry's first byte.
    pub fn entry_chunks(&mut self, name: &str) -> Result<EntryChunks<'_, R>> {
        let entry = self
            .entry(name)
            .ok_or_else(|| XlsxError::EntryNotFound(name.to_string()))?
            .clone();
        self.seek_to_payload(&entry)?;

        let bounded = (&mut self.source).take(entry.compressed_size);
        let decoder = match entry.method {
            METHOD_STORED => EntryDecoder::Stored(bounded),
            METHOD_DEFLATE => EntryDecoder::Deflate(DeflateDecoder::new(bounded)),
            other => return Err(XlsxError::UnsupportedCompression(other)),
        };
        Ok(EntryChunks {
            decoder,
            crc: Crc32::new(),
            produced: 0,
            entry,
            done: false,
        })
    }

    /// Read a whole entry into memory.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        crate::chunks::chunks_to_buffer(self.entry_chunks(name)?)
    }

    /// Position the source at the first payload byte of the entry.
    fn seek_to_payload(&mut self, entry: &ZipEntry) -> Result<()> {
        self.source.seek(SeekFrom::Start(entry.header_offset))?;
        let signature = read_u32(&mut self.source)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(XlsxError::CorruptArchive(format!(
                "bad local header signature for '{}'",
                entry.name
            )));
        }
        // Version, flags, method, mod time/date, CRC, sizes: the central
        // directory already told us everything; only the variable-length
        // name and extra field matter here.
        self.source.seek(SeekFrom::Current(22))?;
        let name_len = read_u16(&mut self.source)? as i64;
        let extra_len = read_u16(&mut self.source)? as i64;
        self.source.seek(SeekFrom::Current(name_len + extra_len))?;
        Ok(())
    }
}

enum EntryDecoder<'a, R: Read + Seek> {
    Stored(Take<&'a mut R>),
    Deflate(DeflateDecoder<Take<&'a mut R>>),
}

impl<R: Read + Seek> Read for EntryDecoder<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            EntryDecoder::Stored(r) => r.read(buf),
            EntryDecoder::Deflate(r) => r.read(buf),
        }
    }
}

/// Lazy chunk stream over one entry's decompressed payload.
///
/// The CRC-32 of the inflated bytes is accumulated while draining and
/// checked against the central directory when the stream ends.
pub struct EntryChunks<'a, R: Read + Seek> {
    decoder: EntryDecoder<'a, R>,
    crc: Crc32,
    produced: u64,
    entry: ZipEntry,
    done: bool,
}

impl<R: Read + Seek> EntryChunks<'_, R> {
    fn finish(&mut self) -> Result<()> {
        self.done = true;
        if self.produced != self.entry.uncompressed_size {
            return Err(XlsxError::CorruptArchive(format!(
                "entry '{}' inflated to {} bytes, expected {}",
                self.entry.name, self.produced, self.entry.uncompressed_size
            )));
        }
        let crc = std::mem::take(&mut self.crc).finalize();
        if crc != self.entry.crc32 {
            return Err(XlsxError::CorruptArchive(format!(
                "CRC mismatch in entry '{}'",
                self.entry.name
            )));
        }
        Ok(())
    }
}

impl<R: Read + Seek> Iterator for EntryChunks<'_, R> {
    type Item = Result<ByteChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match self.decoder.read(&mut chunk) {
                Ok(0) => {
                    return match self.finish() {
                        Ok(()) => None,
                        Err(e) => Some(Err(e)),
                    };
                }
                Ok(n) => {
                    chunk.truncate(n);
                    self.crc.update(&chunk);
                    self.produced += n as u64;
                    return Some(Ok(chunk));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(XlsxError::CorruptArchive(format!(
                        "entry '{}': {}",
                        self.entry.name, e
                    ))));
                }
            }
        }
    }
}

fn read_central_directory<R: Read + Seek>(source: &mut R) -> Result<Vec<ZipEntry>> {
    let (eocd_offset, tail, tail_start) = find_eocd(source)?;
    let eocd = &tail[(eocd_offset - tail_start) as usize..];

    let mut total_entries = u16_at(eocd, 10) as u64;
    let mut cd_offset = u32_at(eocd, 16) as u64;
    let disk_number = u16_at(eocd, 4);
    let cd_disk = u16_at(eocd, 6);
    if disk_number != 0 || cd_disk != 0 {
        return Err(XlsxError::UnsupportedFeature("multi-disk archives"));
    }

    if cd_offset == ZIP64_SENTINEL as u64 || total_entries == 0xffff {
        (total_entries, cd_offset) = read_zip64_eocd(source, eocd_offset)?;
    }

    source.seek(SeekFrom::Start(cd_offset))?;
    let mut entries = Vec::with_capacity(total_entries.min(4096) as usize);
    for _ in 0..total_entries {
        let signature = read_u32(source)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(XlsxError::CorruptArchive(
                "central directory entry signature".into(),
            ));
        }
        let mut fixed = [0u8; 42];
        source.read_exact(&mut fixed).map_err(eof_as_corrupt)?;

        let method = u16_at(&fixed, 6);
        let modified = (u16_at(&fixed, 8), u16_at(&fixed, 10));
        let crc32 = u32_at(&fixed, 12);
        let mut compressed_size = u32_at(&fixed, 16) as u64;
        let mut uncompressed_size = u32_at(&fixed, 20) as u64;
        let name_len = u16_at(&fixed, 24) as usize;
        let extra_len = u16_at(&fixed, 26) as usize;
        let comment_len = u16_at(&fixed, 28) as usize;
        let mut header_offset = u32_at(&fixed, 38) as u64;

        let mut name_buf = vec![0u8; name_len];
        source.read_exact(&mut name_buf).map_err(eof_as_corrupt)?;
        let name = String::from_utf8_lossy(&name_buf).into_owned();

        let mut extra = vec![0u8; extra_len];
        source.read_exact(&mut extra).map_err(eof_as_corrupt)?;
        resolve_zip64_extra(
            &extra,
            &mut uncompressed_size,
            &mut compressed_size,
            &mut header_offset,
        )?;

        source.seek(SeekFrom::Current(comment_len as i64))?;

        entries.push(ZipEntry {
            name,
            method,
            crc32,
            compressed_size,
            uncompressed_size,
            header_offset,
            modified,
        });
    }
    Ok(entries)
}

/// Locate the end-of-central-directory record by scanning the buffered tail
/// of the source backwards. Returns the record offset together with the
/// buffered tail.
fn find_eocd<R: Read + Seek>(source: &mut R) -> Result<(u64, Vec<u8>, u64)> {
    let len = source.seek(SeekFrom::End(0))?;
    let tail_start = len.saturating_sub(EOCD_SEARCH_SPAN);
    source.seek(SeekFrom::Start(tail_start))?;
    let mut tail = Vec::with_capacity((len - tail_start) as usize);
    source.read_to_end(&mut tail)?;

    let signature = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    for i in (0..tail.len().saturating_sub(21)).rev() {
        if tail[i..i + 4] == signature {
            return Ok((tail_start + i as u64, tail, tail_start));
        }
    }
    Err(XlsxError::CorruptArchive(
        "end of central directory not found".into(),
    ))
}

/// Follow the Zip64 EOCD locator that sits directly before the EOCD record.
fn read_zip64_eocd<R: Read + Seek>(source: &mut R, eocd_offset: u64) -> Result<(u64, u64)> {
    let locator_offset = eocd_offset
        .checked_sub(20)
        .ok_or_else(|| XlsxError::CorruptArchive("zip64 locator missing".into()))?;
    source.seek(SeekFrom::Start(locator_offset))?;
    let mut locator = [0u8; 20];
    source.read_exact(&mut locator).map_err(eof_as_corrupt)?;
    if u32_at(&locator, 0) != ZIP64_EOCD_LOCATOR_SIGNATURE {
        return Err(XlsxError::CorruptArchive("zip64 locator signature".into()));
    }
    if u32_at(&locator, 16) > 1 {
        return Err(XlsxError::UnsupportedFeature("multi-disk archives"));
    }

    source.seek(SeekFrom::Start(u64_at(&locator, 8)))?;
    let mut record = [0u8; 56];
    source.read_exact(&mut record).map_err(eof_as_corrupt)?;
    if u32_at(&record, 0) != ZIP64_EOCD_SIGNATURE {
        return Err(XlsxError::CorruptArchive("zip64 record signature".into()));
    }
    let total_entries = u64_at(&record, 32);
    let cd_offset = u64_at(&record, 48);
    Ok((total_entries, cd_offset))
}

/// Resolve sentinel size/offset fields from the 0x0001 extended-information
/// extra field.
fn resolve_zip64_extra(
    extra: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    header_offset: &mut u64,
) -> Result<()> {
    let needs_resolution = *uncompressed_size == ZIP64_SENTINEL as u64
        || *compressed_size == ZIP64_SENTINEL as u64
        || *header_offset == ZIP64_SENTINEL as u64;
    if !needs_resolution {
        return Ok(());
    }

    let mut at = 0usize;
    while at + 4 <= extra.len() {
        let id = u16_at(extra, at);
        let size = u16_at(extra, at + 2) as usize;
        let data_start = at + 4;
        if data_start + size > extra.len() {
            return Err(XlsxError::CorruptArchive("extra field overrun".into()));
        }
        if id == 0x0001 {
            let data = &extra[data_start..data_start + size];
            let mut cursor = 0usize;
            let mut take = |target: &mut u64| -> Result<()> {
                if *target == ZIP64_SENTINEL as u64 {
                    if cursor + 8 > data.len() {
                        return Err(XlsxError::CorruptArchive("zip64 extra field short".into()));
                    }
                    *target = u64_at(data, cursor);
                    cursor += 8;
                }
                Ok(())
            };
            take(uncompressed_size)?;
            take(compressed_size)?;
            take(header_offset)?;
            return Ok(());
        }
        at = data_start + size;
    }
    Err(XlsxError::CorruptArchive(
        "zip64 sizes without extra field".into(),
    ))
}

fn eof_as_corrupt(e: std::io::Error) -> XlsxError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        XlsxError::UnexpectedEof("archive")
    } else {
        XlsxError::Io(e)
    }
}

fn read_u16<R: Read>(source: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    source.read_exact(&mut buf).map_err(eof_as_corrupt)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(source: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    source.read_exact(&mut buf).map_err(eof_as_corrupt)?;
    Ok(u32::from_le_bytes(buf))
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
