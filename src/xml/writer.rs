//! Buffered XML writer with minimal allocations

use crate::error::Result;
use std::io::Write;

/// XML writer that batches output into a small buffer before flushing to
/// the underlying sink
pub struct XmlWriter<W: Write> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(writer: W) -> Self {
        XmlWriter {
            writer,
            buffer: Vec::with_capacity(8192),
        }
    }

    /// Write raw bytes directly
    #[inline]
    pub fn write_raw(&mut self, data: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > 4096 {
            self.flush_buffer()?;
        }
        Ok(())
    }

    /// Write string data
    #[inline]
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_raw(s.as_bytes())
    }

    /// Write the XML declaration
    pub fn declaration(&mut self) -> Result<()> {
        self.write_str("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n")
    }

    /// Open an element start tag
    #[inline]
    pub fn start_element(&mut self, name: &str) -> Result<()> {
        self.write_raw(b"<")?;
        self.write_str(name)
    }

    /// Write an element end tag
    #[inline]
    pub fn end_element(&mut self, name: &str) -> Result<()> {
        self.write_raw(b"</")?;
        self.write_str(name)?;
        self.write_raw(b">")
    }

    /// Write an attribute with an escaped value
    #[inline]
    pub fn attribute(&mut self, name: &str, value: &str) -> Result<()> {
        self.write_raw(b" ")?;
        self.write_str(name)?;
        self.write_raw(b"=\"")?;
        self.write_escaped(value)?;
        self.write_raw(b"\"")
    }

    /// Write an attribute with an integer value
    #[inline]
    pub fn attribute_int(&mut self, name: &str, value: i64) -> Result<()> {
        let mut buf = itoa::Buffer::new();
        self.write_raw(b" ")?;
        self.write_str(name)?;
        self.write_raw(b"=\"")?;
        self.write_str(buf.format(value))?;
        self.write_raw(b"\"")
    }

    /// Close a start tag opened with [`start_element`](Self::start_element)
    #[inline]
    pub fn close_start_tag(&mut self) -> Result<()> {
        self.write_raw(b">")
    }

    /// Close a start tag as self-closing
    #[inline]
    pub fn close_empty(&mut self) -> Result<()> {
        self.write_raw(b"/>")
    }

    /// Write text content with XML escaping
    ///
    /// `&`, `<`, `>` and `"` become entity references; tab, LF and CR
    /// become numeric character references; remaining control bytes below
    /// 0x20 have no XML 1.0 representation and are dropped.
    #[inline]
    pub fn write_escaped(&mut self, text: &str) -> Result<()> {
        for byte in text.bytes() {
            match byte {
                b'&' => self.buffer.extend_from_slice(b"&amp;"),
                b'<' => self.buffer.extend_from_slice(b"&lt;"),
                b'>' => self.buffer.extend_from_slice(b"&gt;"),
                b'"' => self.buffer.extend_from_slice(b"&quot;"),
                b'\t' => self.buffer.extend_from_slice(b"&#9;"),
                b'\n' => self.buffer.extend_from_slice(b"&#10;"),
                b'\r' => self.buffer.extend_from_slice(b"&#13;"),
                0x00..=0x1f => {}
                _ => self.buffer.push(byte),
            }
        }
        if self.buffer.len() > 4096 {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Flush buffered output to the underlying writer
    pub fn flush(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and return the underlying writer
    pub fn into_inner(mut self) -> Result<W> {
        self.flush_buffer()?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut XmlWriter<&mut Vec<u8>>)) -> String {
        let mut output = Vec::new();
        let mut writer = XmlWriter::new(&mut output);
        f(&mut writer);
        writer.flush().unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn test_element_with_attribute() {
        let xml = render(|w| {
            w.start_element("root").unwrap();
            w.attribute("attr", "value").unwrap();
            w.close_start_tag().unwrap();
            w.write_escaped("content").unwrap();
            w.end_element("root").unwrap();
        });
        assert_eq!(xml, "<root attr=\"value\">content</root>");
    }

    #[test]
    fn test_escaping() {
        let xml = render(|w| w.write_escaped("<a> & \"b\"").unwrap());
        assert_eq!(xml, "&lt;a&gt; &amp; &quot;b&quot;");
    }

    #[test]
    fn test_control_characters() {
        let xml = render(|w| w.write_escaped("a\tb\nc\u{1}d").unwrap());
        assert_eq!(xml, "a&#9;b&#10;cd");
    }

    #[test]
    fn test_self_closing() {
        let xml = render(|w| {
            w.start_element("col").unwrap();
            w.attribute_int("min", 1).unwrap();
            w.close_empty().unwrap();
        });
        assert_eq!(xml, "<col min=\"1\"/>");
    }
}
