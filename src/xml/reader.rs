//! Minimal SAX-style pull tokenizer
//!
//! Consumes a byte-chunk stream and produces element / text events on
//! demand. Only the XML subset that SpreadsheetML parts use is handled:
//! elements with attributes, character data, CDATA sections, character
//! references and the five predefined entities. Processing instructions,
//! comments and doctype declarations are consumed silently. Custom DTD
//! entities are rejected.

use crate::chunks::ByteChunk;
use crate::error::{Result, XlsxError};

/// An opened element with its attributes in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct StartTag {
    /// Raw qualified element name
    pub name: String,
    attrs: Vec<(String, String)>,
}

impl StartTag {
    /// Look up an attribute by its exact qualified name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Look up an attribute by local name, ignoring any namespace prefix.
    pub fn attr_local(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| super::local_name(n) == name)
            .map(|(_, v)| v.as_str())
    }

    /// Local part of the element name.
    pub fn local(&self) -> &str {
        super::local_name(&self.name)
    }
}

/// One tokenizer event.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlEvent {
    /// `<name attr="…">` or `<name/>` (the latter is followed by a
    /// synthetic `End` event)
    Start(StartTag),
    /// `</name>`, raw qualified name
    End(String),
    /// Character data, entities decoded; consecutive events may split one
    /// logical text run
    Text(String),
    /// End of the document
    Eof,
}

/// Pull tokenizer over a byte-chunk stream.
pub struct XmlTokenizer<I> {
    source: I,
    buf: Vec<u8>,
    pos: usize,
    source_done: bool,
    pending_end: Option<String>,
    at_start: bool,
}

impl<I> XmlTokenizer<I>
where
    I: Iterator<Item = Result<ByteChunk>>,
{
    pub fn new(source: I) -> Self {
        XmlTokenizer {
            source,
            buf: Vec::new(),
            pos: 0,
            source_done: false,
            pending_end: None,
            at_start: true,
        }
    }

    /// Produce the next event. After `Eof` every further call returns `Eof`.
    pub fn next_event(&mut self) -> Result<XmlEvent> {
        if let Some(name) = self.pending_end.take() {
            return Ok(XmlEvent::End(name));
        }
        self.compact();

        loop {
            if self.pos == self.buf.len() && !self.fill()? {
                return Ok(XmlEvent::Eof);
            }
            if self.at_start {
                self.at_start = false;
                self.skip_bom()?;
                continue;
            }

            if self.buf[self.pos] == b'<' {
                match self.classify_markup()? {
                    Some(event) => return Ok(event),
                    None => continue,
                }
            }

            let text = self.take_text()?;
            if !text.is_empty() {
                return Ok(XmlEvent::Text(text));
            }
        }
    }

    /// Drain events until the end tag of `name`, at the current depth.
    ///
    /// Call after receiving the matching `Start` event to skip an element
    /// whose content is irrelevant.
    pub fn skip_element(&mut self, name: &str) -> Result<()> {
        let mut depth = 0usize;
        loop {
            match self.next_event()? {
                XmlEvent::Start(tag) if tag.name == name => depth += 1,
                XmlEvent::End(end) if end == name => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                XmlEvent::Eof => return Err(XlsxError::UnexpectedEof("element content")),
                _ => {}
            }
        }
    }

    fn skip_bom(&mut self) -> Result<()> {
        while self.buf.len() - self.pos < 3 && !self.source_done {
            self.fill()?;
        }
        if self.buf[self.pos..].starts_with(&[0xef, 0xbb, 0xbf]) {
            self.pos += 3;
        }
        Ok(())
    }

    /// Dispatch on the markup at `pos` (which is `<`). Returns `None` for
    /// markup that produces no event.
    fn classify_markup(&mut self) -> Result<Option<XmlEvent>> {
        self.want(2)?;
        match self.buf[self.pos + 1] {
            b'?' => {
                let end = self.find(b"?>", self.pos + 2)?;
                self.pos = end + 2;
                Ok(None)
            }
            b'!' => self.classify_declaration(),
            b'/' => {
                let end = self.find(b">", self.pos + 2)?;
                let name = decode_utf8(&self.buf[self.pos + 2..end])?
                    .trim()
                    .to_string();
                if name.is_empty() {
                    return Err(XlsxError::MalformedXml("empty end tag".into()));
                }
                self.pos = end + 1;
                Ok(Some(XmlEvent::End(name)))
            }
            _ => self.parse_start_tag().map(Some),
        }
    }

    fn classify_declaration(&mut self) -> Result<Option<XmlEvent>> {
        if self.starts_with(b"<!--")? {
            let end = self.find(b"-->", self.pos + 4)?;
            self.pos = end + 3;
            return Ok(None);
        }
        if self.starts_with(b"<![CDATA[")? {
            let end = self.find(b"]]>", self.pos + 9)?;
            let text = decode_utf8(&self.buf[self.pos + 9..end])?.to_string();
            self.pos = end + 3;
            return Ok(if text.is_empty() {
                None
            } else {
                Some(XmlEvent::Text(text))
            });
        }
        // <!DOCTYPE …>, possibly with an internal subset in brackets
        let mut at = self.pos + 2;
        let mut bracket_depth = 0usize;
        loop {
            if at == self.buf.len() {
                if !self.fill()? {
                    return Err(XlsxError::UnexpectedEof("doctype declaration"));
                }
            }
            match self.buf[at] {
                b'[' => bracket_depth += 1,
                b']' => bracket_depth = bracket_depth.saturating_sub(1),
                b'>' if bracket_depth == 0 => {
                    self.pos = at + 1;
                    return Ok(None);
                }
                _ => {}
            }
            at += 1;
        }
    }

    fn parse_start_tag(&mut self) -> Result<XmlEvent> {
        let end = self.find_tag_end()?;
        let self_closing = self.buf[end - 1] == b'/';
        let inner_end = if self_closing { end - 1 } else { end };
        let tag = decode_utf8(&self.buf[self.pos + 1..inner_end])?.to_string();
        self.pos = end + 1;

        let mut rest = tag.as_str();
        let name_end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_string();
        if name.is_empty() {
            return Err(XlsxError::MalformedXml("empty element name".into()));
        }
        rest = &rest[name_end..];

        let mut attrs = Vec::new();
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            let eq = rest
                .find('=')
                .ok_or_else(|| XlsxError::MalformedXml(format!("attribute in <{}>", name)))?;
            let attr_name = rest[..eq].trim_end().to_string();
            rest = rest[eq + 1..].trim_start();
            let quote = match rest.chars().next() {
                Some(q @ ('"' | '\'')) => q,
                _ => {
                    return Err(XlsxError::MalformedXml(format!(
                        "unquoted attribute value in <{}>",
                        name
                    )));
                }
            };
            let value_end = rest[1..]
                .find(quote)
                .ok_or_else(|| XlsxError::MalformedXml(format!("attribute in <{}>", name)))?;
            let value = decode_entities(&rest[1..1 + value_end])?;
            attrs.push((attr_name, value));
            rest = &rest[value_end + 2..];
        }

        if self_closing {
            self.pending_end = Some(name.clone());
        }
        Ok(XmlEvent::Start(StartTag { name, attrs }))
    }

    /// Find the `>` closing the start tag at `pos`, skipping quoted
    /// attribute values.
    fn find_tag_end(&mut self) -> Result<usize> {
        let mut at = self.pos + 1;
        let mut quote: Option<u8> = None;
        loop {
            if at == self.buf.len() {
                if !self.fill()? {
                    return Err(XlsxError::UnexpectedEof("element tag"));
                }
            }
            let b = self.buf[at];
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if b == b'>' => return Ok(at),
                None if b == b'<' => {
                    return Err(XlsxError::MalformedXml("'<' inside tag".into()));
                }
                None => {}
            }
            at += 1;
        }
    }

    /// Consume character data up to the next `<` (or end of input).
    fn take_text(&mut self) -> Result<String> {
        let mut end;
        loop {
            end = self.buf[self.pos..]
                .iter()
                .position(|&b| b == b'<')
                .map(|i| self.pos + i);
            if end.is_some() || !self.fill()? {
                break;
            }
        }
        let end = end.unwrap_or(self.buf.len());
        let text = decode_entities(decode_utf8(&self.buf[self.pos..end])?)?;
        self.pos = end;
        Ok(text)
    }

    fn starts_with(&mut self, prefix: &[u8]) -> Result<bool> {
        while self.buf.len() - self.pos < prefix.len() {
            if !self.fill()? {
                return Ok(false);
            }
        }
        Ok(self.buf[self.pos..].starts_with(prefix))
    }

    fn want(&mut self, n: usize) -> Result<()> {
        while self.buf.len() - self.pos < n {
            if !self.fill()? {
                return Err(XlsxError::UnexpectedEof("xml markup"));
            }
        }
        Ok(())
    }

    fn find(&mut self, needle: &[u8], from: usize) -> Result<usize> {
        let mut search_from = from;
        loop {
            if self.buf.len() >= search_from + needle.len() {
                if let Some(i) = self.buf[search_from..]
                    .windows(needle.len())
                    .position(|w| w == needle)
                {
                    return Ok(search_from + i);
                }
                // Keep the tail that may hold a partial match
                search_from = self.buf.len() + 1 - needle.len();
            }
            if !self.fill()? {
                return Err(XlsxError::UnexpectedEof("xml markup"));
            }
        }
    }

    fn fill(&mut self) -> Result<bool> {
        if self.source_done {
            return Ok(false);
        }
        match self.source.next() {
            Some(chunk) => {
                let chunk = chunk?;
                self.buf.extend_from_slice(&chunk);
                Ok(!chunk.is_empty())
            }
            None => {
                self.source_done = true;
                Ok(false)
            }
        }
    }

    fn compact(&mut self) {
        if self.pos >= 64 * 1024 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|_| XlsxError::DecodeError("xml part"))
}

/// Decode predefined entities and numeric character references.
fn decode_entities(text: &str) -> Result<String> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let semi = rest
            .char_indices()
            .take(34)
            .find(|&(_, c)| c == ';')
            .map(|(i, _)| i)
            .ok_or_else(|| XlsxError::MalformedXml("unterminated entity reference".into()))?;
        let entity = &rest[1..semi];
        match entity {
            "amp" => out.push('&'),
            "lt" => out.push('<'),
            "gt" => out.push('>'),
            "quot" => out.push('"'),
            "apos" => out.push('\''),
            _ if entity.starts_with('#') => {
                let code = if let Some(hex) = entity[1..].strip_prefix(['x', 'X']) {
                    u32::from_str_radix(hex, 16)
                } else {
                    entity[1..].parse::<u32>()
                }
                .map_err(|_| XlsxError::MalformedXml(format!("character reference &{};", entity)))?;
                let c = char::from_u32(code).ok_or_else(|| {
                    XlsxError::MalformedXml(format!("character reference &{};", entity))
                })?;
                out.push(c);
            }
            _ => return Err(XlsxError::BadEntity(entity.to_string())),
        }
        rest = &rest[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::string_to_chunks;

    fn events(xml: &str) -> Vec<XmlEvent> {
        let mut tok = XmlTokenizer::new(string_to_chunks(xml));
        let mut out = Vec::new();
        loop {
            let event = tok.next_event().unwrap();
            if event == XmlEvent::Eof {
                return out;
            }
            out.push(event);
        }
    }

    /// Feed the document one byte per chunk to exercise refill paths.
    fn events_bytewise(xml: &str) -> Vec<XmlEvent> {
        let chunks: Vec<_> = xml
            .as_bytes()
            .iter()
            .map(|&b| Ok(vec![b]))
            .collect();
        let mut tok = XmlTokenizer::new(chunks.into_iter());
        let mut out = Vec::new();
        loop {
            let event = tok.next_event().unwrap();
            if event == XmlEvent::Eof {
                return out;
            }
            out.push(event);
        }
    }

    #[test]
    fn test_elements_and_text() {
        let got = events("<a x=\"1\"><b>hi</b></a>");
        assert_eq!(got.len(), 5);
        match &got[0] {
            XmlEvent::Start(tag) => {
                assert_eq!(tag.name, "a");
                assert_eq!(tag.attr("x"), Some("1"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(got[2], XmlEvent::Text("hi".to_string()));
        assert_eq!(got[4], XmlEvent::End("a".to_string()));
    }

    #[test]
    fn test_self_closing_emits_end() {
        let got = events("<row r=\"2\"/>");
        assert_eq!(got.len(), 2);
        assert!(matches!(&got[0], XmlEvent::Start(t) if t.attr("r") == Some("2")));
        assert_eq!(got[1], XmlEvent::End("row".to_string()));
    }

    #[test]
    fn test_declaration_comment_doctype_skipped() {
        let got = events(
            "<?xml version=\"1.0\"?><!-- c --><!DOCTYPE r [<!ELEMENT r ANY>]><r/>",
        );
        assert_eq!(got.len(), 2);
        assert!(matches!(&got[0], XmlEvent::Start(t) if t.name == "r"));
    }

    #[test]
    fn test_bom_consumed() {
        let mut data = vec![0xef, 0xbb, 0xbf];
        data.extend_from_slice(b"<r/>");
        let mut tok = XmlTokenizer::new(crate::chunks::buffer_to_chunks(data));
        assert!(matches!(tok.next_event().unwrap(), XmlEvent::Start(_)));
    }

    #[test]
    fn test_entities_decoded() {
        let got = events("<t a=\"x&amp;y\">&lt;&#65;&#x42;&gt;</t>");
        assert!(matches!(&got[0], XmlEvent::Start(t) if t.attr("a") == Some("x&y")));
        assert_eq!(got[1], XmlEvent::Text("<AB>".to_string()));
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let mut tok = XmlTokenizer::new(string_to_chunks("<t>&nbsp;</t>"));
        tok.next_event().unwrap();
        assert!(matches!(tok.next_event(), Err(XlsxError::BadEntity(e)) if e == "nbsp"));
    }

    #[test]
    fn test_cdata_is_text() {
        let got = events("<t><![CDATA[a<b&c]]></t>");
        assert_eq!(got[1], XmlEvent::Text("a<b&c".to_string()));
    }

    #[test]
    fn test_chunk_boundaries_do_not_matter() {
        let xml = "<sheet \u{e9}=\"no\" name=\"D\u{e9}tails\"><v>1&#233;2</v></sheet>";
        assert_eq!(events(xml), events_bytewise(xml));
    }

    #[test]
    fn test_truncated_markup_fails() {
        let mut tok = XmlTokenizer::new(string_to_chunks("<row r=\"1"));
        assert!(matches!(
            tok.next_event(),
            Err(XlsxError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_skip_element() {
        let mut tok = XmlTokenizer::new(string_to_chunks(
            "<a><b><b>deep</b><c/></b><d/></a>",
        ));
        assert!(matches!(tok.next_event().unwrap(), XmlEvent::Start(t) if t.name == "a"));
        assert!(matches!(tok.next_event().unwrap(), XmlEvent::Start(t) if t.name == "b"));
        tok.skip_element("b").unwrap();
        assert!(matches!(tok.next_event().unwrap(), XmlEvent::Start(t) if t.name == "d"));
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let got = events("<a x=\"1>2\"/>");
        assert!(matches!(&got[0], XmlEvent::Start(t) if t.attr("x") == Some("1>2")));
    }
}
