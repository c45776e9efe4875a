//! String recognition over data-labeled addresses.

use krait_core::{
    Address, BinaryStream, Cell, CoreError, Document, Label, LabelKind, StringCell, StringKind,
};

use crate::{Analyzer, AnalysisError, AnalysisResult};

/// A string encoding strategy: how to read one code unit, which units are
/// acceptable, which unit terminates, and how units become UTF-8.
pub trait CharacterSet {
    /// One code unit.
    type Unit: Copy;

    /// Bytes per code unit.
    const UNIT_BYTES: u64;

    /// Kind recorded on accepted string cells.
    const KIND: StringKind;

    /// Reads one code unit at a physical offset.
    fn read_unit(stream: &BinaryStream, offset: u64) -> Result<Self::Unit, CoreError>;

    /// Returns true for units acceptable inside a string.
    fn is_valid(unit: Self::Unit) -> bool;

    /// Returns true for the terminator unit.
    fn is_final(unit: Self::Unit) -> bool;

    /// Appends the unit's UTF-8 form to `out`.
    fn push_utf8(unit: Self::Unit, out: &mut String);
}

/// NUL-terminated 8-bit strings.
pub struct AsciiCharset;

impl CharacterSet for AsciiCharset {
    type Unit = u8;

    const UNIT_BYTES: u64 = 1;
    const KIND: StringKind = StringKind::Ascii;

    fn read_unit(stream: &BinaryStream, offset: u64) -> Result<u8, CoreError> {
        stream.read_u8(offset)
    }

    fn is_valid(unit: u8) -> bool {
        matches!(unit, 0x20..=0x7e | 0x09 | 0x0a | 0x0d)
    }

    fn is_final(unit: u8) -> bool {
        unit == 0
    }

    fn push_utf8(unit: u8, out: &mut String) {
        out.push(unit as char);
    }
}

/// NUL-terminated UTF-16LE strings, as found in Windows images.
pub struct WideCharset;

impl CharacterSet for WideCharset {
    type Unit = u16;

    const UNIT_BYTES: u64 = 2;
    const KIND: StringKind = StringKind::Utf16;

    fn read_unit(stream: &BinaryStream, offset: u64) -> Result<u16, CoreError> {
        stream.read_u16_le(offset)
    }

    fn is_valid(unit: u16) -> bool {
        matches!(
            unit,
            0x0020..=0x007e | 0x00a0..=0x00ff | 0x0100..=0x017f | 0x0009 | 0x000a | 0x000d
        )
    }

    fn is_final(unit: u16) -> bool {
        unit == 0
    }

    fn push_utf8(unit: u16, out: &mut String) {
        if let Some(c) = char::from_u32(u32::from(unit)) {
            out.push(c);
        }
    }
}

/// Reads code units from `start` until a terminator. Returns the decoded
/// text and the bytes consumed (terminator included), or `None` when an
/// invalid unit or a read failure rejects the string, or it is empty.
fn probe<C: CharacterSet>(stream: &BinaryStream, start: u64) -> Option<(String, u16)> {
    let mut text = String::new();
    let mut offset = start;
    loop {
        let unit = C::read_unit(stream, offset).ok()?;
        offset += C::UNIT_BYTES;
        if C::is_final(unit) {
            if text.is_empty() {
                return None;
            }
            let byte_len = u16::try_from(offset - start).ok()?;
            return Some((text, byte_len));
        }
        if !C::is_valid(unit) {
            return None;
        }
        C::push_utf8(unit, &mut text);
    }
}

impl Analyzer {
    /// Scans every label of kind exactly `DATA`, probing its address first
    /// as UTF-16 then as ASCII. An accepted string becomes a string cell
    /// and the label is replaced by a string label named from the text.
    pub fn find_strings(&self, doc: &mut Document) {
        let candidates: Vec<Address> = doc
            .labels()
            .filter(|(_, label)| label.kind() == LabelKind::DATA)
            .map(|(addr, _)| addr)
            .collect();

        for addr in candidates {
            let probed = {
                let Some(area) = doc.memory_area(addr) else {
                    continue;
                };
                let Ok(start) = area.translate(addr.offset) else {
                    continue;
                };
                probe::<WideCharset>(area.stream(), start)
                    .map(|found| (StringKind::Utf16, found))
                    .or_else(|| {
                        probe::<AsciiCharset>(area.stream(), start)
                            .map(|found| (StringKind::Ascii, found))
                    })
            };
            let Some((kind, (text, byte_len))) = probed else {
                continue;
            };

            log::debug!("found string at {addr}: {text:?}");
            let cell = Cell::String(StringCell {
                kind,
                text: text.clone(),
                byte_len,
            });
            let _ = doc.insert_cell_forced(addr, cell);
            let _ = doc.set_label_to_address(
                addr,
                Label::from_text(&text, &self.config().string_prefix, LabelKind::STRING),
            );
        }
    }

    /// Recognizes a NUL-terminated ASCII string at `addr`.
    pub fn make_ascii_string(&self, doc: &mut Document, addr: Address) -> AnalysisResult<()> {
        self.make_string::<AsciiCharset>(doc, addr)
    }

    /// Recognizes a NUL-terminated UTF-16 string at `addr`.
    pub fn make_windows_string(&self, doc: &mut Document, addr: Address) -> AnalysisResult<()> {
        self.make_string::<WideCharset>(doc, addr)
    }

    fn make_string<C: CharacterSet>(&self, doc: &mut Document, addr: Address) -> AnalysisResult<()> {
        let probed = {
            let area = doc.memory_area(addr).ok_or(CoreError::NotMapped(addr))?;
            let start = area.translate(addr.offset)?;
            probe::<C>(area.stream(), start)
        };
        let (text, byte_len) = probed.ok_or(AnalysisError::NoString(addr))?;

        doc.insert_cell(
            addr,
            Cell::String(StringCell {
                kind: C::KIND,
                text: text.clone(),
                byte_len,
            }),
            true,
        )?;
        doc.add_label(
            addr,
            Label::from_text(
                &text,
                &self.config().string_prefix,
                LabelKind::STRING | LabelKind::GLOBAL,
            ),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krait_core::{Access, MemoryArea};

    fn stream(bytes: &[u8]) -> BinaryStream {
        BinaryStream::new(bytes.to_vec())
    }

    #[test]
    fn test_probe_ascii() {
        let s = stream(b"Hello\x00rest");
        let (text, byte_len) = probe::<AsciiCharset>(&s, 0).unwrap();
        assert_eq!(text, "Hello");
        assert_eq!(byte_len, 6);
    }

    #[test]
    fn test_probe_ascii_rejects_binary() {
        let s = stream(&[0x48, 0x01, 0x00]);
        assert!(probe::<AsciiCharset>(&s, 0).is_none());
    }

    #[test]
    fn test_probe_ascii_rejects_empty() {
        let s = stream(&[0x00]);
        assert!(probe::<AsciiCharset>(&s, 0).is_none());
    }

    #[test]
    fn test_probe_ascii_rejects_unterminated() {
        let s = stream(b"abc");
        assert!(probe::<AsciiCharset>(&s, 0).is_none());
    }

    #[test]
    fn test_probe_utf16() {
        let s = stream(&[0x48, 0x00, 0x69, 0x00, 0x00, 0x00]);
        let (text, byte_len) = probe::<WideCharset>(&s, 0).unwrap();
        assert_eq!(text, "Hi");
        assert_eq!(byte_len, 6);
    }

    #[test]
    fn test_probe_utf16_rejects_surrogates() {
        let s = stream(&[0x01, 0xd8, 0x00, 0x00]);
        assert!(probe::<WideCharset>(&s, 0).is_none());
    }

    #[test]
    fn test_make_ascii_string() {
        let mut doc = Document::new();
        doc.add_memory_area(MemoryArea::new(
            ".rodata",
            Address::flat(0x5000),
            Access::READ,
            stream(b"ok\x00"),
        ));

        let analyzer = Analyzer::new();
        analyzer
            .make_ascii_string(&mut doc, Address::flat(0x5000))
            .unwrap();

        let cell = doc.cell_at(Address::flat(0x5000)).unwrap();
        match cell {
            Cell::String(s) => {
                assert_eq!(s.kind, StringKind::Ascii);
                assert_eq!(s.text, "ok");
                assert_eq!(s.byte_len, 3);
            }
            other => panic!("expected a string cell, got {other:?}"),
        }
        let label = doc.label_at(Address::flat(0x5000)).unwrap();
        assert_eq!(label.name(), "str_ok");
        assert_eq!(label.kind(), LabelKind::STRING | LabelKind::GLOBAL);
    }

    #[test]
    fn test_make_windows_string() {
        let mut doc = Document::new();
        doc.add_memory_area(MemoryArea::new(
            ".rodata",
            Address::flat(0x5000),
            Access::READ,
            stream(&[0x48, 0x00, 0x69, 0x00, 0x00, 0x00]),
        ));

        let analyzer = Analyzer::new();
        analyzer
            .make_windows_string(&mut doc, Address::flat(0x5000))
            .unwrap();

        match doc.cell_at(Address::flat(0x5000)).unwrap() {
            Cell::String(s) => {
                assert_eq!(s.kind, StringKind::Utf16);
                assert_eq!(s.text, "Hi");
                assert_eq!(s.byte_len, 6);
            }
            other => panic!("expected a string cell, got {other:?}"),
        }
    }

    #[test]
    fn test_make_string_fails_on_garbage() {
        let mut doc = Document::new();
        doc.add_memory_area(MemoryArea::new(
            ".rodata",
            Address::flat(0x5000),
            Access::READ,
            stream(&[0x01, 0x02]),
        ));

        let analyzer = Analyzer::new();
        assert!(analyzer
            .make_ascii_string(&mut doc, Address::flat(0x5000))
            .is_err());
        assert!(doc.cell_at(Address::flat(0x5000)).unwrap().is_value());
    }
}
