//! Positioned text tokens from PDF content streams.
//!
//! Only the text-positioning operators are interpreted. Glyph widths are
//! approximated from the font size, which is enough to order tokens that share
//! a baseline; it does not reproduce exact layout.

use lopdf::content::Content;
use lopdf::{Document, Object};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::PdfError;

/// Kerning offsets (thousandths of an em) beyond this in a TJ array read as a word gap.
const TJ_GAP_THRESHOLD: f64 = 200.0;
const APPROX_GLYPH_WIDTH: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionedToken {
    pub text: String,
    pub x: f64,
    pub y: f64,
}

impl PositionedToken {
    pub fn new(text: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            text: text.into(),
            x,
            y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn from_operands(ops: &[Object]) -> Option<Self> {
        if ops.len() < 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, op) in m.iter_mut().zip(ops) {
            *slot = number(op)?;
        }
        Some(Matrix(m))
    }

    /// `self × other` in PDF row-vector convention.
    fn then(self, other: Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    fn translate(self, tx: f64, ty: f64) -> Matrix {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty]).then(self)
    }

    fn origin(self) -> (f64, f64) {
        (self.0[4], self.0[5])
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

#[derive(Debug)]
struct TextState {
    ctm: Matrix,
    ctm_stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    leading: f64,
    font_size: f64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            ctm_stack: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            leading: 0.0,
            font_size: 1.0,
        }
    }
}

impl TextState {
    fn move_line(&mut self, tx: f64, ty: f64) {
        self.tlm = self.tlm.translate(tx, ty);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn show(&mut self, text: String, out: &mut Vec<PositionedToken>) {
        let (x, y) = self.tm.then(self.ctm).origin();
        let advance = text.chars().count() as f64 * self.font_size * APPROX_GLYPH_WIDTH;
        self.tm = self.tm.translate(advance, 0.0);
        if !text.trim().is_empty() {
            out.push(PositionedToken::new(text, x, y));
        }
    }
}

fn tj_array_text(items: &[Object]) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
            other => {
                if number(other).is_some_and(|n| -n > TJ_GAP_THRESHOLD) && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
        }
    }
    text
}

/// Walk one decoded content stream and collect its text tokens.
pub fn tokens_from_content(content: &Content) -> Vec<PositionedToken> {
    let mut state = TextState::default();
    let mut out = Vec::new();

    for op in &content.operations {
        let args = op.operands.as_slice();
        match op.operator.as_str() {
            "q" => state.ctm_stack.push(state.ctm),
            "Q" => state.ctm = state.ctm_stack.pop().unwrap_or(Matrix::IDENTITY),
            "cm" => {
                if let Some(m) = Matrix::from_operands(args) {
                    state.ctm = m.then(state.ctm);
                }
            }
            "BT" => {
                state.tm = Matrix::IDENTITY;
                state.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(size) = args.get(1).and_then(number) {
                    state.font_size = size.abs().max(f64::EPSILON);
                }
            }
            "TL" => {
                if let Some(l) = args.first().and_then(number) {
                    state.leading = l;
                }
            }
            "Td" | "TD" => {
                if let (Some(tx), Some(ty)) = (
                    args.first().and_then(number),
                    args.get(1).and_then(number),
                ) {
                    if op.operator == "TD" {
                        state.leading = -ty;
                    }
                    state.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(args) {
                    state.tm = m;
                    state.tlm = m;
                }
            }
            "T*" => state.next_line(),
            "Tj" => {
                if let Some(Object::String(bytes, _)) = args.first() {
                    state.show(decode_pdf_string(bytes), &mut out);
                }
            }
            "'" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = args.first() {
                    state.show(decode_pdf_string(bytes), &mut out);
                }
            }
            "\"" => {
                state.next_line();
                if let Some(Object::String(bytes, _)) = args.get(2) {
                    state.show(decode_pdf_string(bytes), &mut out);
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = args.first() {
                    state.show(tj_array_text(items), &mut out);
                }
            }
            _ => {}
        }
    }

    out
}

/// Tokens for every page of a PDF, in page order.
pub fn extract_tokens(bytes: &[u8]) -> Result<Vec<Vec<PositionedToken>>, PdfError> {
    let doc = Document::load_mem(bytes)?;
    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "extracting positioned tokens");

    let mut by_page = Vec::with_capacity(pages.len());
    for (page_no, page_id) in pages {
        let tokens = doc
            .get_page_content(page_id)
            .and_then(|raw| Content::decode(&raw))
            .map(|content| tokens_from_content(&content));
        match tokens {
            Ok(tokens) => by_page.push(tokens),
            Err(err) => {
                warn!(page = page_no, error = %err, "unreadable page content; skipping");
                by_page.push(Vec::new());
            }
        }
    }
    Ok(by_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Stream, StringFormat};

    fn text(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec(), StringFormat::Literal)
    }

    fn one_page_pdf(operations: Vec<Operation>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn td_and_tm_position_tokens() {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 10.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![text("1")]),
                Operation::new("Td", vec![30.into(), 0.into()]),
                Operation::new("Tj", vec![text("221-15-4567")]),
                Operation::new("Tm", vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 680.into()]),
                Operation::new("Tj", vec![text("2")]),
                Operation::new("ET", vec![]),
            ],
        };
        let tokens = tokens_from_content(&content);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0], PositionedToken::new("1", 50.0, 700.0));
        assert_eq!(tokens[1], PositionedToken::new("221-15-4567", 80.0, 700.0));
        assert_eq!(tokens[2], PositionedToken::new("2", 50.0, 680.0));
    }

    #[test]
    fn tj_arrays_insert_gaps_for_large_kerning() {
        let items = vec![text("MAL"), Object::Integer(-250), text("E"), Object::Integer(-20), text("X")];
        assert_eq!(tj_array_text(&items), "MAL EX");
    }

    #[test]
    fn cm_scales_and_translates_origin() {
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![2.into(), 0.into(), 0.into(), 2.into(), 10.into(), 20.into()]),
                Operation::new("BT", vec![]),
                Operation::new("Td", vec![5.into(), 5.into()]),
                Operation::new("Tj", vec![text("x")]),
                Operation::new("ET", vec![]),
                Operation::new("Q", vec![]),
            ],
        };
        let tokens = tokens_from_content(&content);
        assert_eq!(tokens[0].x, 20.0);
        assert_eq!(tokens[0].y, 30.0);
    }

    #[test]
    fn utf16_strings_decode() {
        let bytes = [0xFE, 0xFF, 0x00, 0x52, 0x00, 0x61];
        assert_eq!(decode_pdf_string(&bytes), "Ra");
    }

    #[test]
    fn extracts_tokens_from_saved_document() {
        let pdf = one_page_pdf(vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![text("Page 1 of 1")]),
            Operation::new("ET", vec![]),
        ]);
        let pages = extract_tokens(&pdf).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0], vec![PositionedToken::new("Page 1 of 1", 72.0, 720.0)]);
    }

    #[test]
    fn garbage_bytes_are_a_pdf_error() {
        assert!(extract_tokens(b"not a pdf").is_err());
    }
}
