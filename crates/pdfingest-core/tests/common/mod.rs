//! Shared fixture builders for the integration suites
//!
//! `PdfBuilder` writes files object by object so that tests can produce
//! exactly the damage they want: missing xref, compressed objects,
//! dangling references and the like.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Hand-assembled PDF file. Object 1 is always the catalog.
#[derive(Debug, Clone, Default)]
pub struct PdfBuilder {
    objects: BTreeMap<u32, Vec<u8>>,
    trailer_extra: String,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A non-stream object, e.g. `"<< /Type /Page >>"`
    pub fn object(&mut self, num: u32, body: &str) -> &mut Self {
        self.objects.insert(num, body.as_bytes().to_vec());
        self
    }

    /// A stream object; `entries` are extra dictionary entries, `/Length`
    /// is filled in
    pub fn stream(&mut self, num: u32, entries: &str, data: &[u8]) -> &mut Self {
        let mut body = format!("<< {} /Length {} >>\nstream\n", entries, data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.objects.insert(num, body);
        self
    }

    /// A zlib-compressed stream
    pub fn flate_stream(&mut self, num: u32, entries: &str, data: &[u8]) -> &mut Self {
        let compressed = deflate(data);
        self.stream(num, &format!("/Filter /FlateDecode {}", entries), &compressed)
    }

    /// Extra trailer entries, e.g. `"/Info 9 0 R"`
    pub fn trailer(&mut self, extra: &str) -> &mut Self {
        self.trailer_extra = extra.to_string();
        self
    }

    fn size(&self) -> u32 {
        self.objects.keys().next_back().map_or(1, |n| n + 1)
    }

    /// Header, then every object; returns the offsets of each one
    fn body(&self, skip: &[u32]) -> (Vec<u8>, BTreeMap<u32, usize>) {
        let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
        let mut offsets = BTreeMap::new();
        for (&num, body) in self.objects.iter().filter(|(n, _)| !skip.contains(*n)) {
            offsets.insert(num, pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n", num).as_bytes());
            pdf.extend_from_slice(body);
            pdf.extend_from_slice(b"\nendobj\n");
        }
        (pdf, offsets)
    }

    /// Well-formed file with a classic xref table
    pub fn build(&self) -> Vec<u8> {
        let (mut pdf, offsets) = self.body(&[]);
        let size = self.size();
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", size).as_bytes());
        for num in 1..size {
            match offsets.get(&num) {
                Some(offset) => pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes()),
                None => pdf.extend_from_slice(b"0000000000 65535 f \n"),
            }
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R {} >>\nstartxref\n{}\n%%EOF\n",
                size, self.trailer_extra, xref
            )
            .as_bytes(),
        );
        pdf
    }

    /// Objects and a trailer, but no xref table or `startxref`
    pub fn build_without_xref(&self) -> Vec<u8> {
        let (mut pdf, _) = self.body(&[]);
        pdf.extend_from_slice(format!("trailer\n<< /Root 1 0 R {} >>\n%%EOF\n", self.trailer_extra).as_bytes());
        pdf
    }

    /// Objects in `packed` go into one object stream; the index is an
    /// uncompressed cross-reference stream with `/W [1 4 2]`
    pub fn build_with_object_stream(&self, packed: &[u32]) -> Vec<u8> {
        let (mut pdf, mut offsets) = self.body(packed);
        let objstm_num = self.size();
        let xref_num = objstm_num + 1;

        let mut header = String::new();
        let mut members = Vec::new();
        for &num in packed {
            header.push_str(&format!("{} {} ", num, members.len()));
            if let Some(body) = self.objects.get(&num) {
                members.extend_from_slice(body);
            }
            members.push(b'\n');
        }
        let mut data = header.clone().into_bytes();
        data.extend_from_slice(&members);

        offsets.insert(objstm_num, pdf.len());
        pdf.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Type /ObjStm /N {} /First {} /Length {} >>\nstream\n",
                objstm_num,
                packed.len(),
                header.len(),
                data.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&data);
        pdf.extend_from_slice(b"\nendstream\nendobj\n");

        let xref_offset = pdf.len();
        offsets.insert(xref_num, xref_offset);
        let size = xref_num + 1;

        let mut rows = Vec::new();
        for num in 0..size {
            if let Some(index) = packed.iter().position(|&p| p == num) {
                rows.push(2u8);
                rows.extend_from_slice(&objstm_num.to_be_bytes());
                rows.extend_from_slice(&(index as u16).to_be_bytes());
            } else if let Some(&offset) = offsets.get(&num) {
                rows.push(1u8);
                rows.extend_from_slice(&(offset as u32).to_be_bytes());
                rows.extend_from_slice(&0u16.to_be_bytes());
            } else {
                rows.push(0u8);
                rows.extend_from_slice(&0u32.to_be_bytes());
                rows.extend_from_slice(&u16::MAX.to_be_bytes());
            }
        }

        pdf.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Root 1 0 R {} /Length {} >>\nstream\n",
                xref_num,
                size,
                self.trailer_extra,
                rows.len()
            )
            .as_bytes(),
        );
        pdf.extend_from_slice(&rows);
        pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        pdf
    }
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Content stream showing `text` in 12pt /F1 at (72, 720)
pub fn show_text(text: &str) -> String {
    format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text)
}

/// Catalog, page tree and a Helvetica /F1 shared by every page; page `i`
/// is object `10 + 2i` with its content stream at `11 + 2i`
pub fn text_document(contents: &[&str]) -> PdfBuilder {
    let mut pdf = PdfBuilder::new();
    let kids: Vec<String> = (0..contents.len()).map(|i| format!("{} 0 R", 10 + 2 * i)).collect();
    pdf.object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(
            2,
            &format!(
                "<< /Type /Pages /Kids [{}] /Count {} /Resources << /Font << /F1 3 0 R >> >> >>",
                kids.join(" "),
                contents.len()
            ),
        )
        .object(3, "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");

    for (i, content) in contents.iter().enumerate() {
        let page = 10 + 2 * i as u32;
        pdf.object(
            page,
            &format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R >>",
                page + 1
            ),
        )
        .stream(page + 1, "", content.as_bytes());
    }
    pdf
}

/// One page per entry, each showing its text
pub fn text_pages(texts: &[&str]) -> Vec<u8> {
    let contents: Vec<String> = texts.iter().map(|t| show_text(t)).collect();
    let refs: Vec<&str> = contents.iter().map(String::as_str).collect();
    text_document(&refs).build()
}
