//! Cross-checks against documents written by lopdf
//!
//! lopdf is only a fixture generator here: it writes the files and
//! reports its own page count, which the extractor must agree with.
//!
//! Run with: cargo test -p pdfingest-core --test lopdf_fixtures

use lopdf::{content::Content, content::Operation, Dictionary, Document, Object, Stream, StringFormat};
use pdfingest_core::{get_page_count, ExtractionService};
use pretty_assertions::assert_eq;

fn text_operations(text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
        Operation::new("Td", vec![Object::Integer(100), Object::Integer(700)]),
        Operation::new(
            "Tj",
            vec![Object::String(text.as_bytes().to_vec(), StringFormat::Literal)],
        ),
        Operation::new("ET", vec![]),
    ]
}

/// Create a synthetic PDF with one line of text per page
fn create_synthetic_pdf(num_pages: u32, content_prefix: &str, compress: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
    ]));
    let resources_id = doc.add_object(Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(Dictionary::from_iter(vec![("F1", Object::Reference(font_id))])),
    )]));

    let mut page_ids = Vec::new();
    for i in 0..num_pages {
        let content = Content {
            operations: text_operations(&format!("{} Page {}", content_prefix, i + 1)),
        };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
        ]);
        page_ids.push(doc.add_object(page));
    }

    let pages = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Count", Object::Integer(num_pages as i64)),
        ("Resources", Object::Reference(resources_id)),
        (
            "Kids",
            Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
        ),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let info_id = doc.add_object(Dictionary::from_iter(vec![
        (
            "Title",
            Object::String(format!("{} report", content_prefix).into_bytes(), StringFormat::Literal),
        ),
        ("Producer", Object::String(b"lopdf".to_vec(), StringFormat::Literal)),
    ]));
    doc.trailer.set("Info", Object::Reference(info_id));

    if compress {
        doc.compress();
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

// ============================================================================
// Page counts
// ============================================================================

#[test]
fn test_page_count_matches_lopdf() {
    for num_pages in [1, 2, 7, 25] {
        let bytes = create_synthetic_pdf(num_pages, "Count", false);
        let reference = Document::load_mem(&bytes).unwrap().get_pages().len();

        assert_eq!(get_page_count(&bytes).unwrap(), reference, "{} pages", num_pages);
    }
}

// ============================================================================
// Text and metadata
// ============================================================================

#[test]
fn test_text_and_info_from_lopdf_output() {
    let bytes = create_synthetic_pdf(3, "Quarterly", false);
    let result = ExtractionService::default().extract(&bytes).unwrap();

    assert!(!result.recovered);
    assert_eq!(
        result.page_texts(),
        vec!["Quarterly Page 1", "Quarterly Page 2", "Quarterly Page 3"]
    );
    assert_eq!(result.metadata.get("Title").map(String::as_str), Some("Quarterly report"));
    assert_eq!(result.metadata.get("Producer").map(String::as_str), Some("lopdf"));
}

#[test]
fn test_compressed_lopdf_output() {
    let bytes = create_synthetic_pdf(4, "Packed", true);
    let result = ExtractionService::default().extract(&bytes).unwrap();

    assert_eq!(result.page_count(), 4);
    assert_eq!(result.page_texts()[3], "Packed Page 4");
    assert!(result.unreadable_pages().is_empty());
}

#[test]
fn test_large_lopdf_document() {
    let bytes = create_synthetic_pdf(200, "Bulk", true);
    let result = ExtractionService::default().extract(&bytes).unwrap();

    assert_eq!(result.page_count(), 200);
    assert_eq!(result.declared_page_count, 200);
    assert!(result
        .pages
        .iter()
        .all(|p| p.text() == format!("Bulk Page {}", p.page_number)));
}
