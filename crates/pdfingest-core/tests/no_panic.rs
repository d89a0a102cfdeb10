//! Hostile input never panics
//!
//! Run with: cargo test -p pdfingest-core --test no_panic

mod common;

use common::{show_text, text_document, text_pages};
use pdfingest_core::{parse, ExtractionService, ParserOptions};
use proptest::prelude::*;

fn sample_pdf() -> Vec<u8> {
    let mut pdf = text_document(&[
        &show_text("Alpha"),
        "BT /F1 10 Tf 72 700 Td [(Hello) -300 (World)] TJ ET",
        "q 1 0 0 1 10 10 cm /Fm1 Do Q",
    ]);
    pdf.object(
        14,
        "<< /Type /Page /Parent 2 0 R /Contents 15 0 R \
         /Resources << /Font << /F1 3 0 R >> /XObject << /Fm1 20 0 R >> >> >>",
    )
    .flate_stream(
        20,
        "/Type /XObject /Subtype /Form /BBox [0 0 100 100] /Resources << /Font << /F1 3 0 R >> >>",
        b"BT /F1 12 Tf (In form) Tj ET",
    )
    .object(4, "<< /Title (Sample) >>")
    .trailer("/Info 4 0 R");
    pdf.build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: arbitrary bytes either parse or return an error
    #[test]
    fn arbitrary_bytes_never_panic(input in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = ExtractionService::default().extract(&input);
    }

    /// Property: bytes behind a valid header reach the recovery path safely
    #[test]
    fn header_then_noise_never_panics(noise in prop::collection::vec(any::<u8>(), 0..2048)) {
        let mut input = b"%PDF-1.7\n".to_vec();
        input.extend_from_slice(&noise);
        let _ = ExtractionService::default().extract(&input);
    }

    /// Property: overwriting bytes of a valid file never panics
    #[test]
    fn mutated_document_never_panics(
        edits in prop::collection::vec((any::<prop::sample::Index>(), any::<u8>()), 1..16)
    ) {
        let mut input = sample_pdf();
        for (index, byte) in edits {
            let at = index.index(input.len());
            input[at] = byte;
        }
        let _ = ExtractionService::default().extract(&input);
    }

    /// Property: every prefix of a valid file is handled
    #[test]
    fn truncated_document_never_panics(cut in 0usize..4096) {
        let input = sample_pdf();
        let cut = cut.min(input.len());
        let _ = ExtractionService::default().extract(&input[..cut]);
    }

    /// Property: page slots never fall below the pages actually present
    #[test]
    fn page_slots_cover_kids(count in 1usize..12) {
        let texts: Vec<String> = (0..count).map(|i| format!("Page {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let input = text_pages(&refs);

        let doc = parse(&input, &ParserOptions::default()).unwrap();
        prop_assert_eq!(doc.pages().len(), count);
        prop_assert_eq!(doc.declared_page_count(), count);
    }
}

#[test]
fn test_sample_fixture_is_readable() {
    let result = ExtractionService::default().extract(&sample_pdf()).unwrap();
    assert_eq!(
        result.page_texts(),
        vec!["Alpha".to_string(), "Hello World".to_string(), "In form".to_string()]
    );
}
