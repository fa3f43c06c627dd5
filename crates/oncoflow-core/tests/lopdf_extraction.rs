use lopdf::dictionary;
use lopdf::{Document, Object, Stream};
use oncoflow_core::{DocumentTextExtractor, ExtractError, PageAnnotation};

/// Minimal multi-page PDF with one Helvetica text run per page.
fn make_test_pdf(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.4");

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

#[tokio::test]
async fn reads_every_page_in_order() {
    let pdf = make_test_pdf(&["Consulta inicial", "Quimioterapia ciclo uno", "Control final"]);
    let extractor = DocumentTextExtractor::lopdf();

    let doc = extractor.extract(pdf, PageAnnotation::Marker).await.unwrap();
    assert_eq!(doc.page_count, 3);

    let first = doc.text.find("--- Página 1 ---").unwrap();
    let second = doc.text.find("--- Página 2 ---").unwrap();
    let third = doc.text.find("--- Página 3 ---").unwrap();
    assert!(first < second && second < third);

    assert!(doc.text[first..second].contains("Consulta"), "got: {}", doc.text);
    assert!(doc.text[second..third].contains("Quimioterapia"), "got: {}", doc.text);
    assert!(doc.text[third..].contains("Control"), "got: {}", doc.text);
}

#[tokio::test]
async fn unannotated_pages_have_no_markers() {
    let pdf = make_test_pdf(&["Uno", "Dos"]);
    let doc = DocumentTextExtractor::lopdf()
        .extract(pdf, PageAnnotation::None)
        .await
        .unwrap();
    assert_eq!(doc.page_count, 2);
    assert!(!doc.text.contains("Página"));
    assert!(doc.text.contains("Uno") && doc.text.contains("Dos"));
}

#[tokio::test]
async fn truncated_pdf_is_unreadable() {
    let mut pdf = make_test_pdf(&["Uno"]);
    pdf.truncate(40);
    let err = DocumentTextExtractor::lopdf()
        .extract(pdf, PageAnnotation::Marker)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExtractError::UnreadableDocument(_) | ExtractError::NoText { pages: 0 }
    ));
}
