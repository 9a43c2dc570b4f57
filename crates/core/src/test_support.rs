use pdf_engine::lopdf::{dictionary, Dictionary, Document, Object, Stream};

/// Builds a PDF whose pages show `"<label> page <n>"` and have the given sizes.
pub(crate) fn document_with_pages(label: &str, sizes: &[(f32, f32)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for (index, (width, height)) in sizes.iter().enumerate() {
        let content = format!("BT /F1 18 Tf 72 72 Td ({label} page {}) Tj ET", index + 1);
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()));
        let media_box = vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(*width),
            Object::Real(*height),
        ];
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => sizes.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("fixture PDF should serialize");
    bytes
}

/// Decoded content stream of a 1-based page.
pub(crate) fn page_content(doc: &Document, page_number: u32) -> String {
    let page_id = *doc.get_pages().get(&page_number).expect("page exists");
    String::from_utf8_lossy(&doc.get_page_content(page_id).expect("content")).into_owned()
}
