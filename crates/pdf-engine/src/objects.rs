//! Page-tree lookups shared by ingestion and composition.

use crate::PageSize;
use lopdf::{Document, Object, ObjectId};

/// Page attributes a page may inherit from its ancestors in the page tree.
pub(crate) const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

const MAX_DEPTH: usize = 64;

/// Follows references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    let mut current = object;
    for _ in 0..MAX_DEPTH {
        match current {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(next) => current = next,
                Err(_) => return current,
            },
            _ => return current,
        }
    }
    current
}

/// Looks `key` up on the page, then on each `Parent` in turn.
pub(crate) fn page_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// The page's effective media box as `[x0, y0, x1, y1]`.
pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> Option<[f32; 4]> {
    let array = resolve(doc, page_attribute(doc, page_id, b"MediaBox")?).as_array().ok()?;
    if array.len() != 4 {
        return None;
    }

    let mut values = [0.0; 4];
    for (slot, item) in values.iter_mut().zip(array) {
        *slot = resolve(doc, item).as_float().ok()?;
    }
    Some(values)
}

/// Page size in points, defaulting to US Letter when the media box is
/// missing or malformed.
pub(crate) fn page_size(doc: &Document, page_id: ObjectId) -> PageSize {
    media_box(doc, page_id)
        .map(|[x0, y0, x1, y1]| PageSize { width_pt: (x1 - x0).abs(), height_pt: (y1 - y0).abs() })
        .unwrap_or_default()
}

/// Lower-left corner of the page's media box.
pub(crate) fn page_origin(doc: &Document, page_id: ObjectId) -> (f32, f32) {
    media_box(doc, page_id).map(|[x0, y0, x1, y1]| (x0.min(x1), y0.min(y1))).unwrap_or((0.0, 0.0))
}

pub(crate) fn is_page_tree_node(doc: &Document, id: ObjectId) -> bool {
    let Ok(dict) = doc.get_dictionary(id) else {
        return false;
    };
    matches!(
        dict.get(b"Type").and_then(Object::as_name),
        Ok(name) if name == b"Page" || name == b"Pages"
    )
}
