//! Building a new PDF out of pages copied from other documents.

use crate::objects::{self, INHERITABLE_KEYS};
use crate::{PageSize, PdfEngineError, PdfResult};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbaImage;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashMap;
use std::io::Write;

const OUTPUT_VERSION: &str = "1.7";
const OVERLAY_NAME_PREFIX: &str = "StitchInk";

/// A page that was copied into an [`OutputDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportedPage(ObjectId);

/// An output document under construction. Pages are appended in call order.
#[derive(Debug)]
pub struct OutputDocument {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
    overlays: u32,
}

impl Default for OutputDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDocument {
    pub fn new() -> Self {
        let mut doc = Document::with_version(OUTPUT_VERSION);
        let pages_id = doc.new_object_id();
        Self { doc, pages_id, kids: Vec::new(), overlays: 0 }
    }

    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Copies the 1-based `page_number` of `source` to the end of the output.
    ///
    /// Every object the page reaches is copied under a fresh id, so importing
    /// the same page twice yields two independent pages. Inherited attributes
    /// are pinned on the copy and links into the source page tree are dropped.
    pub fn import_page(&mut self, source: &Document, page_number: u32) -> PdfResult<ImportedPage> {
        let pages = source.get_pages();
        let page_id = *pages.get(&page_number).ok_or(PdfEngineError::PageOutOfRange {
            page: page_number,
            page_count: pages.len() as u32,
        })?;

        let mut page = source.get_dictionary(page_id)?.clone();
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Some(value) = objects::page_attribute(source, page_id, key) {
                    page.set(key.to_vec(), value.clone());
                }
            }
        }
        for key in [b"Parent".as_slice(), b"B".as_slice(), b"StructParents".as_slice()] {
            page.remove(key);
        }

        let new_id = self.doc.new_object_id();
        let mut copier = ObjectCopier::new(source);
        copier.map.insert(page_id, new_id);

        let mut copied = copier.copy_dictionary(&mut self.doc, &page);
        copier.drain(&mut self.doc);
        copied.set("Parent", self.pages_id);

        self.doc.objects.insert(new_id, Object::Dictionary(copied));
        self.kids.push(new_id);
        tracing::trace!(page_number, copied = copier.map.len(), "imported page");

        Ok(ImportedPage(new_id))
    }

    pub fn page_size(&self, page: ImportedPage) -> PageSize {
        objects::page_size(&self.doc, page.0)
    }

    /// Draws `image` over the whole page, above the existing content.
    ///
    /// The image is stored as a Flate-compressed RGB XObject with its alpha
    /// channel as a soft mask. Original content runs inside a saved graphics
    /// state so its transforms cannot leak onto the overlay.
    pub fn overlay_image(&mut self, page: ImportedPage, image: &RgbaImage) -> PdfResult<()> {
        let (width, height) = image.dimensions();
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        let mut alpha = Vec::with_capacity(width as usize * height as usize);
        for pixel in image.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel.0[3]);
        }

        let smask_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width),
                "Height" => i64::from(height),
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8_i64,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        ));
        let image_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(width),
                "Height" => i64::from(height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8_i64,
                "Filter" => "FlateDecode",
                "SMask" => smask_id,
            },
            deflate(&rgb)?,
        ));

        let name = self.register_xobject(page.0, image_id)?;
        let size = self.page_size(page);
        let (x0, y0) = objects::page_origin(&self.doc, page.0);

        let open_id = self.doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let overlay = format!(
            "\nQ\nq\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
            size.width_pt, size.height_pt, x0, y0, name
        );
        let overlay_id = self.doc.add_object(Stream::new(Dictionary::new(), overlay.into_bytes()));

        let mut contents = vec![Object::Reference(open_id)];
        contents.extend(self.existing_contents(page.0)?);
        contents.push(Object::Reference(overlay_id));

        let page_dict = self.doc.get_object_mut(page.0)?.as_dict_mut()?;
        page_dict.set("Contents", contents);
        Ok(())
    }

    /// Serializes the document with every imported page in order.
    pub fn save(mut self) -> PdfResult<Vec<u8>> {
        let kids: Vec<Object> = self.kids.iter().map(|id| Object::Reference(*id)).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.kids.len() as i64,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes).map_err(|err| PdfEngineError::Save(err.to_string()))?;
        Ok(bytes)
    }

    fn existing_contents(&self, page_id: ObjectId) -> PdfResult<Vec<Object>> {
        let page = self.doc.get_dictionary(page_id)?;
        Ok(match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        })
    }

    /// Adds `image_id` to the page's XObject resources under an unused name.
    fn register_xobject(&mut self, page_id: ObjectId, image_id: ObjectId) -> PdfResult<String> {
        let xobject_ref = match resources_mut(&mut self.doc, page_id)?.get(b"XObject") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };

        let xobjects = match xobject_ref {
            Some(id) => self.doc.get_object_mut(id)?.as_dict_mut()?,
            None => {
                let resources = resources_mut(&mut self.doc, page_id)?;
                if !matches!(resources.get(b"XObject"), Ok(Object::Dictionary(_))) {
                    resources.set("XObject", Dictionary::new());
                }
                resources.get_mut(b"XObject")?.as_dict_mut()?
            }
        };

        let mut name = format!("{OVERLAY_NAME_PREFIX}{}", self.overlays);
        while xobjects.has(name.as_bytes()) {
            self.overlays += 1;
            name = format!("{OVERLAY_NAME_PREFIX}{}", self.overlays);
        }
        xobjects.set(name.clone(), image_id);
        self.overlays += 1;

        Ok(name)
    }
}

fn resources_mut(doc: &mut Document, page_id: ObjectId) -> PdfResult<&mut Dictionary> {
    let resources_ref = match doc.get_dictionary(page_id)?.get(b"Resources") {
        Ok(Object::Reference(id)) => Some(*id),
        _ => None,
    };

    match resources_ref {
        Some(id) => Ok(doc.get_object_mut(id)?.as_dict_mut()?),
        None => {
            let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
            if !matches!(page.get(b"Resources"), Ok(Object::Dictionary(_))) {
                page.set("Resources", Dictionary::new());
            }
            Ok(page.get_mut(b"Resources")?.as_dict_mut()?)
        }
    }
}

fn deflate(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(|err| PdfEngineError::Encode(err.to_string()))?;
    encoder.finish().map_err(|err| PdfEngineError::Encode(err.to_string()))
}

/// Deep copy of the object graph reachable from one page.
struct ObjectCopier<'a> {
    source: &'a Document,
    map: HashMap<ObjectId, ObjectId>,
    pending: Vec<ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    fn new(source: &'a Document) -> Self {
        Self { source, map: HashMap::new(), pending: Vec::new() }
    }

    fn copy(&mut self, target: &mut Document, object: &Object) -> Object {
        match object {
            Object::Reference(id) => self.reference(target, *id),
            Object::Array(items) => {
                Object::Array(items.iter().map(|item| self.copy(target, item)).collect())
            }
            Object::Dictionary(dict) => Object::Dictionary(self.copy_dictionary(target, dict)),
            Object::Stream(stream) => {
                let mut copied = stream.clone();
                copied.dict = self.copy_dictionary(target, &stream.dict);
                Object::Stream(copied)
            }
            other => other.clone(),
        }
    }

    fn copy_dictionary(&mut self, target: &mut Document, dict: &Dictionary) -> Dictionary {
        let mut copied = Dictionary::new();
        for (key, value) in dict.iter() {
            copied.set(key.clone(), self.copy(target, value));
        }
        copied
    }

    // Other pages of the source are not part of the output.
    fn reference(&mut self, target: &mut Document, id: ObjectId) -> Object {
        if let Some(mapped) = self.map.get(&id) {
            return Object::Reference(*mapped);
        }
        if objects::is_page_tree_node(self.source, id) {
            return Object::Null;
        }

        let mapped = target.new_object_id();
        self.map.insert(id, mapped);
        self.pending.push(id);
        Object::Reference(mapped)
    }

    fn drain(&mut self, target: &mut Document) {
        let source = self.source;
        while let Some(id) = self.pending.pop() {
            let copied = match source.get_object(id) {
                Ok(object) => self.copy(target, object),
                Err(_) => Object::Null,
            };
            if let Some(mapped) = self.map.get(&id) {
                target.objects.insert(*mapped, copied);
            }
        }
    }
}
