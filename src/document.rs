//! Score documents and page handles.
//!
//! Object parsing and serialization are delegated to `lopdf`; this module
//! resolves the page attributes the pipeline needs (inherited boxes,
//! resources, content streams) and applies composed overlays to an output
//! copy of the document.

use crate::compose::PageOverlay;
use crate::error::{ComposeError, Result, SampleError};
use crate::geometry::Rect;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::path::Path;

/// Depth limit when walking `/Parent` chains or reference chains.
const MAX_RESOLVE_DEPTH: usize = 32;

/// Fallback MediaBox (US Letter) for pages that omit it.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// A loaded PDF whose pages are each expected to hold one system.
#[derive(Debug, Clone)]
pub struct ScoreDocument {
    inner: Document,
    page_ids: Vec<ObjectId>,
}

impl ScoreDocument {
    /// Open a PDF file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let inner = Document::load(path.as_ref())?;
        Ok(Self::from_lopdf(inner))
    }

    /// Parse a PDF from memory.
    pub fn load_mem(bytes: &[u8]) -> Result<Self> {
        let inner = Document::load_mem(bytes)?;
        Ok(Self::from_lopdf(inner))
    }

    /// Wrap an already parsed document.
    pub fn from_lopdf(inner: Document) -> Self {
        let page_ids = inner.get_pages().into_values().collect();
        Self { inner, page_ids }
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Handle to the page at zero-based `index`.
    pub fn page(&self, index: usize) -> Option<Page<'_>> {
        let id = *self.page_ids.get(index)?;
        Some(Page::new(&self.inner, index, id))
    }

    /// Underlying lopdf document.
    pub fn inner(&self) -> &Document {
        &self.inner
    }

    /// Write the document to a file.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.inner.save(path.as_ref())?;
        Ok(())
    }

    /// Serialize the document to bytes.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.inner.save_to(&mut out)?;
        Ok(out)
    }

    /// Append a composed overlay to its page.
    ///
    /// The page's `/Contents` becomes `[prefix, original…, suffix]`; the
    /// original streams are referenced, never rewritten.
    pub fn apply_overlay(
        &mut self,
        overlay: &PageOverlay,
    ) -> std::result::Result<(), ComposeError> {
        let page_id = *self
            .page_ids
            .get(overlay.index)
            .ok_or(ComposeError::MissingPage {
                index: overlay.index,
            })?;

        let original = content_references(&mut self.inner, page_id)?;

        let prefix_id = self
            .inner
            .add_object(Stream::new(Dictionary::new(), overlay.prefix.clone()));
        let suffix_id = self
            .inner
            .add_object(Stream::new(Dictionary::new(), overlay.suffix.clone()));

        let mut contents = Vec::with_capacity(original.len() + 2);
        contents.push(Object::Reference(prefix_id));
        contents.extend(original.into_iter().map(Object::Reference));
        contents.push(Object::Reference(suffix_id));

        let page = self
            .inner
            .get_dictionary_mut(page_id)
            .map_err(|e| ComposeError::UnsupportedContents {
                reason: e.to_string(),
            })?;
        page.set("Contents", Object::Array(contents));
        if let Some(media_box) = overlay.media_box {
            page.set("MediaBox", rect_to_object(&media_box));
        }
        if let Some(crop_box) = overlay.crop_box {
            page.set("CropBox", rect_to_object(&crop_box));
        }
        Ok(())
    }
}

/// Read-only handle to one page of a [`ScoreDocument`].
#[derive(Debug, Clone)]
pub struct Page<'a> {
    doc: &'a Document,
    index: usize,
    id: ObjectId,
    media_box: Rect,
    crop_box: Option<Rect>,
    rotation: i64,
}

impl<'a> Page<'a> {
    fn new(doc: &'a Document, index: usize, id: ObjectId) -> Self {
        let media_box = inherited(doc, id, b"MediaBox")
            .and_then(|obj| read_rect(doc, obj))
            .unwrap_or_else(|| {
                let [x0, y0, x1, y1] = DEFAULT_MEDIA_BOX;
                Rect::from_corners(x0, y0, x1, y1)
            });
        let crop_box = inherited(doc, id, b"CropBox").and_then(|obj| read_rect(doc, obj));
        let rotation = inherited(doc, id, b"Rotate")
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_i64().ok())
            .unwrap_or(0);

        Self {
            doc,
            index,
            id,
            media_box,
            crop_box,
            rotation,
        }
    }

    /// Zero-based page index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Object id of the page dictionary.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The (possibly inherited) MediaBox.
    pub fn media_box(&self) -> Rect {
        self.media_box
    }

    /// The (possibly inherited) CropBox, if any.
    pub fn crop_box(&self) -> Option<Rect> {
        self.crop_box
    }

    /// The region a viewer displays: CropBox clipped to MediaBox.
    ///
    /// Returns a zero-sized rectangle when the boxes do not overlap.
    pub fn visible_box(&self) -> Rect {
        match self.crop_box {
            Some(crop) => self
                .media_box
                .intersection(&crop)
                .unwrap_or(Rect::new(crop.left(), crop.bottom(), 0.0, 0.0)),
            None => self.media_box,
        }
    }

    /// The `/Rotate` value in degrees.
    pub fn rotation(&self) -> i64 {
        self.rotation
    }

    /// The document this page belongs to.
    pub fn document(&self) -> &'a Document {
        self.doc
    }

    /// Resolved page resources, following inheritance.
    pub fn resources(&self) -> Option<&'a Dictionary> {
        inherited(self.doc, self.id, b"Resources")
            .and_then(|obj| resolve(self.doc, obj))
            .and_then(|obj| obj.as_dict().ok())
    }

    /// Concatenated, decoded page content.
    pub fn content(&self) -> std::result::Result<Vec<u8>, SampleError> {
        let page = self
            .doc
            .get_dictionary(self.id)
            .map_err(|e| SampleError::Content {
                reason: e.to_string(),
            })?;
        let contents = page.get(b"Contents").map_err(|_| SampleError::NoContent)?;

        let mut data = Vec::new();
        for stream in content_streams(self.doc, contents)? {
            let decoded = stream_data(stream).map_err(|reason| SampleError::Content { reason })?;
            data.extend_from_slice(&decoded);
            // Streams are concatenated at token boundaries.
            data.push(b'\n');
        }
        Ok(data)
    }
}

/// Collect the streams behind a `/Contents` value.
fn content_streams<'a>(
    doc: &'a Document,
    contents: &'a Object,
) -> std::result::Result<Vec<&'a Stream>, SampleError> {
    let resolved = resolve(doc, contents).ok_or_else(|| SampleError::Content {
        reason: "content stream reference cannot be resolved".to_string(),
    })?;
    match resolved {
        Object::Stream(stream) => Ok(vec![stream]),
        Object::Array(items) => items
            .iter()
            .map(|item| match resolve(doc, item) {
                Some(Object::Stream(stream)) => Ok(stream),
                Some(other) => Err(SampleError::Content {
                    reason: format!("content array holds {} instead of a stream", kind_name(other)),
                }),
                None => Err(SampleError::Content {
                    reason: "content stream reference cannot be resolved".to_string(),
                }),
            })
            .collect(),
        other => Err(SampleError::Content {
            reason: format!("/Contents is {} instead of a stream", kind_name(other)),
        }),
    }
}

/// Object ids of a page's content streams in the output document.
///
/// Direct (inline) streams are promoted to indirect objects so the new
/// `/Contents` array only holds references.
fn content_references(
    doc: &mut Document,
    page_id: ObjectId,
) -> std::result::Result<Vec<ObjectId>, ComposeError> {
    let unsupported = |reason: String| ComposeError::UnsupportedContents { reason };

    let contents = doc
        .get_dictionary(page_id)
        .and_then(|page| page.get(b"Contents"))
        .map_err(|e| unsupported(e.to_string()))?
        .clone();

    let items = match contents {
        Object::Reference(id) => match doc
            .get_object(id)
            .map_err(|e| unsupported(e.to_string()))?
        {
            Object::Stream(_) => return Ok(vec![id]),
            Object::Array(items) => items.clone(),
            other => {
                return Err(unsupported(format!(
                    "/Contents references {} instead of a stream",
                    kind_name(other)
                )))
            },
        },
        Object::Array(items) => items,
        Object::Stream(stream) => return Ok(vec![doc.add_object(stream)]),
        other => {
            return Err(unsupported(format!(
                "/Contents is {} instead of a stream",
                kind_name(&other)
            )))
        },
    };

    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Object::Reference(id) => match doc.get_object(id) {
                Ok(Object::Stream(_)) => ids.push(id),
                _ => {
                    return Err(unsupported(format!(
                        "content entry {} {} R is not a stream",
                        id.0, id.1
                    )))
                },
            },
            Object::Stream(stream) => ids.push(doc.add_object(stream)),
            other => {
                return Err(unsupported(format!(
                    "content array holds {} instead of a stream",
                    kind_name(&other)
                )))
            },
        }
    }
    Ok(ids)
}

/// Follow indirect references until a direct object is reached.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    let mut current = obj;
    for _ in 0..MAX_RESOLVE_DEPTH {
        match current {
            Object::Reference(id) => current = doc.get_object(*id).ok()?,
            _ => return Some(current),
        }
    }
    log::warn!("Reference chain exceeded {} hops", MAX_RESOLVE_DEPTH);
    None
}

/// Look up a page attribute, walking up the page tree for inheritable keys.
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_RESOLVE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").ok()?;
        node = resolve(doc, parent)?.as_dict().ok()?;
    }
    None
}

/// Read a 4-number PDF rectangle.
pub(crate) fn read_rect(doc: &Document, obj: &Object) -> Option<Rect> {
    let array = resolve(doc, obj)?.as_array().ok()?;
    if array.len() != 4 {
        return None;
    }
    let mut values = [0.0f32; 4];
    for (slot, item) in values.iter_mut().zip(array) {
        *slot = resolve(doc, item)?.as_float().ok()?;
    }
    let [x0, y0, x1, y1] = values;
    Some(Rect::from_corners(x0, y0, x1, y1))
}

/// Read a number array of fixed length (e.g. `/Matrix`, `/Decode`).
pub(crate) fn read_numbers(doc: &Document, obj: &Object) -> Option<Vec<f32>> {
    resolve(doc, obj)?
        .as_array()
        .ok()?
        .iter()
        .map(|item| resolve(doc, item).and_then(|o| o.as_float().ok()))
        .collect()
}

/// Decoded bytes of a stream.
///
/// Streams without `/Filter` are returned as stored; lopdf reports an error
/// for them from `decompressed_content`.
pub(crate) fn stream_data(stream: &Stream) -> std::result::Result<Vec<u8>, String> {
    if stream.dict.has(b"Filter") {
        stream.decompressed_content().map_err(|e| e.to_string())
    } else {
        Ok(stream.content.clone())
    }
}

fn kind_name(obj: &Object) -> &'static str {
    match obj {
        Object::Null => "null",
        Object::Boolean(_) => "a boolean",
        Object::Integer(_) => "an integer",
        Object::Real(_) => "a number",
        Object::Name(_) => "a name",
        Object::String(..) => "a string",
        Object::Array(_) => "an array",
        Object::Dictionary(_) => "a dictionary",
        Object::Stream(_) => "a stream",
        Object::Reference(_) => "a reference",
    }
}

fn rect_to_object(rect: &Rect) -> Object {
    Object::Array(
        rect.to_pdf_array()
            .iter()
            .map(|v| Object::Real((*v).into()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn single_page_doc(page_extra: Dictionary, content: &[u8]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.to_vec()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        };
        for (key, value) in page_extra.into_iter() {
            page.set(key, value);
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 400.into(), 200.into()],
                "Rotate" => 90,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn test_inherited_media_box_and_rotation() {
        let doc = ScoreDocument::from_lopdf(single_page_doc(dictionary! {}, b"0 0 m 10 0 l S"));
        let page = doc.page(0).unwrap();
        assert_eq!(page.media_box(), Rect::new(0.0, 0.0, 400.0, 200.0));
        assert_eq!(page.rotation(), 90);
        assert!(page.crop_box().is_none());
        assert_eq!(page.visible_box(), page.media_box());
    }

    #[test]
    fn test_crop_box_clipped_to_media_box() {
        let extra = dictionary! {
            "CropBox" => vec![50.into(), 100.into(), 450.into(), 250.into()],
        };
        let doc = ScoreDocument::from_lopdf(single_page_doc(extra, b""));
        let page = doc.page(0).unwrap();
        assert_eq!(page.visible_box(), Rect::new(50.0, 100.0, 350.0, 100.0));
    }

    #[test]
    fn test_page_content_is_read() {
        let doc = ScoreDocument::from_lopdf(single_page_doc(dictionary! {}, b"0 0 m 10 0 l S"));
        let content = doc.page(0).unwrap().content().unwrap();
        assert!(content.starts_with(b"0 0 m 10 0 l S"));
    }

    #[test]
    fn test_missing_contents_is_no_content() {
        let mut inner = single_page_doc(dictionary! {}, b"");
        let page_id = inner.get_pages()[&1];
        inner.get_dictionary_mut(page_id).unwrap().remove(b"Contents");
        let doc = ScoreDocument::from_lopdf(inner);
        assert_eq!(doc.page(0).unwrap().content(), Err(SampleError::NoContent));
    }

    #[test]
    fn test_apply_overlay_wraps_contents() {
        let mut doc = ScoreDocument::from_lopdf(single_page_doc(dictionary! {}, b"0 0 m 10 0 l S"));
        let overlay = PageOverlay {
            index: 0,
            prefix: b"q\n".to_vec(),
            suffix: b"Q\n".to_vec(),
            media_box: Some(Rect::new(0.0, -50.0, 400.0, 250.0)),
            crop_box: None,
        };
        doc.apply_overlay(&overlay).unwrap();

        let page = doc.page(0).unwrap();
        assert_eq!(page.media_box(), Rect::new(0.0, -50.0, 400.0, 250.0));
        let content = page.content().unwrap();
        let text = String::from_utf8(content).unwrap();
        assert!(text.starts_with("q\n"));
        assert!(text.contains("0 0 m 10 0 l S"));
        assert!(text.trim_end().ends_with('Q'));
    }

    #[test]
    fn test_apply_overlay_rejects_non_stream_contents() {
        let overlay = PageOverlay {
            index: 0,
            prefix: b"q\n".to_vec(),
            suffix: b"Q\n".to_vec(),
            media_box: None,
            crop_box: None,
        };

        let direct = dictionary! { "Contents" => 7 };
        let mut doc = ScoreDocument::from_lopdf(single_page_doc(direct, b""));
        let Err(ComposeError::UnsupportedContents { reason }) = doc.apply_overlay(&overlay) else {
            panic!("integer /Contents accepted");
        };
        assert!(reason.contains("an integer"), "{}", reason);

        let listed = dictionary! { "Contents" => vec![Object::Boolean(true)] };
        let mut doc = ScoreDocument::from_lopdf(single_page_doc(listed, b""));
        let Err(ComposeError::UnsupportedContents { reason }) = doc.apply_overlay(&overlay) else {
            panic!("boolean content entry accepted");
        };
        assert!(reason.contains("a boolean"), "{}", reason);
    }

    #[test]
    fn test_apply_overlay_to_missing_page() {
        let mut doc = ScoreDocument::from_lopdf(single_page_doc(dictionary! {}, b""));
        let overlay = PageOverlay {
            index: 3,
            prefix: Vec::new(),
            suffix: Vec::new(),
            media_box: None,
            crop_box: None,
        };
        assert_eq!(
            doc.apply_overlay(&overlay),
            Err(ComposeError::MissingPage { index: 3 })
        );
    }
}
