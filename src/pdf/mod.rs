//! Document composition engine.
//!
//! Everything in here works on in-memory buffers and never touches storage:
//! callers hand in document bytes and get new document bytes back. The
//! pieces are layered leaves first:
//!
//! - [`overlay`] renders draw instructions onto a fresh one-page document;
//! - [`merge`] composites such an overlay onto a page of another document;
//! - [`compose`] copies a whole document, merges an overlay onto one page and
//!   serializes the result.

use lopdf::{Dictionary, Document, Object, ObjectId};
use thiserror::Error;

pub mod compose;
pub mod merge;
pub mod overlay;

pub use compose::{page_count, personalize, sign, sign_at, SignedDocument};
pub use overlay::{DrawInstruction, Overlay, RasterImage};

/// US Letter, in PDF points.
pub const PAGE_WIDTH: i64 = 612;
pub const PAGE_HEIGHT: i64 = 792;

/// Depth limit when walking `/Parent` chains of malformed page trees.
const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("corrupt document: {0}")]
    CorruptDocument(String),
    #[error("incompatible pages: {0}")]
    IncompatiblePages(String),
    #[error("failed to serialize document: {0}")]
    Serialization(String),
}

pub type ComposeResult<T> = Result<T, ComposeError>;

pub(crate) fn dictionary<'a>(doc: &'a Document, id: ObjectId) -> ComposeResult<&'a Dictionary> {
    doc.get_object(id)
        .and_then(Object::as_dict)
        .map_err(|err| ComposeError::CorruptDocument(format!("object {id:?}: {err}")))
}

pub(crate) fn dictionary_mut(
    doc: &mut Document,
    id: ObjectId,
) -> ComposeResult<&mut Dictionary> {
    doc.get_object_mut(id)
        .and_then(Object::as_dict_mut)
        .map_err(|err| ComposeError::CorruptDocument(format!("object {id:?}: {err}")))
}

/// Looks up `key` on a page, falling back to the page tree ancestors the way
/// inheritable page attributes resolve.
pub(crate) fn inherited_attribute(
    doc: &Document,
    page_id: ObjectId,
    key: &[u8],
) -> ComposeResult<Option<Object>> {
    let mut node = dictionary(doc, page_id)?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Ok(Some(value.clone()));
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => node = dictionary(doc, parent)?,
            Err(_) => return Ok(None),
        }
    }
    Err(ComposeError::CorruptDocument(format!(
        "page tree above {page_id:?} is too deep"
    )))
}
