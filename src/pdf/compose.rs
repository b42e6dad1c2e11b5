use std::collections::BTreeSet;

use chrono::{DateTime, SubsecRound, Utc};
use lopdf::{dictionary, Document, Object, ObjectId};

use super::merge::merge_overlay;
use super::overlay::{DrawInstruction, Overlay, RasterImage};
use super::{dictionary_mut, inherited_attribute, ComposeError, ComposeResult};

const NAME_POSITION: (i64, i64) = (100, 700);
const ADDRESS_POSITION: (i64, i64) = (100, 680);
const SIGNATURE_POSITION: (i64, i64) = (100, 100);
const SIGNATURE_SIZE: (i64, i64) = (200, 100);
const SIGNED_ON_POSITION: (i64, i64) = (100, 90);

pub const SIGNED_ON_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Page attributes a page may inherit from its page tree ancestors.
const INHERITABLE: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

#[derive(Debug)]
pub struct SignedDocument {
    pub bytes: Vec<u8>,
    pub signed_at: DateTime<Utc>,
}

/// Stamps the recipient's name and address onto the first page of a copy of
/// `template`.
pub fn personalize(template: &[u8], name: &str, address: &str) -> ComposeResult<Vec<u8>> {
    let source = parse(template)?;
    let mut output = copy_pages(&source)?;

    let overlay = Overlay::build(vec![
        DrawInstruction::text(
            format!("Name: {name}"),
            NAME_POSITION.0,
            NAME_POSITION.1,
        ),
        DrawInstruction::text(
            format!("Address: {address}"),
            ADDRESS_POSITION.0,
            ADDRESS_POSITION.1,
        ),
    ])?;
    let first = target_page(&output, Target::First)?;
    merge_overlay(&mut output, first, &overlay)?;

    serialize(output)
}

pub fn sign(generated: &[u8], signature: RasterImage) -> ComposeResult<SignedDocument> {
    sign_at(generated, signature, Utc::now())
}

/// Stamps `signature` and a "Signed on" line onto the last page of a copy of
/// `generated`. The timestamp is truncated to whole seconds and returned
/// exactly as printed.
pub fn sign_at(
    generated: &[u8],
    signature: RasterImage,
    signed_at: DateTime<Utc>,
) -> ComposeResult<SignedDocument> {
    let signed_at = signed_at.trunc_subsecs(0);
    let source = parse(generated)?;
    let mut output = copy_pages(&source)?;

    let overlay = Overlay::build(vec![
        DrawInstruction::Image {
            image: signature,
            x: SIGNATURE_POSITION.0,
            y: SIGNATURE_POSITION.1,
            width: SIGNATURE_SIZE.0,
            height: SIGNATURE_SIZE.1,
        },
        DrawInstruction::text(
            format!("Signed on {}", signed_at.format(SIGNED_ON_FORMAT)),
            SIGNED_ON_POSITION.0,
            SIGNED_ON_POSITION.1,
        ),
    ])?;
    let last = target_page(&output, Target::Last)?;
    merge_overlay(&mut output, last, &overlay)?;

    Ok(SignedDocument {
        bytes: serialize(output)?,
        signed_at,
    })
}

pub fn page_count(bytes: &[u8]) -> ComposeResult<usize> {
    Ok(parse(bytes)?.get_pages().len())
}

pub fn parse(bytes: &[u8]) -> ComposeResult<Document> {
    let doc = Document::load_mem(bytes)
        .map_err(|err| ComposeError::CorruptDocument(err.to_string()))?;
    if doc.is_encrypted() {
        return Err(ComposeError::CorruptDocument(
            "encrypted documents are not supported".to_string(),
        ));
    }
    if doc.get_pages().is_empty() {
        return Err(ComposeError::CorruptDocument(
            "document has no pages".to_string(),
        ));
    }
    Ok(doc)
}

/// Builds a new document holding every page of `source`, in order, under a
/// fresh flat page tree.
///
/// The result owns its own object table, so nothing done to it is visible
/// through `source`. Attributes the pages inherited from intermediate page
/// tree nodes are written onto each page before those nodes are dropped, and
/// document-level catalog entries (forms, outlines, names) are not carried
/// over.
pub fn copy_pages(source: &Document) -> ComposeResult<Document> {
    let pages: Vec<ObjectId> = source.get_pages().into_values().collect();
    if pages.is_empty() {
        return Err(ComposeError::CorruptDocument(
            "document has no pages".to_string(),
        ));
    }

    let mut output = Document::with_version(source.version.clone());
    output.objects = source.objects.clone();
    output.max_id = source.max_id;

    let retired: BTreeSet<ObjectId> = output
        .objects
        .iter()
        .filter(|(_, object)| matches!(object.type_name(), Ok("Pages" | "Catalog")))
        .map(|(id, _)| *id)
        .collect();

    let pages_id = output.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());
    for page_id in &pages {
        let mut inherited = Vec::new();
        for key in INHERITABLE {
            if let Some(value) = inherited_attribute(source, *page_id, key.as_bytes())? {
                inherited.push((key, value));
            }
        }

        let page = dictionary_mut(&mut output, *page_id)?;
        for (key, value) in inherited {
            if !page.has(key.as_bytes()) {
                page.set(key, value);
            }
        }
        page.set("Parent", Object::Reference(pages_id));
        kids.push(Object::Reference(*page_id));
    }

    for id in &retired {
        output.objects.remove(id);
    }
    output.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(pages.len() as i64),
        }),
    );
    let catalog_id = output.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    output.trailer.set("Root", Object::Reference(catalog_id));
    if let Ok(info) = source.trailer.get(b"Info") {
        output.trailer.set("Info", info.clone());
    }

    Ok(output)
}

pub fn serialize(mut doc: Document) -> ComposeResult<Vec<u8>> {
    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|err| ComposeError::Serialization(err.to_string()))?;
    Ok(bytes)
}

#[derive(Clone, Copy)]
enum Target {
    First,
    Last,
}

fn target_page(doc: &Document, target: Target) -> ComposeResult<ObjectId> {
    let pages = doc.get_pages();
    let page = match target {
        Target::First => pages.values().next(),
        Target::Last => pages.values().next_back(),
    };
    page.copied()
        .ok_or_else(|| ComposeError::IncompatiblePages("document has no pages".to_string()))
}
