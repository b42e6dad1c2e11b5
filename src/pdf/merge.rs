use std::collections::BTreeSet;

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use super::overlay::{page_box, Overlay};
use super::{dictionary, dictionary_mut, inherited_attribute, ComposeError, ComposeResult};

const OVERLAY_XOBJECT_PREFIX: &str = "Overlay";

/// Paints the overlay's single page on top of `page_id`.
///
/// The overlay page becomes a form XObject inside `doc`; the target page's
/// existing content streams are left untouched and wrapped in `q`/`Q` so any
/// graphics state they leave behind cannot leak into the overlay. The page's
/// media box is not modified, and its resources are rewritten as an inline
/// copy so pages sharing a resources object are unaffected.
pub fn merge_overlay(doc: &mut Document, page_id: ObjectId, overlay: &Overlay) -> ComposeResult<()> {
    let form_id = import_overlay(doc, overlay)?;

    let mut resources = match inherited_attribute(doc, page_id, b"Resources")? {
        Some(object) => resolve_dictionary(doc, &object)?,
        None => Dictionary::new(),
    };
    let mut xobjects = match resources.get(b"XObject") {
        Ok(object) => resolve_dictionary(doc, object)?,
        Err(_) => Dictionary::new(),
    };
    let form_name = (1..)
        .map(|index| format!("{OVERLAY_XOBJECT_PREFIX}{index}"))
        .find(|candidate| !xobjects.has(candidate.as_bytes()))
        .unwrap_or_else(|| OVERLAY_XOBJECT_PREFIX.to_string());
    xobjects.set(form_name.clone(), Object::Reference(form_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let mut contents = content_references(doc, page_id)?;
    let prefix_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let suffix = format!("\nQ\nq /{form_name} Do Q\n");
    let suffix_id = doc.add_object(Stream::new(Dictionary::new(), suffix.into_bytes()));
    contents.insert(0, Object::Reference(prefix_id));
    contents.push(Object::Reference(suffix_id));

    let page = dictionary_mut(doc, page_id)?;
    page.set("Contents", Object::Array(contents));
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

/// Copies the overlay's objects into `doc` under fresh ids and wraps its page
/// content in a form XObject.
fn import_overlay(doc: &mut Document, overlay: &Overlay) -> ComposeResult<ObjectId> {
    let mut source = overlay.document().clone();
    source.renumber_objects_with(doc.max_id + 1);

    let overlay_page = source
        .get_pages()
        .into_values()
        .next()
        .ok_or_else(|| ComposeError::IncompatiblePages("overlay has no pages".to_string()))?;
    let content = source.get_page_content(overlay_page).map_err(|err| {
        ComposeError::IncompatiblePages(format!("overlay content unreadable: {err}"))
    })?;
    let overlay_dict = dictionary(&source, overlay_page)?;
    let bbox = match overlay_dict.get(b"MediaBox") {
        Ok(Object::Array(values)) => values.clone(),
        _ => page_box(),
    };
    let form_resources = match overlay_dict.get(b"Resources") {
        Ok(object) => resolve_dictionary(&source, object)?,
        Err(_) => Dictionary::new(),
    };

    let skipped: BTreeSet<ObjectId> = source
        .get_page_contents(overlay_page)
        .into_iter()
        .chain(std::iter::once(overlay_page))
        .collect();
    let highest = source.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
    for (id, object) in source.objects {
        let structural = matches!(object.type_name(), Ok("Page" | "Pages" | "Catalog"));
        if !structural && !skipped.contains(&id) {
            doc.objects.insert(id, object);
        }
    }
    doc.max_id = doc.max_id.max(highest);

    let form = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "FormType" => Object::Integer(1),
            "BBox" => bbox,
            "Resources" => Object::Dictionary(form_resources),
        },
        content,
    );
    Ok(doc.add_object(form))
}

fn resolve_dictionary(doc: &Document, object: &Object) -> ComposeResult<Dictionary> {
    match object {
        Object::Dictionary(dict) => Ok(dict.clone()),
        Object::Reference(id) => dictionary(doc, *id).cloned(),
        _ => Err(ComposeError::CorruptDocument(
            "expected a dictionary or a reference to one".to_string(),
        )),
    }
}

fn content_references(doc: &Document, page_id: ObjectId) -> ComposeResult<Vec<Object>> {
    let page = dictionary(doc, page_id)?;
    let contents = match page.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(Object::Stream(_)) => vec![Object::Reference(*id)],
            _ => {
                return Err(ComposeError::CorruptDocument(format!(
                    "page contents {id:?} are not a stream"
                )))
            }
        },
        Ok(Object::Array(items)) => items.clone(),
        Ok(_) => {
            return Err(ComposeError::CorruptDocument(
                "page contents must be indirect streams".to_string(),
            ))
        }
        Err(_) => Vec::new(),
    };
    Ok(contents)
}
