//! Document assembly: merge one-page PDFs into the output document.
//!
//! Pages arrive in completion order from concurrent workers; they are
//! sorted by source page number before merging. Each input document has its
//! objects renumbered past the previous one, its catalog and page tree are
//! dropped, and its pages are re-parented under a single new page tree.
//!
//! The merged bytes are built entirely in memory. [`write_atomically`] is the
//! only step that touches the destination.

use crate::error::{Result, StencilError};
use lopdf::{dictionary, Document, Object, ObjectId};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Merge `(page_num, single-page PDF)` pairs into one PDF, ordered by page number.
pub fn assemble(mut pages: Vec<(usize, Vec<u8>)>) -> Result<Vec<u8>> {
    if pages.is_empty() {
        return Err(StencilError::Internal(
            "cannot assemble a document without pages".into(),
        ));
    }
    pages.sort_by_key(|(n, _)| *n);

    let mut output = Document::with_version("1.5");
    let mut kids: Vec<ObjectId> = Vec::with_capacity(pages.len());
    let mut next_id = 1;

    for (page_num, bytes) in &pages {
        let broken = |detail: String| StencilError::Render {
            page: *page_num,
            detail,
        };

        let mut doc = Document::load_mem(bytes)
            .map_err(|e| broken(format!("page PDF could not be re-read: {}", e)))?;
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let inherited_box = root_media_box(&doc);
        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        if page_ids.is_empty() {
            return Err(broken("page PDF has no pages".into()));
        }

        for (id, object) in doc.objects {
            match type_name(&object) {
                Some(b"Catalog") | Some(b"Pages") => continue,
                _ => {
                    output.objects.insert(id, object);
                }
            }
        }

        for id in &page_ids {
            if let Some(Object::Dictionary(dict)) = output.objects.get_mut(id) {
                if !dict.has(b"MediaBox") {
                    match &inherited_box {
                        Some(mb) => dict.set("MediaBox", mb.clone()),
                        None => warn!("Page {} has no MediaBox", page_num),
                    }
                }
            }
        }
        kids.extend(page_ids);
    }

    let pages_id: ObjectId = (next_id, 0);
    let catalog_id: ObjectId = (next_id + 1, 0);
    output.max_id = next_id + 1;

    for id in &kids {
        if let Some(Object::Dictionary(dict)) = output.objects.get_mut(id) {
            dict.set("Parent", pages_id);
        }
    }

    output.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
        }),
    );
    output.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        }),
    );
    output.trailer.set("Root", catalog_id);
    output.compress();

    let mut buffer = Vec::new();
    output
        .save_to(&mut buffer)
        .map_err(|e| StencilError::Internal(format!("PDF serialization failed: {}", e)))?;

    debug!(
        "Assembled {} pages into {} bytes",
        kids.len(),
        buffer.len()
    );
    Ok(buffer)
}

/// Count the pages of an in-memory PDF.
pub fn page_count(bytes: &[u8]) -> Result<usize> {
    let doc = Document::load_mem(bytes).map_err(|e| StencilError::unreadable("document", e))?;
    Ok(doc.get_pages().len())
}

/// Write `bytes` to `path` through a uniquely named temporary sibling and a
/// rename.
///
/// Concurrent writers never share a temporary file. Nothing is left at
/// `path` or at the temporary location when any step fails.
pub async fn write_atomically(path: &Path, bytes: Vec<u8>) -> Result<()> {
    let target = path.to_path_buf();
    let len = bytes.len();
    tokio::task::spawn_blocking(move || persist(&target, &bytes))
        .await
        .map_err(|e| StencilError::Internal(format!("Write task panicked: {}", e)))??;
    debug!("Wrote {} bytes to {}", len, path.display());
    Ok(())
}

fn persist(path: &Path, bytes: &[u8]) -> Result<()> {
    let fail = |source: std::io::Error| StencilError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(fail)?;

    // Dropping the handle on any error path deletes the temporary file.
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

fn type_name(object: &Object) -> Option<&[u8]> {
    object
        .as_dict()
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok())
}

/// MediaBox declared on the root page tree, if any.
fn root_media_box(doc: &Document) -> Option<Object> {
    let catalog = doc.catalog().ok()?;
    let pages_id = catalog.get(b"Pages").ok()?.as_reference().ok()?;
    let pages = doc.get_dictionary(pages_id).ok()?;
    pages.get(b"MediaBox").ok().cloned()
}
