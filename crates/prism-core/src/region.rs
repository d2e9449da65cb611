//! Content-type regions of composite documents.
//!
//! A composite document embeds several content types in one file (markup with
//! embedded style and script). The dispatcher asks a [`RegionResolver`] which
//! content type governs the byte offset under a request so that only the
//! provider responsible for that region is invoked.

use std::ops::Range;

use crate::document::DocumentSnapshot;

/// Maps document offsets to the content type governing them.
pub trait RegionResolver: Send + Sync {
    /// Content type at the given byte offset, if any.
    fn content_type_at(&self, snapshot: &DocumentSnapshot, offset: usize) -> Option<String>;

    /// Content types present anywhere in the document, in a stable order.
    fn content_types_in(&self, snapshot: &DocumentSnapshot) -> Vec<String>;
}

/// Treats every document as a single region of its own language tag.
///
/// The right resolver for hosts that never serve composite documents.
pub struct MonolithicRegions;

impl RegionResolver for MonolithicRegions {
    fn content_type_at(&self, snapshot: &DocumentSnapshot, _offset: usize) -> Option<String> {
        Some(snapshot.language_id.clone())
    }

    fn content_types_in(&self, snapshot: &DocumentSnapshot) -> Vec<String> {
        vec![snapshot.language_id.clone()]
    }
}

/// One embedded region: a half-open byte range governed by a content type.
#[derive(Debug, Clone)]
pub struct EmbeddedRegion {
    pub content_type: String,
    pub range: Range<usize>,
}

impl EmbeddedRegion {
    pub fn new(content_type: impl Into<String>, range: Range<usize>) -> Self {
        Self {
            content_type: content_type.into(),
            range,
        }
    }
}

/// Resolver backed by an explicit region table.
///
/// Offsets outside every listed region fall back to the document's own
/// language tag. Region scanners that re-derive the table from the text on
/// every edit produce exactly this shape.
pub struct FixedRegions {
    regions: Vec<EmbeddedRegion>,
}

impl FixedRegions {
    pub fn new(regions: Vec<EmbeddedRegion>) -> Self {
        Self { regions }
    }
}

impl RegionResolver for FixedRegions {
    fn content_type_at(&self, snapshot: &DocumentSnapshot, offset: usize) -> Option<String> {
        self.regions
            .iter()
            .find(|region| region.range.contains(&offset))
            .map(|region| region.content_type.clone())
            .or_else(|| Some(snapshot.language_id.clone()))
    }

    fn content_types_in(&self, snapshot: &DocumentSnapshot) -> Vec<String> {
        let mut types = vec![snapshot.language_id.clone()];
        for region in &self.regions {
            if !types.contains(&region.content_type) {
                types.push(region.content_type.clone());
            }
        }
        types
    }
}
