//! Document parser
//!
//! Turns the raw bytes of a PDF into a lazily materialised object graph
//! plus the resolved page list. Parsing is tolerant:
//!
//! - a missing or damaged cross-reference index is rebuilt by a linear
//!   scan of the buffer
//! - reference cycles resolve to null and are noted instead of failing
//! - a page that cannot be loaded keeps its slot and is marked unreadable
//!
//! Only problems that leave no usable page tree are returned as
//! [`ParseError`]s.

mod filters;
mod lexer;
mod object;
mod objstm;
mod recovery;
mod xref;

use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ParseError;

pub use filters::FilterError;
pub use object::{Dictionary, ObjRef, Object, Stream};

pub(crate) use lexer::{find_pattern, is_whitespace, Lexer, SyntaxError, Token};

use filters::{apply_filters, filter_chain};
use objstm::{ObjectStream, SlotError};
use xref::XrefEntry;

/// US Letter, used when no `/MediaBox` is inherited
pub const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

/// Smallest plausible footprint of one page object, used to cap padding
/// when a declared `/Count` is absurd
const MIN_BYTES_PER_PAGE: usize = 20;

static NULL: Object = Object::Null;

/// Parser limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Longest reference chain followed before giving up
    pub max_reference_depth: usize,
    /// Deepest page tree nesting walked
    pub max_tree_depth: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            max_reference_depth: 32,
            max_tree_depth: 64,
        }
    }
}

/// Why an object could not be materialised
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadFault {
    #[error("object is not in the cross-reference index")]
    Missing,

    #[error("object is marked free")]
    Free,

    #[error("malformed object: {0}")]
    Malformed(String),

    #[error("object data is truncated")]
    Truncated,

    #[error("reference cycle")]
    Cyclic,
}

/// A page with its inherited attributes applied
#[derive(Debug, Clone)]
pub struct Page {
    pub dict: Dictionary,
    pub resources: Dictionary,
    pub media_box: [f64; 4],
    /// Normalised to 0, 90, 180 or 270
    pub rotation: i64,
}

impl Page {
    pub fn width(&self) -> f64 {
        (self.media_box[2] - self.media_box[0]).abs()
    }

    pub fn height(&self) -> f64 {
        (self.media_box[3] - self.media_box[1]).abs()
    }
}

/// One slot in the page list
#[derive(Debug, Clone)]
pub struct PageNode {
    pub object: Option<ObjRef>,
    /// The page, or why it could not be read
    pub page: Result<Page, String>,
}

impl PageNode {
    fn unreadable(object: Option<ObjRef>, reason: impl Into<String>) -> Self {
        Self {
            object,
            page: Err(reason.into()),
        }
    }
}

/// Attributes that flow from page tree ancestors to pages
#[derive(Debug, Clone, Default)]
struct Inherited {
    resources: Option<Dictionary>,
    media_box: Option<[f64; 4]>,
    rotate: Option<i64>,
}

impl Inherited {
    fn absorb(&self, doc: &ParsedDocument<'_>, dict: &Dictionary) -> Inherited {
        let mut next = self.clone();
        if let Some(resources) = doc.dict_get(dict, "Resources").and_then(Object::as_dict) {
            next.resources = Some(resources.clone());
        }
        if let Some(media_box) = doc.dict_get(dict, "MediaBox").and_then(|o| doc.rect(o)) {
            next.media_box = Some(media_box);
        }
        if let Some(rotate) = doc.dict_get(dict, "Rotate").and_then(Object::as_i64) {
            next.rotate = Some(rotate);
        }
        next
    }
}

/// Parsed document: cross-reference index, lazily filled object arena and
/// page list.
///
/// Interior caches make this `!Sync`; each extraction owns its own parse.
pub struct ParsedDocument<'a> {
    bytes: &'a [u8],
    version: String,
    entries: BTreeMap<u32, XrefEntry>,
    trailer: Dictionary,
    arena: BTreeMap<u32, OnceCell<Result<Object, LoadFault>>>,
    loading: RefCell<HashSet<u32>>,
    object_streams: RefCell<HashMap<u32, Result<Rc<ObjectStream>, LoadFault>>>,
    notes: RefCell<Vec<String>>,
    recovered: bool,
    options: ParserOptions,
    catalog: Dictionary,
    pages: Vec<PageNode>,
    declared_page_count: usize,
}

/// Parse `bytes` into a document with a resolved page list
pub fn parse<'a>(bytes: &'a [u8], options: &ParserOptions) -> Result<ParsedDocument<'a>, ParseError> {
    let (header_offset, version) = locate_header(bytes)?;
    if header_offset > 0 {
        debug!(header_offset, "Junk before %PDF- header");
    }

    let mut primary_error = None;
    let primary = xref::read_index(bytes, header_offset).map(|mut index| {
        let consistent = index_is_consistent(bytes, &mut index.entries, header_offset);
        (index, consistent)
    });
    match primary {
        Ok((index, true)) => {
            check_encryption(&index.trailer)?;
            let mut doc = ParsedDocument::new(bytes, version.clone(), index.entries, index.trailer, false, options);
            for note in index.notes {
                doc.note(note);
            }
            match doc.load_page_tree() {
                Ok(()) => return Ok(doc),
                Err(e) => {
                    debug!(error = %e, "Primary index unusable, scanning");
                    primary_error = Some(e);
                }
            }
        }
        Ok(_) => debug!("Cross-reference offsets do not match objects, scanning"),
        Err(e) => debug!(error = %e, "No usable cross-reference index, scanning"),
    }

    let recovered = recovery::scan(bytes);
    if recovered.entries.is_empty() {
        return Err(primary_error.unwrap_or_else(|| {
            ParseError::BrokenCrossReference("no objects found in file".to_string())
        }));
    }
    check_encryption(&recovered.trailer)?;

    let mut doc = ParsedDocument::new(bytes, version, recovered.entries, recovered.trailer, true, options);
    doc.index_object_streams();
    match doc.load_page_tree() {
        Ok(()) => {
            warn!(objects = doc.entries.len(), "Rebuilt cross-reference index by linear scan");
            doc.note("cross-reference index was rebuilt by scanning the file");
            Ok(doc)
        }
        Err(e @ ParseError::BrokenCrossReference(_)) => Err(primary_error.unwrap_or(e)),
        Err(e) => Err(e),
    }
}

fn locate_header(bytes: &[u8]) -> Result<(usize, String), ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::MalformedHeader("empty input".to_string()));
    }
    let window = &bytes[..bytes.len().min(1024)];
    let offset = lexer::find_pattern(window, b"%PDF-").ok_or_else(|| {
        ParseError::MalformedHeader("no %PDF- signature in the first 1024 bytes".to_string())
    })?;

    let version: String = bytes[offset + 5..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| b as char)
        .collect();
    Ok((offset, version))
}

fn check_encryption(trailer: &Dictionary) -> Result<(), ParseError> {
    match trailer.get("Encrypt") {
        None | Some(Object::Null) => Ok(()),
        Some(_) => Err(ParseError::UnsupportedEncryption(
            "trailer carries an /Encrypt dictionary".to_string(),
        )),
    }
}

/// Every in-file offset must land on the matching `N G obj` header.
///
/// Offsets that are off by exactly the junk before the header are fixed
/// in place.
fn index_is_consistent(bytes: &[u8], entries: &mut BTreeMap<u32, XrefEntry>, header_offset: usize) -> bool {
    for (&num, entry) in entries.iter_mut() {
        let XrefEntry::InFile { offset, .. } = entry else {
            continue;
        };
        if xref::object_header_at(bytes, *offset).is_some_and(|(n, _)| n == num) {
            continue;
        }
        let shifted = *offset + header_offset;
        if header_offset > 0 && xref::object_header_at(bytes, shifted).is_some_and(|(n, _)| n == num) {
            *offset = shifted;
            continue;
        }
        debug!(num, offset = *offset, "xref offset does not point at object");
        return false;
    }
    true
}

fn fault_to_error(fault: LoadFault, what: &str) -> ParseError {
    match fault {
        LoadFault::Cyclic => ParseError::CyclicObjectReference(format!("{} is unreachable through a reference cycle", what)),
        LoadFault::Truncated => ParseError::TruncatedStream(format!("{} is cut off by the end of the file", what)),
        other => ParseError::BrokenCrossReference(format!("{}: {}", what, other)),
    }
}

fn is_catalog(dict: &Dictionary) -> bool {
    dict.has_type("Catalog") || (dict.contains_key("Pages") && !dict.has_type("Pages"))
}

fn is_pages_node(dict: &Dictionary) -> bool {
    dict.has_type("Pages") || (!dict.has_type("Page") && dict.contains_key("Kids"))
}

fn normalize_rotation(rotate: i64) -> i64 {
    let r = rotate.rem_euclid(360);
    // Round to the nearest quarter turn
    ((r + 45) / 90 % 4) * 90
}

impl<'a> ParsedDocument<'a> {
    fn new(
        bytes: &'a [u8],
        version: String,
        entries: BTreeMap<u32, XrefEntry>,
        trailer: Dictionary,
        recovered: bool,
        options: &ParserOptions,
    ) -> Self {
        let arena = entries
            .iter()
            .filter(|(_, e)| !matches!(e, XrefEntry::Free))
            .map(|(&num, _)| (num, OnceCell::new()))
            .collect();

        Self {
            bytes,
            version,
            entries,
            trailer,
            arena,
            loading: RefCell::new(HashSet::new()),
            object_streams: RefCell::new(HashMap::new()),
            notes: RefCell::new(Vec::new()),
            recovered,
            options: options.clone(),
            catalog: Dictionary::new(),
            pages: Vec::new(),
            declared_page_count: 0,
        }
    }

    /// Header version, e.g. "1.7"
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    pub fn catalog(&self) -> &Dictionary {
        &self.catalog
    }

    /// Document information dictionary, if any
    pub fn info(&self) -> Option<&Dictionary> {
        self.dict_get(&self.trailer, "Info").and_then(Object::as_dict)
    }

    /// Whether the index was rebuilt by the linear scan
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    pub fn pages(&self) -> &[PageNode] {
        &self.pages
    }

    /// `/Count` of the root page tree node
    pub fn declared_page_count(&self) -> usize {
        self.declared_page_count
    }

    pub fn object_count(&self) -> usize {
        self.arena.len()
    }

    /// Document-level notes collected so far (cycles, mismatches, rebuilt index)
    pub fn warnings(&self) -> Vec<String> {
        self.notes.borrow().clone()
    }

    pub(crate) fn note(&self, message: impl Into<String>) {
        let message = message.into();
        let mut notes = self.notes.borrow_mut();
        if !notes.contains(&message) {
            debug!(note = %message, "Parser note");
            notes.push(message);
        }
    }

    /// Materialise object `r`. The generation number is not checked.
    pub fn get(&self, r: ObjRef) -> Result<&Object, LoadFault> {
        self.object(r.0)
    }

    fn object(&self, num: u32) -> Result<&Object, LoadFault> {
        let Some(cell) = self.arena.get(&num) else {
            return Err(match self.entries.get(&num) {
                Some(XrefEntry::Free) => LoadFault::Free,
                _ => LoadFault::Missing,
            });
        };
        if let Some(loaded) = cell.get() {
            return loaded.as_ref().map_err(Clone::clone);
        }

        if !self.loading.borrow_mut().insert(num) {
            return Err(LoadFault::Cyclic);
        }
        let loaded = self.load(num);
        self.loading.borrow_mut().remove(&num);

        cell.get_or_init(|| loaded).as_ref().map_err(Clone::clone)
    }

    fn load(&self, num: u32) -> Result<Object, LoadFault> {
        match self.entries.get(&num) {
            None => Err(LoadFault::Missing),
            Some(XrefEntry::Free) => Err(LoadFault::Free),
            Some(&XrefEntry::InFile { offset, .. }) => {
                let mut resolve_length = |r: ObjRef| {
                    self.object(r.0)
                        .ok()
                        .and_then(|obj| self.resolve(obj).as_i64())
                };
                match lexer::parse_indirect_object(self.bytes, offset, &mut resolve_length) {
                    Ok(parsed) if parsed.id.0 == num => Ok(parsed.object),
                    Ok(parsed) => Err(LoadFault::Malformed(format!(
                        "expected object {} at offset {}, found {}",
                        num, offset, parsed.id.0
                    ))),
                    Err(SyntaxError::UnexpectedEof(_)) => Err(LoadFault::Truncated),
                    Err(e) => Err(LoadFault::Malformed(e.to_string())),
                }
            }
            Some(&XrefEntry::InStream { stream, index }) => {
                let objstm = self.object_stream(stream)?;
                objstm.get(index, num).map_err(|e| match e {
                    SlotError::Missing => LoadFault::Missing,
                    SlotError::Truncated => LoadFault::Truncated,
                    SlotError::Malformed(message) => LoadFault::Malformed(message),
                })
            }
        }
    }

    /// Decode object stream `num` once per parse
    fn object_stream(&self, num: u32) -> Result<Rc<ObjectStream>, LoadFault> {
        let cached = self.object_streams.borrow().get(&num).cloned();
        if let Some(cached) = cached {
            return cached;
        }

        let result = self.object(num).and_then(|obj| {
            let stream = obj
                .as_stream()
                .ok_or_else(|| LoadFault::Malformed(format!("object {} is not an object stream", num)))?;
            let data = match self.decode_stream(stream) {
                Ok(data) => data,
                Err(FilterError::Partial { data, .. }) => {
                    self.note(format!("object stream {} is only partly readable", num));
                    data
                }
                Err(_) if stream.truncated => return Err(LoadFault::Truncated),
                Err(e) => return Err(LoadFault::Malformed(e.to_string())),
            };
            Ok(Rc::new(ObjectStream::new(&stream.dict, data, stream.truncated)))
        });

        self.object_streams.borrow_mut().insert(num, result.clone());
        result
    }

    /// Follow a reference chain to a direct object
    pub fn load_ref(&self, r: ObjRef) -> Result<&Object, LoadFault> {
        let mut seen = vec![r.0];
        let mut current = self.object(r.0)?;
        while let Object::Reference(next) = current {
            if seen.contains(&next.0) || seen.len() > self.options.max_reference_depth {
                return Err(LoadFault::Cyclic);
            }
            seen.push(next.0);
            current = self.object(next.0)?;
        }
        Ok(current)
    }

    /// Resolve references to their targets. Anything unloadable,
    /// including cycles, resolves to null.
    pub fn resolve<'s>(&'s self, obj: &'s Object) -> &'s Object {
        let Object::Reference(r) = obj else {
            return obj;
        };
        match self.load_ref(*r) {
            Ok(target) => target,
            Err(LoadFault::Cyclic) => {
                self.note(format!("reference cycle through object {} resolved to null", r.0));
                &NULL
            }
            Err(_) => &NULL,
        }
    }

    /// Resolved value of `key`, treating null as absent
    pub fn dict_get<'s>(&'s self, dict: &'s Dictionary, key: &str) -> Option<&'s Object> {
        let value = self.resolve(dict.get(key)?);
        (!value.is_null()).then_some(value)
    }

    /// Run the stream's filter chain
    pub fn decode_stream(&self, stream: &Stream) -> Result<Vec<u8>, FilterError> {
        let chain = filter_chain(&stream.dict, |o| self.resolve(o));
        apply_filters(&stream.data, &chain)
    }

    /// Normalised rectangle from a four-number array
    pub fn rect(&self, obj: &Object) -> Option<[f64; 4]> {
        let items = self.resolve(obj).as_array()?;
        if items.len() != 4 {
            return None;
        }
        let mut values = [0.0; 4];
        for (slot, item) in values.iter_mut().zip(items) {
            *slot = self.resolve(item).as_f64().filter(|v| v.is_finite())?;
        }
        let [x0, y0, x1, y1] = values;
        Some([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)])
    }

    /// After a linear scan, register objects held in object streams that
    /// no direct definition shadows
    fn index_object_streams(&mut self) {
        if lexer::find_pattern(self.bytes, b"/ObjStm").is_none() {
            return;
        }

        let candidates: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, XrefEntry::InFile { .. }))
            .map(|(&num, _)| num)
            .collect();

        let mut additions = Vec::new();
        for num in candidates {
            let is_objstm = self
                .object(num)
                .ok()
                .and_then(Object::as_stream)
                .is_some_and(|s| s.dict.has_type("ObjStm"));
            if !is_objstm {
                continue;
            }
            if let Ok(objstm) = self.object_stream(num) {
                additions.extend(
                    objstm
                        .object_numbers()
                        .map(|(member, index)| (member, XrefEntry::InStream { stream: num, index })),
                );
            }
        }

        for (member, entry) in additions {
            if !self.entries.contains_key(&member) {
                self.entries.insert(member, entry);
                self.arena.insert(member, OnceCell::new());
            }
        }
    }

    fn locate_catalog(&self) -> Result<Dictionary, ParseError> {
        let root_error = match self.trailer.get("Root") {
            Some(Object::Reference(r)) => match self.load_ref(*r) {
                Ok(obj) => match obj.as_dict() {
                    Some(dict) if is_catalog(dict) => return Ok(dict.clone()),
                    _ => ParseError::BrokenCrossReference(format!(
                        "/Root points at a {} that is not a catalog",
                        obj.type_name()
                    )),
                },
                Err(fault) => fault_to_error(fault, "document catalog"),
            },
            Some(Object::Dictionary(dict)) if is_catalog(dict) => return Ok(dict.clone()),
            Some(other) => ParseError::BrokenCrossReference(format!("/Root is a {}", other.type_name())),
            None => ParseError::BrokenCrossReference("trailer has no /Root".to_string()),
        };

        if self.recovered {
            if let Some(dict) = self.find_catalog_by_type() {
                self.note("document catalog located by scanning for /Type /Catalog");
                return Ok(dict);
            }
        }
        Err(root_error)
    }

    fn find_catalog_by_type(&self) -> Option<Dictionary> {
        self.arena.keys().find_map(|&num| {
            let obj = self.object(num).ok()?;
            let dict = obj.as_dict()?;
            (dict.has_type("Catalog") && dict.contains_key("Pages")).then(|| dict.clone())
        })
    }

    fn load_page_tree(&mut self) -> Result<(), ParseError> {
        let catalog = self.locate_catalog()?;
        let (mut pages, declared) = self.collect_pages(&catalog);

        let found = pages.len();
        if declared > found {
            let plausible = (self.bytes.len() / MIN_BYTES_PER_PAGE).max(found);
            let target = declared.min(plausible);
            if target < declared {
                self.note(format!(
                    "page tree declares {} pages, more than the file can hold; padded to {}",
                    declared, target
                ));
            } else {
                self.note(format!(
                    "page tree declares {} pages but only {} were found",
                    declared, found
                ));
            }
            pages.extend((found..target).map(|_| PageNode::unreadable(None, "page missing from page tree")));
        } else if declared < found {
            self.note(format!(
                "page tree declares {} pages but {} were found",
                declared, found
            ));
        }

        self.catalog = catalog;
        self.pages = pages;
        self.declared_page_count = declared;
        Ok(())
    }

    /// Pages in document order and the declared count
    fn collect_pages(&self, catalog: &Dictionary) -> (Vec<PageNode>, usize) {
        let mut out = Vec::new();
        let mut visited = HashSet::new();

        let root = match catalog.get("Pages") {
            Some(Object::Reference(r)) => {
                visited.insert(r.0);
                self.load_ref(*r).ok()
            }
            Some(direct) => Some(direct),
            None => None,
        };

        match root.and_then(Object::as_dict) {
            Some(root) if is_pages_node(root) => {
                let declared = self
                    .dict_get(root, "Count")
                    .and_then(Object::as_i64)
                    .map(|n| n.max(0) as usize);
                let inherited = Inherited::default().absorb(self, root);
                let kids = self
                    .dict_get(root, "Kids")
                    .and_then(Object::as_array)
                    .unwrap_or(&[]);
                for kid in kids {
                    self.walk_kid(kid, &inherited, 1, &mut visited, &mut out);
                }
                let found = out.len();
                (out, declared.unwrap_or(found))
            }
            Some(single) if single.has_type("Page") => {
                let page = self.page_from(single, &Inherited::default());
                (vec![PageNode { object: None, page: Ok(page) }], 1)
            }
            _ => {
                self.note("root page tree is unreadable; pages collected by object number");
                for (&num, _) in self.arena.iter() {
                    let Ok(obj) = self.object(num) else {
                        continue;
                    };
                    let Some(dict) = obj.as_dict() else {
                        continue;
                    };
                    if dict.has_type("Page") {
                        let inherited = self.inherited_from_parents(dict);
                        out.push(PageNode {
                            object: Some(ObjRef(num, 0)),
                            page: Ok(self.page_from(dict, &inherited)),
                        });
                    }
                }
                let found = out.len();
                (out, found)
            }
        }
    }

    fn walk_kid(
        &self,
        kid: &Object,
        inherited: &Inherited,
        depth: usize,
        visited: &mut HashSet<u32>,
        out: &mut Vec<PageNode>,
    ) {
        let (object, node) = match kid {
            Object::Reference(r) => {
                if !visited.insert(r.0) {
                    self.note(format!("page tree cycle through object {} was broken", r.0));
                    return;
                }
                match self.load_ref(*r) {
                    Ok(node) => (Some(*r), node),
                    Err(fault) => {
                        debug!(object = r.0, %fault, "Page tree node unreadable");
                        out.push(PageNode::unreadable(Some(*r), fault.to_string()));
                        return;
                    }
                }
            }
            direct => (None, direct),
        };

        let Some(dict) = node.as_dict() else {
            out.push(PageNode::unreadable(
                object,
                format!("page tree node is a {}", node.type_name()),
            ));
            return;
        };

        if !is_pages_node(dict) {
            out.push(PageNode {
                object,
                page: Ok(self.page_from(dict, inherited)),
            });
            return;
        }

        if depth >= self.options.max_tree_depth {
            self.note(format!(
                "page tree deeper than {} levels was cut off",
                self.options.max_tree_depth
            ));
            return;
        }

        let inherited = inherited.absorb(self, dict);
        let kids = self.dict_get(dict, "Kids").and_then(Object::as_array).unwrap_or(&[]);
        for kid in kids {
            self.walk_kid(kid, &inherited, depth + 1, visited, out);
        }
    }

    fn page_from(&self, dict: &Dictionary, inherited: &Inherited) -> Page {
        let own = inherited.absorb(self, dict);
        Page {
            dict: dict.clone(),
            resources: own.resources.unwrap_or_default(),
            media_box: own.media_box.unwrap_or(DEFAULT_MEDIA_BOX),
            rotation: normalize_rotation(own.rotate.unwrap_or(0)),
        }
    }

    /// Inherited attributes gathered by climbing `/Parent` links
    fn inherited_from_parents(&self, page: &Dictionary) -> Inherited {
        let mut ancestors = Vec::new();
        let mut seen = HashSet::new();
        let mut current = page;
        while ancestors.len() < self.options.max_tree_depth {
            let Some(Object::Reference(parent)) = current.get("Parent") else {
                break;
            };
            if !seen.insert(parent.0) {
                break;
            }
            let Some(dict) = self.load_ref(*parent).ok().and_then(Object::as_dict) else {
                break;
            };
            ancestors.push(dict);
            current = dict;
        }

        ancestors
            .into_iter()
            .rev()
            .fold(Inherited::default(), |acc, dict| acc.absorb(self, dict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Assemble a PDF from object bodies with a correct xref table
    fn build_pdf(objects: &[&str], trailer_extra: &str) -> Vec<u8> {
        let mut pdf = b"%PDF-1.7\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R {} >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                trailer_extra,
                xref
            )
            .as_bytes(),
        );
        pdf
    }

    fn two_page_pdf() -> Vec<u8> {
        build_pdf(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [3 0 R 4 0 R] /Count 2 /MediaBox [0 0 300 400] /Rotate 90 >>",
                "<< /Type /Page /Parent 2 0 R >>",
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 100 200] /Rotate -90 >>",
            ],
            "",
        )
    }

    #[test]
    fn test_empty_input_is_malformed_header() {
        let err = parse(b"", &ParserOptions::default()).err().unwrap();
        assert_eq!(err.kind(), "MALFORMED_HEADER");
    }

    #[test]
    fn test_no_signature_is_malformed_header() {
        let err = parse(b"hello world", &ParserOptions::default()).err().unwrap();
        assert_eq!(err.kind(), "MALFORMED_HEADER");
    }

    #[test]
    fn test_pages_inherit_attributes() {
        let pdf = two_page_pdf();
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert_eq!(doc.version(), "1.7");
        assert!(!doc.is_recovered());
        assert_eq!(doc.pages().len(), 2);
        assert_eq!(doc.declared_page_count(), 2);

        let first = doc.pages()[0].page.as_ref().unwrap();
        assert_eq!(first.media_box, [0.0, 0.0, 300.0, 400.0]);
        assert_eq!(first.rotation, 90);

        let second = doc.pages()[1].page.as_ref().unwrap();
        assert_eq!(second.width(), 100.0);
        assert_eq!(second.rotation, 270);
    }

    #[test]
    fn test_junk_before_header_is_tolerated() {
        let mut pdf = b"JUNKJUNK".to_vec();
        pdf.extend_from_slice(&two_page_pdf());
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert_eq!(doc.pages().len(), 2);
    }

    #[test]
    fn test_encrypted_is_rejected() {
        let pdf = build_pdf(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [] /Count 0 >>",
                "<< /Filter /Standard /V 2 >>",
            ],
            "/Encrypt 3 0 R",
        );
        let err = parse(&pdf, &ParserOptions::default()).err().unwrap();
        assert_eq!(err.kind(), "UNSUPPORTED_ENCRYPTION");
    }

    #[test]
    fn test_cyclic_catalog_reference() {
        let pdf = build_pdf(&["2 0 R", "1 0 R"], "");
        let err = parse(&pdf, &ParserOptions::default()).err().unwrap();
        assert_eq!(err.kind(), "CYCLIC_OBJECT_REFERENCE");
    }

    #[test]
    fn test_missing_catalog_is_broken_xref() {
        let pdf = build_pdf(&["<< /Type /Font >>"], "");
        let err = parse(&pdf, &ParserOptions::default()).err().unwrap();
        assert_eq!(err.kind(), "BROKEN_CROSS_REFERENCE");
    }

    #[test]
    fn test_kids_cycle_is_broken_and_noted() {
        let pdf = build_pdf(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [3 0 R 2 0 R] /Count 1 >>",
                "<< /Type /Page /Parent 2 0 R >>",
            ],
            "",
        );
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert_eq!(doc.pages().len(), 1);
        assert!(doc.warnings().iter().any(|w| w.contains("cycle")));
    }

    #[test]
    fn test_missing_kid_keeps_slot() {
        let pdf = build_pdf(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [3 0 R 9 0 R] /Count 2 >>",
                "<< /Type /Page /Parent 2 0 R >>",
            ],
            "",
        );
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert_eq!(doc.pages().len(), 2);
        assert!(doc.pages()[0].page.is_ok());
        assert!(doc.pages()[1].page.is_err());
    }

    #[test]
    fn test_declared_count_pads_missing_leaves() {
        let pdf = build_pdf(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [3 0 R] /Count 3 >>",
                "<< /Type /Page /Parent 2 0 R >>",
            ],
            "",
        );
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert_eq!(doc.declared_page_count(), 3);
        assert_eq!(doc.pages().len(), 3);
        assert!(doc.pages()[2].page.is_err());
    }

    #[test]
    fn test_absurd_count_is_capped() {
        let pdf = build_pdf(
            &[
                "<< /Type /Catalog /Pages 2 0 R >>",
                "<< /Type /Pages /Kids [3 0 R] /Count 999999999 >>",
                "<< /Type /Page /Parent 2 0 R >>",
            ],
            "",
        );
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert!(doc.pages().len() <= pdf.len() / MIN_BYTES_PER_PAGE);
        assert!(doc.warnings().iter().any(|w| w.contains("more than the file can hold")));
    }

    #[test]
    fn test_resolve_cycle_is_null() {
        let pdf = build_pdf(
            &[
                "<< /Type /Catalog /Pages 2 0 R /Loop 3 0 R >>",
                "<< /Type /Pages /Kids [] /Count 0 >>",
                "4 0 R",
                "3 0 R",
            ],
            "",
        );
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        let looped = doc.dict_get(doc.catalog(), "Loop");
        assert!(looped.is_none());
        assert!(doc.warnings().iter().any(|w| w.contains("reference cycle")));
    }

    #[test]
    fn test_damaged_offsets_trigger_scan() {
        let mut pdf = two_page_pdf();
        let xref = xref::find_startxref(&pdf).unwrap();
        // Point every in-use entry at the same bogus offset
        let text = String::from_utf8(pdf[xref..].to_vec()).unwrap();
        let damaged: String = text
            .split_inclusive('\n')
            .map(|line| if line.ends_with("n \n") { "0000000003 00000 n \n" } else { line })
            .collect();
        pdf.truncate(xref);
        pdf.extend_from_slice(damaged.as_bytes());

        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert!(doc.is_recovered());
        assert_eq!(doc.pages().len(), 2);
    }

    #[test]
    fn test_unresolvable_pages_root_collects_page_objects() {
        let pdf = build_pdf(
            &[
                "<< /Type /Catalog /Pages 9 0 R >>",
                "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 50 60] >>",
                "<< /Type /Page /Parent 2 0 R >>",
            ],
            "",
        );
        let doc = parse(&pdf, &ParserOptions::default()).unwrap();
        assert_eq!(doc.pages().len(), 1);
        assert_eq!(doc.pages()[0].page.as_ref().unwrap().media_box, [0.0, 0.0, 50.0, 60.0]);
    }

    #[test]
    fn test_rotation_normalised() {
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(0), 0);
    }
}
