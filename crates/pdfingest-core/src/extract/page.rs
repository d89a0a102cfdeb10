//! Per-page content walking: text state, fonts and form XObjects

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use super::content::{parse_operations, Operation};
use super::fonts::Font;
use super::text::{LineBuilder, Matrix, TextRun};
use super::types::PageEntry;
use crate::error::ExtractionDiagnostic;
use crate::parser::{Dictionary, FilterError, ObjRef, Object, PageNode, ParsedDocument, DEFAULT_MEDIA_BOX};

/// Nested form XObjects followed before giving up
const MAX_FORM_DEPTH: usize = 8;

/// Saved graphics states beyond this are dropped
const MAX_STATE_STACK: usize = 256;

/// Fonts loaded so far, shared by every page of one document
pub(crate) type FontCache = HashMap<ObjRef, Rc<Font>>;

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Rc<Font>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    /// `Tz` as a fraction
    horizontal_scale: f64,
    leading: f64,
    rise: f64,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::IDENTITY,
            font: Rc::new(Font::default()),
            font_size: 1.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

/// Walks one page's operators and collects its lines
struct PageWalker<'d, 'a> {
    doc: &'d ParsedDocument<'a>,
    fonts: &'d mut FontCache,
    lines: LineBuilder,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    /// Forms currently being walked
    active_forms: HashSet<u32>,
    depth: usize,
    problems: Vec<String>,
}

impl<'d, 'a> PageWalker<'d, 'a> {
    fn new(doc: &'d ParsedDocument<'a>, fonts: &'d mut FontCache, adjacency_threshold: f64) -> Self {
        Self {
            doc,
            fonts,
            lines: LineBuilder::new(adjacency_threshold),
            state: GraphicsState::default(),
            stack: Vec::new(),
            text_matrix: Matrix::IDENTITY,
            line_matrix: Matrix::IDENTITY,
            active_forms: HashSet::new(),
            depth: 0,
            problems: Vec::new(),
        }
    }

    /// Walk `data`; false if it ended inside a token
    fn run(&mut self, data: &[u8], resources: &Dictionary) -> bool {
        let (operations, complete) = parse_operations(data);
        for op in &operations {
            self.apply(op, resources);
        }
        complete
    }

    fn finish(self) -> Vec<String> {
        self.lines.finish()
    }

    fn apply(&mut self, op: &Operation, resources: &Dictionary) {
        match op.operator.as_str() {
            "q" => {
                if self.stack.len() < MAX_STATE_STACK {
                    self.stack.push(self.state.clone());
                }
            }
            "Q" => {
                if let Some(saved) = self.stack.pop() {
                    self.state = saved;
                }
            }
            "cm" => {
                if let Some(m) = op.numbers::<6>() {
                    self.state.ctm = Matrix::new(m).then(&self.state.ctm);
                }
            }
            "BT" => {
                self.text_matrix = Matrix::IDENTITY;
                self.line_matrix = Matrix::IDENTITY;
            }
            "Tf" => {
                if let Some(name) = op.operands.first().and_then(Object::as_name) {
                    self.state.font = self.font(resources, name);
                }
                if let Some(size) = op.number(1) {
                    self.state.font_size = size;
                }
            }
            "Tc" => set_number(op, &mut self.state.char_spacing),
            "Tw" => set_number(op, &mut self.state.word_spacing),
            "Tz" => {
                if let Some([scale]) = op.numbers::<1>() {
                    self.state.horizontal_scale = scale / 100.0;
                }
            }
            "TL" => set_number(op, &mut self.state.leading),
            "Ts" => set_number(op, &mut self.state.rise),
            "Td" => {
                if let Some([tx, ty]) = op.numbers::<2>() {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = op.numbers::<2>() {
                    self.state.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some(m) = op.numbers::<6>() {
                    self.text_matrix = Matrix::new(m);
                    self.line_matrix = self.text_matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(bytes) = op.operands.last().and_then(Object::as_bytes) {
                    self.show(bytes);
                }
            }
            "'" => {
                self.next_line();
                if let Some(bytes) = op.operands.last().and_then(Object::as_bytes) {
                    self.show(bytes);
                }
            }
            "\"" => {
                if let [aw, ac, text] = op.operands.as_slice() {
                    if let (Some(aw), Some(ac)) = (aw.as_f64(), ac.as_f64()) {
                        self.state.word_spacing = aw;
                        self.state.char_spacing = ac;
                    }
                    self.next_line();
                    if let Some(bytes) = text.as_bytes() {
                        self.show(bytes);
                    }
                }
            }
            "TJ" => {
                let Some(items) = op.operands.last().and_then(Object::as_array) else {
                    return;
                };
                for item in items {
                    match item {
                        Object::String(bytes) => self.show(bytes),
                        other => {
                            if let Some(adjust) = other.as_f64() {
                                self.advance(-adjust / 1000.0 * self.state.font_size * self.state.horizontal_scale);
                            }
                        }
                    }
                }
            }
            "Do" => {
                if let Some(name) = op.operands.first().and_then(Object::as_name) {
                    self.draw_xobject(resources, name);
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translate(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.state.leading);
    }

    fn advance(&mut self, tx: f64) {
        self.text_matrix = Matrix::translate(tx, 0.0).then(&self.text_matrix);
    }

    fn show(&mut self, bytes: &[u8]) {
        let state = &self.state;
        let start = self.text_matrix.then(&state.ctm);
        let (x, y) = start.apply(0.0, state.rise);
        let size = (state.font_size * start.vertical_scale()).abs();

        let mut text = String::new();
        let mut matrix = self.text_matrix;
        for glyph in state.font.decode(bytes) {
            text.push_str(&glyph.text);
            let mut advance = glyph.width / 1000.0 * state.font_size + state.char_spacing;
            if glyph.is_space {
                advance += state.word_spacing;
            }
            matrix = Matrix::translate(advance * state.horizontal_scale, 0.0).then(&matrix);
        }
        let (end_x, _) = matrix.then(&state.ctm).apply(0.0, state.rise);

        self.text_matrix = matrix;
        self.lines.push(TextRun {
            text,
            x,
            y,
            end_x,
            size,
        });
    }

    fn font(&mut self, resources: &Dictionary, name: &str) -> Rc<Font> {
        let doc = self.doc;
        let entry = doc
            .dict_get(resources, "Font")
            .and_then(Object::as_dict)
            .and_then(|fonts| fonts.get(name));

        match entry {
            Some(Object::Reference(r)) => {
                if let Some(font) = self.fonts.get(r) {
                    return Rc::clone(font);
                }
                let font = Rc::new(
                    doc.load_ref(*r)
                        .ok()
                        .and_then(Object::as_dict)
                        .map(|dict| Font::load(doc, dict))
                        .unwrap_or_default(),
                );
                self.fonts.insert(*r, Rc::clone(&font));
                font
            }
            Some(direct) => Rc::new(direct.as_dict().map(|dict| Font::load(doc, dict)).unwrap_or_default()),
            None => {
                debug!(font = name, "Font resource not found");
                Rc::new(Font::default())
            }
        }
    }

    fn draw_xobject(&mut self, resources: &Dictionary, name: &str) {
        let doc = self.doc;
        let Some(entry) = doc
            .dict_get(resources, "XObject")
            .and_then(Object::as_dict)
            .and_then(|xobjects| xobjects.get(name))
        else {
            return;
        };
        let Some(stream) = doc.resolve(entry).as_stream() else {
            return;
        };
        if stream.dict.get_name("Subtype") != Some("Form") || self.depth >= MAX_FORM_DEPTH {
            return;
        }
        let id = entry.as_reference();
        if let Some(r) = id {
            if !self.active_forms.insert(r.0) {
                debug!(form = r.0, "Form draws itself; skipped");
                return;
            }
        }

        let decoded = match doc.decode_stream(stream) {
            Ok(data) => Ok(data),
            Err(FilterError::Partial { filter, message, data }) => {
                let problem = format!(
                    "form /{} is only partly readable: {} stopped early: {}",
                    name, filter, message
                );
                if !self.problems.contains(&problem) {
                    self.problems.push(problem);
                }
                Ok(data)
            }
            Err(e) => Err(e),
        };
        match decoded {
            Ok(data) => {
                let form_resources = doc
                    .dict_get(&stream.dict, "Resources")
                    .and_then(Object::as_dict)
                    .unwrap_or(resources);
                let matrix = doc
                    .dict_get(&stream.dict, "Matrix")
                    .and_then(Object::as_array)
                    .and_then(Matrix::from_array)
                    .unwrap_or_default();

                let saved = self.state.clone();
                let saved_depth = self.stack.len();
                self.state.ctm = matrix.then(&self.state.ctm);
                self.depth += 1;
                self.run(&data, form_resources);
                self.depth -= 1;
                self.stack.truncate(saved_depth);
                self.state = saved;
            }
            Err(e) => debug!(form = name, error = %e, "Undecodable form XObject skipped"),
        }

        if let Some(r) = id {
            self.active_forms.remove(&r.0);
        }
    }
}

fn set_number(op: &Operation, target: &mut f64) {
    if let Some([value]) = op.numbers::<1>() {
        *target = value;
    }
}

/// Extract one page slot into its result entry
pub(crate) fn extract_page(
    doc: &ParsedDocument<'_>,
    node: &PageNode,
    page_number: usize,
    fonts: &mut FontCache,
    adjacency_threshold: f64,
) -> PageEntry {
    let page = match &node.page {
        Ok(page) => page,
        Err(reason) => {
            let [x0, y0, x1, y1] = DEFAULT_MEDIA_BOX;
            return PageEntry {
                page_number,
                lines: Vec::new(),
                width: x1 - x0,
                height: y1 - y0,
                rotation: 0,
                image_count: 0,
                char_count: 0,
                diagnostics: vec![ExtractionDiagnostic::page_unreadable(format!(
                    "page object could not be loaded: {}",
                    reason
                ))],
            };
        }
    };

    let mut problems = Vec::new();
    let data = content_data(doc, page.dict.get("Contents"), &mut problems);

    let mut walker = PageWalker::new(doc, fonts, adjacency_threshold);
    if !data.is_empty() && !walker.run(&data, &page.resources) {
        problems.push("content stream ends inside a token".to_string());
    }
    problems.append(&mut walker.problems);
    let lines = walker.finish();

    let char_count = lines.iter().map(|l| l.chars().count()).sum::<usize>()
        + lines.len().saturating_sub(1);
    let diagnostics = if problems.is_empty() {
        Vec::new()
    } else {
        debug!(page = page_number, problems = ?problems, "Page content partly unreadable");
        vec![ExtractionDiagnostic::page_unreadable(problems.join("; "))]
    };

    PageEntry {
        page_number,
        lines,
        width: page.width(),
        height: page.height(),
        rotation: page.rotation,
        image_count: count_images(doc, &page.resources),
        char_count,
        diagnostics,
    }
}

/// Decoded `/Contents`, streams joined by newlines. Problems are recorded
/// and whatever could be read is kept.
fn content_data(doc: &ParsedDocument<'_>, contents: Option<&Object>, problems: &mut Vec<String>) -> Vec<u8> {
    let Some(contents) = contents else {
        return Vec::new();
    };

    let parts: Vec<&Object> = match contents {
        Object::Reference(r) => match doc.load_ref(*r) {
            Ok(Object::Array(items)) => items.iter().collect(),
            Ok(other) => vec![other],
            Err(fault) => {
                problems.push(format!("content stream {} {}: {}", r.0, r.1, fault));
                return Vec::new();
            }
        },
        Object::Array(items) => items.iter().collect(),
        Object::Null => return Vec::new(),
        other => vec![other],
    };

    let mut data = Vec::new();
    for part in parts {
        let stream = match part {
            Object::Reference(r) => match doc.load_ref(*r) {
                Ok(obj) => obj.as_stream(),
                Err(fault) => {
                    problems.push(format!("content stream {} {}: {}", r.0, r.1, fault));
                    continue;
                }
            },
            direct => direct.as_stream(),
        };
        let Some(stream) = stream else {
            problems.push(format!("content entry is a {}, not a stream", doc.resolve(part).type_name()));
            continue;
        };

        if stream.truncated {
            problems.push("content stream is truncated".to_string());
        }
        let decoded = match doc.decode_stream(stream) {
            Ok(decoded) => decoded,
            Err(FilterError::Partial { filter, message, data: decoded }) => {
                problems.push(format!(
                    "content stream is only partly readable: {} stopped early: {}",
                    filter, message
                ));
                decoded
            }
            Err(e) => {
                problems.push(format!("content stream could not be decoded: {}", e));
                continue;
            }
        };
        if !data.is_empty() {
            data.push(b'\n');
        }
        data.extend_from_slice(&decoded);
    }
    data
}

/// Distinct image XObjects reachable from the page's resources,
/// including those of nested forms
fn count_images(doc: &ParsedDocument<'_>, resources: &Dictionary) -> usize {
    let mut seen_images = HashSet::new();
    let mut seen_forms = HashSet::new();
    let mut direct_images = 0;
    walk_xobjects(doc, resources, 0, &mut seen_images, &mut seen_forms, &mut direct_images);
    seen_images.len() + direct_images
}

fn walk_xobjects(
    doc: &ParsedDocument<'_>,
    resources: &Dictionary,
    depth: usize,
    seen_images: &mut HashSet<u32>,
    seen_forms: &mut HashSet<u32>,
    direct_images: &mut usize,
) {
    let Some(xobjects) = doc.dict_get(resources, "XObject").and_then(Object::as_dict) else {
        return;
    };
    for (_, entry) in xobjects.iter() {
        let Some(dict) = doc.resolve(entry).as_dict() else {
            continue;
        };
        match (dict.get_name("Subtype"), entry.as_reference()) {
            (Some("Image"), Some(r)) => {
                seen_images.insert(r.0);
            }
            (Some("Image"), None) => *direct_images += 1,
            (Some("Form"), r) if depth < MAX_FORM_DEPTH => {
                if r.is_some_and(|r| !seen_forms.insert(r.0)) {
                    continue;
                }
                if let Some(inner) = doc.dict_get(dict, "Resources").and_then(Object::as_dict) {
                    walk_xobjects(doc, inner, depth + 1, seen_images, seen_forms, direct_images);
                }
            }
            _ => {}
        }
    }
}
