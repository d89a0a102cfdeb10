//! Text geometry: transformation matrices, positioned runs and the line
//! builder that merges runs into logical lines

use crate::parser::Object;

/// Affine transform `[a b c d e f]`, applied to row vectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new([a, b, c, d, e, f]: [f64; 6]) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    /// Six-number array such as a form's `/Matrix`
    pub fn from_array(items: &[Object]) -> Option<Self> {
        if items.len() != 6 {
            return None;
        }
        let mut values = [0.0; 6];
        for (slot, item) in values.iter_mut().zip(items) {
            *slot = item.as_f64().filter(|v| v.is_finite())?;
        }
        Some(Self::new(values))
    }

    /// `self` followed by `then`
    pub fn then(&self, then: &Matrix) -> Matrix {
        Matrix {
            a: self.a * then.a + self.b * then.c,
            b: self.a * then.b + self.b * then.d,
            c: self.c * then.a + self.d * then.c,
            d: self.c * then.b + self.d * then.d,
            e: self.e * then.a + self.f * then.c + then.e,
            f: self.e * then.b + self.f * then.d + then.f,
        }
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Length of the transformed unit vertical vector
    pub fn vertical_scale(&self) -> f64 {
        (self.c * self.c + self.d * self.d).sqrt()
    }
}

/// A piece of shown text with its baseline position in user space
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextRun {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub end_x: f64,
    /// Effective font size in user space
    pub size: f64,
}

#[derive(Debug)]
struct OpenLine {
    text: String,
    y: f64,
    end_x: f64,
    size: f64,
}

/// Merges runs into lines in content order
#[derive(Debug)]
pub(crate) struct LineBuilder {
    adjacency_threshold: f64,
    current: Option<OpenLine>,
    lines: Vec<String>,
}

impl LineBuilder {
    pub fn new(adjacency_threshold: f64) -> Self {
        Self {
            adjacency_threshold,
            current: None,
            lines: Vec::new(),
        }
    }

    pub fn push(&mut self, run: TextRun) {
        if run.text.is_empty() {
            return;
        }
        let size = if run.size.is_finite() && run.size > 0.0 {
            run.size
        } else {
            1.0
        };

        if let Some(line) = self.current.as_mut() {
            let em = line.size.max(size);
            let same_baseline = (run.y - line.y).abs() <= 0.5 * em;
            let gap = run.x - line.end_x;
            // A jump back of more than one em starts a new line, e.g. a column
            if same_baseline && gap >= -em {
                if gap > self.adjacency_threshold * em
                    && !line.text.ends_with(' ')
                    && !run.text.starts_with(' ')
                {
                    line.text.push(' ');
                }
                line.text.push_str(&run.text);
                line.end_x = run.end_x;
                line.size = size;
                return;
            }
        }

        self.flush();
        self.current = Some(OpenLine {
            text: run.text,
            y: run.y,
            end_x: run.end_x,
            size,
        });
    }

    /// Close the open line, e.g. at the end of a content stream
    pub fn flush(&mut self) {
        if let Some(line) = self.current.take() {
            let trimmed = line.text.trim();
            if !trimmed.is_empty() {
                self.lines.push(trimmed.to_string());
            }
        }
    }

    pub fn finish(mut self) -> Vec<String> {
        self.flush();
        self.lines
    }
}
