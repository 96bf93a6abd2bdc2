//! Kernel source templates
//!
//! A template is OpenCL C source with named placeholders (`$TYPE`, `$OP`,
//! `$N`, `$BASE`, `$ARGS`). Rendering is a single left-to-right scan: at each
//! `$`, the longest following run of `[A-Z_]` names the placeholder, and the
//! substituted text is copied verbatim without being scanned again. A `$`
//! not followed by `[A-Z_]` is ordinary text.
//!
//! Because substitution values may not themselves contain placeholder
//! tokens, the rendered source does not depend on the order in which
//! substitutions were added.

use std::fmt;
use std::ops::Range;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A placeholder recognized in kernel templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Placeholder {
    /// Device element type, e.g. `float`
    Type,
    /// Operator expression
    Op,
    /// Work-group size
    N,
    /// Identity value used for padding
    Base,
    /// Kernel parameter list
    Args,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::Type,
        Placeholder::Op,
        Placeholder::N,
        Placeholder::Base,
        Placeholder::Args,
    ];

    /// Name without the leading `$`
    pub fn name(self) -> &'static str {
        match self {
            Placeholder::Type => "TYPE",
            Placeholder::Op => "OP",
            Placeholder::N => "N",
            Placeholder::Base => "BASE",
            Placeholder::Args => "ARGS",
        }
    }

    pub fn from_name(name: &str) -> Option<Placeholder> {
        Placeholder::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder `{token}` at byte {offset}")]
    UnknownPlaceholder { token: String, offset: usize },

    #[error("no substitution given for {0}")]
    MissingSubstitution(Placeholder),

    #[error("substitution for {placeholder} contains placeholder token `{token}`")]
    NestedPlaceholder {
        placeholder: Placeholder,
        token: String,
    },
}

/// Yield `(offset, name)` for every `$NAME` token in `text`
fn placeholder_tokens(text: &str) -> impl Iterator<Item = (usize, &str)> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    std::iter::from_fn(move || {
        while pos < bytes.len() {
            if bytes[pos] != b'$' {
                pos += 1;
                continue;
            }
            let start = pos;
            let mut end = pos + 1;
            while end < bytes.len() && (bytes[end].is_ascii_uppercase() || bytes[end] == b'_') {
                end += 1;
            }
            pos = end.max(start + 1);
            if end > start + 1 {
                return Some((start, &text[start + 1..end]));
            }
        }
        None
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(Range<usize>),
    Slot(Placeholder),
}

/// A validated kernel source template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KernelTemplate {
    /// Parse a template, rejecting `$NAME` tokens that are not placeholders
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut text_start = 0;

        for (offset, name) in placeholder_tokens(&source) {
            let placeholder =
                Placeholder::from_name(name).ok_or_else(|| TemplateError::UnknownPlaceholder {
                    token: format!("${}", name),
                    offset,
                })?;
            if offset > text_start {
                segments.push(Segment::Text(text_start..offset));
            }
            segments.push(Segment::Slot(placeholder));
            text_start = offset + 1 + name.len();
        }
        if text_start < source.len() {
            segments.push(Segment::Text(text_start..source.len()));
        }

        Ok(Self { source, segments })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholders, in order of first appearance
    pub fn placeholders(&self) -> Vec<Placeholder> {
        let set: IndexSet<Placeholder> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                Segment::Slot(p) => Some(*p),
                Segment::Text(_) => None,
            })
            .collect();
        set.into_iter().collect()
    }

    /// Produce kernel source with every placeholder replaced
    pub fn render(&self, substitutions: &Substitutions) -> Result<String, TemplateError> {
        // Values for placeholders the template never uses are not inspected
        for placeholder in self.placeholders() {
            let Some(value) = substitutions.get(placeholder) else {
                continue;
            };
            if let Some((_, name)) = placeholder_tokens(value).find(|(_, n)| Placeholder::from_name(n).is_some()) {
                return Err(TemplateError::NestedPlaceholder {
                    placeholder,
                    token: format!("${}", name),
                });
            }
        }

        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(range) => out.push_str(&self.source[range.clone()]),
                Segment::Slot(placeholder) => {
                    let value = substitutions
                        .get(*placeholder)
                        .ok_or(TemplateError::MissingSubstitution(*placeholder))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Placeholder values for one render
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Substitutions {
    values: IndexMap<Placeholder, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, placeholder: Placeholder, value: impl ToString) -> Self {
        self.insert(placeholder, value);
        self
    }

    /// Set a value, returning the previous one
    pub fn insert(&mut self, placeholder: Placeholder, value: impl ToString) -> Option<String> {
        self.values.insert(placeholder, value.to_string())
    }

    pub fn get(&self, placeholder: Placeholder) -> Option<&str> {
        self.values.get(&placeholder).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Placeholder, &str)> {
        self.values.iter().map(|(p, v)| (*p, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<S: ToString> FromIterator<(Placeholder, S)> for Substitutions {
    fn from_iter<I: IntoIterator<Item = (Placeholder, S)>>(iter: I) -> Self {
        let mut subs = Substitutions::new();
        for (placeholder, value) in iter {
            subs.insert(placeholder, value);
        }
        subs
    }
}
