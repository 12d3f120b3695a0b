//! Client-side search over a listed catalog.

use circulars_core::Circular;

/// Title search plus tag selection.
///
/// A circular matches when its title contains `term` (case-insensitive) and,
/// if any tags are selected, it carries at least one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircularFilter {
    pub term: String,
    pub tags: Vec<String>,
}

impl CircularFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = term.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for tag in tags {
            let tag = tag.into();
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
        self
    }

    /// Select `tag`, or deselect it if already selected.
    pub fn toggle_tag(&mut self, tag: &str) {
        match self.tags.iter().position(|t| t == tag) {
            Some(i) => {
                self.tags.remove(i);
            }
            None => self.tags.push(tag.to_string()),
        }
    }

    pub fn matches(&self, circular: &Circular) -> bool {
        let term = self.term.trim().to_lowercase();
        let title_ok = term.is_empty() || circular.title.to_lowercase().contains(&term);
        let tags_ok = self.tags.is_empty() || self.tags.iter().any(|t| circular.has_tag(t));
        title_ok && tags_ok
    }

    /// Matching circulars, in input order.
    pub fn apply<'a>(&self, circulars: &'a [Circular]) -> Vec<&'a Circular> {
        circulars.iter().filter(|c| self.matches(c)).collect()
    }
}

/// Distinct tags across `circulars`, in first-seen order.
pub fn all_tags(circulars: &[Circular]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in circulars.iter().flat_map(|c| c.tags.iter()) {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}
