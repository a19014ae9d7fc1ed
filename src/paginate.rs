//! Folding a flat node sequence into fixed-capacity pages.
//!
//! Two rules run per node, in input order:
//!
//! 1. a section heading starts a new page unless the current one is empty;
//! 2. after appending, a page whose measured height exceeds the capacity
//!    gives the node back, is sealed, and the node opens the next page.
//!
//! Nodes are never split. A node taller than the capacity on its own ends
//! up alone on an over-full page.

use tracing::debug;

use crate::html::ContentNode;

/// The rendering collaborator's measurement capability.
pub trait Measure {
    fn measure(&self, nodes: &[ContentNode]) -> f32;
}

impl<F> Measure for F
where
    F: Fn(&[ContentNode]) -> f32,
{
    fn measure(&self, nodes: &[ContentNode]) -> f32 {
        self(nodes)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    nodes: Vec<ContentNode>,
}

impl Page {
    pub fn nodes(&self) -> &[ContentNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// Ordered, sealed pages of one generation request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pages: Vec<Page>,
}

impl Document {
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.pages.iter().map(Page::len).sum()
    }
}

pub fn paginate(nodes: Vec<ContentNode>, measure: &dyn Measure, max_height: f32) -> Document {
    let mut pages = Vec::new();
    let mut current = Page::default();

    for node in nodes {
        if node.is_section_heading() && !current.is_empty() {
            pages.push(std::mem::take(&mut current));
        }

        current.nodes.push(node);
        if current.len() > 1 && measure.measure(&current.nodes) > max_height {
            let Some(moved) = current.nodes.pop() else { continue };
            debug!(node = moved.index, page = pages.len(), "node overflows page, moving to next");
            pages.push(std::mem::take(&mut current));
            current.nodes.push(moved);
        }
    }

    if !current.is_empty() {
        pages.push(current);
    }
    Document { pages }
}
