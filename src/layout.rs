//! Block layout of content nodes on a fixed-width page surface.
//!
//! Measurement for the paginator and drawing for the rasterizer both go
//! through [`LayoutEngine::layout_node`], so the heights pagination relies on
//! are the heights that end up in the bitmap.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    html::{ContentNode, NodeKind},
    paginate::Measure,
};

/// Page surface in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageMetrics {
    pub width: f32,
    pub padding: f32,
    pub max_height: f32,
}

impl PageMetrics {
    pub fn with_max_height(max_height: f32) -> Self {
        Self { max_height, ..Self::default() }
    }

    pub fn content_width(&self) -> f32 {
        self.width - self.padding * 2.0
    }
}

impl Default for PageMetrics {
    fn default() -> Self {
        Self { width: 800.0, padding: 40.0, max_height: crate::config::DEFAULT_MAX_PAGE_HEIGHT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BlockStyle {
    font_size: f32,
    line_height: f32,
    margin_top: f32,
    margin_bottom: f32,
    indent: f32,
}

impl BlockStyle {
    fn for_kind(kind: &NodeKind) -> Self {
        let base = BlockStyle { font_size: 16.0, line_height: 1.6, margin_top: 0.0, margin_bottom: 12.0, indent: 0.0 };
        match kind {
            NodeKind::Heading(1) => BlockStyle { font_size: 32.0, line_height: 1.25, margin_bottom: 24.0, ..base },
            NodeKind::Heading(2) => BlockStyle { font_size: 26.0, line_height: 1.3, margin_top: 8.0, margin_bottom: 16.0, ..base },
            NodeKind::Heading(3) => BlockStyle { font_size: 20.0, line_height: 1.35, margin_top: 6.0, margin_bottom: 10.0, ..base },
            NodeKind::Heading(_) => BlockStyle { font_size: 18.0, line_height: 1.4, margin_bottom: 8.0, ..base },
            NodeKind::UnorderedList | NodeKind::OrderedList => BlockStyle { indent: 24.0, ..base },
            NodeKind::Figure => BlockStyle { margin_top: 8.0, margin_bottom: 16.0, ..base },
            _ => base,
        }
    }

    fn line_px(&self) -> f32 {
        self.font_size * self.line_height
    }
}

/// Something to paint, positioned relative to the top-left of its node box.
#[derive(Debug, Clone, PartialEq)]
pub enum Placed {
    Text { x: f32, y: f32, font_size: f32, line_height: f32, text: String },
    Image { x: f32, y: f32, width: f32, height: f32, image: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeLayout {
    pub height: f32,
    pub items: Vec<Placed>,
}

const DEFAULT_FIGURE_ASPECT: f32 = 0.75;
const MAX_FIGURE_HEIGHT: f32 = 560.0;
const FALLBACK_ADVANCE: f32 = 0.5;

/// Lays out nodes with real glyph advances when a TrueType font is loaded
/// and a fixed average advance otherwise.
///
/// Node heights are cached by node index, so one engine serves one node
/// sequence.
pub struct LayoutEngine {
    metrics: PageMetrics,
    font: Option<Arc<Vec<u8>>>,
    heights: Mutex<HashMap<usize, f32>>,
}

impl LayoutEngine {
    pub fn new(metrics: PageMetrics, font: Option<Arc<Vec<u8>>>) -> Self {
        Self { metrics, font, heights: Mutex::new(HashMap::new()) }
    }

    pub fn metrics(&self) -> &PageMetrics {
        &self.metrics
    }

    pub fn font(&self) -> Option<&[u8]> {
        self.font.as_deref().map(Vec::as_slice)
    }

    fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(self.font()?, 0).ok()
    }

    pub fn text_width(&self, text: &str, font_size: f32) -> f32 {
        advance_width(self.face().as_ref(), text, font_size)
    }

    /// Greedy word wrap. Words wider than the line get a line of their own.
    pub fn wrap(&self, text: &str, font_size: f32, max_width: f32) -> Vec<String> {
        let face = self.face();
        let space = advance_width(face.as_ref(), " ", font_size);
        let mut lines = Vec::new();
        let mut line = String::new();
        let mut width = 0.0;
        for word in text.split_whitespace() {
            let word_width = advance_width(face.as_ref(), word, font_size);
            if !line.is_empty() && width + space + word_width > max_width {
                lines.push(std::mem::take(&mut line));
                width = 0.0;
            }
            if !line.is_empty() {
                line.push(' ');
                width += space;
            }
            line.push_str(word);
            width += word_width;
        }
        if !line.is_empty() {
            lines.push(line);
        }
        lines
    }

    fn place_lines(&self, items: &mut Vec<Placed>, y: &mut f32, x: f32, text: &str, width: f32, style: &BlockStyle) {
        for line in self.wrap(text, style.font_size, width) {
            items.push(Placed::Text {
                x,
                y: *y,
                font_size: style.font_size,
                line_height: style.line_height,
                text: line,
            });
            *y += style.line_px();
        }
    }

    pub fn layout_node(&self, node: &ContentNode) -> NodeLayout {
        if node.kind == NodeKind::Comment {
            return NodeLayout { height: 0.0, items: Vec::new() };
        }
        let style = BlockStyle::for_kind(&node.kind);
        let width = self.metrics.content_width() - style.indent;
        let mut y = style.margin_top;
        let mut items = Vec::new();

        match &node.kind {
            NodeKind::UnorderedList | NodeKind::OrderedList => {
                for (i, item) in node.items.iter().enumerate() {
                    let marker = match node.kind {
                        NodeKind::OrderedList => format!("{}.", i + 1),
                        _ => "•".to_string(),
                    };
                    let start = y;
                    self.place_lines(&mut items, &mut y, style.indent, item, width, &style);
                    if y == start {
                        y += style.line_px();
                    }
                    let marker_x = style.indent - self.text_width(&marker, style.font_size) - 6.0;
                    items.push(Placed::Text {
                        x: marker_x.max(0.0),
                        y: start,
                        font_size: style.font_size,
                        line_height: style.line_height,
                        text: marker,
                    });
                }
            }
            _ if !node.images.is_empty() => {
                for (i, image) in node.images.iter().enumerate() {
                    let (w, h) = image
                        .size
                        .map(|(w, h)| (w as f32, h as f32))
                        .unwrap_or((width, width * DEFAULT_FIGURE_ASPECT));
                    let draw_width = w.min(width);
                    let draw_height = (draw_width * h / w.max(1.0)).min(MAX_FIGURE_HEIGHT);
                    let draw_width = draw_height * w / h.max(1.0);
                    items.push(Placed::Image {
                        x: (width - draw_width) / 2.0,
                        y,
                        width: draw_width,
                        height: draw_height,
                        image: i,
                    });
                    y += draw_height + 8.0;
                }
                if node.kind != NodeKind::Figure && !node.text.is_empty() {
                    self.place_lines(&mut items, &mut y, 0.0, &node.text, width, &style);
                }
            }
            _ => self.place_lines(&mut items, &mut y, 0.0, &node.text, width, &style),
        }

        NodeLayout { height: y + style.margin_bottom, items }
    }

    fn node_height(&self, node: &ContentNode) -> f32 {
        if let Some(height) = self.heights.lock().get(&node.index) {
            return *height;
        }
        let height = self.layout_node(node).height;
        self.heights.lock().insert(node.index, height);
        height
    }
}

impl Measure for LayoutEngine {
    fn measure(&self, nodes: &[ContentNode]) -> f32 {
        self.metrics.padding * 2.0 + nodes.iter().map(|n| self.node_height(n)).sum::<f32>()
    }
}

fn advance_width(face: Option<&ttf_parser::Face<'_>>, text: &str, font_size: f32) -> f32 {
    let Some(face) = face else {
        return text.chars().count() as f32 * font_size * FALLBACK_ADVANCE;
    };
    let scale = font_size / face.units_per_em() as f32;
    text.chars()
        .map(|c| {
            face.glyph_index(c)
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| adv as f32 * scale)
                .unwrap_or(font_size * FALLBACK_ADVANCE)
        })
        .sum()
}

const FONT_CANDIDATES: &[&str] = &[
    "truetype/dejavu/DejaVuSans.ttf",
    "TTF/DejaVuSans.ttf",
    "dejavu/DejaVuSans.ttf",
    "DejaVuSans.ttf",
    "truetype/liberation/LiberationSans-Regular.ttf",
    "liberation/LiberationSans-Regular.ttf",
    "TTF/LiberationSans-Regular.ttf",
    "Arial.ttf",
    "arial.ttf",
];

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from("/usr/share/fonts"), PathBuf::from("/usr/local/share/fonts")];
    if let Ok(home) = std::env::var("HOME") {
        dirs.push(PathBuf::from(home).join(".fonts"));
    }
    dirs.push(PathBuf::from("/System/Library/Fonts/Supplemental"));
    dirs.push(PathBuf::from("/Library/Fonts"));
    dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
    dirs
}

fn read_font(path: &Path) -> Option<Arc<Vec<u8>>> {
    let bytes = std::fs::read(path).ok()?;
    ttf_parser::Face::parse(&bytes, 0).ok()?;
    Some(Arc::new(bytes))
}

/// Loads the configured font, or the first usable common system font.
/// `None` means pages are laid out with approximate advances and text is
/// drawn as greeked bars.
pub fn load_font(configured: Option<&Path>) -> Option<Arc<Vec<u8>>> {
    if let Some(path) = configured {
        match read_font(path) {
            Some(font) => {
                info!(path = %path.display(), "Loaded page font");
                return Some(font);
            }
            None => warn!(path = %path.display(), "Configured font unreadable, searching system fonts"),
        }
    }
    for dir in system_font_dirs() {
        for name in FONT_CANDIDATES {
            let path = dir.join(name);
            if let Some(font) = read_font(&path) {
                info!(path = %path.display(), "Loaded system page font");
                return Some(font);
            }
        }
    }
    debug!("No TrueType font found");
    warn!("⚠️ No usable font found, PDF text will be rendered as placeholder bars");
    None
}
