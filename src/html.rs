//! Splits a generated HTML fragment into the flat sequence of top-level
//! content nodes the paginator works on.

use base64::Engine;
use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};
use std::io::Cursor;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Heading(u8),
    Paragraph,
    UnorderedList,
    OrderedList,
    Figure,
    /// HTML comment, e.g. an image marker left unresolved. Occupies no space.
    Comment,
    /// Bare text directly under the fragment root.
    Text,
    Other(String),
}

impl NodeKind {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "h1" => NodeKind::Heading(1),
            "h2" => NodeKind::Heading(2),
            "h3" => NodeKind::Heading(3),
            "h4" => NodeKind::Heading(4),
            "h5" => NodeKind::Heading(5),
            "h6" => NodeKind::Heading(6),
            "p" => NodeKind::Paragraph,
            "ul" => NodeKind::UnorderedList,
            "ol" => NodeKind::OrderedList,
            "figure" | "img" => NodeKind::Figure,
            other => NodeKind::Other(other.to_string()),
        }
    }
}

/// An image referenced by a node. `size` is the intrinsic pixel size when the
/// source is a decodable data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub src: String,
    pub size: Option<(u32, u32)>,
}

/// One indivisible block of content. `index` is its position in the
/// original sequence and serves as its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
    pub index: usize,
    pub kind: NodeKind,
    pub html: String,
    pub text: String,
    pub items: Vec<String>,
    pub images: Vec<EmbeddedImage>,
}

impl ContentNode {
    /// Chapter-level headings force a page break.
    pub fn is_section_heading(&self) -> bool {
        self.kind == NodeKind::Heading(2)
    }
}

pub fn split_fragment(html: &str) -> Vec<ContentNode> {
    // The leading <body> keeps leading comments inside the body instead of
    // attaching them to the document node.
    let document = kuchiki::parse_html().one(format!("<body>{html}"));
    let Ok(body) = document.select_first("body") else {
        return Vec::new();
    };

    let mut nodes = Vec::new();
    for child in body.as_node().children() {
        if let Some(node) = content_node(&child, nodes.len()) {
            nodes.push(node);
        }
    }
    nodes
}

fn content_node(node: &NodeRef, index: usize) -> Option<ContentNode> {
    let kind = match node.data() {
        NodeData::Element(el) => NodeKind::from_tag(&el.name.local.as_ref().to_ascii_lowercase()),
        NodeData::Comment(_) => NodeKind::Comment,
        NodeData::Text(text) if !text.borrow().trim().is_empty() => NodeKind::Text,
        _ => return None,
    };

    let text = if kind == NodeKind::Comment { String::new() } else { collapse_whitespace(&node.text_contents()) };
    let items: Vec<String> = match kind {
        NodeKind::UnorderedList | NodeKind::OrderedList => node
            .select("li")
            .map(|lis| lis.map(|li| collapse_whitespace(&li.text_contents())).collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    let images: Vec<EmbeddedImage> = node
        .select("img")
        .map(|imgs| {
            imgs.filter_map(|img| {
                let src = img.attributes.borrow().get("src")?.to_string();
                let size = decode_data_uri(&src).and_then(|(_, bytes)| image_size(&bytes));
                Some(EmbeddedImage { src, size })
            })
            .collect()
        })
        .unwrap_or_default();

    Some(ContentNode { index, kind, html: node.to_string(), text, items, images })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn image_size(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Returns `(mime, payload)` for `data:` URIs, `None` for anything else.
pub fn decode_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.split(';').next().filter(|v| !v.is_empty()).unwrap_or("application/octet-stream");
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD.decode(payload.trim()).ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime.to_string(), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::DemoGenerator;
    use pretty_assertions::assert_eq;

    fn kinds(nodes: &[ContentNode]) -> Vec<NodeKind> {
        nodes.iter().map(|n| n.kind.clone()).collect()
    }

    #[test]
    fn splits_top_level_blocks_in_order() {
        let html = "<h1>Title</h1>\n<h2>Intro</h2>\n<p>One  \n two</p>\n<ul><li>a</li><li>b</li></ul>\n<ol><li>c</li></ol><h3>Sub</h3>";
        let nodes = split_fragment(html);
        assert_eq!(
            kinds(&nodes),
            vec![
                NodeKind::Heading(1),
                NodeKind::Heading(2),
                NodeKind::Paragraph,
                NodeKind::UnorderedList,
                NodeKind::OrderedList,
                NodeKind::Heading(3),
            ]
        );
        assert_eq!(nodes[2].text, "One two");
        assert_eq!(nodes[3].items, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(nodes.iter().map(|n| n.index).collect::<Vec<_>>(), (0..6).collect::<Vec<_>>());
        assert!(nodes[1].is_section_heading());
        assert!(!nodes[0].is_section_heading());
        assert!(!nodes[5].is_section_heading());
    }

    #[test]
    fn keeps_unresolved_markers_and_stray_text() {
        let nodes = split_fragment("<!--IMAGE_CH1_SLOT1-->\n<h2>C</h2>loose words");
        assert_eq!(kinds(&nodes), vec![NodeKind::Comment, NodeKind::Heading(2), NodeKind::Text]);
        assert_eq!(nodes[0].html, "<!--IMAGE_CH1_SLOT1-->");
        assert_eq!(nodes[2].text, "loose words");
    }

    #[test]
    fn figures_expose_image_sizes() {
        let png = DemoGenerator::placeholder_png(1, 0).unwrap();
        let uri = crate::generator::GeneratedImage::png(png).to_data_uri();
        let html = format!("<figure class=\"ebook-figure\"><img src=\"{uri}\" alt=\"x\"></figure><p><img src=\"https://x/y.png\"></p>");
        let nodes = split_fragment(&html);
        assert_eq!(nodes[0].kind, NodeKind::Figure);
        assert_eq!(nodes[0].images[0].size, Some((320, 240)));
        assert_eq!(nodes[1].images[0].size, None);
    }

    #[test]
    fn data_uri_decoding() {
        assert_eq!(decode_data_uri("data:text/plain,hi"), Some(("text/plain".into(), b"hi".to_vec())));
        assert_eq!(decode_data_uri("data:image/png;base64,aGk="), Some(("image/png".into(), b"hi".to_vec())));
        assert_eq!(decode_data_uri("https://example.com/a.png"), None);
        assert_eq!(decode_data_uri("data:image/png;base64,@@@"), None);
    }

    #[test]
    fn empty_fragment_has_no_nodes() {
        assert!(split_fragment("  \n ").is_empty());
    }
}
