// ABOUTME: Lenient HTML reader and canonical HTML writer for journal page bodies
// ABOUTME: Maps the supported element subset onto the document model, keeping the rest verbatim

use super::ast::{
    collapse_whitespace, is_blank, split_references, trim_inlines, Block, Inline, List, ListItem,
    Table,
};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea"];

const BLOCK_ELEMENTS: &[&str] = &[
    "address",
    "article",
    "aside",
    "audio",
    "blockquote",
    "body",
    "caption",
    "dd",
    "details",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "head",
    "header",
    "hr",
    "html",
    "iframe",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "script",
    "section",
    "style",
    "summary",
    "table",
    "tbody",
    "td",
    "template",
    "tfoot",
    "th",
    "thead",
    "tr",
    "ul",
    "video",
];

/// Containers that carry no meaning of their own when they have no attributes.
const TRANSPARENT_BLOCKS: &[&str] = &["article", "body", "div", "html", "main", "section"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<Node>,
    },
    Text(String),
    Comment(String),
}

fn is_block(name: &str) -> bool {
    BLOCK_ELEMENTS.contains(&name)
}

// ---------------------------------------------------------------------------
// Tokenizing and tree building
// ---------------------------------------------------------------------------

struct OpenElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

struct TreeBuilder {
    root: Vec<Node>,
    stack: Vec<OpenElement>,
}

impl TreeBuilder {
    fn new() -> Self {
        TreeBuilder {
            root: Vec::new(),
            stack: Vec::new(),
        }
    }

    fn push_node(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(open) => open.children.push(node),
            None => self.root.push(node),
        }
    }

    fn pop(&mut self) {
        if let Some(open) = self.stack.pop() {
            self.push_node(Node::Element {
                name: open.name,
                attrs: open.attrs,
                children: open.children,
            });
        }
    }

    /// Index of the nearest open `target`, searching no further than a `boundary` element.
    fn find_open(&self, targets: &[&str], boundaries: &[&str]) -> Option<usize> {
        for (idx, open) in self.stack.iter().enumerate().rev() {
            if targets.contains(&open.name.as_str()) {
                return Some(idx);
            }
            if boundaries.contains(&open.name.as_str()) {
                return None;
            }
        }
        None
    }

    fn close_to(&mut self, idx: usize) {
        while self.stack.len() > idx {
            self.pop();
        }
    }

    fn implicit_close(&mut self, name: &str) {
        let found = match name {
            "li" => self.find_open(&["li"], &["ul", "ol"]),
            "td" | "th" => self.find_open(&["td", "th"], &["tr", "table"]),
            "tr" => self.find_open(&["tr"], &["table"]),
            "thead" | "tbody" | "tfoot" => self.find_open(&["thead", "tbody", "tfoot"], &["table"]),
            "dt" | "dd" => self.find_open(&["dt", "dd"], &["dl"]),
            _ if is_block(name) => {
                if self.stack.last().map(|o| o.name.as_str()) == Some("p") {
                    Some(self.stack.len() - 1)
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(idx) = found {
            self.close_to(idx);
        }
    }

    fn start(&mut self, name: String, attrs: Vec<(String, String)>, self_closing: bool) {
        self.implicit_close(&name);
        if self_closing || VOID_ELEMENTS.contains(&name.as_str()) {
            self.push_node(Node::Element {
                name,
                attrs,
                children: Vec::new(),
            });
        } else {
            self.stack.push(OpenElement {
                name,
                attrs,
                children: Vec::new(),
            });
        }
    }

    fn end(&mut self, name: &str) {
        // Stray end tags are ignored.
        if let Some(idx) = self.stack.iter().rposition(|o| o.name == name) {
            self.close_to(idx);
        }
    }

    fn finish(mut self) -> Vec<Node> {
        self.close_to(0);
        self.root
    }
}

/// Parses an HTML fragment into a node tree. Never fails; malformed markup is repaired.
pub fn parse_nodes(input: &str) -> Vec<Node> {
    let mut builder = TreeBuilder::new();
    let mut rest = input;

    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            builder.push_node(Node::Text(decode_entities(rest)));
            break;
        };
        if lt > 0 {
            builder.push_node(Node::Text(decode_entities(&rest[..lt])));
            rest = &rest[lt..];
        }

        if let Some(after) = rest.strip_prefix("<!--") {
            let end = after.find("-->").unwrap_or(after.len());
            builder.push_node(Node::Comment(after[..end].to_string()));
            rest = after.get(end + 3..).unwrap_or("");
        } else if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map(|i| i + 1).unwrap_or(rest.len());
            rest = &rest[end..];
        } else if let Some(after) = rest.strip_prefix("</") {
            let end = after.find('>').unwrap_or(after.len());
            let name = after[..end].trim().to_ascii_lowercase();
            builder.end(&name);
            rest = after.get(end + 1..).unwrap_or("");
        } else if rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let (name, attrs, self_closing, consumed) = parse_tag(rest);
            rest = &rest[consumed..];
            if RAW_TEXT_ELEMENTS.contains(&name.as_str()) && !self_closing {
                let close = format!("</{}", name);
                let end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
                let text = rest[..end].to_string();
                rest = &rest[end..];
                builder.start(name.clone(), attrs, false);
                builder.push_node(Node::Text(text));
                builder.end(&name);
                if let Some(gt) = rest.find('>') {
                    rest = &rest[gt + 1..];
                }
            } else {
                builder.start(name, attrs, self_closing);
            }
        } else {
            builder.push_node(Node::Text("<".into()));
            rest = &rest[1..];
        }
    }

    merge_text_nodes(builder.finish())
}

fn merge_text_nodes(nodes: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let node = match node {
            Node::Element {
                name,
                attrs,
                children,
            } => Node::Element {
                name,
                attrs,
                children: merge_text_nodes(children),
            },
            other => other,
        };
        if let (Some(Node::Text(prev)), Node::Text(t)) = (out.last_mut(), &node) {
            prev.push_str(t);
            continue;
        }
        out.push(node);
    }
    out
}

/// Parses a start tag at the beginning of `input` (which starts with `<`).
/// Returns the lowercased name, attributes, self-closing flag and bytes consumed.
fn parse_tag(input: &str) -> (String, Vec<(String, String)>, bool, usize) {
    let bytes = input.as_bytes();
    let mut pos = 1;
    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'>' && bytes[pos] != b'/' {
        pos += 1;
    }
    let name = input[1..pos].to_ascii_lowercase();
    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }
        match bytes[pos] {
            b'>' => {
                pos += 1;
                break;
            }
            b'/' => {
                self_closing = bytes.get(pos + 1) == Some(&b'>');
                pos += 1;
                continue;
            }
            _ => {}
        }

        let name_start = pos;
        while pos < bytes.len()
            && !bytes[pos].is_ascii_whitespace()
            && !matches!(bytes[pos], b'=' | b'>' | b'/')
        {
            pos += 1;
        }
        let attr_name = input[name_start..pos].to_ascii_lowercase();
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }

        let mut value = String::new();
        if bytes.get(pos) == Some(&b'=') {
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match bytes.get(pos) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let start = pos + 1;
                    let end = input[start..]
                        .find(quote as char)
                        .map(|i| start + i)
                        .unwrap_or(input.len());
                    value = decode_entities(&input[start..end]);
                    pos = (end + 1).min(input.len());
                }
                _ => {
                    let start = pos;
                    while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() && bytes[pos] != b'>' {
                        pos += 1;
                    }
                    value = decode_entities(&input[start..pos]);
                }
            }
        }
        if !attr_name.is_empty() {
            attrs.push((attr_name, value));
        }
    }

    (name, attrs, self_closing, pos)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest[1..]
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&rest[1..1 + semi]).map(|c| (c, semi + 2)));
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    if let Some(num) = entity.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }
    let c = match entity {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "times" => '\u{d7}',
        "middot" => '\u{b7}',
        "deg" => '\u{b0}',
        _ => return None,
    };
    Some(c)
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(text: &str) -> String {
    escape_text(text).replace('"', "&quot;")
}

/// Serializes a parsed node back to HTML.
pub fn serialize_node(node: &Node) -> String {
    let mut out = String::new();
    write_node(node, &mut out);
    out
}

fn write_node(node: &Node, out: &mut String) {
    match node {
        Node::Text(t) => out.push_str(&escape_text(t)),
        Node::Comment(c) => {
            out.push_str("<!--");
            out.push_str(c);
            out.push_str("-->");
        }
        Node::Element {
            name,
            attrs,
            children,
        } => {
            out.push('<');
            out.push_str(name);
            for (key, value) in attrs {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&name.as_str()) {
                return;
            }
            if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
                for child in children {
                    if let Node::Text(t) = child {
                        out.push_str(t);
                    }
                }
            } else {
                for child in children {
                    write_node(child, out);
                }
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
    }
}

fn text_content(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(t) => out.push_str(t),
            Node::Element { children, .. } => out.push_str(&text_content(children)),
            Node::Comment(_) => {}
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Node tree -> document model
// ---------------------------------------------------------------------------

/// Reads an HTML body into blocks, recording every construct that had to be approximated.
pub fn parse(input: &str, warnings: &mut Vec<String>) -> Vec<Block> {
    let nodes = parse_nodes(input);
    let mut reader = Reader { warnings };
    reader.blocks(&nodes)
}

struct Reader<'w> {
    warnings: &'w mut Vec<String>,
}

impl Reader<'_> {
    fn warn(&mut self, message: String) {
        if !self.warnings.contains(&message) {
            self.warnings.push(message);
        }
    }

    fn warn_attrs(&mut self, name: &str, attrs: &[(String, String)], allowed: &[&str]) {
        let dropped: Vec<&str> = attrs
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|k| !allowed.contains(k))
            .collect();
        if !dropped.is_empty() {
            self.warn(format!(
                "dropped attribute(s) {} on <{}>",
                dropped.join(", "),
                name
            ));
        }
    }

    fn raw_block(&mut self, node: &Node, reason: &str) -> Block {
        if let Node::Element { name, .. } = node {
            self.warn(format!("kept <{}> as raw HTML: {}", name, reason));
        }
        Block::Raw(serialize_node(node))
    }

    fn blocks(&mut self, nodes: &[Node]) -> Vec<Block> {
        let mut out = Vec::new();
        let mut pending: Vec<Inline> = Vec::new();

        for node in nodes {
            match node {
                Node::Text(_) => self.inline(node, &mut pending),
                Node::Comment(_) => self.warn("dropped HTML comment".into()),
                Node::Element { name, .. } if !is_block(name) => self.inline(node, &mut pending),
                Node::Element { .. } => {
                    flush_paragraph(&mut pending, &mut out);
                    self.block(node, &mut out);
                }
            }
        }
        flush_paragraph(&mut pending, &mut out);
        out
    }

    fn block(&mut self, node: &Node, out: &mut Vec<Block>) {
        let Node::Element {
            name,
            attrs,
            children,
        } = node
        else {
            return;
        };

        match name.as_str() {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                self.warn_attrs(name, attrs, &["id"]);
                let level = name[1..].parse().unwrap_or(1);
                let content = self.inlines(children);
                if !is_blank(&content) {
                    out.push(Block::Heading { level, content });
                }
            }
            "p" => {
                self.warn_attrs(name, attrs, &[]);
                let content = self.inlines(children);
                if !is_blank(&content) {
                    out.push(Block::Paragraph(content));
                }
            }
            "ul" | "ol" => match self.list(node) {
                Some(list) if !list.items.is_empty() => out.push(Block::List(list)),
                Some(_) => {}
                None => out.push(self.raw_block(node, "list items hold block content")),
            },
            "table" => match self.table(node) {
                Some(table) if !table.rows.is_empty() => out.push(Block::Table(table)),
                Some(_) => {}
                None => out.push(self.raw_block(node, "table layout has no markup equivalent")),
            },
            "blockquote" => {
                self.warn_attrs(name, attrs, &[]);
                out.push(Block::Quote(self.blocks(children)));
            }
            "pre" => out.push(self.preformatted(node)),
            "hr" => {
                self.warn_attrs(name, attrs, &[]);
                out.push(Block::Rule);
            }
            _ if TRANSPARENT_BLOCKS.contains(&name.as_str()) && attrs.is_empty() => {
                out.extend(self.blocks(children));
            }
            _ => out.push(self.raw_block(node, "no markup equivalent")),
        }
    }

    fn preformatted(&mut self, node: &Node) -> Block {
        let Node::Element {
            attrs, children, ..
        } = node
        else {
            return Block::Raw(serialize_node(node));
        };

        let mut lang = None;
        let mut direct = false;
        let text = match children.as_slice() {
            [Node::Element {
                name,
                attrs: code_attrs,
                children: code_children,
            }] if name == "code"
                && code_children.iter().all(|c| matches!(c, Node::Text(_))) =>
            {
                lang = code_attrs
                    .iter()
                    .find(|(k, _)| k == "class")
                    .and_then(|(_, v)| {
                        v.split_whitespace()
                            .find_map(|c| c.strip_prefix("language-"))
                            .map(str::to_string)
                    });
                text_content(code_children)
            }
            _ if children.iter().all(|c| matches!(c, Node::Text(_))) => {
                direct = true;
                text_content(children)
            }
            _ => return self.raw_block(node, "preformatted text contains markup"),
        };
        self.warn_attrs("pre", attrs, &[]);

        // A newline right after the <pre> tag is not part of the content.
        let text = match text.strip_prefix('\n') {
            Some(stripped) if direct => stripped,
            _ => text.as_str(),
        };
        Block::Code {
            lang,
            text: text.trim_end_matches('\n').to_string(),
        }
    }

    fn list(&mut self, node: &Node) -> Option<List> {
        let Node::Element {
            name,
            attrs,
            children,
        } = node
        else {
            return None;
        };
        let mut items = Vec::new();

        for child in children {
            match child {
                Node::Text(t) if t.trim().is_empty() => {}
                Node::Comment(_) => {}
                Node::Element {
                    name: item_name,
                    attrs: item_attrs,
                    children: item_children,
                } if item_name == "li" => {
                    if !item_attrs.is_empty() {
                        return None;
                    }
                    items.push(self.list_item(item_children)?);
                }
                _ => return None,
            }
        }

        let ordered = name == "ol";
        let start = attrs
            .iter()
            .find(|(k, _)| ordered && k == "start")
            .and_then(|(_, v)| v.trim().parse::<u32>().ok());
        let allowed: &[&str] = if start.is_some() { &["start"] } else { &[] };
        self.warn_attrs(name, attrs, allowed);
        Some(List {
            ordered,
            start: start.filter(|n| *n != 1),
            items,
        })
    }

    fn list_item(&mut self, children: &[Node]) -> Option<ListItem> {
        let mut content = Vec::new();
        let mut lists = Vec::new();
        let mut seen_paragraph = false;

        for child in children {
            match child {
                Node::Element {
                    name,
                    attrs,
                    children: inner,
                } if is_block(name) => match name.as_str() {
                    "ul" | "ol" => {
                        let nested = self.list(child)?;
                        if !nested.items.is_empty() {
                            lists.push(nested);
                        }
                    }
                    "p" if !seen_paragraph
                        && lists.is_empty()
                        && is_blank(&trim_inlines(content.clone()))
                        && attrs.is_empty() =>
                    {
                        seen_paragraph = true;
                        content = self.inline_nodes(inner);
                    }
                    _ => return None,
                },
                _ if !lists.is_empty() => {
                    // Text after a nested list cannot be placed back on the bullet line.
                    if let Node::Text(t) = child {
                        if t.trim().is_empty() {
                            continue;
                        }
                    }
                    return None;
                }
                _ => self.inline(child, &mut content),
            }
        }

        Some(ListItem {
            content: trim_inlines(content),
            children: lists,
        })
    }

    fn table(&mut self, node: &Node) -> Option<Table> {
        let Node::Element {
            attrs, children, ..
        } = node
        else {
            return None;
        };

        let mut rows = Vec::new();
        let mut header = false;
        let mut row_nodes: Vec<(&Node, bool)> = Vec::new();

        for child in children {
            match child {
                Node::Text(t) if t.trim().is_empty() => {}
                Node::Comment(_) => {}
                Node::Element {
                    name,
                    children: section,
                    ..
                } if matches!(name.as_str(), "thead" | "tbody" | "tfoot") => {
                    for row in section {
                        match row {
                            Node::Text(t) if t.trim().is_empty() => {}
                            Node::Element { name: n, .. } if n == "tr" => {
                                row_nodes.push((row, name == "thead"))
                            }
                            _ => return None,
                        }
                    }
                }
                Node::Element { name, .. } if name == "tr" => row_nodes.push((child, false)),
                _ => return None,
            }
        }

        for (idx, (row, in_head)) in row_nodes.into_iter().enumerate() {
            let Node::Element {
                children: cells, ..
            } = row
            else {
                continue;
            };
            let mut out_row = Vec::new();
            let mut all_header = true;
            for cell in cells {
                match cell {
                    Node::Text(t) if t.trim().is_empty() => {}
                    Node::Element {
                        name,
                        attrs: cell_attrs,
                        children: cell_children,
                    } if name == "td" || name == "th" => {
                        if cell_attrs
                            .iter()
                            .any(|(k, _)| k == "colspan" || k == "rowspan")
                        {
                            return None;
                        }
                        self.warn_attrs(name, cell_attrs, &[]);
                        all_header &= name == "th";
                        out_row.push(self.cell(cell_children)?);
                    }
                    _ => return None,
                }
            }
            if idx == 0 && (in_head || (all_header && !out_row.is_empty())) {
                header = true;
            } else if in_head {
                // Only a single header row is expressible.
                return None;
            }
            rows.push(out_row);
        }

        self.warn_attrs("table", attrs, &[]);
        Some(Table { header, rows })
    }

    fn cell(&mut self, children: &[Node]) -> Option<Vec<Inline>> {
        let significant: Vec<&Node> = children
            .iter()
            .filter(|c| !matches!(c, Node::Text(t) if t.trim().is_empty()))
            .collect();
        match significant.as_slice() {
            [Node::Element {
                name,
                attrs,
                children: inner,
            }] if name == "p" && attrs.is_empty() => Some(self.inlines(inner)),
            _ if significant.iter().any(|c| match c {
                Node::Element { name, .. } => is_block(name),
                _ => false,
            }) =>
            {
                None
            }
            _ => Some(self.inlines(children)),
        }
    }

    fn inlines(&mut self, nodes: &[Node]) -> Vec<Inline> {
        trim_inlines(self.inline_nodes(nodes))
    }

    fn inline_nodes(&mut self, nodes: &[Node]) -> Vec<Inline> {
        let mut out = Vec::new();
        for node in nodes {
            self.inline(node, &mut out);
        }
        out
    }

    fn inline(&mut self, node: &Node, out: &mut Vec<Inline>) {
        let (name, attrs, children) = match node {
            Node::Text(t) => {
                out.extend(split_references(&collapse_whitespace(t)));
                return;
            }
            Node::Comment(_) => {
                self.warn("dropped HTML comment".into());
                return;
            }
            Node::Element {
                name,
                attrs,
                children,
            } => (name.as_str(), attrs, children),
        };

        let wrap = |reader: &mut Self, f: fn(Vec<Inline>) -> Inline, out: &mut Vec<Inline>| {
            reader.warn_attrs(name, attrs, &[]);
            out.push(f(reader.inline_nodes(children)));
        };

        match name {
            "strong" | "b" => wrap(self, Inline::Bold, out),
            "em" | "i" => wrap(self, Inline::Italic, out),
            "u" | "ins" => wrap(self, Inline::Underline, out),
            "s" | "del" | "strike" => wrap(self, Inline::Strike, out),
            "code" | "kbd" | "samp" | "tt"
                if children.iter().all(|c| matches!(c, Node::Text(_))) =>
            {
                self.warn_attrs(name, attrs, &[]);
                out.push(Inline::Code(collapse_whitespace(&text_content(children))));
            }
            "a" if attrs.iter().any(|(k, _)| k == "href") => {
                let href = attrs
                    .iter()
                    .find(|(k, _)| k == "href")
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default();
                self.warn_attrs(name, attrs, &["href"]);
                out.push(Inline::Link {
                    href,
                    content: self.inline_nodes(children),
                });
            }
            "br" => out.push(Inline::LineBreak),
            "span" if attrs.is_empty() => out.extend(self.inline_nodes(children)),
            _ => {
                self.warn(format!("kept <{}> as raw HTML: no markup equivalent", name));
                out.push(Inline::Raw(serialize_node(node)));
            }
        }
    }
}

fn flush_paragraph(pending: &mut Vec<Inline>, out: &mut Vec<Block>) {
    let content = trim_inlines(std::mem::take(pending));
    if !is_blank(&content) {
        out.push(Block::Paragraph(content));
    }
}

// ---------------------------------------------------------------------------
// Document model -> canonical HTML
// ---------------------------------------------------------------------------

pub fn render(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(render_block)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_block(block: &Block) -> String {
    match block {
        Block::Heading { level, content } => {
            format!("<h{0}>{1}</h{0}>", level, render_inlines(content))
        }
        Block::Paragraph(content) => format!("<p>{}</p>", render_inlines(content)),
        Block::List(list) => render_list(list),
        Block::Table(table) => render_table(table),
        Block::Quote(inner) => {
            if inner.is_empty() {
                "<blockquote></blockquote>".into()
            } else {
                format!("<blockquote>\n{}\n</blockquote>", render(inner))
            }
        }
        Block::Code { lang, text } => match lang {
            Some(lang) => format!(
                "<pre><code class=\"language-{}\">{}</code></pre>",
                escape_attr(lang),
                escape_text(text)
            ),
            None => format!("<pre><code>{}</code></pre>", escape_text(text)),
        },
        Block::Rule => "<hr>".into(),
        Block::Raw(html) => html.clone(),
    }
}

fn render_list(list: &List) -> String {
    let tag = if list.ordered { "ol" } else { "ul" };
    let mut out = match list.start {
        Some(start) if list.ordered => format!("<{} start=\"{}\">", tag, start),
        _ => format!("<{}>", tag),
    };
    for item in &list.items {
        out.push_str("<li>");
        out.push_str(&render_inlines(&item.content));
        for child in &item.children {
            out.push_str(&render_list(child));
        }
        out.push_str("</li>");
    }
    out.push_str(&format!("</{}>", tag));
    out
}

fn render_table(table: &Table) -> String {
    let mut out = String::from("<table>");
    let mut rows = table.rows.iter();
    if table.header {
        if let Some(first) = rows.next() {
            out.push_str("<thead>");
            out.push_str(&render_row(first, "th"));
            out.push_str("</thead>");
        }
    }
    let body: Vec<String> = rows.map(|r| render_row(r, "td")).collect();
    if !body.is_empty() {
        out.push_str("<tbody>");
        out.push_str(&body.concat());
        out.push_str("</tbody>");
    }
    out.push_str("</table>");
    out
}

fn render_row(cells: &[Vec<Inline>], tag: &str) -> String {
    let mut out = String::from("<tr>");
    for cell in cells {
        out.push_str(&format!("<{0}>{1}</{0}>", tag, render_inlines(cell)));
    }
    out.push_str("</tr>");
    out
}

pub fn render_inlines(inlines: &[Inline]) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(t) => out.push_str(&escape_text(t)),
            Inline::Bold(c) => wrap_tag(&mut out, "strong", c),
            Inline::Italic(c) => wrap_tag(&mut out, "em", c),
            Inline::Underline(c) => wrap_tag(&mut out, "u", c),
            Inline::Strike(c) => wrap_tag(&mut out, "s", c),
            Inline::Code(t) => {
                out.push_str("<code>");
                out.push_str(&escape_text(t));
                out.push_str("</code>");
            }
            Inline::Link { href, content } => {
                out.push_str(&format!("<a href=\"{}\">", escape_attr(href)));
                out.push_str(&render_inlines(content));
                out.push_str("</a>");
            }
            Inline::Reference {
                kind,
                target,
                label,
            } => {
                let text = match label {
                    Some(label) => format!("@{}[{}]{{{}}}", kind, target, label),
                    None => format!("@{}[{}]", kind, target),
                };
                out.push_str(&escape_text(&text));
            }
            Inline::LineBreak => out.push_str("<br>"),
            Inline::Raw(html) => out.push_str(html),
        }
    }
    out
}

fn wrap_tag(out: &mut String, tag: &str, content: &[Inline]) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(&render_inlines(content));
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}
