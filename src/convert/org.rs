// ABOUTME: Org markup reader (via orgize) and writer for the shared document model
// ABOUTME: Rendering re-reads every inline run and block, falling back to HTML when markup would be lossy

use super::ast::{
    collapse_whitespace, normalize_inlines, split_references, trim_ascii, trim_ascii_end,
    trim_ascii_start, trim_inlines, Block, Inline, List, ListItem, Table,
};
use super::html;
use crate::util::truncate_str;
use crate::{Error, Result};
use orgize::elements::{Table as OrgTable, TableRow};
use orgize::{Element, Event, Org};
use regex::Regex;
use std::sync::OnceLock;

const SNIPPET_OPEN: &str = "@@html:";
const SNIPPET_CLOSE: &str = "@@";

const BLOCK_SEPARATOR: &str = "\n\n";
/// Two blank lines end a list in Org, so adjacent lists stay apart.
const LIST_SEPARATOR: &str = "\n\n\n";

fn list_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\s*)([-+]|\d+[.)])(?:\s+(.*))?$").expect("list pattern is valid")
    })
}

fn heading_level(line: &str) -> Option<usize> {
    let stars = line.bytes().take_while(|b| *b == b'*').count();
    if stars == 0 {
        return None;
    }
    match line.as_bytes().get(stars) {
        None => Some(stars),
        Some(b) if b.is_ascii_whitespace() => Some(stars),
        _ => None,
    }
}

fn is_rule(trimmed: &str) -> bool {
    trimmed.len() >= 5 && trimmed.bytes().all(|b| b == b'-')
}

fn is_comment(trimmed: &str) -> bool {
    trimmed == "#" || trimmed.starts_with("# ") || trimmed.starts_with("#\t")
}

/// True when a line opens something other than paragraph text.
fn is_block_start(line: &str) -> bool {
    let trimmed = trim_ascii(line);
    heading_level(line).is_some()
        || is_rule(trimmed)
        || trimmed.starts_with("#+")
        || is_comment(trimmed)
        || trimmed.starts_with('|')
        || trimmed.starts_with(": ")
        || list_pattern().is_match(line)
}

/// Matches `#+BEGIN_NAME params`, returning the uppercased name.
fn block_begin(trimmed: &str) -> Option<String> {
    if !trimmed.is_char_boundary(8) || !trimmed[..8].eq_ignore_ascii_case("#+begin_") {
        return None;
    }
    let rest = &trimmed[8..];
    let name_end = rest
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(rest.len());
    if name_end == 0 {
        return None;
    }
    Some(rest[..name_end].to_ascii_uppercase())
}

fn is_marker(line: &str, marker: &str) -> bool {
    let upper = trim_ascii(line).to_ascii_uppercase();
    match upper.strip_prefix(marker) {
        Some(rest) => rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_whitespace()),
        None => false,
    }
}

fn is_literal_block(name: &str) -> bool {
    matches!(name, "SRC" | "EXAMPLE" | "EXPORT" | "COMMENT")
}

fn needs_comma(trimmed: &str) -> bool {
    let t = trimmed.trim_start_matches(',');
    t.starts_with('*') || t.starts_with("#+")
}

fn escape_literal(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    text.split('\n')
        .map(|line| {
            let trimmed = trim_ascii_start(line);
            if needs_comma(trimmed) {
                let indent = &line[..line.len() - trimmed.len()];
                format!("{},{}", indent, trimmed)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Block contents as the document model holds them: final newline dropped, commas unescaped.
fn literal(contents: &str) -> String {
    let body = contents.strip_suffix('\n').unwrap_or(contents);
    body.split('\n')
        .map(|line| {
            let trimmed = trim_ascii_start(line);
            if trimmed.starts_with(',') && needs_comma(trimmed) {
                let indent = &line[..line.len() - trimmed.len()];
                format!("{}{}", indent, &trimmed[1..])
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parses Org markup into blocks. Fails only on unbalanced `#+BEGIN_`/`#+END_` lines.
pub fn parse(markup: &str, warnings: &mut Vec<String>) -> Result<Vec<Block>> {
    let lines: Vec<&str> = markup.lines().collect();
    check_blocks(&lines, 0)?;

    let org = Org::parse(markup);
    let tree = build_tree(org.iter());
    let mut reader = Reader { warnings };
    let mut blocks = Vec::new();
    reader.blocks(&tree, &mut blocks);
    Ok(blocks)
}

fn warn(warnings: &mut Vec<String>, message: String) {
    if !warnings.contains(&message) {
        warnings.push(message);
    }
}

// orgize reads an unclosed block as plain text; the sync refuses to upload such a file.
fn check_blocks(lines: &[&str], offset: usize) -> Result<()> {
    let mut i = 0;
    while i < lines.len() {
        let trimmed = trim_ascii(lines[i]);

        if let Some(name) = block_begin(trimmed) {
            let end_marker = format!("#+END_{}", name);
            let end = (i + 1..lines.len())
                .find(|&j| is_marker(lines[j], &end_marker))
                .ok_or_else(|| Error::UnparsableMarkup {
                    line: offset + i + 1,
                    message: format!("#+BEGIN_{} is never closed", name),
                })?;
            if !is_literal_block(&name) {
                check_blocks(&lines[i + 1..end], offset + i + 1)?;
            }
            i = end + 1;
            continue;
        }

        if trimmed
            .get(..6)
            .map_or(false, |p| p.eq_ignore_ascii_case("#+end_"))
        {
            return Err(Error::UnparsableMarkup {
                line: offset + i + 1,
                message: format!("{} has no matching #+BEGIN line", trimmed),
            });
        }
        i += 1;
    }
    Ok(())
}

/// An orgize element with the elements nested inside it.
struct Node<'e> {
    element: &'e Element<'e>,
    children: Vec<Node<'e>>,
}

fn build_tree<'e>(events: impl Iterator<Item = Event<'e, 'e>>) -> Vec<Node<'e>> {
    let mut stack: Vec<Node<'e>> = Vec::new();
    let mut roots = Vec::new();

    for event in events {
        match event {
            Event::Start(element) => stack.push(Node {
                element,
                children: Vec::new(),
            }),
            Event::End(_) => {
                let Some(node) = stack.pop() else { continue };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => roots.push(node),
                }
            }
        }
    }
    roots
}

fn describe(element: &Element) -> &'static str {
    match element {
        Element::Drawer { .. } => "drawer",
        Element::DynBlock { .. } => "dynamic block",
        Element::FnDef { .. } | Element::FnRef { .. } => "footnote",
        Element::Clock { .. } => "clock line",
        Element::BabelCall { .. } | Element::InlineCall { .. } | Element::InlineSrc { .. } => {
            "babel call"
        }
        Element::FixedWidth { .. } => "fixed-width area",
        Element::Timestamp { .. } => "timestamp",
        Element::Cookie { .. } => "statistics cookie",
        Element::Macros { .. } => "macro",
        Element::Target { .. } | Element::RadioTarget { .. } => "target",
        _ => "Org element",
    }
}

struct Reader<'w> {
    warnings: &'w mut Vec<String>,
}

impl Reader<'_> {
    fn blocks(&mut self, nodes: &[Node], out: &mut Vec<Block>) {
        for node in nodes {
            self.block(node, out);
        }
    }

    fn block(&mut self, node: &Node, out: &mut Vec<Block>) {
        match node.element {
            Element::Document { .. } | Element::Section { .. } => {
                self.blocks(&node.children, out)
            }
            Element::Headline { level } => {
                let level = self.clamp_level(*level);
                for child in &node.children {
                    match child.element {
                        Element::Title(title) => {
                            if title.keyword.is_some() || !title.tags.is_empty() {
                                warn(self.warnings, "dropped headline keyword or tags".into());
                            }
                            out.push(Block::Heading {
                                level,
                                content: self.run(&child.children),
                            });
                        }
                        _ => self.block(child, out),
                    }
                }
            }
            Element::Paragraph { .. } => {
                let content = self.run(&node.children);
                if !content.is_empty() {
                    out.push(Block::Paragraph(content));
                }
            }
            Element::List(list) => out.push(Block::List(self.list(list.ordered, node))),
            Element::Table(OrgTable::Org { .. }) => {
                let table = self.table(node);
                if !table.rows.is_empty() {
                    out.push(Block::Table(table));
                }
            }
            Element::Table(_) => warn(self.warnings, "dropped table.el table".into()),
            Element::QuoteBlock { .. } => {
                let mut inner = Vec::new();
                self.blocks(&node.children, &mut inner);
                out.push(Block::Quote(inner));
            }
            Element::SourceBlock(block) => {
                let lang = trim_ascii(&block.language);
                out.push(Block::Code {
                    lang: (!lang.is_empty()).then(|| lang.to_string()),
                    text: literal(&block.contents),
                });
            }
            Element::ExampleBlock(block) => out.push(Block::Code {
                lang: None,
                text: literal(&block.contents),
            }),
            Element::ExportBlock(block) => {
                if trim_ascii(&block.data).eq_ignore_ascii_case("html") {
                    out.push(Block::Raw(literal(&block.contents)));
                } else {
                    warn(
                        self.warnings,
                        format!("dropped #+BEGIN_EXPORT {} block", trim_ascii(&block.data)),
                    );
                }
            }
            Element::CommentBlock { .. } => {
                warn(self.warnings, "dropped #+BEGIN_COMMENT block".into())
            }
            Element::SpecialBlock(block) => {
                warn(
                    self.warnings,
                    format!(
                        "unwrapped unsupported #+BEGIN_{} block",
                        block.name.to_ascii_uppercase()
                    ),
                );
                self.blocks(&node.children, out);
            }
            Element::CenterBlock { .. } | Element::VerseBlock { .. } => {
                warn(self.warnings, "unwrapped center or verse block".into());
                self.blocks(&node.children, out);
            }
            Element::Rule { .. } => out.push(Block::Rule),
            Element::Keyword(keyword) => warn(
                self.warnings,
                format!("ignored keyword line #+{}", keyword.key.to_ascii_uppercase()),
            ),
            Element::Comment { .. } => warn(self.warnings, "dropped comment line".into()),
            other => warn(self.warnings, format!("dropped {}", describe(other))),
        }
    }

    fn clamp_level(&mut self, level: usize) -> u8 {
        if level > 6 {
            warn(self.warnings, format!("heading level {} clamped to 6", level));
            6
        } else {
            level.max(1) as u8
        }
    }

    fn list(&mut self, ordered: bool, node: &Node) -> List {
        let mut items = Vec::new();
        let mut start = None;

        for child in &node.children {
            let Element::ListItem(item) = child.element else {
                continue;
            };
            if ordered && items.is_empty() {
                start = bullet_number(&item.bullet).filter(|n| *n != 1);
            }

            let mut content = Vec::new();
            let mut children = Vec::new();
            for part in &child.children {
                match part.element {
                    Element::List(nested) => children.push(self.list(nested.ordered, part)),
                    _ => self.inlines(std::slice::from_ref(part), &mut content),
                }
            }
            items.push(ListItem {
                content: finish_run(content),
                children,
            });
        }

        List {
            ordered,
            start,
            items,
        }
    }

    fn table(&mut self, node: &Node) -> Table {
        let mut header = false;
        let mut rows = Vec::new();

        for row in &node.children {
            let is_header = match row.element {
                Element::TableRow(TableRow::Header) => true,
                Element::TableRow(TableRow::Body) => false,
                _ => continue,
            };
            if rows.is_empty() {
                header = is_header;
            }
            let mut cells = Vec::new();
            for cell in &row.children {
                if let Element::TableCell { .. } = cell.element {
                    cells.push(self.run(&cell.children));
                }
            }
            rows.push(cells);
        }

        Table { header, rows }
    }

    /// Reads an inline run the way block contents hold it: whitespace collapsed, ends trimmed.
    fn run(&mut self, nodes: &[Node]) -> Vec<Inline> {
        let mut out = Vec::new();
        self.inlines(nodes, &mut out);
        finish_run(out)
    }

    fn nested(&mut self, nodes: &[Node]) -> Vec<Inline> {
        let mut out = Vec::new();
        self.inlines(nodes, &mut out);
        out
    }

    fn inlines(&mut self, nodes: &[Node], out: &mut Vec<Inline>) {
        let last = nodes.len().saturating_sub(1);
        for (idx, node) in nodes.iter().enumerate() {
            match node.element {
                Element::Text { value } => push_text(value, idx == last, out),
                Element::Bold { .. } => out.push(Inline::Bold(self.nested(&node.children))),
                Element::Italic { .. } => out.push(Inline::Italic(self.nested(&node.children))),
                Element::Underline { .. } => {
                    out.push(Inline::Underline(self.nested(&node.children)))
                }
                Element::Strike { .. } => out.push(Inline::Strike(self.nested(&node.children))),
                Element::Verbatim { value } | Element::Code { value } => {
                    out.push(Inline::Code(collapse_whitespace(value)))
                }
                Element::Link(link) => out.push(link_inline(&link.path, link.desc.as_deref())),
                Element::Snippet(snippet) => {
                    if snippet.name.eq_ignore_ascii_case("html") {
                        out.push(Inline::Raw(unescape_snippet(&snippet.value)));
                    } else {
                        warn(
                            self.warnings,
                            format!("dropped @@{}:@@ snippet", snippet.name),
                        );
                    }
                }
                // List items hold their text as paragraphs.
                Element::Paragraph { .. } => {
                    if !out.is_empty() {
                        out.push(Inline::Text(" ".into()));
                    }
                    self.inlines(&node.children, out);
                }
                other => warn(self.warnings, format!("dropped {}", describe(other))),
            }
        }
    }
}

fn finish_run(inlines: Vec<Inline>) -> Vec<Inline> {
    trim_inlines(collapse_text(normalize_inlines(inlines)))
}

fn collapse_text(inlines: Vec<Inline>) -> Vec<Inline> {
    inlines
        .into_iter()
        .map(|inline| match inline {
            Inline::Text(t) => Inline::Text(collapse_whitespace(&t)),
            Inline::Bold(c) => Inline::Bold(collapse_text(c)),
            Inline::Italic(c) => Inline::Italic(collapse_text(c)),
            Inline::Underline(c) => Inline::Underline(collapse_text(c)),
            Inline::Strike(c) => Inline::Strike(collapse_text(c)),
            other => other,
        })
        .collect()
}

/// Splits text at `\\` line ends. A newline without one reads as a space.
fn push_text(value: &str, at_end: bool, out: &mut Vec<Inline>) {
    let lines: Vec<&str> = value.split('\n').collect();
    let last = lines.len() - 1;
    for (idx, line) in lines.iter().enumerate() {
        let ends_line = idx < last || at_end;
        match trim_ascii_end(line).strip_suffix("\\\\") {
            Some(before) if ends_line => {
                out.extend(split_references(before));
                out.push(Inline::LineBreak);
            }
            _ => {
                out.extend(split_references(line));
                if idx < last {
                    out.push(Inline::Text(" ".into()));
                }
            }
        }
    }
}

fn bullet_number(bullet: &str) -> Option<u32> {
    let digits: String = trim_ascii_start(bullet)
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn link_inline(path: &str, desc: Option<&str>) -> Inline {
    if let Some(reference) = reference_link(path, desc) {
        return reference;
    }
    let content = match desc {
        Some(d) => split_references(&collapse_whitespace(d)),
        None => vec![Inline::Text(path.to_string())],
    };
    Inline::Link {
        href: path.to_string(),
        content,
    }
}

/// `foundry:Kind/target` links are embedded document references.
fn reference_link(path: &str, desc: Option<&str>) -> Option<Inline> {
    let (kind, target) = path.strip_prefix("foundry:")?.split_once('/')?;
    let valid = !kind.is_empty()
        && kind.chars().all(|c| c.is_ascii_alphabetic())
        && !target.is_empty()
        && !target.contains(['[', ']']);
    valid.then(|| Inline::Reference {
        kind: kind.to_string(),
        target: target.to_string(),
        label: desc.map(str::to_string),
    })
}

fn escape_snippet(html: &str) -> String {
    html.replace('@', "&#x40;")
        .replace('\n', "&#x0A;")
        .replace('|', "&#x7C;")
}

fn unescape_snippet(raw: &str) -> String {
    raw.replace("&#x40;", "@")
        .replace("&#x0A;", "\n")
        .replace("&#x7C;", "|")
}

fn snippet(html: &str) -> String {
    format!("{}{}{}", SNIPPET_OPEN, escape_snippet(html), SNIPPET_CLOSE)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Context {
    Paragraph,
    Item,
    Heading,
    Cell,
}

impl Context {
    fn multiline(self) -> bool {
        matches!(self, Context::Paragraph | Context::Item)
    }

    /// Places a candidate run where it would sit in a document.
    fn wrap(self, candidate: &str) -> String {
        match self {
            Context::Paragraph => candidate.to_string(),
            Context::Heading => format!("* {}", candidate),
            Context::Cell => format!("| {} |", candidate),
            Context::Item => {
                let mut lines = candidate.split('\n');
                let mut out = format!("- {}", lines.next().unwrap_or(""));
                for line in lines {
                    out.push_str("\n  ");
                    out.push_str(line);
                }
                out
            }
        }
    }

    /// Pulls the run back out of the blocks read from a wrapped candidate.
    fn extract(self, blocks: Vec<Block>) -> Option<Vec<Inline>> {
        match (self, blocks.as_slice()) {
            (Context::Paragraph, []) => Some(Vec::new()),
            (Context::Paragraph, [Block::Paragraph(content)]) => Some(content.clone()),
            (Context::Heading, [Block::Heading { content, .. }]) => Some(content.clone()),
            (Context::Item, [Block::List(list)]) => match list.items.as_slice() {
                [item] if item.children.is_empty() => Some(item.content.clone()),
                _ => None,
            },
            (Context::Cell, [Block::Table(table)]) if !table.header => match table.rows.as_slice()
            {
                [row] if row.len() == 1 => Some(row[0].clone()),
                _ => None,
            },
            _ => None,
        }
    }
}

struct Piece {
    text: String,
    fallback: bool,
}

/// Renders blocks as Org markup, recording every construct kept as HTML.
pub fn render(blocks: &[Block], warnings: &mut Vec<String>) -> String {
    let mut renderer = Renderer { warnings };
    let body = renderer.document(blocks);
    if body.is_empty() {
        body
    } else {
        body + "\n"
    }
}

struct Renderer<'w> {
    warnings: &'w mut Vec<String>,
}

impl Renderer<'_> {
    /// Appends blocks one at a time, re-reading the document after each.
    ///
    /// A block that changes meaning next to its predecessor gets a wider
    /// separator, then becomes an HTML export block.
    fn document(&mut self, blocks: &[Block]) -> String {
        let mut doc = String::new();

        for (idx, block) in blocks.iter().enumerate() {
            let expected = html::render(&blocks[..=idx]);
            let text = self.block(block);
            let accepted = [BLOCK_SEPARATOR, LIST_SEPARATOR]
                .iter()
                .map(|sep| append(&doc, sep, &text))
                .find(|candidate| blocks_read_back(candidate, &expected));

            doc = match accepted {
                Some(candidate) => candidate,
                None => {
                    let raw = self.export(block);
                    append(&doc, BLOCK_SEPARATOR, &raw)
                }
            };
        }
        doc
    }

    fn block(&mut self, block: &Block) -> String {
        match block {
            Block::Heading { level, content } => {
                let stars = "*".repeat(usize::from((*level).clamp(1, 6)));
                format!("{} {}", stars, self.run(content, Context::Heading))
                    .trim_end()
                    .to_string()
            }
            Block::Paragraph(content) => self.run(content, Context::Paragraph),
            Block::List(list) => self.list(list, 0).join("\n"),
            Block::Table(table) => self.table(table),
            Block::Quote(inner) => {
                if inner.is_empty() {
                    return "#+BEGIN_QUOTE\n#+END_QUOTE".into();
                }
                let mut body = String::new();
                let mut previous: Option<&Block> = None;
                for child in inner {
                    let text = match child {
                        // Org has no heading inside a quote, and the first #+END_QUOTE closes it.
                        Block::Heading { .. } | Block::Quote(_) => self.export(child),
                        _ => self.block(child),
                    };
                    let sep = match (previous, child) {
                        (Some(Block::List(_)), Block::List(_)) => LIST_SEPARATOR,
                        _ => BLOCK_SEPARATOR,
                    };
                    body = append(&body, sep, &text);
                    previous = Some(child);
                }
                format!("#+BEGIN_QUOTE\n{}\n#+END_QUOTE", body)
            }
            Block::Code { lang, text } => {
                let (open, close) = match lang {
                    Some(lang) => (format!("#+BEGIN_SRC {}", lang), "#+END_SRC"),
                    None => ("#+BEGIN_EXAMPLE".to_string(), "#+END_EXAMPLE"),
                };
                literal_block(&open, text, close)
            }
            Block::Rule => "-----".into(),
            Block::Raw(html) => raw_block(html),
        }
    }

    fn export(&mut self, block: &Block) -> String {
        let html = html::render(std::slice::from_ref(block));
        if !matches!(block, Block::Raw(_)) {
            warn(
                self.warnings,
                format!("kept {} as an HTML export block", truncate_str(&html, 60)),
            );
        }
        raw_block(&html)
    }

    fn list(&mut self, list: &List, indent: usize) -> Vec<String> {
        let mut lines = Vec::new();
        let pad = " ".repeat(indent);
        let first = list.start.unwrap_or(1);

        for (n, item) in (first..).zip(&list.items) {
            let bullet = if list.ordered {
                format!("{}. ", n)
            } else {
                "- ".to_string()
            };
            let continuation = " ".repeat(indent + bullet.len());

            let body = self.run(&item.content, Context::Item);
            let mut body_lines = body.split('\n');
            let first_line = body_lines.next().unwrap_or("");
            lines.push(format!("{}{}{}", pad, bullet, first_line).trim_end().to_string());
            for line in body_lines {
                lines.push(format!("{}{}", continuation, line));
            }

            for child in &item.children {
                lines.extend(self.list(child, indent + bullet.len()));
            }
        }
        lines
    }

    fn table(&mut self, table: &Table) -> String {
        let mut lines = Vec::new();
        for (idx, row) in table.rows.iter().enumerate() {
            if row.is_empty() {
                lines.push("|".to_string());
            } else {
                let cells: Vec<String> = row.iter().map(|c| self.run(c, Context::Cell)).collect();
                lines.push(format!("| {} |", cells.join(" | ")));
            }
            if idx == 0 && table.header {
                let rule = vec!["---"; row.len().max(1)].join("+");
                lines.push(format!("|{}|", rule));
            }
        }
        lines.join("\n")
    }

    /// Renders an inline run, keeping only what reads back to the same HTML.
    ///
    /// Each inline is tried as markup first, then as a snippet. When neither fits
    /// after its neighbour, the neighbour becomes a snippet too; a run that still
    /// does not read back is emitted as one snippet.
    fn run(&mut self, inlines: &[Inline], ctx: Context) -> String {
        let mut pieces: Vec<Piece> = Vec::with_capacity(inlines.len());

        for idx in 0..inlines.len() {
            // The reader trims a run's end, which may or may not swallow the prefix's tail.
            let expected = [
                html::render_inlines(&trim_inlines(inlines[..=idx].to_vec())),
                html::render_inlines(&inlines[..=idx]),
            ];
            pieces.push(markup_piece(&inlines[idx]));
            if reads_back(&pieces, ctx, &expected) {
                continue;
            }
            pieces[idx] = fallback_piece(&inlines[idx]);
            if reads_back(&pieces, ctx, &expected) {
                continue;
            }
            if idx > 0 && !pieces[idx - 1].fallback {
                pieces[idx - 1] = fallback_piece(&inlines[idx - 1]);
                pieces[idx] = markup_piece(&inlines[idx]);
                if !reads_back(&pieces, ctx, &expected) {
                    pieces[idx] = fallback_piece(&inlines[idx]);
                }
            }
        }

        let expected = html::render_inlines(inlines);
        if reads_back(&pieces, ctx, std::slice::from_ref(&expected)) {
            for (piece, inline) in pieces.iter().zip(inlines) {
                if piece.fallback {
                    self.note_snippet(&html::render_inlines(std::slice::from_ref(inline)));
                }
            }
            return assemble(&pieces, ctx);
        }

        self.note_snippet(&expected);
        snippet(&expected)
    }

    fn note_snippet(&mut self, html: &str) {
        warn(
            self.warnings,
            format!("kept {} as an inline HTML snippet", truncate_str(html, 60)),
        );
    }
}

fn append(doc: &str, sep: &str, text: &str) -> String {
    if doc.is_empty() {
        text.to_string()
    } else {
        format!("{}{}{}", doc, sep, text)
    }
}

fn literal_block(open: &str, text: &str, close: &str) -> String {
    if text.is_empty() {
        format!("{}\n{}", open, close)
    } else {
        format!("{}\n{}\n{}", open, escape_literal(text), close)
    }
}

fn raw_block(html: &str) -> String {
    literal_block("#+BEGIN_EXPORT html", html, "#+END_EXPORT")
}

fn markup_piece(inline: &Inline) -> Piece {
    Piece {
        text: markup(inline),
        fallback: false,
    }
}

fn fallback_piece(inline: &Inline) -> Piece {
    Piece {
        text: snippet(&html::render_inlines(std::slice::from_ref(inline))),
        fallback: true,
    }
}

fn markup_all(inlines: &[Inline]) -> String {
    inlines.iter().map(markup).collect()
}

fn markup(inline: &Inline) -> String {
    match inline {
        Inline::Text(t) => t.clone(),
        Inline::Bold(c) => format!("*{}*", markup_all(c)),
        Inline::Italic(c) => format!("/{}/", markup_all(c)),
        Inline::Underline(c) => format!("_{}_", markup_all(c)),
        Inline::Strike(c) => format!("+{}+", markup_all(c)),
        Inline::Code(t) => format!("~{}~", t),
        Inline::Link { href, content } => match content.as_slice() {
            [Inline::Text(t)] if t == href => format!("[[{}]]", href),
            _ => format!("[[{}][{}]]", href, markup_all(content)),
        },
        Inline::Reference {
            kind,
            target,
            label,
        } => match label {
            Some(label) => format!("[[foundry:{}/{}][{}]]", kind, target, label),
            None => format!("[[foundry:{}/{}]]", kind, target),
        },
        Inline::LineBreak => "\\\\\n".into(),
        Inline::Raw(html) => snippet(html),
    }
}

/// Prefixes lines that would otherwise be read as block syntax with an empty snippet.
fn guard_lines(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let trimmed = trim_ascii_start(line);
            if trimmed.starts_with('#') || is_block_start(trimmed) {
                format!("{}{}", SNIPPET_OPEN, SNIPPET_CLOSE) + line
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn assemble(pieces: &[Piece], ctx: Context) -> String {
    let joined: String = pieces.iter().map(|p| p.text.as_str()).collect();
    if ctx.multiline() {
        guard_lines(&joined)
    } else {
        joined
    }
}

/// Reads a candidate back in its context and compares the HTML it yields.
fn reads_back(pieces: &[Piece], ctx: Context, expected: &[String]) -> bool {
    let candidate = assemble(pieces, ctx);
    if !ctx.multiline() && candidate.contains('\n') {
        return false;
    }

    let mut scratch = Vec::new();
    let Ok(blocks) = parse(&ctx.wrap(&candidate), &mut scratch) else {
        return false;
    };
    match ctx.extract(blocks) {
        Some(inlines) => expected.contains(&html::render_inlines(&inlines)),
        None => false,
    }
}

fn blocks_read_back(doc: &str, expected: &str) -> bool {
    let mut scratch = Vec::new();
    match parse(doc, &mut scratch) {
        Ok(blocks) => html::render(&blocks) == expected,
        Err(_) => false,
    }
}
