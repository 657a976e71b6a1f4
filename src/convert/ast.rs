// ABOUTME: Intermediate document model shared by the HTML and Org converters
// ABOUTME: Blocks and inlines covering the subset both formats can express

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, content: Vec<Inline> },
    Paragraph(Vec<Inline>),
    List(List),
    Table(Table),
    Quote(Vec<Block>),
    Code { lang: Option<String>, text: String },
    Rule,
    /// Verbatim HTML kept for constructs the markup cannot express.
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct List {
    pub ordered: bool,
    /// First number of an ordered list when it is not 1.
    pub start: Option<u32>,
    pub items: Vec<ListItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub content: Vec<Inline>,
    pub children: Vec<List>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: bool,
    pub rows: Vec<Vec<Vec<Inline>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Bold(Vec<Inline>),
    Italic(Vec<Inline>),
    Underline(Vec<Inline>),
    Strike(Vec<Inline>),
    Code(String),
    Link { href: String, content: Vec<Inline> },
    /// Embedded content link, `@Kind[target]{label}`.
    Reference {
        kind: String,
        target: String,
        label: Option<String>,
    },
    LineBreak,
    Raw(String),
}

/// Merges adjacent text runs and drops empty ones so equal content compares equal.
pub fn normalize_inlines(inlines: Vec<Inline>) -> Vec<Inline> {
    let mut out: Vec<Inline> = Vec::with_capacity(inlines.len());
    for inline in inlines {
        let inline = match inline {
            Inline::Bold(c) => Inline::Bold(normalize_inlines(c)),
            Inline::Italic(c) => Inline::Italic(normalize_inlines(c)),
            Inline::Underline(c) => Inline::Underline(normalize_inlines(c)),
            Inline::Strike(c) => Inline::Strike(normalize_inlines(c)),
            Inline::Link { href, content } => Inline::Link {
                href,
                content: normalize_inlines(content),
            },
            other => other,
        };
        if let Inline::Text(t) = &inline {
            if t.is_empty() {
                continue;
            }
            if let Some(Inline::Text(prev)) = out.last_mut() {
                prev.push_str(t);
                continue;
            }
        }
        out.push(inline);
    }
    out
}

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"@([A-Za-z]+)\[([^\[\]]+)\](?:\{([^}]*)\})?").expect("reference pattern is valid")
    })
}

/// Splits plain text into text runs and embedded references.
pub fn split_references(text: &str) -> Vec<Inline> {
    let mut out = Vec::new();
    let mut last = 0;
    for caps in reference_pattern().captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        out.push(Inline::Text(text[last..whole.start()].to_string()));
        out.push(Inline::Reference {
            kind: caps[1].to_string(),
            target: caps[2].to_string(),
            label: caps.get(3).map(|m| m.as_str().to_string()),
        });
        last = whole.end();
    }
    out.push(Inline::Text(text[last..].to_string()));
    normalize_inlines(out)
}

/// Collapses whitespace runs to single spaces, as HTML renders text.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Trims whitespace at the start and end of an inline run, descending into containers.
///
/// Spaces around top-level line breaks are dropped as well; a browser does not
/// render them.
pub fn trim_inlines(inlines: Vec<Inline>) -> Vec<Inline> {
    let mut inlines = normalize_inlines(inlines);
    trim_edge(&mut inlines, true);
    trim_edge(&mut inlines, false);
    for idx in 0..inlines.len() {
        if inlines[idx] != Inline::LineBreak {
            continue;
        }
        if idx > 0 {
            if let Inline::Text(t) = &mut inlines[idx - 1] {
                *t = trim_ascii_end(t).to_string();
            }
        }
        if let Some(Inline::Text(t)) = inlines.get_mut(idx + 1) {
            *t = trim_ascii_start(t).to_string();
        }
    }
    normalize_inlines(inlines)
}

pub fn trim_ascii_start(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_ascii_whitespace())
}

pub fn trim_ascii_end(s: &str) -> &str {
    s.trim_end_matches(|c: char| c.is_ascii_whitespace())
}

pub fn trim_ascii(s: &str) -> &str {
    trim_ascii_end(trim_ascii_start(s))
}

fn trim_edge(inlines: &mut Vec<Inline>, start: bool) {
    while !inlines.is_empty() {
        let idx = if start { 0 } else { inlines.len() - 1 };
        let remove = match &mut inlines[idx] {
            Inline::Text(t) => {
                let trimmed = if start {
                    trim_ascii_start(t)
                } else {
                    trim_ascii_end(t)
                };
                if trimmed.is_empty() {
                    true
                } else {
                    *t = trimmed.to_string();
                    false
                }
            }
            Inline::LineBreak => true,
            Inline::Bold(c) | Inline::Italic(c) | Inline::Underline(c) | Inline::Strike(c) => {
                trim_edge(c, start);
                c.is_empty()
            }
            _ => false,
        };
        if !remove {
            return;
        }
        inlines.remove(idx);
    }
}

/// True when nothing in the run would render.
pub fn is_blank(inlines: &[Inline]) -> bool {
    inlines.iter().all(|i| match i {
        Inline::Text(t) => trim_ascii(t).is_empty(),
        Inline::Bold(c) | Inline::Italic(c) | Inline::Underline(c) | Inline::Strike(c) => {
            is_blank(c)
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_merges_text() {
        let merged = normalize_inlines(vec![
            Inline::Text("a".into()),
            Inline::Text(String::new()),
            Inline::Text("b".into()),
            Inline::Bold(vec![Inline::Text("c".into()), Inline::Text("d".into())]),
        ]);
        assert_eq!(
            merged,
            vec![
                Inline::Text("ab".into()),
                Inline::Bold(vec![Inline::Text("cd".into())])
            ]
        );
    }

    #[test]
    fn test_trim_inlines_descends() {
        let trimmed = trim_inlines(vec![
            Inline::Bold(vec![Inline::Text(" lead".into())]),
            Inline::Text(" tail ".into()),
            Inline::LineBreak,
        ]);
        assert_eq!(
            trimmed,
            vec![
                Inline::Bold(vec![Inline::Text("lead".into())]),
                Inline::Text(" tail".into())
            ]
        );
    }

    #[test]
    fn test_trim_drops_space_around_breaks() {
        let trimmed = trim_inlines(vec![
            Inline::Text("a ".into()),
            Inline::LineBreak,
            Inline::Text(" b".into()),
        ]);
        assert_eq!(
            trimmed,
            vec![
                Inline::Text("a".into()),
                Inline::LineBreak,
                Inline::Text("b".into())
            ]
        );
    }

    #[test]
    fn test_split_references() {
        let parts = split_references("Fight @Actor[abc123]{Goblin Boss} or @UUID[JournalEntry.x] now");
        assert_eq!(
            parts,
            vec![
                Inline::Text("Fight ".into()),
                Inline::Reference {
                    kind: "Actor".into(),
                    target: "abc123".into(),
                    label: Some("Goblin Boss".into()),
                },
                Inline::Text(" or ".into()),
                Inline::Reference {
                    kind: "UUID".into(),
                    target: "JournalEntry.x".into(),
                    label: None,
                },
                Inline::Text(" now".into()),
            ]
        );
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("a \n\t b"), "a b");
        assert_eq!(collapse_whitespace("  x "), " x ");
    }
}
