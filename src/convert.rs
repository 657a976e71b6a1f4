// ABOUTME: Converts journal page HTML to Org markup and back
// ABOUTME: Both directions pass through the shared document model and report lossy constructs

pub mod ast;
pub mod html;
pub mod org;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub body: String,
    pub warnings: Vec<String>,
}

/// Converts a remote rich-text body into Org markup.
///
/// Never fails. Constructs without an Org equivalent are kept as HTML
/// snippets or export blocks, and each one is named in `warnings`.
pub fn to_markup(rich: &str) -> ConversionResult {
    let mut warnings = Vec::new();
    let blocks = html::parse(rich, &mut warnings);
    let body = org::render(&blocks, &mut warnings);
    ConversionResult { body, warnings }
}

/// Converts local Org markup into the HTML body stored remotely.
pub fn to_rich(markup: &str) -> Result<ConversionResult> {
    let mut warnings = Vec::new();
    let blocks = org::parse(markup, &mut warnings)?;
    Ok(ConversionResult {
        body: html::render(&blocks),
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn model(rich: &str) -> Vec<ast::Block> {
        let mut warnings = Vec::new();
        html::parse(rich, &mut warnings)
    }

    fn assert_round_trip(rich: &str) {
        let markup = to_markup(rich);
        let back = to_rich(&markup.body).unwrap();
        assert_eq!(model(&back.body), model(rich), "markup was:\n{}", markup.body);

        let again = to_markup(&back.body);
        assert_eq!(again.body, markup.body);
    }

    #[test]
    fn test_round_trip_common_page() {
        assert_round_trip(
            "<h2>The Goblin Warren</h2>\
             <p>Home of <strong>Grik</strong>, see @Actor[grik01]{Grik the Cruel}.</p>\
             <ul><li><p>Traps</p></li><li><p>Tunnels <em>everywhere</em></p></li></ul>\
             <table><thead><tr><th>Room</th><th>Threat</th></tr></thead>\
             <tbody><tr><td>Den</td><td>High</td></tr></tbody></table>\
             <pre><code class=\"language-text\">roll 2d6</code></pre>",
        );
    }

    #[test]
    fn test_round_trip_unsupported_constructs() {
        assert_round_trip(
            "<p>Map: <img src=\"map.webp\" alt=\"Map\"> and <sup>2</sup></p>\
             <div class=\"gm\">Secret @ night</div>\
             <table><tr><td colspan=\"2\">wide</td></tr></table>",
        );
    }

    #[test]
    fn test_round_trip_awkward_inlines() {
        assert_round_trip(
            "<p>Price: 2*3 = <code>six</code> and a<strong>b</strong>c, [[not a link]]</p>\
             <p>* looks like a heading</p>\
             <p>1. looks like a list<br>| and a table</p>",
        );
    }

    #[test]
    fn test_round_trip_structure() {
        assert_round_trip(
            "<blockquote><p>Line one<br>Line two</p><blockquote><p>Deeper</p></blockquote></blockquote>\
             <ol><li>First<ul><li>Sub <s>gone</s></li></ul></li><li>Second</li></ol>\
             <hr>\
             <pre>#+END_SRC\n* fake heading\n  indented</pre>",
        );
    }

    #[test]
    fn test_markup_first_documents_are_stable() {
        let authored = "#+TITLE: Session 4\n\
                        * Recap\n\
                        The party met /Old Bob/ at [[https://example.com/inn][the inn]].\n\n\
                        + loot\n  + 30 gp\n\n\
                        #+BEGIN_EXAMPLE\nraw text\n#+END_EXAMPLE\n";
        let rich = to_rich(authored).unwrap();
        assert_eq!(rich.warnings.len(), 1);

        let first = to_markup(&rich.body);
        let second = to_markup(&to_rich(&first.body).unwrap().body);
        assert_eq!(first.body, second.body);
    }

    #[test]
    fn test_blank_line_inside_list_keeps_one_list() {
        let rich = to_rich("- a\n\n- b\n").unwrap();
        assert_eq!(rich.body, "<ul><li>a</li><li>b</li></ul>");
        assert!(rich.warnings.is_empty());
    }

    #[test]
    fn test_ordered_list_start_round_trips() {
        let markup = to_markup("<ol start=\"3\"><li>third</li><li>fourth</li></ol>");
        assert_eq!(markup.body, "3. third\n4. fourth\n");
        assert_eq!(
            to_rich(&markup.body).unwrap().body,
            "<ol start=\"3\"><li>third</li><li>fourth</li></ol>"
        );
        assert_round_trip("<ol><li>a</li></ol><ol start=\"5\"><li>b</li></ol>");
    }

    #[test]
    fn test_lossy_input_is_reported() {
        let result = to_markup("<p style=\"color: red\">Angry</p>");
        assert_eq!(result.body, "Angry\n");
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_empty_body() {
        assert_eq!(to_markup("").body, "");
        assert_eq!(to_rich("").unwrap().body, "");
    }

    #[test]
    fn test_to_rich_rejects_unterminated_block() {
        let err = to_rich("#+BEGIN_QUOTE\nnever closed\n").unwrap_err();
        assert!(matches!(err, Error::UnparsableMarkup { line: 1, .. }));
        assert_eq!(err.exit_code(), 6);
    }
}
