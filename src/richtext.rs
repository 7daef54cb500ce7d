//! Conversion between the persisted plain-text step form and the rich-text
//! form the browser editor works with.
//!
//! Both directions are lossy by design. The editor substitutes non-breaking
//! spaces for ordinary spaces and wants one paragraph element per line; the
//! runner needs clean plain text. Round-tripping reproduces line content for
//! plain inputs, but inputs that already contain markup, or odd whitespace,
//! are normalized one-way. Do not rely on exact round-trips.

/// Plain steps -> markup for the editor: NBSP substitution, entity
/// escaping, and one `<p>` per line.
pub fn steps_to_rich(steps: &str) -> String {
    let steps = steps.replace(' ', "\u{a0}");
    let escaped = escape(&steps);
    let lines: Vec<&str> = escaped.lines().collect();
    format!("<p>{}</p>", lines.join("</p>\n<p>"))
}

/// Editor markup -> plain steps: strip tags, unescape entities, undo the
/// NBSP substitution.
pub fn rich_to_steps(rich: &str) -> String {
    let stripped = strip_tags(rich);
    let unescaped = unescape(&stripped);
    unescaped.replace('\u{a0}', " ")
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    // Only the entities our own escaping (and the editor) produce.
    s.replace("&nbsp;", "\u{a0}")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Drop everything between `<` and `>`, keeping the text in between tags.
/// An unterminated tag swallows the rest of the input.
fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}
