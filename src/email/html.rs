pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn inline(text: &str) -> String {
    let escaped = escape(text);
    let parts: Vec<&str> = escaped.split("**").collect();
    // Unbalanced markers are left as typed.
    if parts.len() < 3 || parts.len() % 2 == 0 {
        return escaped;
    }
    let mut out = String::with_capacity(escaped.len() + 16);
    for (i, part) in parts.iter().enumerate() {
        if i % 2 == 1 {
            out.push_str("<strong>");
            out.push_str(part);
            out.push_str("</strong>");
        } else {
            out.push_str(part);
        }
    }
    out
}

enum Block {
    None,
    Paragraph(Vec<String>),
    Bullets(Vec<String>),
    Numbered(Vec<String>),
}

impl Block {
    fn flush(&mut self, out: &mut String) {
        match std::mem::replace(self, Block::None) {
            Block::None => {}
            Block::Paragraph(lines) => {
                out.push_str("<p>");
                out.push_str(&lines.join("<br>"));
                out.push_str("</p>\n");
            }
            Block::Bullets(items) => list(out, "ul", &items),
            Block::Numbered(items) => list(out, "ol", &items),
        }
    }
}

fn list(out: &mut String, tag: &str, items: &[String]) {
    out.push('<');
    out.push_str(tag);
    out.push_str(">\n");
    for item in items {
        out.push_str("<li>");
        out.push_str(item);
        out.push_str("</li>\n");
    }
    out.push_str("</");
    out.push_str(tag);
    out.push_str(">\n");
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 4 {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with(' ') {
        return None;
    }
    Some((level, rest.trim()))
}

fn bullet(line: &str) -> Option<&str> {
    line.strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .or_else(|| line.strip_prefix("• "))
}

fn numbered(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ")
}

// Narrative headings sit one level below the framework section heading.
pub fn markdown_to_html(text: &str) -> String {
    let mut out = String::new();
    let mut block = Block::None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            block.flush(&mut out);
            continue;
        }
        if let Some((level, title)) = heading(line) {
            block.flush(&mut out);
            let tag = format!("h{}", (level + 1).min(6));
            out.push_str(&format!("<{tag}>{}</{tag}>\n", inline(title)));
            continue;
        }
        if let Some(item) = bullet(line) {
            if !matches!(block, Block::Bullets(_)) {
                block.flush(&mut out);
                block = Block::Bullets(Vec::new());
            }
            if let Block::Bullets(items) = &mut block {
                items.push(inline(item));
            }
            continue;
        }
        if let Some(item) = numbered(line) {
            if !matches!(block, Block::Numbered(_)) {
                block.flush(&mut out);
                block = Block::Numbered(Vec::new());
            }
            if let Block::Numbered(items) = &mut block {
                items.push(inline(item));
            }
            continue;
        }
        if !matches!(block, Block::Paragraph(_)) {
            block.flush(&mut out);
            block = Block::Paragraph(Vec::new());
        }
        if let Block::Paragraph(lines) = &mut block {
            lines.push(inline(line));
        }
    }
    block.flush(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup_in_narrative_text() {
        let html = markdown_to_html("use <script>alert('x')</script> & more");
        assert_eq!(
            html,
            "<p>use &lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; more</p>\n"
        );
    }

    #[test]
    fn renders_headings_lists_and_bold() {
        let md = "## Executive Summary\nTwo **critical** issues.\nSee below.\n\n- one\n- two\n\n1. first\n2. second";
        let html = markdown_to_html(md);
        assert!(html.contains("<h3>Executive Summary</h3>"));
        assert!(html.contains("<p>Two <strong>critical</strong> issues.<br>See below.</p>"));
        assert!(html.contains("<ul>\n<li>one</li>\n<li>two</li>\n</ul>"));
        assert!(html.contains("<ol>\n<li>first</li>\n<li>second</li>\n</ol>"));
    }

    #[test]
    fn unbalanced_bold_is_left_alone() {
        assert_eq!(markdown_to_html("a ** b"), "<p>a ** b</p>\n");
    }

    #[test]
    fn hashtags_are_not_headings() {
        assert_eq!(markdown_to_html("#hashtag"), "<p>#hashtag</p>\n");
    }
}
