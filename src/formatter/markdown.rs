//! HTML → Markdown rendering plus the header-selected markdown policies.

use regex::Regex;
use std::sync::LazyLock;

/// Matches `![alt](url)` image tokens
pub(crate) static IMAGE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[([^\]]*)\]\(([^()\s]+)\)").expect("image token regex")
});

/// Matches `[text](url)` link tokens, skipping image tokens
static LINK_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^!])\[([^\]]+)\]\(([^()\s]+)\)").expect("link token regex")
});

/// Render an HTML fragment (readability article or a whole page) as Markdown.
pub fn html_to_markdown(html: &str) -> String {
    let md = html2md::parse_html(html);
    // html2md leaves runs of blank lines behind stripped elements
    collapse_blank_runs(md.trim())
}

fn collapse_blank_runs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut blanks = 0usize;
    for line in input.lines() {
        if line.trim().is_empty() {
            blanks += 1;
            if blanks > 1 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    if !input.ends_with('\n') {
        out.pop();
    }
    out
}

/// Rewrite bare image tokens (`![](u)` or whitespace-only alts) with
/// sequential placeholder alts so a model can refer to them by name.
pub fn fill_generated_alts(markdown: &str) -> String {
    let mut counter = 0usize;
    IMAGE_TOKEN
        .replace_all(markdown, |caps: &regex::Captures<'_>| {
            counter += 1;
            let alt = caps[1].trim();
            if alt.is_empty() {
                format!("![Image {counter}]({})", &caps[2])
            } else {
                format!("![Image {counter}: {alt}]({})", &caps[2])
            }
        })
        .into_owned()
}

/// Append a section enumerating every image token in the document.
pub fn append_images_summary(markdown: &str) -> String {
    let mut lines = Vec::new();
    for (idx, caps) in IMAGE_TOKEN.captures_iter(markdown).enumerate() {
        let alt = caps[1].trim();
        let label = if alt.is_empty() {
            format!("Image {}", idx + 1)
        } else {
            alt.to_string()
        };
        lines.push(format!("- ![{label}]({})", &caps[2]));
    }
    if lines.is_empty() {
        return markdown.to_string();
    }
    format!("{markdown}\n\nImages:\n{}\n", lines.join("\n"))
}

/// Append a section enumerating every link token in the document.
pub fn append_links_summary(markdown: &str) -> String {
    let mut lines = Vec::new();
    for caps in LINK_TOKEN.captures_iter(markdown) {
        lines.push(format!("- [{}]({})", &caps[1], &caps[2]));
    }
    if lines.is_empty() {
        return markdown.to_string();
    }
    format!("{markdown}\n\nLinks:\n{}\n", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_basic_elements() {
        let md = html_to_markdown("<h1>Title</h1><p>Some <strong>bold</strong> text</p>");
        assert!(md.contains("Title"));
        assert!(md.contains("**bold**"));
    }

    #[test]
    fn generated_alts_are_sequential() {
        let md = "![](a.png) then ![photo](b.png)";
        let out = fill_generated_alts(md);
        assert!(out.contains("![Image 1](a.png)"));
        assert!(out.contains("![Image 2: photo](b.png)"));
    }

    #[test]
    fn images_summary_lists_tokens() {
        let out = append_images_summary("text ![cat](cat.png)");
        assert!(out.contains("Images:"));
        assert!(out.contains("- ![cat](cat.png)"));
    }

    #[test]
    fn links_summary_skips_images() {
        let out = append_links_summary("see [docs](https://docs.rs) and ![img](x.png)");
        assert!(out.contains("- [docs](https://docs.rs)"));
        assert!(!out.contains("x.png)\n"));
    }

    #[test]
    fn no_summary_section_without_tokens() {
        assert_eq!(append_images_summary("plain"), "plain");
        assert_eq!(append_links_summary("plain"), "plain");
    }
}
