//! Turns accumulated model narration into display text.

use std::sync::LazyLock;

use regex::Regex;

static TEXT_CONTENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)TextContent\(.*?text='(.*?)'.*?\)").unwrap());

static SECTION_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n---|\n").unwrap());

/// Unwrap `TextContent(... text='...' ...)` markers, split on `---` section
/// separators and line breaks, drop blank segments and rejoin them with one
/// blank line in between. Formatting the output again changes nothing.
pub fn format_tool_result(raw: &str) -> String {
    let unwrapped = TEXT_CONTENT.replace_all(raw, |caps: &regex::Captures<'_>| {
        caps[1].replace("\\n", "\n")
    });

    SECTION_BREAK
        .split(&unwrapped)
        .map(clean_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

// A segment may not start with a separator, or the joined output would split
// differently on the next pass.
fn clean_segment(segment: &str) -> &str {
    let mut segment = segment.trim();
    while let Some(rest) = segment.strip_prefix("---") {
        segment = rest.trim_start();
    }
    segment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_trimmed_only() {
        assert_eq!(format_tool_result("  2 + 2 = 4.  \n"), "2 + 2 = 4.");
    }

    #[test]
    fn splits_sections_and_lines() {
        let raw = "tokio-rs/tokio: A runtime\n---\nserde-rs/serde: Serialization\n\n\nlast line";
        assert_eq!(
            format_tool_result(raw),
            "tokio-rs/tokio: A runtime\n\nserde-rs/serde: Serialization\n\nlast line"
        );
    }

    #[test]
    fn unwraps_text_content_markers() {
        let raw = "Result: [TextContent(type='text', text='first\\nsecond', annotations=None)]";
        assert_eq!(format_tool_result(raw), "Result: [first\n\nsecond]");
    }

    #[test]
    fn formatting_is_idempotent() {
        let inputs = [
            "",
            "single",
            "a\n---\nb\r\n  c  \n\n",
            "---\nleading separator",
            "TextContent(type='text', text='x\\ny')",
            "\n\n\n",
            "Summary\n  ---details",
            "a\n------b",
            "a\n--- ---b",
            "- item one\n- item two",
        ];
        for input in inputs {
            let once = format_tool_result(input);
            assert_eq!(format_tool_result(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn indented_separator_is_dropped() {
        assert_eq!(format_tool_result("Summary\n  ---details"), "Summary\n\ndetails");
        assert_eq!(format_tool_result("---\n---"), "");
        assert_eq!(format_tool_result("- bullet"), "- bullet");
    }

    #[test]
    fn blank_input_gives_empty_output() {
        assert_eq!(format_tool_result(" \n \n"), "");
    }
}
