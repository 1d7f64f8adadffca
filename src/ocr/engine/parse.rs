use crate::ocr::{Direction, TextFragment};

use super::text::needs_space;

const LINE_CLASSES: [&str; 4] = ["ocr_line", "ocr_textfloat", "ocr_header", "ocr_caption"];

#[derive(Debug, Clone, Copy, PartialEq)]
struct HocrBox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl HocrBox {
    fn union(self, other: HocrBox) -> HocrBox {
        HocrBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

/// One fragment per hOCR line element, in document order.
///
/// Lines carrying `textangle 90|270` are vertical. With a vertical language
/// loaded, lines much taller than wide are vertical as well.
pub(super) fn parse_hocr_fragments(hocr: &str, vertical_hint: bool) -> Vec<TextFragment> {
    let mut fragments = Vec::new();
    let bytes = hocr.as_bytes();
    let mut i = 0usize;
    while let Some(start) = find_subslice(bytes, b"<span", i) {
        let Some(tag_end) = find_byte(bytes, b'>', start) else {
            break;
        };
        let tag = &hocr[start..tag_end];
        if !is_line_tag(tag) {
            i = tag_end + 1;
            continue;
        }
        let Some((inner_start, inner_end)) = find_span_inner(bytes, tag_end + 1) else {
            break;
        };
        let inner = &hocr[inner_start..inner_end];
        if let Some(fragment) = build_fragment(tag, inner, vertical_hint) {
            fragments.push(fragment);
        }
        i = inner_end + "</span>".len();
    }
    fragments
}

fn is_line_tag(tag: &str) -> bool {
    let Some(class) = extract_attr(tag, "class") else {
        return false;
    };
    class
        .split_whitespace()
        .any(|value| LINE_CLASSES.contains(&value))
}

fn build_fragment(tag: &str, inner: &str, vertical_hint: bool) -> Option<TextFragment> {
    let words = parse_hocr_words(inner);
    if words.is_empty() {
        return None;
    }
    let mut text = String::new();
    let mut last_token = String::new();
    let mut words_box: Option<HocrBox> = None;
    for (word, bbox) in &words {
        if !text.is_empty() && needs_space(&last_token, word) {
            text.push(' ');
        }
        text.push_str(word);
        last_token = word.clone();
        words_box = Some(match words_box {
            Some(current) => current.union(*bbox),
            None => *bbox,
        });
    }
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let bbox = extract_attr(tag, "title")
        .and_then(|title| parse_bbox(&title))
        .or(words_box)?;

    let angle = extract_attr(tag, "title").and_then(|title| parse_textangle(&title));
    let tall = (bbox.y2 - bbox.y1) > (bbox.x2 - bbox.x1) * 1.5 && text.chars().count() > 1;
    let direction = match angle {
        Some(90) | Some(270) => Direction::Vertical,
        _ if vertical_hint && tall => Direction::Vertical,
        _ => Direction::Horizontal,
    };

    Some(TextFragment::from_rect(
        bbox.x1, bbox.y1, bbox.x2, bbox.y2, text, direction,
    ))
}

fn parse_hocr_words(inner: &str) -> Vec<(String, HocrBox)> {
    let bytes = inner.as_bytes();
    let mut words = Vec::new();
    let mut i = 0usize;
    while let Some(start) = find_subslice(bytes, b"<span", i) {
        let Some(tag_end) = find_byte(bytes, b'>', start) else {
            break;
        };
        let tag = &inner[start..tag_end];
        if !tag.contains("ocrx_word") {
            i = tag_end + 1;
            continue;
        }
        let Some((inner_start, inner_end)) = find_span_inner(bytes, tag_end + 1) else {
            break;
        };
        let word_text =
            decode_entities(&strip_tags(&inner[inner_start..inner_end])).replace('\u{00a0}', " ");
        let word_text = word_text.trim();
        let bbox = extract_attr(tag, "title").and_then(|title| parse_bbox(&title));
        if let Some(bbox) = bbox {
            if !word_text.is_empty() {
                words.push((word_text.to_string(), bbox));
            }
        }
        i = inner_end + "</span>".len();
    }
    words
}

fn parse_bbox(title: &str) -> Option<HocrBox> {
    let bbox_idx = title.find("bbox")?;
    let rest = &title[bbox_idx + 4..];
    let nums = rest
        .split([' ', ';'])
        .filter(|v| !v.is_empty())
        .take(4)
        .filter_map(|v| v.parse::<f32>().ok())
        .collect::<Vec<_>>();
    if nums.len() != 4 {
        return None;
    }
    let (x1, y1, x2, y2) = (nums[0], nums[1], nums[2], nums[3]);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(HocrBox { x1, y1, x2, y2 })
}

fn parse_textangle(title: &str) -> Option<i32> {
    let idx = title.find("textangle")?;
    let rest = &title[idx + "textangle".len()..];
    let value = rest.split([' ', ';']).find(|v| !v.is_empty())?;
    value.parse::<i32>().ok()
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|win| win == needle)
        .map(|pos| from + pos)
}

fn find_byte(haystack: &[u8], needle: u8, from: usize) -> Option<usize> {
    haystack[from..]
        .iter()
        .position(|b| *b == needle)
        .map(|pos| from + pos)
}

fn find_span_inner(bytes: &[u8], start: usize) -> Option<(usize, usize)> {
    let mut depth = 1i32;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if bytes[i..].starts_with(b"<span") {
                depth += 1;
            } else if bytes[i..].starts_with(b"</span") {
                depth -= 1;
                if depth == 0 {
                    return Some((start, i));
                }
            }
        }
        i += 1;
    }
    None
}

fn extract_attr(tag: &str, name: &str) -> Option<String> {
    let needle = format!(" {}=", name);
    let idx = tag.find(&needle)?;
    let rest = &tag[idx + needle.len()..];
    let quote = rest.chars().next().filter(|ch| *ch == '"' || *ch == '\'')?;
    let rest = &rest[1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

fn strip_tags(value: &str) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in value.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ => {
                if !in_tag {
                    out.push(ch);
                }
            }
        }
    }
    out
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
