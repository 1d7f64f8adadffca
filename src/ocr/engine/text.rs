/// Whether two adjacent words need a separating space when joined into a line.
pub(super) fn needs_space(left: &str, right: &str) -> bool {
    let last = left.chars().rev().find(|ch| !ch.is_whitespace());
    let first = right.chars().find(|ch| !ch.is_whitespace());
    match (last, first) {
        (Some(a), Some(b)) => {
            if is_cjk_or_kana(a) || is_cjk_or_kana(b) {
                return false;
            }
            (a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric())
                || (a.is_alphabetic() && b.is_alphabetic())
        }
        _ => false,
    }
}

fn is_cjk_or_kana(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3000..=0x30FF | 0x31F0..=0x31FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xFF00..=0xFFEF
    )
}
