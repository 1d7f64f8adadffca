/// True iff `text` holds only kana, Japanese punctuation and whitespace, with
/// at least one non-whitespace character.
pub fn is_kana_only(text: &str) -> bool {
    let mut has_kana = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            continue;
        }
        if !is_kana_or_japanese_punct(ch) {
            return false;
        }
        has_kana = true;
    }
    has_kana
}

fn is_kana_or_japanese_punct(ch: char) -> bool {
    matches!(ch as u32, 0x3001..=0x303F | 0x3040..=0x309F | 0x30A0..=0x30FF)
}

/// Converts half-width forms to their full-width equivalents for vertical layout.
pub fn to_full_width(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut idx = 0usize;
    while idx < chars.len() {
        let ch = chars[idx];
        let next = chars.get(idx + 1).copied();
        if let Some(base) = halfwidth_katakana(ch) {
            match next.and_then(|mark| combine_sound_mark(base, mark)) {
                Some(combined) => {
                    out.push(combined);
                    idx += 2;
                }
                None => {
                    out.push(base);
                    idx += 1;
                }
            }
            continue;
        }
        out.push(match ch {
            ' ' => '\u{3000}',
            '\u{00A5}' => '\u{FFE5}',
            '\u{00B7}' => '\u{30FB}',
            '!'..='~' => char::from_u32(ch as u32 + 0xFEE0).unwrap_or(ch),
            _ => ch,
        });
        idx += 1;
    }
    out
}

const HALFWIDTH_KATAKANA: [char; 63] = [
    '。', '「', '」', '、', '・', 'ヲ', 'ァ', 'ィ', 'ゥ', 'ェ', 'ォ', 'ャ', 'ュ', 'ョ', 'ッ', 'ー',
    'ア', 'イ', 'ウ', 'エ', 'オ', 'カ', 'キ', 'ク', 'ケ', 'コ', 'サ', 'シ', 'ス', 'セ', 'ソ', 'タ',
    'チ', 'ツ', 'テ', 'ト', 'ナ', 'ニ', 'ヌ', 'ネ', 'ノ', 'ハ', 'ヒ', 'フ', 'ヘ', 'ホ', 'マ', 'ミ',
    'ム', 'メ', 'モ', 'ヤ', 'ユ', 'ヨ', 'ラ', 'リ', 'ル', 'レ', 'ロ', 'ワ', 'ン', '゛', '゜',
];

fn halfwidth_katakana(ch: char) -> Option<char> {
    let code = ch as u32;
    if !(0xFF61..=0xFF9F).contains(&code) {
        return None;
    }
    HALFWIDTH_KATAKANA.get((code - 0xFF61) as usize).copied()
}

fn combine_sound_mark(base: char, mark: char) -> Option<char> {
    let offset = match mark {
        '\u{FF9E}' if base == 'ウ' => return Some('ヴ'),
        '\u{FF9E}' if takes_dakuten(base) => 1,
        '\u{FF9F}' if takes_handakuten(base) => 2,
        _ => return None,
    };
    char::from_u32(base as u32 + offset)
}

fn takes_dakuten(base: char) -> bool {
    matches!(base, 'カ' | 'キ' | 'ク' | 'ケ' | 'コ' | 'サ' | 'シ' | 'ス' | 'セ' | 'ソ' | 'タ' | 'チ' | 'ツ' | 'テ' | 'ト')
        || takes_handakuten(base)
}

fn takes_handakuten(base: char) -> bool {
    matches!(base, 'ハ' | 'ヒ' | 'フ' | 'ヘ' | 'ホ')
}
