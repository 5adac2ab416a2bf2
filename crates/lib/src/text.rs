//! Text folding shared by keyword matching and dataset lookups.
//!
//! Persian text arrives with Arabic code points (yeh, kaf) and Persian or Arabic-Indic
//! digits depending on the keyboard and the accounting software that produced a file.

/// Lowercase, map Arabic yeh/kaf to their Persian forms and digits to ASCII.
pub fn fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'ي' | 'ى' => 'ی',
            'ك' => 'ک',
            'ة' => 'ه',
            _ => ascii_digit(c).unwrap_or(c),
        })
        .flat_map(char::to_lowercase)
        .collect()
}

/// Persian (U+06F0..) and Arabic-Indic (U+0660..) digits to ASCII.
pub fn ascii_digit(c: char) -> Option<char> {
    let offset = match c {
        '\u{06F0}'..='\u{06F9}' => c as u32 - 0x06F0,
        '\u{0660}'..='\u{0669}' => c as u32 - 0x0660,
        _ => return None,
    };
    char::from_digit(offset, 10)
}

/// Parse a number written with thousands separators and/or non-ASCII digits.
/// Returns None for empty or non-numeric text.
pub fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '٬' | '\u{00A0}' | '\u{202F}' | ' ' | '\''))
        .map(|c| match c {
            '٫' => '.',
            '−' => '-',
            _ => ascii_digit(c).unwrap_or(c),
        })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}
