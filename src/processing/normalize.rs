use unicode_normalization::UnicodeNormalization;

/// Canonicalizes OCR text before any matching.
///
/// Compatibility normalization (NFKC) folds fullwidth digits, letters and
/// punctuation to their halfwidth forms and the ideographic space to an
/// ASCII space. Decimal commas become periods and dash variants become
/// hyphen-minus. Kanji and kana pass through untouched.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    text.nfkc().map(fold_punctuation).collect()
}

fn fold_punctuation(c: char) -> char {
    match c {
        ',' => '.',
        '\u{2212}' | '\u{2010}' | '\u{2011}' | '\u{2013}' | '\u{2014}' | '\u{2015}' => '-',
        '\u{3000}' => ' ',
        '\r' => '\n',
        other => other,
    }
}

/// Splits normalized text into trimmed, non-empty lines.
pub fn normalized_lines(text: &str) -> Vec<String> {
    normalize(text)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Repairs characters OCR engines commonly confuse in chart notation.
/// `V.5.` is a misread `V.s.`; the capitalised `V.S.` is folded the same way.
pub fn repair_acuity_notation(line: &str) -> String {
    line.replace("V.5.", "V.s.").replace("V.S.", "V.s.").replace("V.D.", "V.d.")
}

/// Acuity readings printed without their decimal point.
pub fn repair_missing_decimal(value: &str) -> &str {
    match value {
        "01" => "0.1",
        "10" => "1.0",
        "12" => "1.2",
        "15" => "1.5",
        "20" => "2.0",
        other => other,
    }
}
