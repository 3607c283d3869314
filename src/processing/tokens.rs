use crate::models::{OcrLine, OcrToken};
use crate::processing::normalize::normalize;
use crate::utils::ExtractionError;
use log::warn;
use std::collections::HashMap;

const TSV_MIN_FIELDS: usize = 12;
const TSV_WORD_LEVEL: u32 = 5;

/// Groups tokens into visual lines by `(block, paragraph, line)`.
///
/// Lines come back in reading order (top, then left) and tokens within a
/// line are ordered left to right. Ties keep the input order.
pub fn group_lines(tokens: &[OcrToken]) -> Vec<OcrLine> {
    let mut index: HashMap<(u32, u32, u32), usize> = HashMap::new();
    let mut lines: Vec<OcrLine> = Vec::new();

    for token in tokens.iter().filter(|t| !t.text.trim().is_empty()) {
        let key = token.grouping_key();
        let slot = *index.entry(key).or_insert_with(|| {
            lines.push(OcrLine {
                block: key.0,
                paragraph: key.1,
                line: key.2,
                tokens: Vec::new(),
            });
            lines.len() - 1
        });
        lines[slot].tokens.push(token.clone());
    }

    for line in &mut lines {
        line.tokens.sort_by_key(|t| t.left);
    }
    lines.sort_by_key(|line| {
        line.bounding_box()
            .map(|b| (b.top, b.left))
            .unwrap_or((i32::MAX, i32::MAX))
    });
    lines
}

/// First line, in reading order, whose joined text satisfies `predicate`.
pub fn line_containing<F>(tokens: &[OcrToken], predicate: F) -> Option<OcrLine>
where
    F: Fn(&str) -> bool,
{
    group_lines(tokens)
        .into_iter()
        .find(|line| predicate(&line.text()))
}

/// Applies the text normalizer to every token, dropping tokens that end up
/// empty.
pub fn normalize_tokens(tokens: &[OcrToken]) -> Vec<OcrToken> {
    tokens
        .iter()
        .filter_map(|token| {
            let text = normalize(&token.text).trim().to_string();
            if text.is_empty() {
                None
            } else {
                Some(OcrToken {
                    text,
                    ..token.clone()
                })
            }
        })
        .collect()
}

/// Joined text of each line, in reading order.
pub fn line_texts(lines: &[OcrLine]) -> Vec<String> {
    lines.iter().map(|line| line.text()).collect()
}

/// Parses Tesseract TSV output (`image_to_data`) into word-level tokens.
///
/// Rows below `min_confidence` and rows that are not word-level are skipped;
/// rows with too few columns are skipped with a warning. Input without the
/// TSV header is rejected.
pub fn parse_tesseract_tsv(tsv: &str, min_confidence: f64) -> Result<Vec<OcrToken>, ExtractionError> {
    let mut rows = tsv.lines();
    let header = rows
        .next()
        .ok_or_else(|| ExtractionError::MalformedInput("empty TSV input".to_string()))?;
    if !header.trim_start_matches('\u{feff}').starts_with("level") {
        return Err(ExtractionError::MalformedInput(
            "TSV header row is missing".to_string(),
        ));
    }

    let mut tokens = Vec::new();
    for (row_num, row) in rows.enumerate() {
        if row.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < TSV_MIN_FIELDS {
            if fields.len() > 1 {
                warn!("Skipping TSV row {}: {} columns", row_num + 2, fields.len());
            }
            continue;
        }

        let level = fields[0].trim().parse::<u32>().unwrap_or(0);
        if level != TSV_WORD_LEVEL {
            continue;
        }

        let conf = fields[10].trim().parse::<f64>().unwrap_or(-1.0);
        if conf < min_confidence {
            continue;
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        tokens.push(OcrToken {
            text: text.to_string(),
            left: fields[6].trim().parse().unwrap_or(0),
            top: fields[7].trim().parse().unwrap_or(0),
            width: fields[8].trim().parse().unwrap_or(0),
            height: fields[9].trim().parse().unwrap_or(0),
            confidence: if conf >= 0.0 { Some(conf) } else { None },
            block: fields[2].trim().parse().unwrap_or(0),
            paragraph: fields[3].trim().parse().unwrap_or(0),
            line: fields[4].trim().parse().unwrap_or(0),
        });
    }

    Ok(tokens)
}
