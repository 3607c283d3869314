use crate::models::OcrToken;
use std::cmp::Ordering;

/// Tokens that sit on one visual row of a measurement table, ordered left
/// to right.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Vertical centre of the token that opened the row.
    pub center_y: f64,
    pub tokens: Vec<OcrToken>,
}

impl Row {
    pub fn texts(&self) -> Vec<&str> {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    /// Leftmost token is the right eye (OD), the next one the left eye (OS).
    pub fn eye_pair(&self) -> (Option<&OcrToken>, Option<&OcrToken>) {
        (self.tokens.first(), self.tokens.get(1))
    }
}

fn reading_order(a: &OcrToken, b: &OcrToken) -> Ordering {
    a.y_center()
        .total_cmp(&b.y_center())
        .then_with(|| a.x_center().total_cmp(&b.x_center()))
        .then_with(|| a.text.cmp(&b.text))
}

/// Groups tokens into rows by vertical centre.
///
/// Tokens are visited top to bottom; a token joins the current row while its
/// centre is within `band_height` of the row's anchor (the first token's
/// centre), otherwise it opens a new row. The full sort key makes the result
/// independent of input order.
pub fn cluster_rows(tokens: &[OcrToken], band_height: f64) -> Vec<Row> {
    let mut sorted: Vec<&OcrToken> = tokens.iter().collect();
    sorted.sort_by(|a, b| reading_order(a, b));

    let mut rows: Vec<Row> = Vec::new();
    for token in sorted {
        let cy = token.y_center();
        match rows.last_mut() {
            Some(row) if (cy - row.center_y).abs() <= band_height => {
                row.tokens.push(token.clone());
            }
            _ => rows.push(Row {
                center_y: cy,
                tokens: vec![token.clone()],
            }),
        }
    }

    for row in &mut rows {
        row.tokens.sort_by(|a, b| {
            a.x_center()
                .total_cmp(&b.x_center())
                .then_with(|| reading_order(a, b))
        });
    }
    rows
}
