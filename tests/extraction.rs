use ocular_fields::models::{
    DocumentMeta, DropReason, ExtractionMethod, FieldKind, OcrToken, ReportKind,
};
use ocular_fields::processing::{cluster_rows, parse_tesseract_tsv, FieldFamily, PatternMatcher};
use ocular_fields::{ExtractionConfig, ExtractionError, FieldExtractor, OcrInput};

fn extractor() -> FieldExtractor {
    FieldExtractor::with_defaults().unwrap()
}

fn text(value: &Option<ocular_fields::models::FieldValue>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

fn tok(text: &str, left: i32, top: i32, line: u32) -> OcrToken {
    OcrToken::new(text, left, top, 40, 20).with_grouping(1, 1, line)
}

#[test]
fn handwritten_iop_line() {
    let result = extractor()
        .extract(&OcrInput::Text("カルテ\nAT: 15 18\n".to_string()))
        .unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert_eq!(text(&iop.right_value), Some("15".to_string()));
    assert_eq!(text(&iop.left_value), Some("18".to_string()));
    assert!(matches!(
        iop.method,
        Some(ExtractionMethod::HandwrittenHeuristic { .. })
    ));
}

#[test]
fn decimal_pressures_are_not_mistaken_for_dates() {
    let result = extractor()
        .extract(&OcrInput::Text("AT 15.5/18.5".to_string()))
        .unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert_eq!(text(&iop.right_value), Some("15.5".to_string()));
    assert_eq!(text(&iop.left_value), Some("18.5".to_string()));

    let result = extractor()
        .extract(&OcrInput::Text("IOP 95 15 18".to_string()))
        .unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert_eq!(text(&iop.right_value), Some("15".to_string()));
    assert_eq!(text(&iop.left_value), Some("18".to_string()));
}

#[test]
fn date_line_is_skipped_for_iop() {
    let result = extractor()
        .extract(&OcrInput::Text("2025/03/04 AT 15 18".to_string()))
        .unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert!(iop.is_empty());
    assert_eq!(iop.note, "not detected");

    let result = extractor()
        .extract(&OcrInput::Text("2025/03/04 AT 15 18\n眼圧 16 17".to_string()))
        .unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert_eq!(text(&iop.right_value), Some("16".to_string()));
}

#[test]
fn refraction_split_across_lines() {
    let lines: Vec<String> = ["S: -3.00", "C: -0.75", "Ax: 180"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let matcher = PatternMatcher::new(&ExtractionConfig::default()).unwrap();
    let candidates = matcher.match_field(&lines, FieldFamily::Refraction, 3);
    let value = |field: FieldKind| {
        candidates
            .iter()
            .find(|c| c.field == field)
            .map(|c| c.value.to_string())
    };
    assert_eq!(value(FieldKind::RefractionSphere), Some("-3.00".to_string()));
    assert_eq!(value(FieldKind::RefractionCylinder), Some("-0.75".to_string()));
    assert_eq!(value(FieldKind::RefractionAxis), Some("180".to_string()));

    let lines: Vec<String> = ["S: -3.00", "C: -0.75", "Ax: 181"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let candidates = matcher.match_field(&lines, FieldFamily::Refraction, 3);
    assert!(candidates.iter().all(|c| c.field != FieldKind::RefractionAxis));
    assert_eq!(candidates.len(), 2);
}

#[test]
fn refraction_without_eye_is_audited_not_guessed() {
    let result = extractor()
        .extract(&OcrInput::Text("S: -3.00 C: -0.75 Ax: 180".to_string()))
        .unwrap();
    assert!(result.record(FieldKind::RefractionSphere).unwrap().is_empty());
    assert!(result
        .audit
        .iter()
        .any(|a| a.field == FieldKind::RefractionSphere && a.reason == DropReason::AmbiguousLaterality));
}

#[test]
fn refraction_with_eye_words_resolves() {
    let result = extractor()
        .extract(&OcrInput::Text(
            "右 S-3.00 C-0.75 Ax180\n左 S-1.50 C-0.50 Ax90".to_string(),
        ))
        .unwrap();
    let sphere = result.record(FieldKind::RefractionSphere).unwrap();
    assert_eq!(text(&sphere.right_value), Some("-3.00".to_string()));
    assert_eq!(text(&sphere.left_value), Some("-1.50".to_string()));
    let axis = result.record(FieldKind::RefractionAxis).unwrap();
    assert_eq!(text(&axis.left_value), Some("90".to_string()));
}

#[test]
fn table_rows_cluster_by_band() {
    let tokens = vec![
        OcrToken::new("102", 100, 90, 40, 20),
        OcrToken::new("98", 300, 92, 40, 20),
        OcrToken::new("75", 100, 130, 40, 20),
        OcrToken::new("68", 300, 131, 40, 20),
    ];
    let rows = cluster_rows(&tokens, 35.0);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].texts(), vec!["102", "98"]);
    assert_eq!(rows[1].texts(), vec!["75", "68"]);
}

#[test]
fn automated_average_without_handwriting() {
    let tokens = vec![
        tok("NCT", 40, 100, 1),
        tok("IOP", 100, 100, 1),
        tok("mmHg", 150, 100, 1),
        tok("Avg", 100, 190, 3),
        tok("14.0", 300, 190, 3),
        tok("15.0", 450, 190, 3),
    ];
    let result = extractor().extract(&OcrInput::Tokens(tokens)).unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert_eq!(text(&iop.right_value), Some("14.0".to_string()));
    assert_eq!(text(&iop.left_value), Some("15.0".to_string()));
    assert_eq!(iop.method, Some(ExtractionMethod::PositionalAverage));
}

#[test]
fn handwritten_pair_overrides_average() {
    let passes = vec![
        OcrInput::Text("IOP mmHg\nAvg 14.0 15.0".to_string()),
        OcrInput::Text("眼圧 R17 L19".to_string()),
    ];
    let result = extractor().extract_passes(&passes).unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert_eq!(text(&iop.right_value), Some("17".to_string()));
    assert_eq!(text(&iop.left_value), Some("19".to_string()));
    assert_eq!(
        iop.method,
        Some(ExtractionMethod::HandwrittenHeuristic {
            rule: "iop.letter-pair"
        })
    );
}

fn rnfl_page(total_od: &str, total_os: &str) -> Vec<OcrToken> {
    vec![
        OcrToken::new("Average", 200, 100, 80, 20).with_grouping(1, 1, 1),
        OcrToken::new("thickness", 290, 100, 90, 20).with_grouping(1, 1, 1),
        OcrToken::new("RNFL", 390, 100, 50, 20).with_grouping(1, 1, 1),
        tok(total_od, 400, 150, 2),
        tok(total_os, 600, 150, 2),
        tok("120", 400, 200, 3),
        tok("118", 600, 200, 3),
        tok("75", 400, 250, 4),
        tok("80", 600, 250, 4),
    ]
}

#[test]
fn rnfl_range_check() {
    let result = extractor()
        .extract(&OcrInput::Tokens(rnfl_page("85", "250")))
        .unwrap();
    let total = result.record(FieldKind::RnflTotal).unwrap();
    assert_eq!(text(&total.right_value), Some("85".to_string()));
    assert!(total.left_value.is_none());
    assert!(result
        .audit
        .iter()
        .any(|a| a.field == FieldKind::RnflTotal && a.reason == DropReason::OutOfRange && a.value == "250"));
    assert_eq!(result.report_kind, ReportKind::DiscOct);

    let superior = result.record(FieldKind::RnflSuperior).unwrap();
    assert_eq!(text(&superior.right_value), Some("120".to_string()));
    assert_eq!(text(&superior.left_value), Some("118".to_string()));
}

#[test]
fn rnfl_out_of_range_value_leaves_field_empty() {
    let tokens = vec![
        OcrToken::new("Average", 200, 100, 80, 20).with_grouping(1, 1, 1),
        OcrToken::new("thickness", 290, 100, 90, 20).with_grouping(1, 1, 1),
        OcrToken::new("RNFL", 390, 100, 50, 20).with_grouping(1, 1, 1),
        tok("Total", 210, 150, 2),
        tok("250", 400, 150, 2),
    ];
    let result = extractor().extract(&OcrInput::Tokens(tokens)).unwrap();
    assert!(result.record(FieldKind::RnflTotal).unwrap().is_empty());
}

#[test]
fn macular_report_skips_disc_tables() {
    let mut tokens = rnfl_page("98", "102");
    tokens.push(OcrToken::new("MACULAR", 200, 20, 90, 20).with_grouping(0, 1, 1));
    tokens.push(OcrToken::new("THICKNESS", 300, 20, 90, 20).with_grouping(0, 1, 1));
    tokens.push(OcrToken::new("MAP", 400, 20, 50, 20).with_grouping(0, 1, 1));
    tokens.push(OcrToken::new("FOVEA", 200, 50, 70, 20).with_grouping(0, 1, 2));
    let result = extractor().extract(&OcrInput::Tokens(tokens)).unwrap();
    assert_eq!(result.report_kind, ReportKind::MacularOct);
    assert!(result.record(FieldKind::RnflTotal).unwrap().is_empty());
}

#[test]
fn tesseract_tsv_feeds_tokens() {
    let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
               5\t1\t1\t1\t1\t1\t100\t100\t40\t20\t95\tIOP\n\
               5\t1\t1\t1\t1\t2\t150\t100\t60\t20\t94\tmmHg\n\
               5\t1\t1\t1\t2\t1\t100\t190\t40\t20\t93\tAvg\n\
               5\t1\t1\t1\t2\t2\t300\t190\t40\t20\t91\t14.0\n\
               5\t1\t1\t1\t2\t3\t450\t190\t40\t20\t90\t15.0";
    let tokens = parse_tesseract_tsv(tsv, 60.0).unwrap();
    assert_eq!(tokens.len(), 5);
    let result = extractor().extract(&OcrInput::Tokens(tokens)).unwrap();
    let iop = result.record(FieldKind::IntraocularPressure).unwrap();
    assert_eq!(text(&iop.left_value), Some("15.0".to_string()));
    assert_eq!(iop.right_method, Some(ExtractionMethod::PositionalAverage));
}

#[test]
fn fullwidth_chart_text() {
    let result = extractor()
        .extract(&OcrInput::Text("Ｖ．ｄ．＝０．１（１．２×ＩＯＬ）\nＶ．ｓ．＝０．３（ｎ．ｃ．）".to_string()))
        .unwrap();
    let naked = result.record(FieldKind::VisualAcuityNaked).unwrap();
    assert_eq!(text(&naked.right_value), Some("0.1".to_string()));
    assert_eq!(text(&naked.left_value), Some("0.3".to_string()));
    let corrected = result.record(FieldKind::VisualAcuityCorrected).unwrap();
    assert_eq!(text(&corrected.right_value), Some("1.2".to_string()));
    assert_eq!(text(&corrected.left_value), Some("n.c.".to_string()));
    let iol = result.record(FieldKind::IntraocularLens).unwrap();
    assert_eq!(text(&iol.right_value), Some("yes".to_string()));
    assert!(iol.left_value.is_none());
}

#[test]
fn empty_document_needs_review() {
    let err = extractor().extract(&OcrInput::Tokens(Vec::new())).unwrap_err();
    assert!(matches!(err, ExtractionError::MalformedInput(_)));
    assert!(err.needs_manual_review());
}

#[test]
fn report_serializes_with_meta() {
    let meta = DocumentMeta {
        filename: "chart_001.jpg".to_string(),
        visit_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 4),
        exam_label: "follow-up".to_string(),
    };
    let report = extractor()
        .report(meta, &[OcrInput::Text("AT: 15 18".to_string())])
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["meta"]["filename"], "chart_001.jpg");
    assert_eq!(json["meta"]["visit_date"], "2025-03-04");
    assert_eq!(json["report_kind"], "chart");
    assert!(json["records"].as_array().unwrap().len() == FieldKind::ALL.len());
}

#[test]
fn extractor_is_shareable_across_threads() {
    let extractor = std::sync::Arc::new(extractor());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let extractor = extractor.clone();
            std::thread::spawn(move || {
                let text = format!("AT: {} 18", 12 + i);
                extractor.extract(&OcrInput::Text(text)).unwrap()
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        let iop = result.record(FieldKind::IntraocularPressure).unwrap();
        assert_eq!(text(&iop.right_value), Some((12 + i).to_string()));
    }
}
