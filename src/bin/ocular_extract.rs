// Command-line front end: runs field extraction over saved OCR output

use chrono::NaiveDate;
use clap::Parser;
use log::error;
use ocular_fields::{
    models::{DocumentMeta, DocumentReport, DropReason, FieldRecord},
    processing::parse_tesseract_tsv,
    ExtractionConfig, ExtractionError, FieldExtractor, OcrInput,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "ocular_extract")]
#[command(about = "Extract structured ophthalmic fields from OCR output", long_about = None)]
struct Args {
    /// OCR output files for one document; each file is one pass
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Treat inputs as Tesseract TSV (image_to_data) instead of plain text
    #[arg(long)]
    tsv: bool,

    /// JSON configuration overriding vocabulary, windows, layout or bounds
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Drop TSV words below this OCR confidence (0-100)
    #[arg(long, default_value_t = 0.0)]
    min_confidence: f64,

    /// Source filename recorded in the report
    #[arg(long)]
    filename: Option<String>,

    /// Visit date recorded in the report (YYYY-MM-DD)
    #[arg(long)]
    visit_date: Option<NaiveDate>,

    /// Exam label recorded in the report
    #[arg(long, default_value = "")]
    exam_label: String,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn print_record(record: &FieldRecord) {
    let show = |value: &Option<ocular_fields::models::FieldValue>| {
        value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
    };
    let method = record
        .method
        .map(|m| m.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "  {:<28} OD {:>7}  OS {:>7}  [{}] {}",
        record.field.label(),
        show(&record.right_value),
        show(&record.left_value),
        method,
        record.note
    );
}

fn print_detailed_report(report: &DocumentReport) {
    println!("\n===============================================");
    println!("      OPHTHALMIC FIELD EXTRACTION REPORT");
    println!("===============================================\n");

    println!("DOCUMENT:");
    println!("  File: {}", report.meta.filename);
    if let Some(date) = report.meta.visit_date {
        println!("  Visit date: {}", date);
    }
    if !report.meta.exam_label.is_empty() {
        println!("  Exam: {}", report.meta.exam_label);
    }
    println!("  Report kind: {:?}", report.extraction.report_kind);

    println!("\nFIELDS:");
    for record in &report.extraction.records {
        print_record(record);
    }

    if !report.extraction.audit.is_empty() {
        println!("\nDROPPED CANDIDATES:");
        for entry in &report.extraction.audit {
            println!(
                "  - [{}] {} {} ({}) from \"{}\"",
                match entry.reason {
                    DropReason::OutOfRange => "OUT OF RANGE",
                    DropReason::NotNumeric => "NOT NUMERIC",
                    DropReason::AmbiguousLaterality => "NO LATERALITY",
                },
                entry.field,
                entry.value,
                entry.source,
                entry.raw_context
            );
        }
    }

    println!(
        "\nDetected {}/{} fields from {} candidates",
        report.extraction.detected_count(),
        report.extraction.records.len(),
        report.extraction.candidate_count
    );
}

fn run(args: &Args) -> Result<DocumentReport, ExtractionError> {
    let config = match &args.config {
        Some(path) => ExtractionConfig::from_json_file(path)?,
        None => ExtractionConfig::default(),
    };
    let extractor = FieldExtractor::new(config)?;

    let mut passes = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let content = std::fs::read_to_string(path)?;
        let pass = if args.tsv {
            OcrInput::Tokens(parse_tesseract_tsv(&content, args.min_confidence)?)
        } else {
            OcrInput::Text(content)
        };
        passes.push(pass);
    }

    let filename = args.filename.clone().unwrap_or_else(|| {
        args.inputs
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let meta = DocumentMeta {
        filename,
        visit_date: args.visit_date,
        exam_label: args.exam_label.clone(),
    };
    extractor.report(meta, &passes)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(report) => {
            if args.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{}", json),
                    Err(err) => {
                        error!("Failed to serialize report: {}", err);
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                print_detailed_report(&report);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            if err.needs_manual_review() {
                eprintln!("Document needs manual review: {}", err);
            } else {
                eprintln!("Error extracting fields: {}", err);
            }
            ExitCode::FAILURE
        }
    }
}
