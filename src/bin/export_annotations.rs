//! export_annotations - summarize a saved annotation document

use anyhow::{anyhow, Result};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use annotator_kernel::SessionDocument;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the annotation document to read.
    #[arg(long, default_value = "annotations.json", env = "ANNOTATOR_OUTPUT")]
    input: PathBuf,
    /// Optional path to re-serialize the document to.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let document = SessionDocument::read(&args.input)
        .map_err(|e| anyhow!("failed to read {}: {}", args.input.display(), e))?;

    println!("document: {}", args.input.display());
    println!("exported: {}", document.metadata.export_date.to_rfc3339());
    println!("frames:   {}", document.metadata.total_frames);
    println!("objects:  {}", document.metadata.total_objects);
    println!(
        "settings: confidence={:.2} iou={:.2} position={:.1}",
        document.metadata.settings.confidence,
        document.metadata.settings.iou_threshold,
        document.metadata.settings.position_threshold
    );

    let mut label_counts: HashMap<&str, u64> = HashMap::new();
    for annotation in document.frames.values() {
        for detection in annotation.objects.values() {
            *label_counts.entry(detection.label.as_str()).or_insert(0) += 1;
        }
    }
    if !label_counts.is_empty() {
        let mut sorted: Vec<(&str, u64)> = label_counts.into_iter().collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        println!("labels:");
        for (label, count) in sorted {
            println!("  {:<16} {}", label, count);
        }
    }

    if let Some(output) = &args.output {
        write_document(output, &document)?;
        println!("document written to {}", output.display());
    }

    Ok(())
}

fn write_document(path: &Path, document: &SessionDocument) -> Result<()> {
    let json = serde_json::to_vec_pretty(document)?;
    std::fs::write(path, json)?;
    Ok(())
}
