use anyhow::Result;

use ipcheck::model::{MetadataStatus, StructStatus, ValidationReport};

/// Print the canonical JSON report followed by a one-line summary.
///
/// The JSON goes to stdout so reports can be piped; the summary goes to
/// stderr for humans watching the run.
pub fn print(report: &ValidationReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    eprintln!("{}", summary_line(report));
    Ok(())
}

fn summary_line(report: &ValidationReport) -> String {
    let name = &report.package.details.name;
    let structure = match report.structure.status {
        StructStatus::WellFormed => "WELLFORMED",
        StructStatus::NotWellFormed => "NOTWELLFORMED",
    };
    let line = match &report.metadata {
        Some(metadata) => {
            let schema = status_word(metadata.schema_results.status);
            let schematron = status_word(metadata.schematron_results.status);
            format!(
                "{name}: structure {structure}, schema {schema}, schematron {schematron}"
            )
        }
        None => format!("{name}: structure {structure}, metadata not checked"),
    };
    stylize(&line, report)
}

fn status_word(status: MetadataStatus) -> &'static str {
    match status {
        MetadataStatus::Valid => "VALID",
        MetadataStatus::NotValid => "NOTVALID",
    }
}

#[cfg(feature = "colorized_output")]
fn stylize(line: &str, report: &ValidationReport) -> String {
    use console::style;

    if report.is_valid() {
        style(line).green().to_string()
    } else {
        style(line).red().bold().to_string()
    }
}

#[cfg(not(feature = "colorized_output"))]
fn stylize(line: &str, _report: &ValidationReport) -> String {
    line.to_string()
}
