use std::path::Path;

use anyhow::Result;
use log::info;

use ipcheck::validator::{
    classify_input, InputKind, PackageValidator, ValidationOptions, ValidatorError,
};

use super::report;

/// Exit code for inputs that do not exist.
const EXIT_NO_SUCH_PATH: i32 = 1;
/// Exit code for inputs that are neither archives nor METS files.
const EXIT_NOT_A_PACKAGE: i32 = 2;

/// Validate each input in turn and print its report.
///
/// Unprocessable inputs are reported on stderr; the last nonzero status
/// becomes the process exit code, matching batch work-flow expectations.
pub fn run(files: &[std::path::PathBuf], recurse: bool, checksum: bool, structure: bool) -> Result<i32> {
    let validator = PackageValidator::default();
    let options = ValidationOptions {
        check_metadata: !structure,
        verify_checksums: checksum,
        recurse,
        ..Default::default()
    };
    let mut exit = 0;
    for file in files {
        match process_ip(&validator, file, &options)? {
            0 => {}
            code => {
                eprintln!("{}", exit_message(code, file));
                exit = code;
            }
        }
    }
    Ok(exit)
}

fn process_ip(
    validator: &PackageValidator,
    file: &Path,
    options: &ValidationOptions,
) -> Result<i32> {
    if !file.exists() {
        return Ok(EXIT_NO_SUCH_PATH);
    }
    if classify_input(file) == InputKind::Unsupported {
        return Ok(EXIT_NOT_A_PACKAGE);
    }
    info!("validating: {}", file.display());
    match validator.validate_with_options(file, options) {
        Ok(validation_report) => {
            report::print(&validation_report)?;
            Ok(0)
        }
        Err(ValidatorError::Input { path, reason }) => {
            eprintln!("cannot read {path}: {reason}");
            Ok(EXIT_NOT_A_PACKAGE)
        }
        Err(err) => Err(err.into()),
    }
}

fn exit_message(code: i32, file: &Path) -> String {
    match code {
        EXIT_NO_SUCH_PATH => format!("{} is not an existing file or directory.", file.display()),
        EXIT_NOT_A_PACKAGE => format!(
            "{} must be a zip/tar archive or an XML METS file.",
            file.display()
        ),
        _ => format!("unexpected failure processing {}", file.display()),
    }
}
