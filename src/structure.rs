//! CSIP folder-structure checks (CSIPSTR1 to CSIPSTR16).
//!
//! The checker scans the direct children of the package root and of every
//! representation folder and reports each missing requirement with its CSIP
//! message. MUST requirements map to errors, SHOULD to warnings and MAY to
//! informational findings; a package is not well formed as soon as an error
//! is present.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::model::{Representation, Severity, StructResults, TestResult};

/// Canonical METS file name; matched case-insensitively.
pub const METS_NAME: &str = "METS.xml";

const DATA_DIR: &str = "data";
const DESC_DIR: &str = "descriptive";
const DOCS_DIR: &str = "documentation";
const META_DIR: &str = "metadata";
const PRES_DIR: &str = "preservation";
const REPS_DIR: &str = "representations";
const SCHEMA_DIR: &str = "schemas";

/// CSIP requirement levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    May,
    Should,
    Must,
}

impl Level {
    fn severity(self) -> Severity {
        match self {
            Level::Must => Severity::Error,
            Level::Should => Severity::Warn,
            Level::May => Severity::Info,
        }
    }
}

struct Requirement {
    id: &'static str,
    level: Level,
    message: &'static str,
}

/// The CSIPSTR requirement table, indexed by requirement number minus one.
const REQUIREMENTS: [Requirement; 16] = [
    Requirement {
        id: "CSIPSTR1",
        level: Level::Must,
        message: "Any Information Package MUST be included within a single physical root \
                  folder (known as the \u{201c}Information Package root folder\u{201d}). For packages \
                  presented in an archive format, see CSIPSTR3, the archive MUST unpack to \
                  a single root folder.",
    },
    Requirement {
        id: "CSIPSTR2",
        level: Level::Should,
        message: "The Information Package root folder SHOULD be named with the ID or name \
                  of the Information Package, that is the value of the package METS.xml's \
                  root <mets> element's @OBJID attribute.",
    },
    Requirement {
        id: "CSIPSTR3",
        level: Level::May,
        message: "The Information Package root folder MAY be compressed (for example by \
                  using TAR or ZIP). Which specific compression format to use needs to be \
                  stated in the Submission Agreement.",
    },
    Requirement {
        id: "CSIPSTR4",
        level: Level::Must,
        message: "The Information Package root folder MUST include a file named METS.xml. \
                  This file MUST contain metadata that identifies the package, provides a \
                  high-level package description, and describes its structure, including \
                  pointers to constituent representations.",
    },
    Requirement {
        id: "CSIPSTR5",
        level: Level::Should,
        message: "The Information Package root folder SHOULD include a folder named \
                  metadata, which SHOULD include metadata relevant to the whole package.",
    },
    Requirement {
        id: "CSIPSTR6",
        level: Level::Should,
        message: "If preservation metadata are available, they SHOULD be included in \
                  sub-folder preservation.",
    },
    Requirement {
        id: "CSIPSTR7",
        level: Level::Should,
        message: "If descriptive metadata are available, they SHOULD be included in \
                  sub-folder descriptive.",
    },
    Requirement {
        id: "CSIPSTR8",
        level: Level::May,
        message: "If any other metadata are available, they MAY be included in separate \
                  sub-folders, for example an additional folder named other.",
    },
    Requirement {
        id: "CSIPSTR9",
        level: Level::Should,
        message: "The Information Package folder SHOULD include a folder named \
                  representations.",
    },
    Requirement {
        id: "CSIPSTR10",
        level: Level::Should,
        message: "The representations folder SHOULD include a sub-folder for each \
                  individual representation (i.e. the \u{201c}representation folder\u{201d}). Each \
                  representation folder should have a string name that is unique within \
                  the package scope.",
    },
    Requirement {
        id: "CSIPSTR11",
        level: Level::Should,
        message: "The representation folder SHOULD include a sub-folder named data which \
                  MAY include all data constituting the representation.",
    },
    Requirement {
        id: "CSIPSTR12",
        level: Level::Should,
        message: "The representation folder SHOULD include a metadata file named METS.xml \
                  which includes information about the identity and structure of the \
                  representation and its components.",
    },
    Requirement {
        id: "CSIPSTR13",
        level: Level::Should,
        message: "The representation folder SHOULD include a sub-folder named metadata \
                  which MAY include all metadata about the specific representation.",
    },
    Requirement {
        id: "CSIPSTR14",
        level: Level::May,
        message: "The Information Package MAY be extended with additional sub-folders.",
    },
    Requirement {
        id: "CSIPSTR15",
        level: Level::Should,
        message: "We recommend including all XML schema documents for any structured \
                  metadata within package. These schema documents SHOULD be placed in a \
                  sub-folder called schemas within the Information Package root folder \
                  and/or the representation folder.",
    },
    Requirement {
        id: "CSIPSTR16",
        level: Level::Should,
        message: "We recommend including any supplementary documentation for the package \
                  or a specific representation within the package. Supplementary \
                  documentation SHOULD be placed in a sub-folder called documentation \
                  within the Information Package root folder and/or the representation \
                  folder.",
    },
];

fn test_result_from_number(number: usize, location: &str) -> TestResult {
    let req = &REQUIREMENTS[number - 1];
    TestResult::new(req.id, location, req.message, req.level.severity())
}

/// Folder and file inventory of one directory (package root or one
/// representation), exposing the predicates the Schematron skip rules need.
#[derive(Debug, Clone, Default)]
pub struct StructTests {
    folders: BTreeSet<String>,
    files: BTreeSet<String>,
    md_folders: BTreeSet<String>,
}

impl StructTests {
    /// Scan the direct children of `dir_to_scan`.
    pub fn new(dir_to_scan: &Path) -> Self {
        let (folders, files) = folders_and_files(dir_to_scan);
        let md_folders = if folders.contains(META_DIR) {
            folders_and_files(&dir_to_scan.join(META_DIR)).0
        } else {
            BTreeSet::new()
        };
        Self {
            folders,
            files,
            md_folders,
        }
    }

    /// True when a `data` folder is present.
    pub fn has_data(&self) -> bool {
        self.folders.contains(DATA_DIR)
    }

    /// True when a `metadata/descriptive` folder is present.
    pub fn has_descriptive_md(&self) -> bool {
        self.md_folders.contains(DESC_DIR)
    }

    /// True when a `documentation` folder is present.
    pub fn has_documentation(&self) -> bool {
        self.folders.contains(DOCS_DIR)
    }

    /// True when a `METS.xml` file is present (case-insensitive).
    pub fn has_mets(&self) -> bool {
        self.files.iter().any(|f| f.eq_ignore_ascii_case(METS_NAME))
    }

    /// True when a `metadata` folder is present.
    pub fn has_metadata(&self) -> bool {
        self.folders.contains(META_DIR)
    }

    /// True when `metadata` holds subfolders beyond `preservation` and
    /// `descriptive`.
    pub fn has_other_md(&self) -> bool {
        self.md_folders
            .iter()
            .any(|f| f != PRES_DIR && f != DESC_DIR)
    }

    /// True when a `metadata/preservation` folder is present.
    pub fn has_preservation_md(&self) -> bool {
        self.md_folders.contains(PRES_DIR)
    }

    /// True when a `representations` folder is present.
    pub fn has_representations(&self) -> bool {
        self.folders.contains(REPS_DIR)
    }

    /// True when a `schemas` folder is present.
    pub fn has_schemas(&self) -> bool {
        self.folders.contains(SCHEMA_DIR)
    }
}

/// Structure map keyed `"root"` plus one entry per representation name.
pub type StructMap = BTreeMap<String, StructTests>;

/// The structural tests carried out over a whole package.
#[derive(Debug)]
pub struct PackageStructTests {
    name: String,
    struct_tests: StructTests,
    representations: BTreeMap<String, StructTests>,
    is_archive: bool,
}

impl PackageStructTests {
    /// Scan the package root and each folder below `representations/`.
    pub fn new(dir_to_scan: &Path, is_archive: bool) -> Self {
        let name = dir_to_scan
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut representations = BTreeMap::new();
        let reps = dir_to_scan.join(REPS_DIR);
        if reps.is_dir() {
            if let Ok(read) = fs::read_dir(&reps) {
                for entry in read.flatten() {
                    if entry.path().is_dir() {
                        representations.insert(
                            entry.file_name().to_string_lossy().into_owned(),
                            StructTests::new(&entry.path()),
                        );
                    }
                }
            }
        }
        Self {
            name,
            struct_tests: StructTests::new(dir_to_scan),
            representations,
            is_archive,
        }
    }

    /// The package name (root folder basename).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The representations found under `representations/`.
    pub fn get_representations(&self) -> Vec<Representation> {
        self.representations
            .keys()
            .map(|name| Representation { name: name.clone() })
            .collect()
    }

    /// Run every structural test and collect the findings.
    pub fn get_test_results(&self) -> StructResults {
        let mut results = self.root_results();
        results.extend(self.schema_results());
        results.extend(self.documentation_results());
        for (name, tests) in &self.representations {
            let location = format!("Representation {name}");
            if !tests.has_data() {
                results.push(test_result_from_number(11, &location));
            }
            if !tests.has_mets() {
                results.push(test_result_from_number(12, &location));
            }
            if !tests.has_metadata() {
                results.push(test_result_from_number(13, &location));
            }
        }
        StructResults::from_messages(results)
    }

    fn root_results(&self) -> Vec<TestResult> {
        let mut results = Vec::new();
        if !self.is_archive {
            results.push(test_result_from_number(3, &self.name));
        }
        if !self.struct_tests.has_mets() {
            results.push(test_result_from_number(4, &self.name));
        }
        if !self.struct_tests.has_metadata() {
            results.push(test_result_from_number(5, &self.name));
        } else {
            // The preservation/descriptive/other recommendations only apply
            // once a metadata folder exists at all.
            if !self.struct_tests.has_preservation_md() {
                results.push(test_result_from_number(6, &self.name));
            }
            if !self.struct_tests.has_descriptive_md() {
                results.push(test_result_from_number(7, &self.name));
            }
            if !self.struct_tests.has_other_md() {
                results.push(test_result_from_number(8, &self.name));
            }
        }
        if !self.struct_tests.has_representations() {
            results.push(test_result_from_number(9, &self.name));
        }
        results
    }

    /// CSIPSTR15 is satisfied by a schemas folder at the root or in any
    /// representation.
    fn schema_results(&self) -> Vec<TestResult> {
        let satisfied = self.struct_tests.has_schemas()
            || self.representations.values().any(StructTests::has_schemas);
        if satisfied {
            Vec::new()
        } else {
            vec![test_result_from_number(15, &self.name)]
        }
    }

    /// CSIPSTR16 is satisfied by a documentation folder at the root or in
    /// any representation.
    fn documentation_results(&self) -> Vec<TestResult> {
        let satisfied = self.struct_tests.has_documentation()
            || self
                .representations
                .values()
                .any(StructTests::has_documentation);
        if satisfied {
            Vec::new()
        } else {
            vec![test_result_from_number(16, &self.name)]
        }
    }

    /// Structure map handed to the Schematron skip rules.
    pub fn get_struct_map(&self) -> StructMap {
        let mut map = self.representations.clone();
        map.insert("root".into(), self.struct_tests.clone());
        map
    }
}

fn folders_and_files(dir_to_scan: &Path) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut folders = BTreeSet::new();
    let mut files = BTreeSet::new();
    if let Ok(read) = fs::read_dir(dir_to_scan) {
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if path.is_dir() {
                folders.insert(name);
            } else if path.is_file() {
                files.insert(name);
            }
        }
    }
    (folders, files)
}

/// Findings for an archive that unpacked to more than a single root.
pub fn multi_root_results(name: &str) -> StructResults {
    StructResults::from_messages(vec![test_result_from_number(1, name)])
}

/// Findings for an input path that does not exist or cannot be processed.
pub fn bad_path_results(path: &str) -> StructResults {
    StructResults::from_messages(vec![test_result_from_number(1, path)])
}

/// Check the folder structure below `to_validate`.
pub fn validate(to_validate: &Path, is_archive: bool) -> (bool, PackageStructTests) {
    let tests = PackageStructTests::new(to_validate, is_archive);
    let well_formed =
        tests.get_test_results().status == crate::model::StructStatus::WellFormed;
    (well_formed, tests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StructStatus;
    use std::fs::File;

    fn rule_ids(results: &StructResults) -> Vec<&str> {
        results.messages.iter().map(|m| m.rule_id.as_str()).collect()
    }

    fn warn_ids(results: &StructResults) -> Vec<&str> {
        results
            .messages
            .iter()
            .filter(|m| m.severity == Severity::Warn)
            .map(|m| m.rule_id.as_str())
            .collect()
    }

    /// Lay out the minimal well-formed package the other tests mutate.
    fn minimal_package(root: &Path) {
        fs::create_dir_all(root.join("metadata/preservation")).unwrap();
        fs::create_dir_all(root.join("metadata/descriptive")).unwrap();
        fs::create_dir_all(root.join("metadata/other")).unwrap();
        fs::create_dir_all(root.join("representations/rep1/data")).unwrap();
        fs::create_dir_all(root.join("schemas")).unwrap();
        fs::create_dir_all(root.join("documentation")).unwrap();
        File::create(root.join(METS_NAME)).unwrap();
    }

    #[test]
    fn minimal_package_warns_rep_mets_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        let (well_formed, tests) = validate(dir.path(), true);
        assert!(well_formed);
        let results = tests.get_test_results();
        assert_eq!(results.status, StructStatus::WellFormed);
        let warns = warn_ids(&results);
        assert_eq!(warns, ["CSIPSTR12", "CSIPSTR13"]);
    }

    #[test]
    fn missing_mets_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        fs::remove_file(dir.path().join(METS_NAME)).unwrap();
        let (well_formed, tests) = validate(dir.path(), true);
        assert!(!well_formed);
        let results = tests.get_test_results();
        assert_eq!(results.status, StructStatus::NotWellFormed);
        assert!(rule_ids(&results).contains(&"CSIPSTR4"));
    }

    #[test]
    fn mets_name_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        fs::rename(dir.path().join(METS_NAME), dir.path().join("mets.XML")).unwrap();
        let tests = StructTests::new(dir.path());
        assert!(tests.has_mets());
    }

    #[test]
    fn missing_metadata_emits_only_csipstr5() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        fs::remove_dir_all(dir.path().join("metadata")).unwrap();
        let (_, tests) = validate(dir.path(), true);
        let results = tests.get_test_results();
        let warns = warn_ids(&results);
        assert!(warns.contains(&"CSIPSTR5"));
        assert!(!warns.contains(&"CSIPSTR6"));
        assert!(!warns.contains(&"CSIPSTR7"));
    }

    #[test]
    fn metadata_without_subfolders_warns_preservation_and_descriptive() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        fs::remove_dir_all(dir.path().join("metadata")).unwrap();
        fs::create_dir_all(dir.path().join("metadata")).unwrap();
        let (_, tests) = validate(dir.path(), true);
        let results = tests.get_test_results();
        let warns = warn_ids(&results);
        assert!(warns.contains(&"CSIPSTR6"));
        assert!(warns.contains(&"CSIPSTR7"));
    }

    #[test]
    fn missing_representations_warns_csipstr9() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        fs::remove_dir_all(dir.path().join("representations")).unwrap();
        let (well_formed, tests) = validate(dir.path(), true);
        assert!(well_formed);
        let results = tests.get_test_results();
        let warns = warn_ids(&results);
        assert!(warns.contains(&"CSIPSTR9"));
        assert!(!warns.contains(&"CSIPSTR12"));
    }

    #[test]
    fn schemas_in_representation_satisfies_csipstr15() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        fs::remove_dir_all(dir.path().join("schemas")).unwrap();
        let (_, tests) = validate(dir.path(), true);
        assert!(rule_ids(&tests.get_test_results()).contains(&"CSIPSTR15"));

        fs::create_dir_all(dir.path().join("representations/rep1/schemas")).unwrap();
        let (_, tests) = validate(dir.path(), true);
        assert!(!rule_ids(&tests.get_test_results()).contains(&"CSIPSTR15"));
    }

    #[test]
    fn unarchived_input_reports_csipstr3_info() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        let (_, tests) = validate(dir.path(), false);
        let results = tests.get_test_results();
        let info = results
            .messages
            .iter()
            .find(|m| m.rule_id == "CSIPSTR3")
            .expect("CSIPSTR3 finding");
        assert_eq!(info.severity, Severity::Info);
        // informational findings never break well-formedness
        assert_eq!(results.status, StructStatus::WellFormed);
    }

    #[test]
    fn other_md_uses_set_difference() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("metadata/preservation")).unwrap();
        fs::create_dir_all(dir.path().join("metadata/descriptive")).unwrap();
        let tests = StructTests::new(dir.path());
        assert!(!tests.has_other_md());

        fs::create_dir_all(dir.path().join("metadata/rights")).unwrap();
        let tests = StructTests::new(dir.path());
        assert!(tests.has_other_md());
    }

    #[test]
    fn struct_map_keys_root_and_representations() {
        let dir = tempfile::tempdir().unwrap();
        minimal_package(dir.path());
        let (_, tests) = validate(dir.path(), true);
        let map = tests.get_struct_map();
        assert!(map.contains_key("root"));
        assert!(map.contains_key("rep1"));
        assert!(map["root"].has_schemas());
        assert!(map["rep1"].has_data());
    }

    #[test]
    fn bad_path_shortcut_is_notwellformed() {
        let results = bad_path_results("/no/such/path");
        assert_eq!(results.status, StructStatus::NotWellFormed);
        assert_eq!(rule_ids(&results), ["CSIPSTR1"]);
        let results = multi_root_results("two-roots.zip");
        assert_eq!(results.status, StructStatus::NotWellFormed);
    }
}
