//! Case repository: loading cases from an on-disk bundle
//!
//! A bundle is a directory holding a `test_index` file with one case name
//! per line (blank lines and `#` comments skipped) and, per case:
//! - `<name>.wasm` (binary) or `<name>.wat` (text) main content, required
//! - `<name>.result` one-line result descriptor, required
//! - `<name>.init` initializer payload, optional
//! - `<name>.opts` options, optional

use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::cases::{CaseOptions, CaseSource, ExpectedResult, TestCase};
use crate::HarnessError;

pub const INDEX_FILE: &str = "test_index";

/// Loads named cases from bundles under a root directory
#[derive(Debug, Clone)]
pub struct CaseRepository {
    root: PathBuf,
}

impl CaseRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a bundle
    pub fn bundle_dir(&self, bundle: &str) -> PathBuf {
        self.root.join(bundle)
    }

    /// Case names listed in a bundle's index, in index order
    pub fn case_names(&self, bundle: &str) -> Result<Vec<String>, HarnessError> {
        let index_path = self.bundle_dir(bundle).join(INDEX_FILE);
        let index = fs::read_to_string(&index_path).map_err(|e| {
            HarnessError::Load(format!("Could not read {}: {}", index_path.display(), e))
        })?;

        Ok(index
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Load every case of a bundle
    pub fn load_bundle(&self, bundle: &str) -> Result<Vec<TestCase>, HarnessError> {
        let names = self.case_names(bundle)?;
        debug!("Bundle {} lists {} cases", bundle, names.len());

        names.iter().map(|name| self.load_case(bundle, name)).collect()
    }

    /// Load one case, or `None` if the index does not list it
    pub fn find_case(&self, bundle: &str, name: &str) -> Result<Option<TestCase>, HarnessError> {
        if !self.case_names(bundle)?.iter().any(|listed| listed == name) {
            return Ok(None);
        }
        self.load_case(bundle, name).map(Some)
    }

    /// Load a single case by name
    pub fn load_case(&self, bundle: &str, name: &str) -> Result<TestCase, HarnessError> {
        let dir = self.bundle_dir(bundle);

        let source = Self::read_source(&dir, name)?;
        let result = Self::read_text(&dir, &format!("{}.result", name))?.ok_or_else(|| {
            HarnessError::Load(format!("Missing result descriptor for {}/{}", bundle, name))
        })?;
        let initializer = Self::read_text(&dir, &format!("{}.init", name))?
            .filter(|content| !content.trim().is_empty());
        let options = match Self::read_text(&dir, &format!("{}.opts", name))? {
            Some(content) => CaseOptions::parse(&content).map_err(|e| {
                HarnessError::Parse(format!("Options of {}/{}: {}", bundle, name, e))
            })?,
            None => CaseOptions::default(),
        };

        let expected: ExpectedResult = result
            .parse()
            .map_err(|e| HarnessError::Parse(format!("Result of {}/{}: {}", bundle, name, e)))?;

        let mut case = TestCase::new(name, expected, source).with_options(options);
        case.initializer = initializer;
        Ok(case)
    }

    fn read_source(dir: &Path, name: &str) -> Result<CaseSource, HarnessError> {
        let binary_path = dir.join(format!("{}.wasm", name));
        match fs::read(&binary_path) {
            Ok(bytes) => return Ok(CaseSource::Binary(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HarnessError::Load(format!(
                    "Could not read {}: {}",
                    binary_path.display(),
                    e
                )))
            }
        }

        match Self::read_text(dir, &format!("{}.wat", name))? {
            Some(text) => Ok(CaseSource::Text(text)),
            None => Err(HarnessError::Load(format!(
                "No main content for {} in {}",
                name,
                dir.display()
            ))),
        }
    }

    /// Read an optional text resource
    fn read_text(dir: &Path, file_name: &str) -> Result<Option<String>, HarnessError> {
        let path = dir.join(file_name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HarnessError::Load(format!("Could not read {}: {}", path.display(), e))),
        }
    }
}
