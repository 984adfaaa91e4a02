//! Named instrument responses.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::CalError;
use crate::models::TransferFunctionModel;

#[derive(Debug, Clone, Default)]
pub struct ResponseCatalog {
    models: BTreeMap<String, Arc<TransferFunctionModel>>,
}

impl ResponseCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` response in `dir`, keyed by file stem.
    pub fn from_dir(dir: &Path) -> Result<Self, CalError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CalError::io(format!("Failed to read response directory '{}'", dir.display()), e))?;

        let mut catalog = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CalError::io(format!("Failed to list '{}'", dir.display()), e))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let model = crate::io::read_response_json(&path)?;
            catalog.register(stem, model);
        }
        tracing::debug!(count = catalog.len(), dir = %dir.display(), "loaded response catalog");
        Ok(catalog)
    }

    pub fn register(&mut self, name: impl Into<String>, model: TransferFunctionModel) {
        self.models.insert(name.into(), Arc::new(model));
    }

    pub fn load_by_name(&self, name: &str) -> Result<Arc<TransferFunctionModel>, CalError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| CalError::UnknownResponseName(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LaplaceUnit;

    #[test]
    fn lookup_by_name() {
        let mut catalog = ResponseCatalog::new();
        let model = TransferFunctionModel::new(2.0, vec![], vec![], 1.0, LaplaceUnit::Hertz).unwrap();
        catalog.register("STS-2", model.clone());

        assert_eq!(*catalog.load_by_name("STS-2").unwrap(), model);
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["STS-2"]);
        assert!(matches!(
            catalog.load_by_name("missing"),
            Err(CalError::UnknownResponseName(name)) if name == "missing"
        ));
    }

    #[test]
    fn loads_json_directory() {
        let dir = std::env::temp_dir().join(format!("scal-catalog-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let model = TransferFunctionModel::new(
            1500.0,
            vec![num_complex::Complex64::new(0.0, 0.0)],
            vec![num_complex::Complex64::new(-1.0, 0.0)],
            1.0,
            LaplaceUnit::Radians,
        )
        .unwrap();
        crate::io::write_response_json(&dir.join("demo.json"), &model).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let catalog = ResponseCatalog::from_dir(&dir).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.load_by_name("demo").unwrap().gain(), 1500.0);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
