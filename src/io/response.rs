//! Read/write response model JSON files.
//!
//! The file schema is `models::ResponseDescription`; validation (conjugate
//! pairing, finite values) runs while deserializing.

use std::fs::File;
use std::path::Path;

use crate::error::CalError;
use crate::models::TransferFunctionModel;

pub fn read_response_json(path: &Path) -> Result<TransferFunctionModel, CalError> {
    let file = File::open(path)
        .map_err(|e| CalError::io(format!("Failed to open response JSON '{}'", path.display()), e))?;
    let model: TransferFunctionModel = serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| CalError::InvalidModel(format!("'{}': {e}", path.display())))?;
    Ok(model)
}

pub fn write_response_json(path: &Path, model: &TransferFunctionModel) -> Result<(), CalError> {
    super::write_json(path, model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpaired_conjugate_in_file_is_invalid_model() {
        let path = std::env::temp_dir().join(format!("scal-bad-response-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"gain": 1.0, "normalization_freq": 1.0, "poles": [[-1.0, 2.0], [-3.0, 0.0]]}"#,
        )
        .unwrap();
        let err = read_response_json(&path).unwrap_err();
        assert!(matches!(err, CalError::InvalidModel(_)), "{err}");
        std::fs::remove_file(&path).unwrap();
    }
}
