use serde_json::Map;
use serde_json::Value;
use tracing::trace;

use crate::PatchError;
use crate::Result;

/// Rebuilds a document from a sequence of JSON Patch frames, starting from
/// an empty object
#[derive(Debug)]
pub(crate) struct DocumentReconstructor {
    document: String,
    current: Value,
}

impl DocumentReconstructor {
    pub(crate) fn new(document: &str) -> Self {
        Self {
            document: document.to_string(),
            current: Value::Object(Map::new()),
        }
    }

    /// Applies one frame body and returns the updated document
    pub(crate) fn apply(
        &mut self,
        body: &str,
    ) -> Result<Value> {
        let operations: Vec<json_patch::PatchOperation> =
            serde_json::from_str(body).map_err(|e| PatchError::InvalidBody {
                document: self.document.clone(),
                message: e.to_string(),
            })?;

        json_patch::patch(&mut self.current, &operations).map_err(|e| PatchError::ApplyFailed {
            document: self.document.clone(),
            message: e.to_string(),
        })?;

        trace!(document = %self.document, operations = operations.len(), "Patch applied");
        Ok(self.current.clone())
    }
}
