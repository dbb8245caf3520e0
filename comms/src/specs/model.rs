use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Names a model a slave can build and carries its parameters.
///
/// Parameters travel as json text so every codec can carry them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub kind: String,
    params: String,
}

impl ModelSpec {
    /// Creates a new `ModelSpec`.
    ///
    /// # Arguments
    /// * `kind` - The registry key of the model.
    /// * `params` - Any serializable parameter set.
    ///
    /// # Returns
    /// The spec or the json error if the parameters can't be serialized.
    pub fn new<P: Serialize>(kind: impl Into<String>, params: &P) -> serde_json::Result<Self> {
        Ok(Self {
            kind: kind.into(),
            params: serde_json::to_string(params)?,
        })
    }

    /// A spec without parameters.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: "null".into(),
        }
    }

    /// Reads the parameters back into `T`.
    pub fn params<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.params)
    }
}
