use thiserror::Error;

use crate::config::ConfigError;

/// Failure taxonomy for the oracle pipeline.
///
/// Backend crashes and timeouts are deliberately absent: they are expected,
/// interesting outcomes recorded per backend and folded into the error
/// signature. Everything here is a failure of the oracle run itself.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("shader `{path}` not found")]
    MissingInput { path: String },

    #[error("reconditioning failed for `{path}`: {detail}")]
    ReconditioningFailed { path: String, detail: String },

    #[error("generator failed: {detail}")]
    GeneratorFailed { detail: String },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context} `{path}`: {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot map recorded outcomes onto configured backends: {detail}")]
    SignatureEncoding { detail: String },

    #[error("reducer `{reducer}` exited without producing `{output_file}`")]
    ReducerNoOutput {
        reducer: String,
        output_file: String,
    },
}

impl OracleError {
    pub(crate) fn io(context: &'static str, path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}
