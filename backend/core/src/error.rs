use thiserror::Error;

/// Subtype tag for malformed model output.
///
/// A structurally valid envelope whose `action` is neither known value is
/// `UnknownAction`, not a parse or schema failure. `ValidationError` marks
/// envelopes whose structure is correct but whose values are semantically
/// unusable (e.g. an empty plugin id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolErrorKind {
    JsonParse,
    SchemaValidation,
    UnknownAction,
    ValidationError,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::JsonParse => "json_parse",
            Self::SchemaValidation => "schema_validation",
            Self::UnknownAction => "unknown_action",
            Self::ValidationError => "validation_error",
        };
        f.write_str(s)
    }
}

/// Failure category for an HTTP call to a live plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    Timeout,
    Connection,
    Http,
    BadResponse,
}

/// Top-level error type for the Famulus runtime.
///
/// Propagation policy: failures local to one plugin or one parse attempt are
/// contained at that layer. Only model-service unreachability surfaces as a
/// terminal failure to the caller.
#[derive(Debug, Error)]
pub enum FamulusError {
    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("plugin '{plugin}' blocked: missing permissions {missing:?}")]
    PermissionDenied { plugin: String, missing: Vec<String> },

    #[error("plugin '{plugin}' process error: {detail}")]
    Process { plugin: String, detail: String },

    #[error("protocol error ({kind}): {message}")]
    Protocol {
        kind: ProtocolErrorKind,
        message: String,
    },

    #[error("plugin '{plugin}' invocation failed ({kind:?}): {message}")]
    Invocation {
        plugin: String,
        kind: InvocationErrorKind,
        message: String,
    },

    #[error("model service error: {0}")]
    Model(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
