#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Graphics Error: {0}")]
    Graphics(String),

    #[error("Interoperability Unavailable: {0}")]
    InteropUnavailable(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Loader Error: {0}")]
    Loader(#[from] gausplat_loader::error::Error),

    #[error("Mismatched 3DGS polygon header: {0}")]
    MismatchedPolygonHeader3DGS(String),

    #[error("Model Directory Error: {0}")]
    ModelDirectory(String),

    #[error("Rasterizer Error: {0}")]
    Rasterizer(String),

    #[error("Readback Error: {0}")]
    Readback(String),

    #[error(
        "Truncated 3DGS polygon payload: expected {expected} points, but got {actual}"
    )]
    TruncatedPolygonPayload { expected: usize, actual: usize },

    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),
}
