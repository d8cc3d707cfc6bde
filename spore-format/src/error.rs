use derive_more::Display;

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum SporeDataError {
    #[display(fmt = "data needs at least {} bytes, got {}", expected, actual)]
    HeaderIsBroken { expected: usize, actual: usize },

    #[display(fmt = "declared size {} does not match {} actual bytes", declared, actual)]
    TotalSizeNotMatch { declared: usize, actual: usize },

    #[display(fmt = "table has {} fields, expected {}", actual, expected)]
    FieldCountNotMatch { expected: usize, actual: usize },

    #[display(fmt = "field offsets are broken")]
    OffsetsNotMatch,

    #[display(fmt = "invalid content type: {}", _0)]
    InvalidContentType(String),

    #[display(fmt = "cluster id must be 32 bytes, got {}", _0)]
    InvalidClusterId(usize),
}

impl std::error::Error for SporeDataError {}
