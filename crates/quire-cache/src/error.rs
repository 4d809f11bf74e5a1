pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by cache management and persistence.
///
/// `DiskCache::fetch` never surfaces these; they are only returned by the
/// maintenance entry points (`reset`, construction) and the low-level helpers.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {message}")]
    Json { message: String },
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        // Only keep the category and location. Metadata documents are small and
        // the raw parser message can echo arbitrary bytes from a corrupted file.
        let category = match err.classify() {
            serde_json::error::Category::Io => "io",
            serde_json::error::Category::Syntax => "syntax",
            serde_json::error::Category::Data => "data",
            serde_json::error::Category::Eof => "eof",
        };
        Self::Json {
            message: format!(
                "{category} error at line {} column {}",
                err.line(),
                err.column()
            ),
        }
    }
}
