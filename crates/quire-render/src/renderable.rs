use crate::FingerprintInputs;

/// A document that can be fingerprinted and rendered to HTML.
///
/// Implementations own the domain aggregation. They are expected to load
/// related records at most once per value, since both methods below may walk
/// the same associations during one render call.
pub trait Renderable {
    /// Logical cache key, stable across content changes (e.g. `composite-report:42`).
    fn cache_key(&self) -> String;

    /// Short human-readable description used in failure logs.
    fn describe(&self) -> String {
        self.cache_key()
    }

    fn fingerprint_inputs(&self) -> anyhow::Result<FingerprintInputs>;

    fn render_html(&self) -> anyhow::Result<String>;
}
