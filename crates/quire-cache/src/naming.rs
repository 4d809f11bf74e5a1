use crate::fingerprint::Fingerprint;

/// Maximum length of the human-readable part of an entry name.
pub const SAFE_NAME_PREFIX_LEN: usize = 48;

/// Number of hex characters of `sha256(key)` appended to every entry name.
pub const SAFE_NAME_DIGEST_LEN: usize = 16;

/// Map a logical cache key to a file-system safe stem.
///
/// The stem is `<prefix>-<digest>` where `prefix` keeps ASCII alphanumerics and
/// `-` from the key (everything else becomes `-`, runs are collapsed) and
/// `digest` is derived from the full, unmodified key. Two keys that sanitize to
/// the same prefix still get distinct stems.
pub fn safe_name(key: &str) -> String {
    let mut prefix = String::with_capacity(key.len().min(SAFE_NAME_PREFIX_LEN));
    let mut last_dash = true;
    for ch in key.chars() {
        if prefix.len() >= SAFE_NAME_PREFIX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            prefix.push(ch);
            last_dash = false;
        } else if !last_dash {
            prefix.push('-');
            last_dash = true;
        }
    }
    while prefix.ends_with('-') {
        prefix.pop();
    }
    if prefix.is_empty() {
        prefix.push_str("entry");
    }

    let digest = Fingerprint::from_bytes(key.as_bytes());
    format!("{prefix}-{}", digest.prefix(SAFE_NAME_DIGEST_LEN))
}
