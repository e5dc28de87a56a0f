//! Path, hashing and MIME helpers shared by every driver.

use sha2::{Digest, Sha256};

/// Hex SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// MIME type from the path's extension, `application/octet-stream` if unknown.
pub fn guess_mime(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// Strip leading slashes and collapse backslashes into `/`.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Last path segment.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Extension of the last segment without the dot. Dotfiles have none.
pub fn extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(&name[idx + 1..]),
    }
}

/// Everything before the last segment, without a trailing slash. Empty at the root.
pub fn directory(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}

/// `dir` + `/` + `name`, tolerating an empty `dir`.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Insert `prefix` in front of the file name: `a/b.txt` + `thumb_` -> `a/thumb_b.txt`.
pub fn prepend(path: &str, prefix: &str) -> String {
    join(directory(path), &format!("{}{}", prefix, file_name(path)))
}

/// Insert `suffix` before the extension: `a/b.txt` + `@2x` -> `a/b@2x.txt`.
pub fn append(path: &str, suffix: &str) -> String {
    let name = file_name(path);
    let renamed = match extension(path) {
        Some(ext) => {
            let stem = &name[..name.len() - ext.len() - 1];
            format!("{}{}.{}", stem, suffix, ext)
        }
        None => format!("{}{}", name, suffix),
    };
    join(directory(path), &renamed)
}

/// Join a URL base and a key with exactly one slash.
pub fn join_url(base: &str, key: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    )
}

/// Directory prefix form used for listing: empty, or ending with `/`.
pub fn dir_prefix(dir: &str) -> String {
    let dir = normalize(dir);
    if dir.is_empty() || dir.ends_with('/') {
        dir
    } else {
        format!("{}/", dir)
    }
}
