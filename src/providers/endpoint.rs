/// Build the full request URL for `path` on a provider rooted at `base_url`.
///
/// Users often paste base URLs that already end in a version segment
/// (`https://api.x.com/v1`). When the path starts with that same segment it is
/// dropped so the version never appears twice. Slashes at the seam are
/// normalized, so `resolve("https://api.x.com/v1/", "v1/chat/completions")`
/// and `resolve("https://api.x.com/v1", "/chat/completions")` agree.
pub fn resolve(base_url: &str, path: &str) -> String {
    let base = base_url.trim().strip_suffix('/').unwrap_or(base_url.trim());
    let mut path = path.strip_prefix('/').unwrap_or(path);

    if let Some(version) = base.rsplit('/').next().filter(|s| is_version_segment(s)) {
        if let Some(rest) = path.strip_prefix(version) {
            if rest.is_empty() {
                path = rest;
            } else if let Some(rest) = rest.strip_prefix('/') {
                path = rest;
            }
        }
    }

    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// `v1`, `v2`, `v1beta`, `v3alpha` ...
fn is_version_segment(segment: &str) -> bool {
    let Some(rest) = segment.strip_prefix('v') else {
        return false;
    };
    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && rest[digits..].chars().all(|c| c.is_ascii_alphabetic())
}
