//! Namespace naming for challenge instances

use sha2::{Digest, Sha256};

/// Maximum length of a Kubernetes namespace (DNS-1123 label)
pub const MAX_NAME_LENGTH: usize = 63;

/// Number of hex characters of the challenge id digest kept in the namespace
pub const CHALLENGE_SLICE_LEN: usize = 8;

const EMPTY_USER: &str = "anon";

/// Generate the namespace of the instance a user gets for a challenge.
///
/// The result is `<prefix>-<user>-<challenge slice>`, where the user part is the
/// lower-cased username with everything outside `[a-z0-9-]` replaced by `-` and the
/// challenge slice is the leading hex of the SHA-256 of the challenge id, so ids sharing
/// a prefix still land in different namespaces. When the whole name would exceed 63
/// characters the user part is shortened, never the slice.
pub fn namespace_name(prefix: &str, username: &str, challenge_id: &str) -> String {
    let user = sanitize(username);
    let slice = challenge_slice(challenge_id);

    // two separators
    let budget = MAX_NAME_LENGTH.saturating_sub(prefix.len() + slice.len() + 2);
    let user = user[..user.len().min(budget)].trim_end_matches('-');
    let user = if user.is_empty() { EMPTY_USER } else { user };

    let name = if slice.is_empty() {
        format!("{prefix}-{user}")
    } else {
        format!("{prefix}-{user}-{slice}")
    };

    let mut name: String = name.chars().take(MAX_NAME_LENGTH).collect();
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Stable digest slice of a challenge id, empty for a blank id
pub fn challenge_slice(challenge_id: &str) -> String {
    let id = challenge_id.trim();
    if id.is_empty() {
        return String::new();
    }
    let mut digest = hex::encode(Sha256::digest(id.as_bytes()));
    digest.truncate(CHALLENGE_SLICE_LEN);
    digest
}

fn sanitize(username: &str) -> String {
    username
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
