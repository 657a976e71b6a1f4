// ABOUTME: Utility functions for name normalization and content hashing
// ABOUTME: Provides filesystem-safe projections, collision keys and SHA-256 digests

use sha2::{Digest, Sha256};

/// Normalized form of a name, used to detect sibling collisions.
///
/// Case and punctuation insensitive. Falls back to a lowercased copy when the
/// slug would be empty (names made only of symbols).
pub fn collision_key(name: &str) -> String {
    let slugged = slug::slugify(name);
    if slugged.is_empty() {
        name.to_lowercase()
    } else {
        slugged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_key_basic() {
        assert_eq!(collision_key("Notes"), "notes");
        assert_eq!(collision_key("notes"), "notes");
        assert_eq!(collision_key("Goblin King"), "goblin-king");
    }

    #[test]
    fn test_collision_key_special_chars() {
        assert_eq!(collision_key("Föö Bär"), "foo-bar");
        assert_eq!(collision_key("!!!"), "!!!");
    }
}

/// Longest projected name, in bytes. Leaves room under the usual 255-byte
/// file name limit for a `-<short id>` suffix, a counter and `.org`.
pub const MAX_NAME_BYTES: usize = 200;

/// Cuts a name to at most `MAX_NAME_BYTES` on a char boundary.
pub fn clip_name(name: &str) -> &str {
    if name.len() <= MAX_NAME_BYTES {
        return name;
    }
    let mut boundary = MAX_NAME_BYTES;
    while !name.is_char_boundary(boundary) {
        boundary -= 1;
    }
    &name[..boundary]
}

/// Projects a display name onto a name that is safe as a single path component.
pub fn fs_safe_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = clip_name(replaced.trim_matches(|c: char| c.is_whitespace() || c == '.'))
        .trim_end_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        return "untitled".into();
    }

    if replaced.trim_start().starts_with('.') {
        // Hidden names would vanish from most listings.
        return format!("_{}", trimmed);
    }

    trimmed.to_string()
}

#[cfg(test)]
mod fs_safe_tests {
    use super::*;

    #[test]
    fn test_fs_safe_name_keeps_case_and_spaces() {
        assert_eq!(fs_safe_name("Goblin"), "Goblin");
        assert_eq!(fs_safe_name("Goblin King"), "Goblin King");
    }

    #[test]
    fn test_fs_safe_name_replaces_separators() {
        assert_eq!(fs_safe_name("Act 1/Scene 2"), "Act 1_Scene 2");
        assert_eq!(fs_safe_name("What? Why: *now*"), "What_ Why_ _now_");
    }

    #[test]
    fn test_fs_safe_name_degenerate() {
        assert_eq!(fs_safe_name(""), "untitled");
        assert_eq!(fs_safe_name(" .. "), "untitled");
        assert_eq!(fs_safe_name(".hidden"), "_hidden");
    }

    #[test]
    fn test_fs_safe_name_caps_long_names_on_char_boundary() {
        let long = "Ä".repeat(150);
        let projected = fs_safe_name(&long);
        assert_eq!(projected.len(), MAX_NAME_BYTES);
        assert!(projected.chars().all(|c| c == 'Ä'));

        let odd = format!("x{}", "é".repeat(150));
        let projected = fs_safe_name(&odd);
        assert!(projected.len() <= MAX_NAME_BYTES);
        assert_eq!(projected.len(), MAX_NAME_BYTES - 1);

        let spaced = format!("{} tail", "a".repeat(MAX_NAME_BYTES - 1));
        assert_eq!(fs_safe_name(&spaced), "a".repeat(MAX_NAME_BYTES - 1));
        assert_eq!(fs_safe_name("Goblin"), "Goblin");
    }
}

/// SHA-256 hex digest of a text body.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Truncates to at most `max_chars` bytes on a char boundary, appending "..." when cut.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        return s.to_string();
    }

    let mut boundary = max_chars;
    while boundary > 0 && !s.is_char_boundary(boundary) {
        boundary -= 1;
    }

    if boundary == 0 {
        return String::new();
    }

    format!("{}...", &s[..boundary])
}
