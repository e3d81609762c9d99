//! Identifier generation
//!
//! All IDs use the format: `{6-char-hex}-{kind}-{slug}`
//! Example: `019430-task-write-hello`

/// Generate an ID from kind and title
pub fn generate_id(kind: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7();
    let hex_prefix = &uuid.to_string()[..6];
    let slug = slugify(title);
    format!("{}-{}-{}", hex_prefix, kind, slug)
}

/// Slugify a title for use in IDs
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        // Strip apostrophes entirely, replace other non-alphanumeric with hyphens
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id("task", "Write Hello World File");
        assert!(id.len() > 10);
        assert!(id.contains("-task-"));
        assert!(id.contains("write-hello-world-file"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Add OAuth!"), "add-oauth");
        assert_eq!(slugify("Multiple   Spaces"), "multiple-spaces");
        assert_eq!(slugify("don't stop"), "dont-stop");
    }

    #[test]
    fn test_slugify_truncates_long_titles() {
        let slug = slugify("one two three four five six seven eight");
        assert_eq!(slug, "one-two-three-four-five-six");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = generate_id("task", "same title");
        let b = generate_id("task", "same title");
        assert_ne!(a, b);
    }
}
