//! Key-path derivation: every range's start number maps to a blob path in
//! the replicated tree, grouped into 3-digit segments so no directory ever
//! holds more than 1000 entries.

/// Derive the repository path for a range keyed by `number` (its digits,
/// without the leading `+`). Groups are 3 digits wide, left to right; the
/// final group may be shorter than 3 digits. When the digit count divides
/// evenly into groups of 3, a trailing `/this` component is appended so the
/// range's own blob never collides with the directory holding its longer
/// extensions (e.g. `123456` from `123/456/7...`).
pub fn make_repo_path(number: &str) -> String {
    let has_this = !number.is_empty() && number.len() % 3 == 0;
    let mut groups: Vec<&str> = number
        .as_bytes()
        .chunks(3)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect();
    if has_this {
        groups.push("this");
    }
    return groups.join("/");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_a_non_multiple_of_three_without_padding() {
        assert_eq!(make_repo_path("1234567"), "123/456/7");
    }

    #[test]
    fn appends_this_for_exact_multiple_of_three() {
        assert_eq!(make_repo_path("123456"), "123/456/this");
    }

    #[test]
    fn short_number_forms_a_single_group() {
        assert_eq!(make_repo_path("48"), "48");
    }

    #[test]
    fn distinct_numbers_never_collide() {
        assert_ne!(make_repo_path("123"), make_repo_path("123456"));
    }

    #[test]
    fn short_prefix_does_not_collide_with_directory_of_longer_extension() {
        // Without the '/this' suffix, '123' would sit at the same path as
        // the directory holding '123456'’s blob.
        assert_eq!(make_repo_path("123"), "123/this");
    }
}
