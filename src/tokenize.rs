//! Text normalization shared by search tokens, duplicate keys and form input.

use std::collections::BTreeSet;

use unicode_normalization::UnicodeNormalization;

/// Trim, collapse inner whitespace runs to one space and apply NFC.
pub fn normalize_text(input: &str) -> String {
    let composed: String = input.nfc().collect();
    composed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-folded copy used for keys and tokens.
pub fn fold(input: &str) -> String {
    input.to_uppercase()
}

/// `normalize_text` then `fold`.
pub fn fold_normalized(input: &str) -> String {
    fold(&normalize_text(input))
}

/// Search tokens for a set of field values: joined, NFC, upper-cased, split
/// on whitespace. Empty fields contribute nothing.
pub fn tokenize<'a, I>(fields: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a str>,
{
    fields
        .into_iter()
        .flat_map(|field| {
            let folded = fold(&field.nfc().collect::<String>());
            folded
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Query tokens in the order typed. The first one drives the index lookup.
pub fn query_tokens(query: &str) -> Vec<String> {
    fold_normalized(query)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_text("  Dela   Cruz\t Jr. \n"), "Dela Cruz Jr.");
        assert_eq!(normalize_text("   "), "");
    }

    #[test]
    fn tokens_are_upper_and_deduplicated() {
        let tokens = tokenize(["Cruz", "juan  cruz", ""]);
        let expected: BTreeSet<String> =
            ["CRUZ", "JUAN"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn composed_and_decomposed_forms_agree() {
        // "Peñaflor" written with a combining tilde.
        let decomposed = "Pen\u{0303}aflor";
        let composed = "Pe\u{00f1}aflor";
        assert_eq!(tokenize([decomposed]), tokenize([composed]));
        assert_eq!(fold_normalized(decomposed), "PE\u{00d1}AFLOR");
    }

    #[test]
    fn query_tokens_keep_typed_order() {
        assert_eq!(query_tokens(" juan   cruz "), vec!["JUAN", "CRUZ"]);
        assert!(query_tokens("  ").is_empty());
    }

    proptest! {
        #[test]
        fn tokens_never_empty_or_spaced(fields in proptest::collection::vec(".{0,24}", 0..6)) {
            let tokens = tokenize(fields.iter().map(String::as_str));
            for token in &tokens {
                prop_assert!(!token.is_empty());
                prop_assert!(!token.chars().any(char::is_whitespace));
            }
        }

        #[test]
        fn tokenize_is_idempotent(fields in proptest::collection::vec("[a-zA-Z ñÑ]{0,16}", 0..5)) {
            let once = tokenize(fields.iter().map(String::as_str));
            let joined = once.iter().cloned().collect::<Vec<_>>().join(" ");
            prop_assert_eq!(tokenize([joined.as_str()]), once);
        }

        #[test]
        fn normalize_is_stable(input in ".{0,40}") {
            let once = normalize_text(&input);
            prop_assert_eq!(normalize_text(&once), once.clone());
        }
    }
}
