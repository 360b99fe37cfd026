//! Archive-safe file names.

use unicode_normalization::UnicodeNormalization;

/// Longest name, in characters, that [`sanitize_file_name`] returns.
pub const MAX_FILE_NAME_CHARS: usize = 255;

fn is_reserved(c: char) -> bool {
    matches!(c, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// NFC-normalize, collapse whitespace runs and reserved characters to `_`,
/// strip leading dots and cap the length at 255 characters.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_space = false;

    for c in name.nfc() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        out.push(if is_reserved(c) { '_' } else { c });
    }

    out.trim_start_matches('.')
        .chars()
        .take(MAX_FILE_NAME_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_and_reserved() {
        assert_eq!(sanitize_file_name("Col  du\tGalibier"), "Col_du_Galibier");
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn test_leading_dots_stripped() {
        assert_eq!(sanitize_file_name("..hidden.gpx"), "hidden.gpx");
        assert_eq!(sanitize_file_name("..."), "");
    }

    #[test]
    fn test_nfc_and_length() {
        // "e" + combining acute becomes a single code point.
        assert_eq!(sanitize_file_name("Cafe\u{301}"), "Caf\u{e9}");
        let long = "x".repeat(300);
        assert_eq!(sanitize_file_name(&long).chars().count(), 255);
    }

    #[test]
    fn test_slashes_dots_and_length_together() {
        let name = format!("..{}/{}.gpx", "a".repeat(150), "b".repeat(150));
        let sanitized = sanitize_file_name(&name);

        assert_eq!(sanitized, format!("{}_{}", "a".repeat(150), "b".repeat(104)));
        assert_eq!(sanitized.chars().count(), MAX_FILE_NAME_CHARS);
        assert!(!sanitized.starts_with('.'));
        assert!(!sanitized.contains('/'));
    }

    #[test]
    fn test_idempotent() {
        let once = sanitize_file_name(" .. Tour / Étape 3 ");
        assert_eq!(sanitize_file_name(&once), once);
    }
}
