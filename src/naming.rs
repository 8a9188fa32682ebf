//! Path-safe names for certificate files.
//!
//! Certificates land in archives and directories next to each other, so
//! every name built here is ASCII, lowercase where it comes from free text,
//! and free of path separators:
//!
//! - `Иванов Иван` → `ivanov-ivan`
//! - `Introduction to C++` → `introduction-to-c`
//! - `Café Société` → `cafe-societe`
//!
//! The full file name is
//! `CERT-{identifier}-{slug(course)}-{slug(person)}.{ext}`.

use crate::imaging::OutputFormat;

/// Maximum slug length in bytes (all slug output is ASCII).
const MAX_SLUG_LEN: usize = 80;

/// Placeholder for values that slug down to nothing.
const EMPTY_SLUG: &str = "untitled";

/// Latin replacement for one lowercase character, if it needs one.
///
/// Covers Russian, Ukrainian and Belarusian Cyrillic and the common Latin
/// letters with diacritics.
fn transliterate(c: char) -> Option<&'static str> {
    let out = match c {
        'а' => "a",
        'б' => "b",
        'в' => "v",
        'г' => "g",
        'ґ' => "g",
        'д' => "d",
        'е' | 'ё' | 'э' => "e",
        'є' => "ye",
        'ж' => "zh",
        'з' => "z",
        'и' | 'і' => "i",
        'ї' => "yi",
        'й' | 'ы' => "y",
        'к' => "k",
        'л' => "l",
        'м' => "m",
        'н' => "n",
        'о' => "o",
        'п' => "p",
        'р' => "r",
        'с' => "s",
        'т' => "t",
        'у' | 'ў' => "u",
        'ф' => "f",
        'х' => "kh",
        'ц' => "ts",
        'ч' => "ch",
        'ш' => "sh",
        'щ' => "shch",
        'ъ' | 'ь' => "",
        'ю' => "yu",
        'я' => "ya",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'č' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'ī' => "i",
        'ł' => "l",
        'ñ' | 'ń' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'œ' => "oe",
        'ř' => "r",
        'ś' | 'š' | 'ş' => "s",
        'ß' => "ss",
        'ť' | 'ţ' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(out)
}

/// Turn free text into a lowercase, dash-separated ASCII slug.
///
/// Runs of anything that is not a letter or digit become one dash, leading
/// and trailing dashes are stripped, and long slugs are cut at the last
/// dash before the limit. Returns `untitled` when nothing survives.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        let piece: Option<&str> = if c.is_ascii_alphanumeric() {
            None
        } else {
            match transliterate(c) {
                Some(latin) => Some(latin),
                None => {
                    pending_dash = true;
                    continue;
                }
            }
        };
        if pending_dash && !slug.is_empty() {
            slug.push('-');
        }
        pending_dash = false;
        match piece {
            Some(latin) => slug.push_str(latin),
            None => slug.push(c),
        }
    }

    let trimmed = slug.trim_matches('-');
    let cut = if trimmed.len() <= MAX_SLUG_LEN {
        trimmed
    } else {
        let truncated = &trimmed[..MAX_SLUG_LEN];
        match truncated.rfind('-') {
            Some(pos) => &truncated[..pos],
            None => truncated,
        }
    };

    if cut.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        cut.to_string()
    }
}

/// Clean an identifier prefix: ASCII letters, digits, `-` and `_` only.
///
/// Returns `None` when nothing usable is left.
pub fn sanitize_prefix(prefix: &str) -> Option<String> {
    let cleaned: String = prefix
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// File name of one rendered certificate.
pub fn certificate_filename(
    identifier: &str,
    course: &str,
    person: &str,
    format: OutputFormat,
) -> String {
    format!(
        "CERT-{}-{}-{}.{}",
        identifier,
        slugify(course),
        slugify(person),
        format.extension()
    )
}
