//! Plate text normalization.
//!
//! Raw OCR strings are noisy: extra characters around the plate, look-alike
//! glyphs, and partial reads. These helpers turn one raw string into the set of
//! plausible plates and collapse near-duplicate readings.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

pub const MIN_PLATE_LENGTH: usize = 3;
pub const MAX_PLATE_LENGTH: usize = 6;

/// Plate grammar: one leading letter (D, P, Q, W and accented letters are never
/// issued as the first letter), 1-2 further letters, then 1-3 digits without a
/// leading zero.
fn plate_pattern() -> &'static Regex {
    static PLATE_RE: OnceLock<Regex> = OnceLock::new();
    PLATE_RE.get_or_init(|| Regex::new(r"^[A-CE-OR-VXYZ][A-ZÄÖ]{1,2}[1-9][0-9]{0,2}$").unwrap())
}

/// Fix look-alike glyphs: past the third character `I` becomes `1`; within the
/// first three characters `0` becomes `O` and `5` becomes `S`.
///
/// Strings of three characters or fewer are returned unchanged.
pub fn alternate_representation(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= 3 {
        return text.to_string();
    }
    chars
        .iter()
        .enumerate()
        .map(|(i, c)| match (i < 3, *c) {
            (true, '0') => 'O',
            (true, '5') => 'S',
            (false, 'I') => '1',
            (_, c) => c,
        })
        .collect()
}

/// Every distinct valid plate found as a 3-6 character window of `text` or of its
/// alternate representation, longest first (ties in lexical order).
pub fn valid_plates(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let re = plate_pattern();
    let mut found = BTreeSet::new();

    for attempt in [text.to_string(), alternate_representation(text)] {
        let chars: Vec<char> = attempt.chars().collect();
        for len in MIN_PLATE_LENGTH..=MAX_PLATE_LENGTH {
            if len > chars.len() {
                break;
            }
            for window in chars.windows(len) {
                let candidate: String = window.iter().collect::<String>().to_uppercase();
                if re.is_match(&candidate) {
                    found.insert(candidate);
                }
            }
        }
    }

    let mut plates: Vec<String> = found.into_iter().collect();
    plates.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    plates
}

/// Replace ASCII letters with `A` and digits with `1`, for logs.
pub fn obfuscate_plate(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphabetic() {
                'A'
            } else if c.is_ascii_digit() {
                '1'
            } else {
                c
            }
        })
        .collect()
}

/// Character-level Levenshtein distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Whether `text` starts with an alphabetic character. Unknown-vehicle
/// identifiers start with `[` and are never merged by edit distance.
pub fn is_alpha_leading(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_alphabetic)
}

/// Whether `candidate` is absorbed by the already-known `existing` text.
pub(crate) fn within_one_edit(candidate: &str, existing: &str) -> bool {
    is_alpha_leading(existing) && levenshtein(candidate, existing) <= 1
}

/// Drop candidates one edit away from a longer kept candidate or from a prior
/// text. Candidates are processed longest first; order among equal lengths is kept.
pub fn deduplicate_by_edit_distance<S: AsRef<str>>(candidates: &[S], prior: &[S]) -> Vec<String> {
    let mut ordered: Vec<&str> = candidates.iter().map(AsRef::as_ref).collect();
    ordered.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

    let mut kept: Vec<String> = Vec::new();
    for candidate in ordered {
        let absorbed = kept
            .iter()
            .map(String::as_str)
            .chain(prior.iter().map(AsRef::as_ref))
            .any(|existing| within_one_edit(candidate, existing));
        if !absorbed {
            kept.push(candidate.to_string());
        }
    }
    kept
}
