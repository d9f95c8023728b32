use std::cmp::Ordering;

use smol_str::SmolStr;
use unicode_casefold::UnicodeCaseFold;
use unicode_normalization::UnicodeNormalization;

/// The presentation form of a raw entry name: NFC-normalized.
pub fn display_form(name: &str) -> SmolStr {
    SmolStr::from_iter(name.nfc())
}

/// Case-folded form of a display name, for case-insensitive comparison.
pub fn case_fold(name: &str) -> SmolStr {
    SmolStr::from_iter(name.chars().case_fold())
}

/// An opaque, precomputed key for user-visible filename ordering.
///
/// Keys compare case-insensitively (NFKC + Unicode case fold) with digit runs
/// ordered numerically (`a2` sorts before `a10`). The raw name is folded into
/// the key as a final tiebreak, so two keys compare equal only for identical
/// names — a property the sorted file list relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollationKey {
    bytes: Vec<u8>,
}

impl PartialOrd for CollationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CollationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

// Byte tags inside the encoded key. NUMBER must sort below any character
// payload so that a digit run compares against text deterministically, and
// the terminator below both so a strict prefix sorts first.
const TAG_END: u8 = 0x00;
const TAG_NUMBER: u8 = 0x01;
const TAG_ESCAPE: u8 = 0x02;

/// Builds the collation key for one filename.
pub fn collation_key_for_filename(name: &str) -> CollationKey {
    let folded: String = name.nfkc().case_fold().collect();
    let mut bytes = Vec::with_capacity(folded.len() + name.len() + 8);

    let mut chars = folded.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            encode_number(&mut bytes, &digits);
        } else {
            chars.next();
            encode_char(&mut bytes, c);
        }
    }

    bytes.push(TAG_END);
    bytes.extend_from_slice(name.as_bytes());
    CollationKey { bytes }
}

fn encode_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    for &b in c.encode_utf8(&mut buf).as_bytes() {
        if b <= TAG_ESCAPE {
            out.push(TAG_ESCAPE);
        }
        out.push(b);
    }
}

fn encode_number(out: &mut Vec<u8>, digits: &str) {
    let significant = digits.trim_start_matches('0');
    let significant = if significant.is_empty() {
        "0"
    } else {
        significant
    };
    out.push(TAG_NUMBER);
    // Big-endian length prefix: a numerically smaller value is never longer
    // once leading zeros are stripped, so byte order equals numeric order.
    out.extend_from_slice(&(significant.len() as u32).to_be_bytes());
    out.extend_from_slice(significant.as_bytes());
}
