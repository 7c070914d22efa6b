//! Byte-pattern signatures with wildcards, and the exact-count gate that
//! decides whether a patch built against them may be applied at all.

use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PatByte {
    Byte(u8),
    Any,
}

/// A code signature: fixed byte values interleaved with single-byte wildcards.
#[derive(Clone, Debug)]
pub struct Pattern(Vec<PatByte>);

/// The live binary had a different number of signature matches than the
/// signature was authored against. The corresponding patch must be skipped;
/// splicing at a wrong offset would execute garbage as code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VersionMismatch {
    pub expected: usize,
    pub found: usize,
}

impl fmt::Display for VersionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected {} signature matches, found {}", self.expected, self.found)
    }
}

impl Pattern {
    /// Parses a signature from IDA-style text, e.g. `"41 B8 ? ? E8"`.
    ///
    /// Signatures are compile-time literals, so malformed input is a bug in
    /// this crate and panics.
    pub fn parse(text: &str) -> Pattern {
        let bytes = text
            .split_whitespace()
            .map(|tok| match tok {
                "?" | "??" => PatByte::Any,
                _ => match u8::from_str_radix(tok, 16) {
                    Ok(val) if tok.len() <= 2 => PatByte::Byte(val),
                    _ => panic!("Invalid signature token {:?}", tok),
                },
            })
            .collect::<Vec<_>>();
        assert!(!bytes.is_empty(), "Empty signature");
        Pattern(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn matches_at(&self, window: &[u8]) -> bool {
        self.0.iter().zip(window).all(|(pat, &byte)| match *pat {
            PatByte::Byte(expected) => byte == expected,
            PatByte::Any => true,
        })
    }

    /// Returns the offset of every match in `haystack`, in order.
    pub fn scan(&self, haystack: &[u8]) -> Vec<usize> {
        if haystack.len() < self.0.len() {
            return Vec::new();
        }
        let mut result = Vec::new();
        for offset in 0..=haystack.len() - self.0.len() {
            if self.matches_at(&haystack[offset..]) {
                result.push(offset);
            }
        }
        result
    }

    /// The gate: yields the matches only when their count is exactly
    /// `expected`. Any other count means the binary differs from the build
    /// this signature was authored against, and the caller skips its patch.
    pub fn require(
        &self,
        haystack: &[u8],
        expected: usize,
    ) -> Result<Vec<usize>, VersionMismatch> {
        let matches = self.scan(haystack);
        if matches.len() == expected {
            Ok(matches)
        } else {
            let err = VersionMismatch {
                expected,
                found: matches.len(),
            };
            warn!("Skipping patch, {}", err);
            Err(err)
        }
    }
}
