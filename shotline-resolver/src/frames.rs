//! Frame tokens and sequence patterns.
//!
//! `PROJ_SH010_COMP_vfx.###.exr` (hash form) and `PROJ_SH010_COMP_vfx.%03d.exr`
//! (printf form) name the same sequence; [`parse_frame`] inverts both.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencePattern {
    /// Everything before the frame token, including the trailing dot.
    pub prefix: String,
    /// Everything after the frame token, including the leading dot.
    pub suffix: String,
    pub digits: usize,
}

impl SequencePattern {
    pub fn new(base: &str, extension: &str, digits: usize) -> Self {
        Self {
            prefix: format!("{base}."),
            suffix: format!(".{extension}"),
            digits: digits.max(1),
        }
    }

    /// `name.###.exr`
    pub fn hash_form(&self) -> String {
        format!("{}{}{}", self.prefix, "#".repeat(self.digits), self.suffix)
    }

    /// `name.%03d.exr`
    pub fn printf_form(&self) -> String {
        format!("{}%0{}d{}", self.prefix, self.digits, self.suffix)
    }

    /// `name.007.exr`
    pub fn file_name(&self, frame: i64) -> String {
        format!("{}{}{}", self.prefix, frame_token(frame, self.digits), self.suffix)
    }
}

/// Zero-padded frame number; the sign does not count towards the width.
pub fn frame_token(frame: i64, digits: usize) -> String {
    if frame < 0 {
        format!("-{:0width$}", frame.unsigned_abs(), width = digits)
    } else {
        format!("{:0width$}", frame, width = digits)
    }
}

/// Frame number of `file_name` if it belongs to `pattern`.
///
/// Accepts frame tokens at least `digits` wide, so frames that outgrew the
/// padding still parse.
pub fn parse_frame(file_name: &str, pattern: &SequencePattern) -> Option<i64> {
    let token = file_name
        .strip_prefix(pattern.prefix.as_str())?
        .strip_suffix(pattern.suffix.as_str())?;
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if digits.len() < pattern.digits || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pattern(digits: usize) -> SequencePattern {
        SequencePattern::new("PROJ_SH010_COMP_vfx", "exr", digits)
    }

    #[test]
    fn forms() {
        let p = pattern(3);
        assert_eq!(p.hash_form(), "PROJ_SH010_COMP_vfx.###.exr");
        assert_eq!(p.printf_form(), "PROJ_SH010_COMP_vfx.%03d.exr");
        assert_eq!(p.file_name(7), "PROJ_SH010_COMP_vfx.007.exr");
    }

    #[rstest]
    #[case(1, 3, "001")]
    #[case(120, 3, "120")]
    #[case(1001, 3, "1001")]
    #[case(42, 5, "00042")]
    #[case(-5, 3, "-005")]
    fn tokens(#[case] frame: i64, #[case] digits: usize, #[case] expected: &str) {
        assert_eq!(frame_token(frame, digits), expected);
    }

    #[rstest]
    #[case("PROJ_SH010_COMP_vfx.001.exr", Some(1))]
    #[case("PROJ_SH010_COMP_vfx.1200.exr", Some(1200))]
    #[case("PROJ_SH010_COMP_vfx.-003.exr", Some(-3))]
    #[case("PROJ_SH010_COMP_vfx.01.exr", None)]
    #[case("PROJ_SH010_COMP_vfx.0a1.exr", None)]
    #[case("PROJ_SH010_COMP_vfx.001.exr.tmp", None)]
    #[case("OTHER_SH010_COMP_vfx.001.exr", None)]
    fn parse(#[case] name: &str, #[case] expected: Option<i64>) {
        assert_eq!(parse_frame(name, &pattern(3)), expected);
    }

    #[test]
    fn zero_digits_is_clamped() {
        assert_eq!(SequencePattern::new("a", "exr", 0).digits, 1);
    }
}
