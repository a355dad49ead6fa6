//! String parsing for the magnitudes that appear in a problem file:
//! bandwidth (`"5.5Mbps"`), latency (`"2ms"`), and size (`"10MB"`).
//!
//! All three grammars share a numeric prefix and an SI-binary scale letter
//! (factor 1024 per step, not 1000).

use crate::error::{Error, Result};

const SCALE_LETTERS: &[(char, f64)] = &[
    ('k', 1024.0),
    ('m', 1024.0 * 1024.0),
    ('g', 1024.0 * 1024.0 * 1024.0),
    ('t', 1024.0f64.powi(4)),
    ('p', 1024.0f64.powi(5)),
    ('e', 1024.0f64.powi(6)),
    ('z', 1024.0f64.powi(7)),
);

fn split_numeric_prefix(s: &str) -> Option<(f64, &str)> {
    let end = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+'))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let num: f64 = s[..end].parse().ok()?;
    Some((num, &s[end..]))
}

/// Parse a bandwidth string such as `"5.5Mbps"` or `"800Bps"` into bytes/sec.
/// A bare number is interpreted as already being bytes/sec.
pub fn parse_bandwidth_bytes_per_sec(raw: &str) -> Result<f64> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Ok(v);
    }
    let lower = s.to_ascii_lowercase();
    let (num, rest) = split_numeric_prefix(s).ok_or_else(|| Error::UnitParse {
        input: raw.to_string(),
        reason: "missing numeric prefix".into(),
    })?;

    let rest_lower = rest.to_ascii_lowercase();
    if !rest_lower.ends_with("ps") {
        return Err(Error::UnitParse {
            input: raw.to_string(),
            reason: "bandwidth strings must end in bps/Bps".into(),
        });
    }
    let body = &rest[..rest.len() - 2];
    let (scale, unit_char) = match body.chars().next() {
        None => (1.0, rest.chars().next().unwrap_or('b')),
        Some(c) if c.is_ascii_alphabetic() && body.len() == 2 => {
            let scale_letter = c.to_ascii_lowercase();
            let factor = SCALE_LETTERS
                .iter()
                .find(|(l, _)| *l == scale_letter)
                .map(|(_, f)| *f)
                .ok_or_else(|| Error::UnitParse {
                    input: raw.to_string(),
                    reason: format!("unknown scale letter {scale_letter:?}"),
                })?;
            (factor, body.chars().nth(1).unwrap())
        }
        Some(c) => (1.0, c),
    };

    let bits_or_bytes = if unit_char == 'b' {
        num * scale / 8.0
    } else if unit_char == 'B' {
        num * scale
    } else {
        return Err(Error::UnitParse {
            input: raw.to_string(),
            reason: format!("unrecognized unit in {lower:?}"),
        });
    };
    Ok(bits_or_bytes)
}

/// Parse a latency string such as `"2ms"` or `"1.5s"` into seconds.
/// A bare number is interpreted as already being seconds.
pub fn parse_latency_secs(raw: &str) -> Result<f64> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Ok(v);
    }
    if !s.ends_with('s') {
        return Err(Error::UnitParse {
            input: raw.to_string(),
            reason: "latency strings must end in s".into(),
        });
    }
    let body = &s[..s.len() - 1];
    let (num, prefix) = split_numeric_prefix(s).ok_or_else(|| Error::UnitParse {
        input: raw.to_string(),
        reason: "missing numeric prefix".into(),
    })?;
    let scale = match prefix.trim_end_matches('s') {
        "" => 1.0,
        "m" => 1e-3,
        "n" => 1e-9,
        "p" => 1e-12,
        other => {
            return Err(Error::UnitParse {
                input: raw.to_string(),
                reason: format!("unknown latency scale {other:?}"),
            })
        }
    };
    let _ = body;
    Ok(num * scale)
}

/// Parse a size string such as `"10MB"` into bytes. Like bandwidth but
/// without the trailing `ps`.
pub fn parse_size_bytes(raw: &str) -> Result<f64> {
    let s = raw.trim();
    if let Ok(v) = s.parse::<f64>() {
        return Ok(v);
    }
    let (num, rest) = split_numeric_prefix(s).ok_or_else(|| Error::UnitParse {
        input: raw.to_string(),
        reason: "missing numeric prefix".into(),
    })?;
    let (scale, unit_char) = match rest.chars().next() {
        None => {
            return Err(Error::UnitParse {
                input: raw.to_string(),
                reason: "missing unit".into(),
            })
        }
        Some(c) if c.is_ascii_alphabetic() && rest.len() == 2 => {
            let scale_letter = c.to_ascii_lowercase();
            let factor = SCALE_LETTERS
                .iter()
                .find(|(l, _)| *l == scale_letter)
                .map(|(_, f)| *f)
                .ok_or_else(|| Error::UnitParse {
                    input: raw.to_string(),
                    reason: format!("unknown scale letter {scale_letter:?}"),
                })?;
            (factor, rest.chars().nth(1).unwrap())
        }
        Some(c) => (1.0, c),
    };
    let bytes = if unit_char == 'b' {
        num * scale / 8.0
    } else if unit_char == 'B' {
        num * scale
    } else {
        return Err(Error::UnitParse {
            input: raw.to_string(),
            reason: format!("unrecognized unit character {unit_char:?}"),
        });
    };
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_numbers_pass_through() {
        assert_eq!(parse_bandwidth_bytes_per_sec("1000").unwrap(), 1000.0);
        assert_eq!(parse_latency_secs("0.02").unwrap(), 0.02);
        assert_eq!(parse_size_bytes("2048").unwrap(), 2048.0);
    }

    #[test]
    fn bandwidth_bits_vs_bytes() {
        let mbps = parse_bandwidth_bytes_per_sec("8Mbps").unwrap();
        assert!((mbps - (8.0 * 1024.0 * 1024.0 / 8.0)).abs() < 1e-6);
        let mbytesps = parse_bandwidth_bytes_per_sec("8MBps").unwrap();
        assert!((mbytesps - 8.0 * 1024.0 * 1024.0).abs() < 1e-6);
    }

    #[test]
    fn latency_milliseconds() {
        let v = parse_latency_secs("2ms").unwrap();
        assert!((v - 0.002).abs() < 1e-9);
    }

    #[test]
    fn size_megabytes() {
        let v = parse_size_bytes("10MB").unwrap();
        assert!((v - 10.0 * 1024.0 * 1024.0).abs() < 1e-6);
    }
}
