/// Format a Lua number as the decimal form that crosses the engine boundary.
/// Integral values print without a fractional part, everything else as the
/// shortest decimal that round-trips.
pub fn fmt_number(n: f64) -> String {
    if n.is_nan() {
        "nan".into()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Split a `user_script:N:` prefix from an error payload. Returns the line
/// number and the message following the prefix, with one leading space
/// consumed. Payloads without the exact prefix shape return `None`.
pub fn script_line(payload: &[u8]) -> Option<(u32, &[u8])> {
    let rest = payload.strip_prefix(b"user_script:")?;
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let line = std::str::from_utf8(&rest[..digits]).ok()?.parse().ok()?;
    let rest = rest[digits..].strip_prefix(b":")?;
    let rest = rest.strip_prefix(b" ").unwrap_or(rest);
    Some((line, rest))
}

/// An output wrapper for an arbitrary byte sequence. Printable ASCII
/// characters are output directly and all others are escaped.
pub struct Output<'a>(pub &'a [u8]);

impl std::fmt::Debug for Output<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl std::fmt::Display for Output<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "{}", self.0.escape_ascii()),
        }
    }
}
