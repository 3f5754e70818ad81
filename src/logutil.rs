//! Logging helpers for bytes received from untrusted peers.
//! Keeps log lines single-line and bounded no matter what a pad sends.

/// Lowercase hex of at most `max` leading bytes, with `…` when truncated.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out: String = data
        .iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect();
    if data.len() > max {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_snippet_truncates() {
        assert_eq!(hex_snippet(&[0x01, 0xab, 0xff], 8), "01abff");
        assert_eq!(hex_snippet(&[0x01, 0xab, 0xff], 2), "01ab…");
    }
}
