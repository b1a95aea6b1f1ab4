/// Drop unpaired UTF-16 surrogates from a string, leaving valid surrogate pairs
/// (and everything else) untouched.
///
/// Rust strings are always valid UTF-8/UTF-16-representable text, so unpaired
/// surrogates can only arise when a string was built from `u16` code units that
/// came from a provider's wire JSON without validation (some providers forward
/// truncated or already-corrupt text). We walk the string as UTF-16 code units,
/// keep a high surrogate only when immediately followed by a matching low
/// surrogate, and keep a low surrogate only when immediately preceded by a kept
/// high surrogate, then re-assemble with lossy replacement for anything that
/// still fails to decode (which should not happen once unpaired surrogates are
/// removed).
pub fn sanitize_surrogates(input: &str) -> String {
    let units: Vec<u16> = input.encode_utf16().collect();
    if !units.iter().any(|u| (0xD800..=0xDFFF).contains(u)) {
        return input.to_string();
    }

    let mut kept = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let unit = units[i];
        let is_high = (0xD800..=0xDBFF).contains(&unit);
        let is_low = (0xDC00..=0xDFFF).contains(&unit);

        if is_high {
            if i + 1 < units.len() && (0xDC00..=0xDFFF).contains(&units[i + 1]) {
                kept.push(unit);
                kept.push(units[i + 1]);
                i += 2;
                continue;
            }
            // unpaired high surrogate: drop it
            i += 1;
            continue;
        }

        if is_low {
            // a low surrogate reaching here was not consumed by the high-surrogate
            // branch above, so it is unpaired
            i += 1;
            continue;
        }

        kept.push(unit);
        i += 1;
    }

    String::from_utf16_lossy(&kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(sanitize_surrogates("hello world"), "hello world");
    }

    #[test]
    fn preserves_valid_emoji() {
        let emoji = "\u{1F600}\u{1F3FD}\u{200D}\u{2764}\u{FE0F}";
        assert_eq!(sanitize_surrogates(emoji), emoji);
    }

    #[test]
    fn is_idempotent() {
        let input = "abc\u{1F600}def";
        let once = sanitize_surrogates(input);
        let twice = sanitize_surrogates(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn preserves_surrogate_pair_across_the_boundary() {
        let units: Vec<u16> = vec![b'a' as u16, 0xD83D, 0xDE00, b'b' as u16];
        let paired = String::from_utf16(&units).unwrap();
        assert_eq!(sanitize_surrogates(&paired), paired);
    }
}
