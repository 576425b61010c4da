//! `Cookie` request header parsing.

/// Iterates over the `name=value` pairs of a `Cookie` header value.
///
/// Pairs are separated by `;`. Pairs without `=` or with a name that is
/// not a valid token are skipped, and a value wrapped in double quotes is
/// returned without them.
///
/// # Examples
/// ```
/// use relay_web::cookie;
///
/// let pairs: Vec<_> = cookie::pairs(r#"session=abc; theme="dark"; broken; =x"#).collect();
/// assert_eq!(pairs, [("session", "abc"), ("theme", "dark")]);
/// ```
pub fn pairs(header: &str) -> impl Iterator<Item = (&str, &str)> {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        let name = name.trim();
        if !is_token(name) {
            return None;
        }

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        Some((name, value))
    })
}

fn is_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}
