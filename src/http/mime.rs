//! Media types and `Content-Type` inspection.

/// `text/html` with UTF-8 charset.
pub const HTML: &str = "text/html; charset=utf-8";
/// `text/plain` with UTF-8 charset.
pub const PLAIN: &str = "text/plain; charset=utf-8";
pub const JSON: &str = "application/json";
pub const FORM_URL_ENCODED: &str = "application/x-www-form-urlencoded";
pub const FORM_DATA: &str = "multipart/form-data";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// How a request body is interpreted, chosen from its media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// `text/html` or `text/plain`, read raw.
    Text,
    /// `application/json`, decoded into parameters when it is an object.
    Json,
    /// `application/x-www-form-urlencoded`
    FormUrlEncoded,
    /// `multipart/form-data`
    FormData,
    /// Anything else, including a missing `Content-Type`, read raw.
    Other,
}

impl BodyKind {
    /// Classifies a `Content-Type` header value.
    ///
    /// Parameters such as `charset` are ignored and the media type is
    /// compared case-insensitively.
    ///
    /// # Examples
    /// ```
    /// use relay_web::mime::BodyKind;
    ///
    /// assert_eq!(BodyKind::from_content_type(Some("application/json; charset=utf-8")), BodyKind::Json);
    /// assert_eq!(BodyKind::from_content_type(Some("Multipart/Form-Data; boundary=x")), BodyKind::FormData);
    /// assert_eq!(BodyKind::from_content_type(None), BodyKind::Other);
    /// ```
    pub fn from_content_type(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return BodyKind::Other;
        };

        let media = media_type(value);
        let is = |expected: &str| media.eq_ignore_ascii_case(expected);

        if is("text/html") || is("text/plain") {
            BodyKind::Text
        } else if is(JSON) {
            BodyKind::Json
        } else if is(FORM_URL_ENCODED) {
            BodyKind::FormUrlEncoded
        } else if is(FORM_DATA) {
            BodyKind::FormData
        } else {
            BodyKind::Other
        }
    }
}

/// Returns the media type of a header value, without parameters or surrounding spaces.
pub fn media_type(value: &str) -> &str {
    match memchr::memchr(b';', value.as_bytes()) {
        Some(index) => value[..index].trim(),
        None => value.trim(),
    }
}

/// Returns the value of the parameter `name` in a header value such as
/// `multipart/form-data; boundary="abc"`.
///
/// Parameter names are case-insensitive. Quoted values are returned without
/// their quotes, backslash escapes are kept as sent.
///
/// # Examples
/// ```
/// use relay_web::mime;
///
/// let value = r#"form-data; name="avatar"; filename="me.png""#;
/// assert_eq!(mime::param(value, "name"), Some("avatar"));
/// assert_eq!(mime::param(value, "FILENAME"), Some("me.png"));
/// assert_eq!(mime::param(value, "size"), None);
/// ```
pub fn param<'a>(value: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = &value[memchr::memchr(b';', value.as_bytes())? + 1..];

    loop {
        rest = rest.trim_start_matches([' ', '\t', ';']);
        if rest.is_empty() {
            return None;
        }

        let eq = rest.find('=')?;
        let key = rest[..eq].trim();
        rest = &rest[eq + 1..];

        let found;
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = closing_quote(quoted)?;
            found = &quoted[..end];
            rest = &quoted[end + 1..];
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            found = rest[..end].trim();
            rest = &rest[end..];
        }

        if key.eq_ignore_ascii_case(name) {
            return Some(found);
        }
    }
}

fn closing_quote(src: &str) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_kinds() {
        let cases = [
            (Some("text/html"), BodyKind::Text),
            (Some("text/plain; charset=utf-8"), BodyKind::Text),
            (Some(" application/json "), BodyKind::Json),
            (Some("APPLICATION/JSON;charset=UTF-8"), BodyKind::Json),
            (
                Some("application/x-www-form-urlencoded"),
                BodyKind::FormUrlEncoded,
            ),
            (
                Some("multipart/form-data; boundary=----abc"),
                BodyKind::FormData,
            ),
            (Some("application/xml"), BodyKind::Other),
            (Some("application/json-patch+json"), BodyKind::Other),
            (Some(""), BodyKind::Other),
            (None, BodyKind::Other),
        ];

        for (value, kind) in cases {
            assert_eq!(BodyKind::from_content_type(value), kind, "{value:?}");
        }
    }

    #[test]
    fn params() {
        let cases = [
            ("multipart/form-data; boundary=abc", "boundary", Some("abc")),
            (
                "multipart/form-data; boundary=\"a;b c\"",
                "boundary",
                Some("a;b c"),
            ),
            ("multipart/form-data;boundary=abc;x=1", "x", Some("1")),
            ("multipart/form-data; Boundary=abc", "boundary", Some("abc")),
            (r#"form-data; name="a\"b""#, "name", Some(r#"a\"b"#)),
            ("multipart/form-data", "boundary", None),
            ("multipart/form-data; boundary=\"open", "boundary", None),
            ("form-data; filename=x", "name", None),
        ];

        for (value, name, expected) in cases {
            assert_eq!(param(value, name), expected, "{value}");
        }
    }

    #[test]
    fn media_type_trims_parameters() {
        assert_eq!(media_type("text/plain ; charset=utf-8"), "text/plain");
        assert_eq!(media_type("text/plain"), "text/plain");
    }
}
