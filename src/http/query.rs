//! URL query string and `application/x-www-form-urlencoded` parser.

use memchr::memchr;
use std::collections::HashMap;
use thiserror::Error;

/// Query string and url-encoded form parser.
///
/// Keys and values are percent-decoded, `+` decodes to a space. Pairs are
/// separated by `&`, empty pairs are skipped and a pair without `=` has an
/// empty value.
///
/// # Examples
/// ```rust
/// use relay_web::query::Query;
/// use std::collections::HashMap;
///
/// // Parse into Vec (preserves order and duplicates)
/// let pairs: Vec<(String, String)> = Query::parse(b"name=j%C3%B6rg&tag=a&tag=b", 10).unwrap();
/// assert_eq!(pairs.len(), 3);
/// assert_eq!(pairs[0], ("name".to_owned(), "jörg".to_owned()));
///
/// // Parse into HashMap (last value wins)
/// let map: HashMap<String, String> = Query::parse(b"tag=a&tag=b", 10).unwrap();
/// assert_eq!(map["tag"], "b");
///
/// // Handle limits
/// let result = Query::parse::<Vec<(String, String)>>(b"a=1&b=2", 1);
/// assert!(result.is_err());
/// ```
/// All possible formats:
/// ```rust
/// use relay_web::query::Query;
///
/// let pairs: Vec<(String, String)> = Query::parse(b"debug&name=&=Qwe&&a+b=c%20d", 10).unwrap();
///
/// assert_eq!(pairs.len(), 4);
/// assert_eq!(pairs[0], ("debug".into(), "".into()));
/// assert_eq!(pairs[1], ("name".into(), "".into()));
/// assert_eq!(pairs[2], ("".into(), "Qwe".into()));
/// assert_eq!(pairs[3], ("a b".into(), "c d".into()));
/// ```
pub struct Query;

impl Query {
    /// Parses a query string into a new collection.
    ///
    /// A leading `?` is ignored, so `?a=1` and `a=1` are equivalent.
    /// An empty input yields an empty collection.
    #[inline(always)]
    pub fn parse<C: QueryCollector>(query: &[u8], limit: usize) -> Result<C, Error> {
        let mut result = C::with_capacity(limit.min(16));
        Self::parse_into(&mut result, query, limit)?;
        Ok(result)
    }

    /// Parses a query string, appending the pairs to an existing collection.
    ///
    /// # Examples
    /// ```
    /// use relay_web::query::Query;
    ///
    /// let mut collector = Vec::new();
    ///
    /// Query::parse_into(&mut collector, b"a=1&b=2", 10).unwrap();
    /// Query::parse_into(&mut collector, b"c=3", 10).unwrap();
    /// assert_eq!(collector.len(), 3);
    ///
    /// let mut collector = Vec::new();
    /// assert!(Query::parse_into(&mut collector, b"a=%zz", 10).is_err());
    /// ```
    pub fn parse_into<C: QueryCollector>(
        result: &mut C,
        query: &[u8],
        limit: usize,
    ) -> Result<(), Error> {
        for (count, (key, value)) in raw_pairs(query).enumerate() {
            if count >= limit {
                return Err(Error::OverLimit(limit));
            }
            result.add_param(Self::decode(key)?, Self::decode(value)?);
        }

        Ok(())
    }

    /// Parses a query string, skipping pairs that do not decode.
    ///
    /// Pairs past `limit` are ignored. Skipped pairs are logged at `debug`.
    ///
    /// # Examples
    /// ```
    /// use relay_web::query::Query;
    ///
    /// let pairs: Vec<(String, String)> = Query::parse_lenient(b"a=%&b=1&c=%FF", 10);
    /// assert_eq!(pairs, [("b".to_owned(), "1".to_owned())]);
    ///
    /// let pairs: Vec<(String, String)> = Query::parse_lenient(b"a=1&b=2&c=3", 2);
    /// assert_eq!(pairs.len(), 2);
    /// ```
    pub fn parse_lenient<C: QueryCollector>(query: &[u8], limit: usize) -> C {
        let mut result = C::with_capacity(limit.min(16));

        for (count, (key, value)) in raw_pairs(query).enumerate() {
            if count >= limit {
                tracing::debug!(limit, "query pair limit reached, rest ignored");
                break;
            }

            match Self::decode(key).and_then(|key| Ok((key, Self::decode(value)?))) {
                Ok((key, value)) => result.add_param(key, value),
                Err(error) => tracing::debug!(
                    key = %String::from_utf8_lossy(key),
                    %error,
                    "undecodable query pair skipped"
                ),
            }
        }

        result
    }

    /// Percent-decodes a single key or value, `+` becoming a space.
    ///
    /// # Examples
    /// ```
    /// use relay_web::query::{Error, Query};
    ///
    /// assert_eq!(Query::decode(b"a%2Cb+c").unwrap(), "a,b c");
    /// assert_eq!(Query::decode(b"100%"), Err(Error::InvalidEscape(3)));
    /// assert_eq!(Query::decode(b"%FF"), Err(Error::InvalidUtf8));
    /// ```
    pub fn decode(src: &[u8]) -> Result<String, Error> {
        if memchr::memchr2(b'%', b'+', src).is_none() {
            return simdutf8::basic::from_utf8(src)
                .map(str::to_owned)
                .map_err(|_| Error::InvalidUtf8);
        }

        let mut out = Vec::with_capacity(src.len());
        let mut i = 0;
        while i < src.len() {
            match src[i] {
                b'+' => out.push(b' '),
                b'%' => {
                    let hi = src.get(i + 1).and_then(|&b| hex(b));
                    let lo = src.get(i + 2).and_then(|&b| hex(b));
                    match (hi, lo) {
                        (Some(hi), Some(lo)) => out.push(hi << 4 | lo),
                        _ => return Err(Error::InvalidEscape(i)),
                    }
                    i += 2;
                }
                byte => out.push(byte),
            }
            i += 1;
        }

        String::from_utf8(out).map_err(|_| Error::InvalidUtf8)
    }
}

/// Splits on `&`, skipping empty pairs. A pair without `=` has an empty value.
fn raw_pairs(query: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    let data = match query.first() {
        Some(b'?') => &query[1..],
        _ => query,
    };

    data.split(|&b| b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match memchr(b'=', pair) {
            Some(index) => (&pair[..index], &pair[index + 1..]),
            None => (pair, &b""[..]),
        })
}

#[inline(always)]
const fn hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// A trait for types that can collect decoded query parameters.
///
/// # Examples
/// ```rust
/// use relay_web::query::{Query, QueryCollector};
///
/// struct Keys(Vec<String>);
///
/// impl QueryCollector for Keys {
///     fn add_param(&mut self, key: String, _value: String) {
///         self.0.push(key);
///     }
///
///     fn length(&self) -> usize {
///         self.0.len()
///     }
///
///     fn with_capacity(capacity: usize) -> Self {
///         Keys(Vec::with_capacity(capacity))
///     }
/// }
///
/// let keys: Keys = Query::parse(b"a=1&b=2", 10).unwrap();
/// assert_eq!(keys.0, ["a", "b"]);
/// ```
pub trait QueryCollector
where
    Self: Sized,
{
    /// Adds a decoded parameter to the collection.
    fn add_param(&mut self, key: String, value: String);

    /// Returns the current number of parameters in the collection.
    fn length(&self) -> usize;

    /// Creates a new collection with the specified capacity.
    fn with_capacity(capacity: usize) -> Self;
}

// Preserves parameter order
impl QueryCollector for Vec<(String, String)> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.push((key, value));
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }
}

// Last value wins
impl QueryCollector for HashMap<String, String> {
    #[inline(always)]
    fn add_param(&mut self, key: String, value: String) {
        self.insert(key, value);
    }

    #[inline(always)]
    fn length(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity(capacity)
    }
}

/// Error types that can occur during query parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// More pairs than the allowed maximum.
    #[error("query parameter limit exceeded: limit={0}")]
    OverLimit(usize),

    /// A `%` not followed by two hex digits, at the given byte offset of the key or value.
    #[error("invalid percent escape at byte {0}")]
    InvalidEscape(usize),

    /// The decoded bytes are not valid UTF-8.
    #[error("decoded query is not valid UTF-8")]
    InvalidUtf8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(line: &str, limit: usize) -> Result<Vec<(String, String)>, Error> {
        Query::parse(line.as_bytes(), limit)
    }

    fn owned(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|&(k, v)| (k.to_owned(), v.to_owned()))
            .collect()
    }

    #[test]
    fn basic() {
        for line in ["a=1&b=2", "?a=1&b=2", "a=1&&b=2&"] {
            assert_eq!(pairs(line, 8), Ok(owned(&[("a", "1"), ("b", "2")])));
        }
    }

    #[test]
    fn full() {
        assert_eq!(
            pairs("flag&empty=&=val&&key=va=lue", 10),
            Ok(owned(&[
                ("flag", ""),
                ("empty", ""),
                ("", "val"),
                ("key", "va=lue"),
            ]))
        );
    }

    #[test]
    fn empty_input() {
        for line in ["", "?", "&&"] {
            assert_eq!(pairs(line, 10), Ok(vec![]));
        }
    }

    #[test]
    fn decoding() {
        let cases = [
            ("plain", "plain"),
            ("a+b", "a b"),
            ("a%2Bb", "a+b"),
            ("%E4%BD%A0%e5%a5%bd", "你好"),
            ("tag%5B%5D", "tag[]"),
            ("", ""),
        ];

        for (src, expected) in cases {
            assert_eq!(Query::decode(src.as_bytes()).as_deref(), Ok(expected));
        }
    }

    #[test]
    fn decoding_errors() {
        let cases = [
            ("%", Error::InvalidEscape(0)),
            ("ab%2", Error::InvalidEscape(2)),
            ("%zz", Error::InvalidEscape(0)),
            ("%C3%28", Error::InvalidUtf8),
        ];

        for (src, expected) in cases {
            assert_eq!(Query::decode(src.as_bytes()), Err(expected), "{src}");
        }
        assert_eq!(pairs("a=1&b=%g0", 10), Err(Error::InvalidEscape(0)));
    }

    #[test]
    fn limit_error() {
        assert_eq!(pairs("a&a", 1), Err(Error::OverLimit(1)));
        assert_eq!(pairs("a&&", 1), Ok(owned(&[("a", "")])));
    }

    #[test]
    fn lenient_skips_bad_pairs() {
        let cases: [(&str, usize, &[(&str, &str)]); 5] = [
            ("a=%&b=1", 10, &[("b", "1")]),
            ("%zz=1&ok", 10, &[("ok", "")]),
            ("x=%C3%28&y=%41", 10, &[("y", "A")]),
            ("a=1&b=2&c=3", 2, &[("a", "1"), ("b", "2")]),
            ("%&%%", 10, &[]),
        ];

        for (line, limit, expected) in cases {
            let parsed: Vec<(String, String)> = Query::parse_lenient(line.as_bytes(), limit);
            assert_eq!(parsed, owned(expected), "{line}");
        }
    }
}
