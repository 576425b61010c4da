use crate::{
    errors::ParseError,
    limits::ParserLimits,
    mime::{self, BodyKind},
    params::multipart,
    query::Query,
    FormFile, MultipartError, Params, Parts, Value,
};
use serde::de::IgnoredAny;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Output of [`ParamsParser::parse`].
#[derive(Debug, Default)]
pub struct Parsed {
    /// Parameters from every source, later sources overriding earlier ones.
    pub params: Params,
    /// The raw body, for text, JSON and unrecognized media types.
    pub body: Option<Vec<u8>>,
    /// Uploaded files of a multipart body.
    pub files: Vec<FormFile>,
}

/// Builds the unified parameter map of a request.
///
/// Sources are read in this order, a later one replacing values of an
/// earlier one under the same key:
///
/// 1. cookies, each a scalar
/// 2. headers named `x-*`, as `X-Request-Id` -> `request_id`
/// 3. the query string
/// 4. the body, chosen by its `Content-Type`
///
/// | Media type                          | Parameters                         | Body kept |
/// |-------------------------------------|------------------------------------|-----------|
/// | `text/html`, `text/plain`           | none                               | yes       |
/// | `application/json`                  | top-level members of an object     | yes       |
/// | `application/x-www-form-urlencoded` | pairs of the form                  | no        |
/// | `multipart/form-data`               | text fields, files in `files`      | no        |
/// | anything else                       | none                               | yes       |
///
/// Query pairs that do not decode are skipped, an undecodable url-encoded
/// body fails the parse.
///
/// Query strings and forms follow one array rule: a key ending in `[]` is
/// always an array and its single value is split on `,`. Without the marker
/// a key seen once is a scalar and a repeated key is an array.
///
/// # Examples
/// ```
/// use relay_web::{limits::ParserLimits, Method, ParamsParser, Parts, Value};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let parser = ParamsParser::new(ParserLimits::default());
/// let parts = Parts::new(Method::Post, "/?tag=a&tag=b&ids[]=1,2")
///     .with_header("Content-Type", "application/x-www-form-urlencoded");
///
/// let body: &[u8] = b"name=tom&tag=c";
/// let parsed = parser.parse(&parts, body, 1024).await.unwrap();
///
/// assert_eq!(parsed.params.array("ids"), Ok(vec!["1", "2"]));
/// assert_eq!(parsed.params.get("tag"), Some(&Value::Scalar("c".into())));
/// assert_eq!(parsed.params.str("name"), Ok("tom"));
/// assert!(parsed.body.is_none());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParamsParser {
    limits: ParserLimits,
}

impl ParamsParser {
    /// Creates a parser. `max_memory` below 1 MiB is raised to 1 MiB.
    pub fn new(limits: ParserLimits) -> Self {
        Self {
            limits: limits.normalized(),
        }
    }

    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    /// Parses every parameter source of a request.
    ///
    /// `body` is read to its end, or up to the closing delimiter of a
    /// multipart body, failing with [`ParseError::BodyTooLarge`] when it
    /// holds more than `max_body` bytes. Multipart bodies are streamed and
    /// never held in memory whole. On error no parameters are returned.
    pub async fn parse<R>(
        &self,
        parts: &Parts,
        body: R,
        max_body: usize,
    ) -> Result<Parsed, ParseError>
    where
        R: AsyncRead + Unpin,
    {
        let mut params = cookie_params(parts);
        params.extend(header_params(parts));
        if let Some(query) = parts.url().query() {
            let pairs = Query::parse_lenient(query.as_bytes(), self.limits.max_form_pairs);
            params.extend(normalize(pairs));
        }

        let content_type = parts.content_type();
        let kind = BodyKind::from_content_type(content_type);
        let hint = parts.content_length().unwrap_or(0).min(max_body);

        let mut parsed = match kind {
            BodyKind::Text => Parsed {
                body: non_empty(read_body(body, hint, max_body, "read html or plain body").await?),
                ..Parsed::default()
            },
            BodyKind::Json => {
                let raw = read_body(body, hint, max_body, "read json body").await?;
                decode_json(raw)?
            }
            BodyKind::FormUrlEncoded => {
                let raw = read_body(body, hint, max_body, "read form body").await?;
                Parsed {
                    params: self.form_params(&raw)?,
                    ..Parsed::default()
                }
            }
            BodyKind::FormData => {
                let boundary = content_type
                    .and_then(|ct| mime::param(ct, "boundary"))
                    .ok_or(MultipartError::MissingBoundary)?;
                let form = multipart::read(body, boundary, self.limits.max_memory, max_body).await?;
                Parsed {
                    params: normalize(form.values),
                    files: form.files,
                    ..Parsed::default()
                }
            }
            BodyKind::Other => Parsed {
                body: non_empty(read_body(body, hint, max_body, "read raw body").await?),
                ..Parsed::default()
            },
        };

        params.extend(std::mem::take(&mut parsed.params));
        parsed.params = params;

        tracing::trace!(
            kind = ?kind,
            params = parsed.params.len(),
            files = parsed.files.len(),
            "request parameters parsed"
        );
        Ok(parsed)
    }

    fn form_params(&self, src: &[u8]) -> Result<Params, ParseError> {
        let pairs: Vec<(String, String)> = Query::parse(src, self.limits.max_form_pairs)?;
        Ok(normalize(pairs))
    }
}

async fn read_body<R>(
    body: R,
    hint: usize,
    max_body: usize,
    context: &'static str,
) -> Result<Vec<u8>, ParseError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(hint);
    body.take((max_body as u64).saturating_add(1))
        .read_to_end(&mut buf)
        .await
        .map_err(|source| ParseError::Read { context, source })?;

    if buf.len() > max_body {
        return Err(ParseError::BodyTooLarge { limit: max_body });
    }
    Ok(buf)
}

fn non_empty(body: Vec<u8>) -> Option<Vec<u8>> {
    (!body.is_empty()).then_some(body)
}

/// Decodes the first JSON value of the body as an object. A body holding
/// any other valid JSON yields no parameters, invalid JSON is an error.
fn decode_json(body: Vec<u8>) -> Result<Parsed, ParseError> {
    if body.is_empty() {
        return Ok(Parsed::default());
    }

    let object = serde_json::Deserializer::from_slice(&body)
        .into_iter::<serde_json::Map<String, serde_json::Value>>()
        .next()
        .and_then(Result::ok);

    let mut params = Params::new();
    match object {
        Some(object) => {
            for (key, value) in object {
                params.insert(key.to_lowercase(), Value::from_json(value));
            }
        }
        None => match serde_json::from_slice::<IgnoredAny>(&body) {
            Ok(_) => tracing::debug!("json body is not an object, no parameters taken"),
            Err(source) => return Err(ParseError::Json { body, source }),
        },
    }

    Ok(Parsed {
        params,
        body: Some(body),
        files: Vec::new(),
    })
}

fn cookie_params(parts: &Parts) -> Params {
    let mut params = Params::new();
    for (name, value) in parts.cookies() {
        params.insert(name.to_lowercase(), Value::Scalar(value.to_owned()));
    }
    params
}

/// `X-Request-Id: abc` becomes `request_id = "abc"`, repeated headers an array.
fn header_params(parts: &Parts) -> Params {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();

    for header in parts.headers().iter() {
        let name = header.name.to_lowercase();
        let Some(key) = name.strip_prefix("x-").filter(|key| !key.is_empty()) else {
            continue;
        };
        let key = key.replace('-', "_");

        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(header.value.clone()),
            None => grouped.push((key, vec![header.value.clone()])),
        }
    }

    let mut params = Params::new();
    for (key, values) in grouped {
        params.insert(key, Value::collapse(values));
    }
    params
}

/// Groups decoded pairs by key and applies the array rule.
pub(crate) fn normalize(pairs: Vec<(String, String)>) -> Params {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (key, value) in pairs {
        match index.get(&key) {
            Some(&i) => grouped[i].1.push(value),
            None => {
                index.insert(key.clone(), grouped.len());
                grouped.push((key, vec![value]));
            }
        }
    }

    let mut params = Params::new();
    for (key, mut values) in grouped {
        let (name, value) = match key.strip_suffix("[]") {
            Some(name) => {
                let value = match values.len() {
                    1 => values.remove(0).split(',').map(str::to_owned).collect(),
                    _ => values,
                };
                (name, Value::Sequence(value))
            }
            None => (key.as_str(), Value::collapse(values)),
        };

        params.insert(name.to_lowercase(), value);
    }
    params
}
