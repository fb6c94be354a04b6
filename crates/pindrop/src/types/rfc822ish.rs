use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

type Fields = HashMap<String, Vec<String>>;

/// A METADATA / PKG-INFO file is allegedly formatted as an RFC822 email message. In reality
/// the format is "whatever the Python stdlib module `email.parser` accepts": a run of header
/// lines, an empty line, then a free-form body (the description, in modern files).
///
/// `email.parser` is extremely lenient. We tolerate mangled line endings and trailing
/// newlines, but fail on oddities like empty field names or a continuation line at the
/// start of input.
#[derive(Debug)]
pub struct RFC822ish {
    fields: Fields,
    /// The message body, if any. Unused by the resolver but kept so callers can reach the
    /// long description when they want it.
    pub body: Option<String>,
}

/// Error produced when the header section cannot be parsed.
#[derive(Debug, Clone, Error)]
#[error("invalid metadata headers: {0}")]
pub struct ParseRFC822ishError(String);

/// Error produced when a singleton key is missing or repeated.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum FieldError {
    #[error("missing required key {0}")]
    Missing(String),
    #[error("multiple values for singleton key {0}")]
    Duplicate(String),
}

peg::parser! {
    grammar rfc822ish_parser() for str {
        // Real RFC822 only allows CRLF; email.parser takes anything.
        rule line_ending()
            = quiet!{"\r\n" / "\r" / "\n"}
              / expected!("end of line")

        rule field_name() -> &'input str
            = quiet!{$(['\x21'..='\x39' | '\x3b'..='\x7e']+)}
              / expected!("field name")

        // email.parser drops " \t" after the colon but preserves other whitespace.
        rule field_separator()
            = ":" [' ' | '\t']*

        rule field_value_piece()
            = [^ '\r' | '\n']*

        rule continuation_line_ending()
            = quiet!{line_ending() [' ' | '\t']} / expected!("continuation line")

        // email.parser does not fold continuation lines; they keep their embedded
        // newlines (minus any trailing ones).
        rule field_value() -> &'input str
            = $(field_value_piece() ** continuation_line_ending())

        rule field() -> (String, String)
            = n:field_name() field_separator() v:field_value()
                { (n.to_ascii_lowercase(), v.to_owned()) }

        rule fields() -> Vec<(String, String)>
            = field() ** line_ending()

        rule trailing_body() -> String
            = line_ending() line_ending() b:$([_]*) { b.to_owned() }

        // The optional line_ending() at the end absorbs a stray trailing newline when
        // there is no body.
        pub rule rfc822ish() -> RFC822ish
            = f:fields() body:(trailing_body()?) line_ending()?
                 {
                     let mut fields = Fields::new();
                     for (name, value) in f {
                         fields.entry(name).or_default().push(value)
                     };
                     RFC822ish { fields, body }
                 }
    }
}

impl FromStr for RFC822ish {
    type Err = ParseRFC822ishError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        rfc822ish_parser::rfc822ish(input).map_err(|e| ParseRFC822ishError(e.to_string()))
    }
}

impl RFC822ish {
    /// Removes and returns every value recorded for `key` (case-insensitive).
    pub fn take_all(&mut self, key: &str) -> Vec<String> {
        self.fields.remove(&key.to_ascii_lowercase()).unwrap_or_default()
    }

    /// Removes a key that may appear at most once.
    pub fn maybe_take(&mut self, key: &str) -> Result<Option<String>, FieldError> {
        let mut values = self.take_all(key);
        match values.len() {
            0 => Ok(None),
            1 => Ok(values.pop()),
            _ => Err(FieldError::Duplicate(key.to_owned())),
        }
    }

    /// Removes a key that must appear exactly once.
    pub fn take(&mut self, key: &str) -> Result<String, FieldError> {
        match self.maybe_take(key)? {
            Some(result) => Ok(result),
            None => Err(FieldError::Missing(key.to_owned())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_basic_headers() {
        let input = "Metadata-Version: 2.1\nName: flask\nVersion: 2.1.2\n";
        let mut parsed: RFC822ish = input.parse().unwrap();
        assert_eq!(parsed.take("Name").unwrap(), "flask");
        assert_eq!(parsed.take("version").unwrap(), "2.1.2");
        assert!(parsed.body.is_none());
    }

    #[test]
    fn test_repeated_fields_and_body() {
        let input = "Name: x\nRequires-Dist: a\nRequires-Dist: b >=1\n\nlong description\nwith lines\n";
        let mut parsed: RFC822ish = input.parse().unwrap();
        assert_eq!(parsed.take_all("Requires-Dist"), vec!["a", "b >=1"]);
        assert_eq!(parsed.body.as_deref(), Some("long description\nwith lines\n"));
        assert!(parsed.take("Requires-Dist").is_err());
    }

    #[test]
    fn test_continuation_lines() {
        let input = "Summary: first\n  second\nName: y\n";
        let mut parsed: RFC822ish = input.parse().unwrap();
        assert_eq!(parsed.take("Summary").unwrap(), "first\n  second");
        assert_eq!(parsed.take("Name").unwrap(), "y");
    }

    #[test]
    fn test_duplicate_singleton_is_an_error() {
        let input = "Version: 1\nVersion: 2\n";
        let mut parsed: RFC822ish = input.parse().unwrap();
        assert!(matches!(
            parsed.maybe_take("Version"),
            Err(FieldError::Duplicate(_))
        ));
    }
}
