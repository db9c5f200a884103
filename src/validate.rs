//! Per-route input contracts.
//!
//! Each endpoint gets one pure validation function that takes the raw,
//! loosely-typed body and returns either a bounds-checked value or a
//! `ValidationError` naming the first violated constraint.  The summarize
//! route additionally sanitizes its text fields before they are ever
//! interpolated into the outbound prompt.  Bounds are checked on the raw
//! input, before trimming or escaping.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::ApiError;

pub const TRANSCRIPT_MAX_CHARS: usize = 100_000;
pub const PROMPT_MAX_CHARS: usize = 1_000;

/// Raw summarize body as received on the wire. Fields are optional so that
/// missing keys surface as named validation failures rather than opaque
/// deserialization errors.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SummarizeBody {
    pub transcript: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct SendEmailBody {
    pub summary: Option<String>,
    pub recipients: Option<String>,
}

/// Bounds-checked, sanitized summarize input.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeRequest {
    pub transcript: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendEmailRequest {
    pub summary: String,
    pub recipients: Vec<String>,
}

/// Final prompt text handed to the resilient caller. Constructed only from
/// sanitized inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedPrompt(String);

impl SanitizedPrompt {
    pub fn text(&self) -> &str {
        &self.0
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

fn invalid(constraint: impl Into<String>) -> ApiError {
    ApiError::validation_with("Invalid input", constraint)
}

pub fn validate_summarize(body: SummarizeBody) -> Result<SummarizeRequest, ApiError> {
    let transcript = match body.transcript {
        Some(t) if !t.is_empty() => t,
        _ => return Err(invalid("transcript is required and must not be empty")),
    };
    if transcript.chars().count() > TRANSCRIPT_MAX_CHARS {
        return Err(invalid(format!(
            "transcript must be at most {} characters",
            TRANSCRIPT_MAX_CHARS
        )));
    }
    let prompt = match body.prompt {
        Some(p) if !p.is_empty() => p,
        _ => return Err(invalid("prompt is required and must not be empty")),
    };
    if prompt.chars().count() > PROMPT_MAX_CHARS {
        return Err(invalid(format!(
            "prompt must be at most {} characters",
            PROMPT_MAX_CHARS
        )));
    }
    Ok(SummarizeRequest {
        transcript: sanitize(&transcript),
        prompt: sanitize(&prompt),
    })
}

pub fn validate_send_email(body: SendEmailBody) -> Result<SendEmailRequest, ApiError> {
    let summary = match body.summary {
        Some(s) if !s.is_empty() => s,
        _ => return Err(invalid("summary is required and must not be empty")),
    };
    let raw_recipients = match body.recipients {
        Some(r) if !r.trim().is_empty() => r,
        _ => return Err(invalid("recipients is required and must not be empty")),
    };
    let mut recipients = Vec::new();
    for part in raw_recipients.split(',') {
        let addr = part.trim();
        if addr.is_empty() || !EMAIL_RE.is_match(addr) {
            return Err(invalid(format!(
                "recipients contains an invalid email address: '{}'",
                part.trim()
            )));
        }
        recipients.push(addr.to_string());
    }
    Ok(SendEmailRequest {
        summary,
        recipients,
    })
}

/// Build the outbound prompt from already-sanitized inputs.
pub fn compose_prompt(req: &SummarizeRequest) -> SanitizedPrompt {
    SanitizedPrompt(format!(
        "You are a helpful meeting summarizer. {}\n\n{}",
        req.prompt, req.transcript
    ))
}

// Entities the sanitizer itself produces. An ampersand that begins one of
// these is left alone so a second pass is a no-op.
const SANITIZER_ENTITIES: [&str; 8] = [
    "&amp;", "&lt;", "&gt;", "&quot;", "&#x27;", "&#x60;", "&#x2F;", "&#x5C;",
];

/// Trim surrounding whitespace and neutralize markup-significant characters.
/// Idempotent: sanitizing an already-sanitized string yields the same string.
pub fn sanitize(input: &str) -> String {
    let trimmed = input.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (idx, ch) in trimmed.char_indices() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '/' => out.push_str("&#x2F;"),
            '\\' => out.push_str("&#x5C;"),
            '&' => {
                let rest = &trimmed[idx..];
                if SANITIZER_ENTITIES.iter().any(|e| rest.starts_with(e)) {
                    out.push('&');
                } else {
                    out.push_str("&amp;");
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summarize_body(transcript: &str, prompt: &str) -> SummarizeBody {
        SummarizeBody {
            transcript: Some(transcript.to_string()),
            prompt: Some(prompt.to_string()),
        }
    }

    #[test]
    fn summarize_accepts_in_bounds_input() {
        let req = validate_summarize(summarize_body("alice said hi", "summarize this")).unwrap();
        assert_eq!(req.transcript, "alice said hi");
        assert_eq!(req.prompt, "summarize this");
    }

    #[test]
    fn summarize_rejects_missing_fields() {
        let err = validate_summarize(SummarizeBody::default()).unwrap_err();
        let env = err.envelope();
        assert_eq!(env.error, "Invalid input");
        assert!(env.details.unwrap().contains("transcript"));

        let err = validate_summarize(SummarizeBody {
            transcript: Some("hello".into()),
            prompt: None,
        })
        .unwrap_err();
        assert!(err.envelope().details.unwrap().contains("prompt"));
    }

    #[test]
    fn summarize_rejects_out_of_bounds_lengths() {
        let long_transcript = "x".repeat(TRANSCRIPT_MAX_CHARS + 1);
        let err = validate_summarize(summarize_body(&long_transcript, "ok")).unwrap_err();
        assert!(err.envelope().details.unwrap().contains("100000"));

        let long_prompt = "y".repeat(PROMPT_MAX_CHARS + 1);
        let err = validate_summarize(summarize_body("ok", &long_prompt)).unwrap_err();
        assert!(err.envelope().details.unwrap().contains("1000"));
    }

    #[test]
    fn bounds_apply_before_sanitization() {
        // Escaping expands each '<' to four characters; a transcript at the
        // boundary must still pass because bounds are checked on raw input.
        let transcript = "<".repeat(TRANSCRIPT_MAX_CHARS);
        let req = validate_summarize(summarize_body(&transcript, "ok")).unwrap();
        assert!(req.transcript.len() > TRANSCRIPT_MAX_CHARS);
    }

    #[test]
    fn sanitize_escapes_markup_characters() {
        assert_eq!(
            sanitize("<script>alert(\"hi\") & 'bye' `x` a/b c\\d</script>"),
            "&lt;script&gt;alert(&quot;hi&quot;) &amp; &#x27;bye&#x27; &#x60;x&#x60; \
             a&#x2F;b c&#x5C;d&lt;&#x2F;script&gt;"
        );
    }

    #[test]
    fn sanitize_trims_surrounding_whitespace() {
        assert_eq!(sanitize("  hello world \n"), "hello world");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "plain text",
            "<b>bold & 'loud'</b>",
            "a & b &amp; c",
            "  padded <text>  ",
            "slash / and \\ backslash",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn compose_prompt_embeds_instruction_then_transcript() {
        let req = validate_summarize(summarize_body("the transcript", "bullet points")).unwrap();
        let prompt = compose_prompt(&req);
        assert_eq!(
            prompt.text(),
            "You are a helpful meeting summarizer. bullet points\n\nthe transcript"
        );
    }

    #[test]
    fn send_email_parses_recipient_list() {
        let req = validate_send_email(SendEmailBody {
            summary: Some("the summary".into()),
            recipients: Some("a@example.com, b@example.com".into()),
        })
        .unwrap();
        assert_eq!(req.recipients, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn send_email_rejects_missing_or_malformed_input() {
        assert!(validate_send_email(SendEmailBody::default()).is_err());

        let err = validate_send_email(SendEmailBody {
            summary: Some("s".into()),
            recipients: Some("not-an-address".into()),
        })
        .unwrap_err();
        assert!(err.envelope().details.unwrap().contains("not-an-address"));

        // A trailing comma produces an empty entry, which is malformed.
        assert!(validate_send_email(SendEmailBody {
            summary: Some("s".into()),
            recipients: Some("a@example.com,".into()),
        })
        .is_err());
    }
}
