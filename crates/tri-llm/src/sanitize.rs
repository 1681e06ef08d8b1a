//! Best-effort repair of LLM JSON output before parsing.
//!
//! Models routinely wrap JSON in prose or code fences, leave a
//! trailing comma from a truncated list, or get cut off mid-object.
//! None of this is schema validation — it only gets the text close
//! enough to `serde_json::from_str` that a well-formed response
//! parses on the first try.

/// Runs the full sanitization pipeline: trim, strip code fences,
/// balance truncated braces/brackets, then fix trailing commas.
///
/// Brace-balancing runs first so a response truncated right after a
/// comma (before its closer ever appears) still gets a trailing comma
/// removed once the closer is appended, instead of being left as a
/// dangling `,]`/`,}`.
#[must_use]
pub fn sanitize(raw: &str) -> String {
    let text = strip_code_fences(raw.trim());
    let text = balance_braces(&text);
    fix_trailing_commas(&text)
}

/// Removes a leading/trailing ```` ```json ```` or ```` ``` ```` fence, if present.
#[must_use]
pub fn strip_code_fences(text: &str) -> String {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text.to_string();
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start_matches(['\n', '\r']);
    rest.strip_suffix("```").unwrap_or(rest).trim().to_string()
}

/// Removes a comma immediately before a closing `}` or `]`.
#[must_use]
pub fn fix_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Appends closing braces/brackets for any that were left open,
/// recovering a response truncated mid-object. Ignores braces that
/// appear inside string literals.
#[must_use]
pub fn balance_braces(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    let mut out = text.to_string();
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\":1}");
    }

    #[test]
    fn strips_bare_code_fence() {
        let raw = "```\n{\"a\":1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\":1}");
    }

    #[test]
    fn removes_trailing_comma_before_brace() {
        assert_eq!(fix_trailing_commas("{\"a\":1,}"), "{\"a\":1}");
    }

    #[test]
    fn removes_trailing_comma_before_bracket() {
        assert_eq!(fix_trailing_commas("[1,2,]"), "[1,2]");
    }

    #[test]
    fn balances_truncated_object() {
        assert_eq!(balance_braces("{\"a\":[1,2"), "{\"a\":[1,2]}");
    }

    #[test]
    fn ignores_braces_inside_strings() {
        assert_eq!(balance_braces("{\"a\":\"}\"}"), "{\"a\":\"}\"}");
    }

    #[test]
    fn full_pipeline_recovers_a_realistic_malformed_response() {
        let raw = "```json\n{\"relationships\":[{\"type\":\"CALLS\",}\n";
        let cleaned = sanitize(raw);
        let parsed: serde_json::Value = serde_json::from_str(&cleaned).expect("should parse after sanitization");
        assert_eq!(parsed["relationships"][0]["type"], "CALLS");
    }
}
