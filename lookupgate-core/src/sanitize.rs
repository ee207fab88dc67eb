// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Text cleanup for responder replies and HTML output
//!
//! - `sanitize` strips markup, mentions and stray symbols from a raw chat
//!   reply before it is returned to API callers
//! - `escape_html` makes user-controlled strings safe to embed in pages

use regex::Regex;
use std::sync::LazyLock;

/// Anything that is not a word character, whitespace or allowed punctuation
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s.,:;!?@/\-_]").expect("static regex"));

/// `@handle` mentions
static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\w+").expect("static regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Clean a raw responder reply.
///
/// Steps, in order:
/// 1. drop characters outside word characters, whitespace and `. , : ; ! ? @ / - _`
/// 2. drop `*` and `_` markup
/// 3. drop `@mention` tokens
/// 4. collapse whitespace runs and trim
///
/// Total and idempotent.
pub fn sanitize(raw: &str) -> String {
    let text = DISALLOWED.replace_all(raw, "");
    let text = text.replace(['*', '_'], "");
    let text = MENTION.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Escape a string for safe display inside HTML
///
/// Escapes HTML entities and removes control characters
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '&' => out.push_str("&amp;"),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_markup_and_mentions() {
        assert_eq!(
            sanitize("Hello *world* @someone!! loading..."),
            "Hello world !! loading..."
        );
    }

    #[test]
    fn test_sanitize_keeps_allowed_punctuation() {
        assert_eq!(
            sanitize("CEP: 01001-000, São Paulo"),
            "CEP: 01001-000, São Paulo"
        );
        assert_eq!(sanitize("a/b; c? d!"), "a/b; c? d!");
    }

    #[test]
    fn test_sanitize_strips_symbols_and_emoji() {
        assert_eq!(sanitize("🔎 *Resultado*:\n\n  `ok` <b>#1</b>"), "Resultado: ok b1/b");
        assert_eq!(sanitize("__bold__ text"), "bold text");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let inputs = [
            "",
            "   ",
            "@@handle x",
            "a@b@c",
            "_@_name_",
            "linha1\n\nlinha2\t\tfim",
            "CPF: 123.456.789-00 • NOME: FULANO_DE_TAL",
            "Hello *world* @someone!! loading...",
            "💥💥💥",
        ];
        for input in inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "input: {:?}", input);
        }
    }

    #[test]
    fn test_sanitize_empty_and_blank() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize(" \n\t "), "");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<script>alert('xss')</script>"),
            "&lt;script&gt;alert(&#x27;xss&#x27;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("normal text"), "normal text");
        assert_eq!(escape_html("text\0with\0nulls"), "textwithnulls");
    }
}
