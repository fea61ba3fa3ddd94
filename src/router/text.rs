//! Prompt templating and link scraping helpers for runners

use serde_json::Value;

/// Hosts never used as research sources (suffix match)
pub const BLOCKED_RESEARCH_HOSTS: [&str; 10] = [
    "google.com",
    "googleapis.com",
    "googleusercontent.com",
    "gstatic.com",
    "youtube.com",
    "youtu.be",
    "facebook.com",
    "instagram.com",
    "x.com",
    "twitter.com",
];

/// First `max` chars, with `...` appended when cut
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Replace `{{key}}` placeholders; unknown keys render empty
pub fn replace_template(template: &str, values: &[(&str, String)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let key_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());

        if key_len > 0 && after[key_len..].starts_with("}}") {
            let key = &after[..key_len];
            if let Some((_, value)) = values.iter().find(|(name, _)| *name == key) {
                output.push_str(value);
            }
            rest = &after[key_len + 2..];
        } else {
            output.push_str("{{");
            rest = after;
        }
    }
    output.push_str(rest);
    output
}

/// Percent-encode everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`
pub fn encode_component(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.!~*'()".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

/// Lowercase host (no port, no credentials) of an absolute URL
pub fn host_of(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or("");
    let host = host_port.split(':').next().unwrap_or("").to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Host plus port, as in `URL.host`
pub fn authority_of(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host_port = authority.rsplit('@').next().unwrap_or("").to_ascii_lowercase();
    (!host_port.is_empty()).then_some(host_port)
}

fn is_blocked_host(host: &str) -> bool {
    host.is_empty()
        || BLOCKED_RESEARCH_HOSTS
            .iter()
            .any(|blocked| host == *blocked || host.ends_with(&format!(".{}", blocked)))
}

/// Cleaned organic result URL, or `None` for search, ad and social links
pub fn normalize_search_url(raw: &str) -> Option<String> {
    let cleaned = raw.replace("&amp;", "&");
    let cleaned = cleaned.trim();
    let lower = cleaned.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return None;
    }

    let host = host_of(cleaned)?;
    if is_blocked_host(&host) {
        return None;
    }
    if cleaned.contains("/aclk?") || cleaned.contains("doubleclick") || cleaned.contains("googleadservices") {
        return None;
    }

    let (_, rest) = cleaned.split_once("://")?;
    if rest.contains(['/', '?', '#']) {
        Some(cleaned.to_string())
    } else {
        Some(format!("{}/", cleaned))
    }
}

/// Unique `href="http(s)://..."` targets without fragments, in page order
pub fn extract_urls_from_html(html: &str) -> Vec<String> {
    const MARKER: &str = "href=\"";
    let lower = html.to_ascii_lowercase();
    let mut urls: Vec<String> = Vec::new();
    let mut offset = 0;

    while let Some(found) = lower[offset..].find(MARKER) {
        let start = offset + found + MARKER.len();
        let Some(len) = html[start..].find('"') else {
            break;
        };
        let candidate = &html[start..start + len];
        offset = start + len;

        let scheme = candidate.get(..8).unwrap_or(candidate).to_ascii_lowercase();
        if candidate.contains('#') || !(scheme.starts_with("http://") || scheme.starts_with("https://")) {
            continue;
        }
        if let Some(url) = normalize_search_url(candidate) {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls
}

/// JSON array embedded anywhere in model output, from the first `[` to the last `]`
pub fn parse_json_array(text: &str) -> Vec<Value> {
    let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Short printable form of a tool result
pub fn tool_result_preview(result: &Value, max: usize) -> String {
    match result {
        Value::String(text) => truncate(text, max),
        other => truncate(&serde_json::to_string_pretty(other).unwrap_or_default(), max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("hello", 5), "hello");
        assert_eq!(truncate("hello world", 5), "hello...");
        assert_eq!(truncate("héllo wörld", 7), "héllo w...");
        assert_eq!(truncate("", 3), "");
    }

    #[test]
    fn test_replace_template() {
        let values = [("poseId", "1".to_string()), ("pageTitle", "Docs".to_string())];
        assert_eq!(
            replace_template("Pose {{poseId}} on {{pageTitle}} by {{who}}", &values),
            "Pose 1 on Docs by "
        );
        assert_eq!(replace_template("{{ poseId }} {{", &values), "{{ poseId }} {{");
        assert_eq!(replace_template("{{poseId}}{{poseId}}", &values), "11");
    }

    #[test]
    fn test_encode_component() {
        assert_eq!(encode_component("a b&c/é"), "a%20b%26c%2F%C3%A9");
        assert_eq!(encode_component("it's (ok)!"), "it's%20(ok)!");
    }

    #[test]
    fn test_hosts() {
        assert_eq!(host_of("https://User@Docs.Example.org:8443/x?y").as_deref(), Some("docs.example.org"));
        assert_eq!(authority_of("wss://voice.example.io:444/a").as_deref(), Some("voice.example.io:444"));
        assert_eq!(host_of("not a url"), None);
    }

    #[test]
    fn test_normalize_search_url_filters() {
        assert_eq!(normalize_search_url("https://rust-lang.org"), Some("https://rust-lang.org/".into()));
        assert_eq!(
            normalize_search_url(" https://a.dev/p?x=1&amp;y=2 "),
            Some("https://a.dev/p?x=1&y=2".into())
        );
        assert_eq!(normalize_search_url("https://www.google.com/search?q=x"), None);
        assert_eq!(normalize_search_url("https://m.youtube.com/watch"), None);
        assert_eq!(normalize_search_url("https://ads.example.com/aclk?sa=1"), None);
        assert_eq!(normalize_search_url("ftp://files.example.com"), None);
        assert!(normalize_search_url("https://notx.com/").is_some());
    }

    #[test]
    fn test_extract_urls_from_html() {
        let html = r#"
            <a href="https://www.google.com/preferences">prefs</a>
            <a HREF="https://blog.example.com/post">one</a>
            <a href="https://blog.example.com/post">dup</a>
            <a href="https://docs.example.com/page#section">frag</a>
            <a href="/relative">rel</a>
            <a href="http://news.example.net/story?id=3">two</a>
        "#;
        assert_eq!(
            extract_urls_from_html(html),
            vec!["https://blog.example.com/post", "http://news.example.net/story?id=3"]
        );
    }

    #[test]
    fn test_parse_json_array() {
        let items = parse_json_array("Sure! [\"https://a.com\", \"https://b.com\"] hope that helps");
        assert_eq!(items, vec![json!("https://a.com"), json!("https://b.com")]);
        assert!(parse_json_array("no array here").is_empty());
        assert!(parse_json_array("] backwards [").is_empty());
        assert!(parse_json_array("[not json]").is_empty());
    }

    #[test]
    fn test_tool_result_preview() {
        assert_eq!(tool_result_preview(&json!("plain"), 10), "plain");
        assert_eq!(tool_result_preview(&json!({"a": 1}), 100), "{\n  \"a\": 1\n}");
        assert_eq!(tool_result_preview(&json!("abcdef"), 3), "abc...");
    }
}
