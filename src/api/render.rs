//! Interactive callback page for manual token copy.

use crate::credentials::CredentialRecord;

pub fn credential_page(record: &CredentialRecord, persisted: bool, save_tokens_path: &str) -> String {
    let json = serde_json::to_string_pretty(record).unwrap_or_default();
    let status = if persisted {
        "Credentials saved. You can close this window."
    } else {
        "Copy the token data below and paste it into the uploader."
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="referrer" content="no-referrer">
<title>TikTok connected</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 40rem; margin: 3rem auto; padding: 0 1rem; }}
pre {{ background: #f4f4f4; padding: 1rem; overflow-x: auto; }}
</style>
</head>
<body>
<h1>TikTok connected</h1>
<p>{status}</p>
<pre id="credential">{json}</pre>
<button type="button" onclick="navigator.clipboard.writeText(document.getElementById('credential').textContent)">Copy</button>
<p><small>Manual handoff: POST this JSON to <code>{save_path}</code>.</small></p>
</body>
</html>
"#,
        status = status,
        json = escape_html(&json),
        save_path = escape_html(save_tokens_path),
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
