use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::Message;

const LINE_WIDTH: usize = 76;

fn wrapped_base64(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / LINE_WIDTH * 2 + 2);
    for chunk in encoded.as_bytes().chunks(LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push_str("\r\n");
    }
    out
}

pub fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn quoted_name(name: &str) -> String {
    name.replace(['"', '\\', '\r', '\n'], "_")
}

pub fn render(message: &Message, from: &str, to: &str, boundary: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("From: {from}\r\n"));
    out.push_str(&format!("To: {to}\r\n"));
    out.push_str(&format!("Subject: {}\r\n", encode_header(&message.subject)));
    out.push_str("MIME-Version: 1.0\r\n");
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
    ));

    out.push_str(&format!("--{boundary}\r\n"));
    out.push_str("Content-Type: text/html; charset=\"utf-8\"\r\n");
    out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
    out.push_str(&wrapped_base64(message.html_body.as_bytes()));

    for attachment in &message.attachments {
        let name = quoted_name(&attachment.file_name);
        out.push_str(&format!("--{boundary}\r\n"));
        out.push_str(&format!(
            "Content-Type: {}; name=\"{name}\"\r\n",
            attachment.content_type
        ));
        out.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{name}\"\r\n"
        ));
        out.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        out.push_str(&wrapped_base64(&attachment.data));
    }
    out.push_str(&format!("--{boundary}--\r\n"));
    out
}
