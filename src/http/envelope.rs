//! `<body/>` wrapper codec.
//!
//! Only the wrapper element is interpreted. Its start-tag attributes become an
//! [`InboundRequest`]; everything between the start and end tags is passed on
//! untouched as a single packet.

use std::collections::HashMap;
use thiserror::Error;

use crate::bosh::manager::Reply;
use crate::bosh::packet::Packet;
use crate::bosh::request::{
    InboundRequest, CONTENT_ATTR, HOLD_ATTR, PAUSE_ATTR, RID_ATTR, SID_ATTR, TO_ATTR, TYPE_ATTR,
    WAIT_ATTR,
};

pub const HTTPBIND_NS: &str = "http://jabber.org/protocol/httpbind";

const BODY_TAG: &str = "body";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("request body is not valid UTF-8")]
    NotUtf8,

    #[error("request is not wrapped in a body element")]
    MissingBody,

    #[error("malformed body element: {0}")]
    Malformed(&'static str),

    #[error("invalid rid {0:?}")]
    InvalidRid(String),
}

/// Decode one HTTP request body.
pub fn decode(raw: &[u8]) -> Result<InboundRequest, EnvelopeError> {
    let text = std::str::from_utf8(raw).map_err(|_| EnvelopeError::NotUtf8)?;
    let text = skip_prolog(text.trim());

    let rest = text
        .strip_prefix('<')
        .and_then(|s| s.strip_prefix(BODY_TAG))
        .filter(|s| s.starts_with(|c: char| c.is_whitespace() || c == '>' || c == '/'))
        .ok_or(EnvelopeError::MissingBody)?;

    let (mut attrs, rest, self_closing) = parse_attributes(rest)?;

    let content = if self_closing {
        ""
    } else {
        let end = rest
            .rfind("</")
            .filter(|&i| rest[i + 2..].trim_end().trim_end_matches('>').trim() == BODY_TAG)
            .ok_or(EnvelopeError::Malformed("missing closing tag"))?;
        rest[..end].trim()
    };

    let rid = match attrs.remove(RID_ATTR) {
        Some(raw) => Some(
            raw.trim()
                .parse::<u64>()
                .map_err(|_| EnvelopeError::InvalidRid(raw))?,
        ),
        None => None,
    };

    let mut request = InboundRequest {
        sid: attrs.remove(SID_ATTR),
        rid,
        wait: attrs.remove(WAIT_ATTR),
        hold: attrs.remove(HOLD_ATTR),
        to: attrs.remove(TO_ATTR),
        content: attrs.remove(CONTENT_ATTR),
        pause: attrs.remove(PAUSE_ATTR),
        terminate: attrs.get(TYPE_ATTR).is_some_and(|t| t == "terminate"),
        payload: Vec::new(),
    };
    if !content.is_empty() {
        request.payload.push(Packet::from(content));
    }
    Ok(request)
}

/// Skip an XML declaration and comments ahead of the root element.
fn skip_prolog(mut text: &str) -> &str {
    loop {
        if let Some(rest) = text.strip_prefix("<?") {
            match rest.find("?>") {
                Some(end) => text = rest[end + 2..].trim_start(),
                None => return text,
            }
        } else if let Some(rest) = text.strip_prefix("<!--") {
            match rest.find("-->") {
                Some(end) => text = rest[end + 3..].trim_start(),
                None => return text,
            }
        } else {
            return text;
        }
    }
}

/// Parse attributes up to the end of the start tag.
fn parse_attributes(mut rest: &str) -> Result<(HashMap<String, String>, &str, bool), EnvelopeError> {
    let mut attrs = HashMap::new();

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("/>") {
            return Ok((attrs, after, true));
        }
        if let Some(after) = rest.strip_prefix('>') {
            return Ok((attrs, after, false));
        }

        let eq = rest.find('=').ok_or(EnvelopeError::Malformed("unterminated start tag"))?;
        let name = rest[..eq].trim();
        if name.is_empty() || name.contains(|c: char| c.is_whitespace() || c == '<' || c == '>') {
            return Err(EnvelopeError::Malformed("invalid attribute name"));
        }

        let value_start = rest[eq + 1..].trim_start();
        let quote = value_start
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or(EnvelopeError::Malformed("unquoted attribute value"))?;
        let value_body = &value_start[1..];
        let close = value_body
            .find(quote)
            .ok_or(EnvelopeError::Malformed("unterminated attribute value"))?;

        attrs.insert(name.to_string(), unescape(&value_body[..close]));
        rest = &value_body[close + 1..];
    }
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let Some(semi) = rest.find(';') else { break };
        let decoded = match &rest[1..semi] {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            entity => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Builder for an outgoing `<body/>`.
#[derive(Debug, Default)]
pub struct BodyBuilder {
    attrs: Vec<(&'static str, String)>,
    packets: Vec<Packet>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: &'static str, value: impl ToString) -> Self {
        self.attrs.push((name, value.to_string()));
        self
    }

    pub fn packets(mut self, packets: Vec<Packet>) -> Self {
        self.packets.extend(packets);
        self
    }

    pub fn finish(self) -> String {
        let mut out = String::from("<body");
        for (name, value) in &self.attrs {
            out.push_str(&format!(" {name}='{}'", escape(value)));
        }
        out.push_str(&format!(" xmlns='{HTTPBIND_NS}'"));

        if self.packets.is_empty() {
            out.push_str("/>");
            return out;
        }

        out.push('>');
        for packet in &self.packets {
            out.push_str(packet.as_str());
        }
        out.push_str("</body>");
        out
    }
}

/// Render a session reply.
pub fn encode_reply(reply: Reply) -> String {
    match reply {
        Reply::Created { sid, ack, params } => {
            let mut body = BodyBuilder::new().attr(SID_ATTR, sid);
            for (name, value) in ack.attributes() {
                body = body.attr(name, value);
            }
            body.attr(HOLD_ATTR, params.hold_requests)
                .attr("maxpause", params.max_pause)
                .finish()
        }
        Reply::Packets(packets) => BodyBuilder::new().packets(packets).finish(),
        Reply::Terminated { packets, condition } => {
            let body = BodyBuilder::new().attr(TYPE_ATTR, "terminate");
            let body = match condition {
                Some(condition) => body.attr("condition", condition),
                None => body,
            };
            body.packets(packets).finish()
        }
    }
}

/// Render a rejection.
pub fn encode_error(kind: &'static str, condition: &'static str) -> String {
    BodyBuilder::new()
        .attr(TYPE_ATTR, kind)
        .attr("condition", condition)
        .finish()
}
