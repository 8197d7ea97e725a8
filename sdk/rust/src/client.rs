//! Minimal client for the gateway's bind endpoint.
//!
//! Keeps the session id and request id counter so callers only deal with
//! payloads. Requests can be issued concurrently from clones sharing one
//! `Arc<BoshClient>`; each call takes the next rid at send time.

use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};

const HTTPBIND_NS: &str = "http://jabber.org/protocol/httpbind";

/// Raw response from the gateway.
#[derive(Debug, Clone)]
pub struct BoshResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl BoshResponse {
    /// Attribute of the `<body/>` start tag.
    pub fn attr(&self, name: &str) -> Option<String> {
        let end = self.body.find('>')?;
        let tag = &self.body[..end];
        for quote in ['\'', '"'] {
            let needle = format!(" {name}={quote}");
            if let Some(start) = tag.find(&needle) {
                let value = &tag[start + needle.len()..];
                let close = value.find(quote)?;
                return Some(value[..close].to_string());
            }
        }
        None
    }

    pub fn is_terminate(&self) -> bool {
        self.attr("type").as_deref() == Some("terminate")
    }

    pub fn is_error(&self) -> bool {
        self.attr("type").as_deref() == Some("error")
    }

    pub fn condition(&self) -> Option<String> {
        self.attr("condition")
    }

    /// Everything between `<body ...>` and `</body>`; empty for `<body/>`.
    pub fn payload(&self) -> &str {
        let Some(open_end) = self.body.find('>') else {
            return "";
        };
        if self.body[..open_end].ends_with('/') {
            return "";
        }
        let inner = &self.body[open_end + 1..];
        inner.rfind("</body>").map_or(inner, |close| &inner[..close])
    }
}

/// A client bound to one session.
#[derive(Debug)]
pub struct BoshClient {
    client: Client,
    url: String,
    sid: String,
    next_rid: AtomicU64,
}

impl BoshClient {
    /// Create a session. `attrs` are extra creation attributes such as
    /// `wait`, `hold` or `to`.
    pub async fn connect(
        url: &str,
        first_rid: u64,
        attrs: &[(&str, &str)],
    ) -> Result<(Self, BoshResponse), Box<dyn std::error::Error + Send + Sync>> {
        let client = Client::builder().no_proxy().build()?;
        let response = send(&client, url, &body(None, first_rid, attrs, "")).await?;

        let sid = response
            .attr("sid")
            .ok_or_else(|| format!("session creation failed ({}): {}", response.status, response.body))?;

        Ok((
            Self {
                client,
                url: url.to_string(),
                sid,
                next_rid: AtomicU64::new(first_rid + 1),
            },
            response,
        ))
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Request id the next call will use.
    pub fn next_rid(&self) -> u64 {
        self.next_rid.load(Ordering::SeqCst)
    }

    fn take_rid(&self) -> u64 {
        self.next_rid.fetch_add(1, Ordering::SeqCst)
    }

    /// Send a payload; the response may carry queued data.
    pub async fn send(&self, payload: &str) -> Result<BoshResponse, reqwest::Error> {
        self.request(self.take_rid(), &[], payload).await
    }

    /// Empty request, held by the gateway until data arrives or wait expires.
    pub async fn poll(&self) -> Result<BoshResponse, reqwest::Error> {
        self.send("").await
    }

    pub async fn pause(&self, seconds: u64) -> Result<BoshResponse, reqwest::Error> {
        let seconds = seconds.to_string();
        self.request(self.take_rid(), &[("pause", &seconds)], "").await
    }

    pub async fn terminate(&self) -> Result<BoshResponse, reqwest::Error> {
        self.request(self.take_rid(), &[("type", "terminate")], "").await
    }

    /// Send with an explicit rid, leaving the counter alone.
    pub async fn request(
        &self,
        rid: u64,
        attrs: &[(&str, &str)],
        payload: &str,
    ) -> Result<BoshResponse, reqwest::Error> {
        send(&self.client, &self.url, &body(Some(&self.sid), rid, attrs, payload)).await
    }
}

fn body(sid: Option<&str>, rid: u64, attrs: &[(&str, &str)], payload: &str) -> String {
    let mut out = format!("<body rid='{rid}'");
    if let Some(sid) = sid {
        out.push_str(&format!(" sid='{sid}'"));
    }
    for (name, value) in attrs {
        out.push_str(&format!(" {name}='{value}'"));
    }
    out.push_str(&format!(" xmlns='{HTTPBIND_NS}'"));
    if payload.is_empty() {
        out.push_str("/>");
    } else {
        out.push_str(&format!(">{payload}</body>"));
    }
    out
}

async fn send(client: &Client, url: &str, body: &str) -> Result<BoshResponse, reqwest::Error> {
    let response = client
        .post(url)
        .header("content-type", "text/xml; charset=utf-8")
        .body(body.to_string())
        .send()
        .await?;

    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await?;

    Ok(BoshResponse {
        status,
        content_type,
        body,
    })
}
