//! Stanza codec: typed decoding of inbound frames and the fixed set of
//! outbound stanza templates.
//!
//! With RFC 7395 framing every WebSocket text frame is one standalone XML
//! fragment, so decoding never has to find stanza boundaries in a byte
//! stream; it only has to classify the fragment's root element and pull out
//! the handful of fields the dispatcher cares about.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;

use crate::error::ParseError;

pub const NS_CLIENT: &str = "jabber:client";
pub const NS_FRAMING: &str = "urn:ietf:params:xml:ns:xmpp-framing";
pub const NS_SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";
pub const NS_BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";
pub const NS_SESSION: &str = "urn:ietf:params:xml:ns:xmpp-session";
pub const NS_MUC: &str = "http://jabber.org/protocol/muc";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StanzaKind {
    Message,
    Presence,
    Iq,
    /// Stream-level `<open/>` acknowledgment.
    Open,
    /// Stream features advertisement. Content is not inspected.
    Features,
    SaslSuccess,
    SaslFailure,
    Other(String),
}

/// One parsed inbound frame. Constructed per frame, never retained.
#[derive(Debug, Clone)]
pub struct Stanza {
    pub kind: StanzaKind,
    pub from: Option<String>,
    pub to: Option<String>,
    pub typ: Option<String>,
    pub body: Option<String>,
}

fn ns_is(ns: &ResolveResult<'_>, expected: &str) -> bool {
    matches!(ns, ResolveResult::Bound(Namespace(n)) if *n == expected.as_bytes())
}

/// `jabber:client` is the default namespace of a framed stanza, so an
/// element with no namespace declaration at all also qualifies.
fn ns_is_client(ns: &ResolveResult<'_>) -> bool {
    matches!(ns, ResolveResult::Unbound) || ns_is(ns, NS_CLIENT)
}

fn root_stanza(ns: &ResolveResult<'_>, e: &BytesStart<'_>) -> Stanza {
    let kind = match e.local_name().as_ref() {
        b"message" if ns_is_client(ns) => StanzaKind::Message,
        b"presence" => StanzaKind::Presence,
        b"iq" => StanzaKind::Iq,
        b"open" => StanzaKind::Open,
        b"features" => StanzaKind::Features,
        b"success" if ns_is(ns, NS_SASL) => StanzaKind::SaslSuccess,
        b"failure" if ns_is(ns, NS_SASL) => StanzaKind::SaslFailure,
        other => StanzaKind::Other(String::from_utf8_lossy(other).into_owned()),
    };

    let mut stanza = Stanza {
        kind,
        from: None,
        to: None,
        typ: None,
        body: None,
    };
    for attr in e.attributes().flatten() {
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        match attr.key.as_ref() {
            b"from" => stanza.from = Some(value),
            b"to" => stanza.to = Some(value),
            b"type" => stanza.typ = Some(value),
            _ => {}
        }
    }
    stanza
}

/// Decode one framed stanza. Malformed or empty fragments yield a
/// `ParseError`; the caller logs and drops the frame.
pub fn decode(text: &str) -> Result<Stanza, ParseError> {
    let mut reader = NsReader::from_str(text);

    let mut root: Option<Stanza> = None;
    let mut depth = 0usize;
    let mut in_body = false;
    let mut body_text = String::new();

    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(e))) => {
                if depth == 0 {
                    root = Some(root_stanza(&ns, &e));
                } else if depth == 1 && e.local_name().as_ref() == b"body" && ns_is_client(&ns) {
                    in_body = true;
                }
                depth += 1;
            }
            Ok((ns, Event::Empty(e))) => {
                if depth == 0 {
                    root = Some(root_stanza(&ns, &e));
                }
            }
            Ok((_, Event::Text(t))) => {
                if in_body {
                    let text = t.unescape().map_err(|e| ParseError(e.to_string()))?;
                    body_text.push_str(&text);
                }
            }
            Ok((_, Event::CData(t))) => {
                if in_body {
                    body_text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok((_, Event::End(_))) => {
                depth = depth.saturating_sub(1);
                if in_body && depth == 1 {
                    in_body = false;
                }
            }
            Ok((_, Event::Eof)) => break,
            Ok(_) => {}
            Err(e) => return Err(ParseError(e.to_string())),
        }
    }

    let mut stanza = root.ok_or_else(|| ParseError("frame carries no element".into()))?;
    if !body_text.is_empty() {
        stanza.body = Some(body_text);
    }
    Ok(stanza)
}

/// The vendor metadata element attached to every outbound presence and
/// message stanza. The four fields are a fixed part of the wire contract
/// with the room rendering layer.
#[derive(Debug, Clone)]
pub struct DisplayIdentity {
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
}

impl DisplayIdentity {
    fn data_element(&self) -> String {
        format!(
            r#"<data xmlns="{NS_CLIENT}" fullName="{}" senderFirstName="{}" senderLastName="{}" showInChannel="true"/>"#,
            escape(&self.full_name),
            escape(&self.first_name),
            escape(&self.last_name),
        )
    }
}

pub fn stream_open(domain: &str) -> String {
    format!(r#"<open xmlns="{NS_FRAMING}" to="{}" version="1.0"/>"#, escape(domain))
}

pub fn sasl_auth(token: &str) -> String {
    format!(r#"<auth xmlns="{NS_SASL}" mechanism="PLAIN">{token}</auth>"#)
}

pub fn bind(resource: &str) -> String {
    format!(
        r#"<iq type="set" id="bind"><bind xmlns="{NS_BIND}"><resource>{}</resource></bind></iq>"#,
        escape(resource)
    )
}

pub fn establish_session() -> String {
    format!(r#"<iq type="set" id="session"><session xmlns="{NS_SESSION}"/></iq>"#)
}

pub fn muc_join(room_bare: &str, nickname: &str, identity: &DisplayIdentity) -> String {
    format!(
        r#"<presence to="{}/{}"><x xmlns="{NS_MUC}"/>{}</presence>"#,
        escape(room_bare),
        escape(nickname),
        identity.data_element(),
    )
}

pub fn groupchat_message(room_bare: &str, body: &str, identity: &DisplayIdentity) -> String {
    format!(
        r#"<message to="{}" type="groupchat"><body>{}</body>{}</message>"#,
        escape(room_bare),
        escape(body),
        identity.data_element(),
    )
}
