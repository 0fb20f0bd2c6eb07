// SOAP envelopes for the session service
// Writes the session create/close/ping messages and pulls the binary security token
// back out of the create response

use crate::config::SoapConfig;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::unescape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::fmt;
use std::io;
use thiserror::Error;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const EB_NS: &str = "http://www.ebxml.org/namespaces/messageHeader";
const WSSE_NS: &str = "http://schemas.xmlsoap.org/ws/2002/12/secext";
const OTA_NS: &str = "http://www.opentravel.org/OTA/2003/05";
const PARTY_TYPE: &str = "urn:x12.org:IO5:01";

// Local names leading to the token, namespace prefixes are ignored
const TOKEN_PATH: [&str; 4] = ["Envelope", "Header", "Security", "BinarySecurityToken"];
const FAULT_PATH: [&str; 3] = ["Envelope", "Body", "Fault"];

/// Opaque credential issued by the session service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Prefix safe to put in logs
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(16) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("SOAP fault {code}: {message}")]
    Fault { code: String, message: String },

    #[error("Missing element: {0}")]
    MissingElement(&'static str),

    #[error("Binary security token is empty")]
    EmptyToken,
}

#[derive(Error, Debug)]
#[error("Failed to write SOAP envelope: {0}")]
pub struct EnvelopeWriteError(#[from] io::Error);

// Pull `Envelope/Header/Security/BinarySecurityToken` out of a session create response.
// A SOAP fault in the body is reported as such; any other shape yields the first
// element of the path that was not found.
pub fn extract_security_token(xml: &str) -> Result<SessionToken, ExtractionError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut reached = 0;
    let mut fault_code = String::new();
    let mut fault_message = String::new();
    let mut in_fault = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                if name == TOKEN_PATH[3] && matches_path(&path, &TOKEN_PATH[..3]) {
                    let raw = reader
                        .read_text(e.name())
                        .map_err(|err| ExtractionError::Xml(err.to_string()))?;
                    let text = unescape(&raw)
                        .map_err(|err| ExtractionError::Xml(err.to_string()))?;
                    let token = text.trim();
                    if token.is_empty() {
                        return Err(ExtractionError::EmptyToken);
                    }
                    return Ok(SessionToken::new(token));
                }

                if in_fault && (name == "faultcode" || name == "faultstring") {
                    let raw = reader
                        .read_text(e.name())
                        .map_err(|err| ExtractionError::Xml(err.to_string()))?;
                    let text = unescape(&raw)
                        .map_err(|err| ExtractionError::Xml(err.to_string()))?
                        .trim()
                        .to_string();
                    if name == "faultcode" {
                        fault_code = text;
                    } else {
                        fault_message = text;
                    }
                    continue;
                }

                path.push(name);
                reached = reached.max(matched_prefix(&path, &TOKEN_PATH));
                if matches_path(&path, &FAULT_PATH) {
                    in_fault = true;
                }
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == TOKEN_PATH[3] && matches_path(&path, &TOKEN_PATH[..3]) {
                    return Err(ExtractionError::EmptyToken);
                }

                path.push(name);
                reached = reached.max(matched_prefix(&path, &TOKEN_PATH));
                path.pop();
            }
            Ok(Event::End(_)) => {
                if matches_path(&path, &FAULT_PATH) {
                    in_fault = false;
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractionError::Xml(format!(
                    "error at position {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => (),
        }
    }

    if !fault_code.is_empty() || !fault_message.is_empty() {
        return Err(ExtractionError::Fault {
            code: fault_code,
            message: fault_message,
        });
    }

    Err(ExtractionError::MissingElement(TOKEN_PATH[reached.min(3)]))
}

fn matches_path(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

fn matched_prefix(path: &[String], expected: &[&str]) -> usize {
    path.iter()
        .zip(expected)
        .take_while(|(a, b)| a == *b)
        .count()
}

// Header fields shared by every message
#[derive(Debug, Clone)]
pub struct MessageHeader<'a> {
    pub service: &'a str,
    pub action: &'a str,
    pub conversation_id: &'a str,
    pub timestamp: DateTime<Utc>,
}

enum Credential<'a> {
    Login(&'a SoapConfig),
    Token(&'a SessionToken),
}

pub fn new_conversation_id() -> String {
    format!("{:016x}@sabre-client", rand::random::<u64>())
}

pub fn session_create_envelope(
    config: &SoapConfig,
    conversation_id: &str,
) -> Result<String, EnvelopeWriteError> {
    let header = MessageHeader {
        service: "SessionCreateRQ",
        action: "SessionCreateRQ",
        conversation_id,
        timestamp: Utc::now(),
    };
    write_envelope(config, &header, Credential::Login(config), |w| {
        pos_request(w, "SessionCreateRQ", &config.organization)
    })
}

pub fn session_close_envelope(
    config: &SoapConfig,
    token: &SessionToken,
    conversation_id: &str,
) -> Result<String, EnvelopeWriteError> {
    let header = MessageHeader {
        service: "SessionCloseRQ",
        action: "SessionCloseRQ",
        conversation_id,
        timestamp: Utc::now(),
    };
    write_envelope(config, &header, Credential::Token(token), |w| {
        pos_request(w, "SessionCloseRQ", &config.organization)
    })
}

pub fn ping_envelope(
    config: &SoapConfig,
    token: &SessionToken,
    conversation_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<String, EnvelopeWriteError> {
    let header = MessageHeader {
        service: "OTA_PingRQ",
        action: "OTA_PingRQ",
        conversation_id,
        timestamp,
    };
    let stamp = timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
    write_envelope(config, &header, Credential::Token(token), |w| {
        w.write_event(Event::Start(BytesStart::new("OTA_PingRQ").with_attributes([
            ("xmlns", OTA_NS),
            ("TimeStamp", stamp.as_str()),
            ("Version", "1.0.0"),
        ])))?;
        text_element(w, "EchoData", &[], "Are you there")?;
        w.write_event(Event::End(BytesEnd::new("OTA_PingRQ")))
    })
}

// Envelope for an arbitrary pooled action; `body` is an already serialized XML fragment
pub fn action_envelope(
    config: &SoapConfig,
    action: &str,
    token: &SessionToken,
    conversation_id: &str,
    body: &str,
) -> Result<String, EnvelopeWriteError> {
    let header = MessageHeader {
        service: action,
        action,
        conversation_id,
        timestamp: Utc::now(),
    };
    write_envelope(config, &header, Credential::Token(token), |w| {
        w.get_mut().extend_from_slice(body.as_bytes());
        Ok(())
    })
}

fn write_envelope<F>(
    config: &SoapConfig,
    header: &MessageHeader<'_>,
    credential: Credential<'_>,
    body: F,
) -> Result<String, EnvelopeWriteError>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> io::Result<()>,
{
    let mut w = Writer::new(Vec::new());

    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    w.write_event(Event::Start(
        BytesStart::new("SOAP-ENV:Envelope")
            .with_attributes([("xmlns:SOAP-ENV", SOAP_ENV_NS), ("xmlns:eb", EB_NS)]),
    ))?;

    w.write_event(Event::Start(BytesStart::new("SOAP-ENV:Header")))?;
    message_header(&mut w, config, header)?;
    security_header(&mut w, credential)?;
    w.write_event(Event::End(BytesEnd::new("SOAP-ENV:Header")))?;

    w.write_event(Event::Start(BytesStart::new("SOAP-ENV:Body")))?;
    body(&mut w)?;
    w.write_event(Event::End(BytesEnd::new("SOAP-ENV:Body")))?;

    w.write_event(Event::End(BytesEnd::new("SOAP-ENV:Envelope")))?;

    Ok(String::from_utf8_lossy(&w.into_inner()).into_owned())
}

fn message_header(
    w: &mut Writer<Vec<u8>>,
    config: &SoapConfig,
    header: &MessageHeader<'_>,
) -> io::Result<()> {
    w.write_event(Event::Start(
        BytesStart::new("eb:MessageHeader")
            .with_attributes([("SOAP-ENV:mustUnderstand", "1"), ("eb:version", "1.0")]),
    ))?;

    w.write_event(Event::Start(BytesStart::new("eb:From")))?;
    text_element(w, "eb:PartyId", &[("type", PARTY_TYPE)], &config.party_id)?;
    w.write_event(Event::End(BytesEnd::new("eb:From")))?;
    w.write_event(Event::Start(BytesStart::new("eb:To")))?;
    text_element(w, "eb:PartyId", &[("type", PARTY_TYPE)], &config.party_id)?;
    w.write_event(Event::End(BytesEnd::new("eb:To")))?;

    text_element(w, "eb:CPAId", &[], &config.organization)?;
    text_element(w, "eb:ConversationId", &[], header.conversation_id)?;
    text_element(w, "eb:Service", &[("eb:type", "OTA")], header.service)?;
    text_element(w, "eb:Action", &[], header.action)?;

    w.write_event(Event::Start(BytesStart::new("eb:MessageData")))?;
    text_element(
        w,
        "eb:MessageId",
        &[],
        &format!("mid:{}", header.timestamp.timestamp_millis()),
    )?;
    text_element(
        w,
        "eb:Timestamp",
        &[],
        &header.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
    )?;
    w.write_event(Event::End(BytesEnd::new("eb:MessageData")))?;

    w.write_event(Event::End(BytesEnd::new("eb:MessageHeader")))
}

fn security_header(w: &mut Writer<Vec<u8>>, credential: Credential<'_>) -> io::Result<()> {
    w.write_event(Event::Start(
        BytesStart::new("wsse:Security").with_attributes([("xmlns:wsse", WSSE_NS)]),
    ))?;

    match credential {
        Credential::Login(config) => {
            w.write_event(Event::Start(BytesStart::new("wsse:UsernameToken")))?;
            text_element(w, "wsse:Username", &[], &config.username)?;
            text_element(w, "wsse:Password", &[], &config.password)?;
            text_element(w, "Organization", &[], &config.organization)?;
            text_element(w, "Domain", &[], &config.domain)?;
            w.write_event(Event::End(BytesEnd::new("wsse:UsernameToken")))?;
        }
        Credential::Token(token) => {
            text_element(
                w,
                "wsse:BinarySecurityToken",
                &[("valueType", "String"), ("EncodingType", "wsse:Base64Binary")],
                token.as_str(),
            )?;
        }
    }

    w.write_event(Event::End(BytesEnd::new("wsse:Security")))
}

fn pos_request(w: &mut Writer<Vec<u8>>, name: &str, pseudo_city_code: &str) -> io::Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Start(BytesStart::new("POS")))?;
    w.write_event(Event::Empty(
        BytesStart::new("Source").with_attributes([("PseudoCityCode", pseudo_city_code)]),
    ))?;
    w.write_event(Event::End(BytesEnd::new("POS")))?;
    w.write_event(Event::End(BytesEnd::new(name)))
}

fn text_element(
    w: &mut Writer<Vec<u8>>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> io::Result<()> {
    w.write_event(Event::Start(
        BytesStart::new(name).with_attributes(attrs.iter().copied()),
    ))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))
}
