// Session token source
// Remote service that issues, pings and closes SOAP session tokens

use crate::api_client::{verify_response, ApiError, ClientError};
use crate::config::{ClientConfig, SoapConfig};
use crate::envelope::{
    action_envelope, new_conversation_id, ping_envelope, session_close_envelope,
    session_create_envelope, SessionToken,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;
use tracing::{debug, warn};

// Each operation returns the raw response envelope; token extraction is up to the caller.
// A create answered with a SOAP fault still returns the fault envelope.
#[async_trait]
pub trait SessionTokenSource: Send + Sync + 'static {
    async fn create(&self) -> Result<String, ApiError>;

    async fn close(&self, token: &SessionToken) -> Result<String, ApiError>;

    // Keep-alive ping; the token itself does not change
    async fn refresh(
        &self,
        token: &SessionToken,
        timestamp: DateTime<Utc>,
    ) -> Result<String, ApiError>;
}

pub struct SoapSessionSource {
    http: reqwest::Client,
    url: String,
    soap: SoapConfig,
}

impl SoapSessionSource {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            http,
            url: config.soap_url(),
            soap: config.soap.clone(),
        })
    }

    // Send a pooled action on an already checked-out session
    pub async fn call(
        &self,
        action: &str,
        token: &SessionToken,
        body: &str,
    ) -> Result<String, ApiError> {
        let envelope = action_envelope(&self.soap, action, token, &new_conversation_id(), body)?;
        self.post(action, envelope).await
    }

    async fn send(&self, action: &str, envelope: String) -> Result<SoapReply, ApiError> {
        debug!(action, url = %self.url, "posting SOAP envelope");

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header(ACCEPT, "text/xml")
            .body(envelope)
            .send()
            .await?;

        let status = response.status().as_u16();
        let is_xml = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or(false, |value| value.contains("xml"));
        let body = response.bytes().await?;

        Ok(SoapReply {
            status,
            is_xml,
            body,
        })
    }

    async fn post(&self, action: &str, envelope: String) -> Result<String, ApiError> {
        let reply = self.send(action, envelope).await?;
        verify_response(reply.status, &reply.body)?;
        Ok(reply.text())
    }
}

struct SoapReply {
    status: u16,
    is_xml: bool,
    body: Bytes,
}

impl SoapReply {
    // SOAP 1.1 delivers faults as a 500 whose body is the fault envelope
    fn is_fault(&self) -> bool {
        self.status == 500 && self.is_xml && !self.body.is_empty()
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
impl SessionTokenSource for SoapSessionSource {
    async fn create(&self) -> Result<String, ApiError> {
        let envelope = session_create_envelope(&self.soap, &new_conversation_id())?;
        let reply = self.send("SessionCreateRQ", envelope).await?;

        // The fault envelope goes back to the caller, whose token extraction reports it
        if reply.is_fault() {
            warn!(status = reply.status, "session create answered with a SOAP fault");
            return Ok(reply.text());
        }

        verify_response(reply.status, &reply.body)?;
        Ok(reply.text())
    }

    async fn close(&self, token: &SessionToken) -> Result<String, ApiError> {
        let envelope = session_close_envelope(&self.soap, token, &new_conversation_id())?;
        self.post("SessionCloseRQ", envelope).await
    }

    async fn refresh(
        &self,
        token: &SessionToken,
        timestamp: DateTime<Utc>,
    ) -> Result<String, ApiError> {
        let envelope = ping_envelope(&self.soap, token, &new_conversation_id(), timestamp)?;
        self.post("OTA_PingRQ", envelope).await
    }
}

// In-process stand-in for the session service
#[cfg(test)]
pub mod mock_source {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct MockSessionSource {
        created: AtomicUsize,
        fail_next_creates: AtomicUsize,
        malformed_next_creates: AtomicUsize,
        failing_tokens: Mutex<HashSet<String>>,
        closed: Mutex<Vec<SessionToken>>,
        refreshed: Mutex<Vec<(SessionToken, DateTime<Utc>)>>,
    }

    pub const CREATE_RS: &str = "<soap-env:Envelope xmlns:soap-env=\"http://schemas.xmlsoap.org/soap/envelope/\">\
        <soap-env:Header><wsse:Security xmlns:wsse=\"http://schemas.xmlsoap.org/ws/2002/12/secext\">\
        <wsse:BinarySecurityToken valueType=\"String\">Shared/IDL:S1</wsse:BinarySecurityToken>\
        </wsse:Security></soap-env:Header><soap-env:Body/></soap-env:Envelope>";

    pub const FAULT_RS: &str = "<soap-env:Envelope xmlns:soap-env=\"http://schemas.xmlsoap.org/soap/envelope/\">\
        <soap-env:Body><soap-env:Fault>\
        <faultcode>soap-env:Client.AuthenticationFailed</faultcode>\
        <faultstring>Authentication failed</faultstring>\
        </soap-env:Fault></soap-env:Body></soap-env:Envelope>";

    impl MockSessionSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn envelope_for(token: &str) -> String {
            format!(
                "<soap-env:Envelope xmlns:soap-env=\"http://schemas.xmlsoap.org/soap/envelope/\">\
                 <soap-env:Header><wsse:Security xmlns:wsse=\"urn:wsse\">\
                 <wsse:BinarySecurityToken>{}</wsse:BinarySecurityToken>\
                 </wsse:Security></soap-env:Header><soap-env:Body/></soap-env:Envelope>",
                token
            )
        }

        // Upcoming creates answer with a 503
        pub fn fail_next_creates(&self, count: usize) {
            self.fail_next_creates.store(count, Ordering::SeqCst);
        }

        // Upcoming creates answer 200 with an envelope that carries no token
        pub fn malformed_next_creates(&self, count: usize) {
            self.malformed_next_creates.store(count, Ordering::SeqCst);
        }

        // Close and refresh fail for this token
        pub fn fail_token(&self, token: &str) {
            self.failing_tokens.lock().insert(token.to_string());
        }

        pub fn created_count(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        pub fn closed(&self) -> Vec<SessionToken> {
            self.closed.lock().clone()
        }

        pub fn refreshed(&self) -> Vec<SessionToken> {
            self.refreshed
                .lock()
                .iter()
                .map(|(token, _)| token.clone())
                .collect()
        }

        fn take_one(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn check_token(&self, token: &SessionToken) -> Result<(), ApiError> {
            if self.failing_tokens.lock().contains(token.as_str()) {
                return Err(ApiError::InternalServerError(format!(
                    "session {} is not valid",
                    token.short()
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SessionTokenSource for MockSessionSource {
        async fn create(&self) -> Result<String, ApiError> {
            if Self::take_one(&self.fail_next_creates) {
                return Err(ApiError::ServiceUnavailable);
            }
            if Self::take_one(&self.malformed_next_creates) {
                return Ok("<soap-env:Envelope><soap-env:Header/></soap-env:Envelope>".to_string());
            }

            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Self::envelope_for(&format!("T{}", n)))
        }

        async fn close(&self, token: &SessionToken) -> Result<String, ApiError> {
            self.check_token(token)?;
            self.closed.lock().push(token.clone());
            Ok("<Envelope/>".to_string())
        }

        async fn refresh(
            &self,
            token: &SessionToken,
            timestamp: DateTime<Utc>,
        ) -> Result<String, ApiError> {
            self.check_token(token)?;
            self.refreshed.lock().push((token.clone(), timestamp));
            Ok("<Envelope/>".to_string())
        }
    }
}
