//! One-time passcode verification.
//!
//! The passcode service is an external collaborator: the core sends it a phone number and a
//! code and gets a pass/fail back. Issuing codes is not this crate's concern.

use crate::{CareError, CareResult};
use async_trait::async_trait;
use care_types::{Msisdn, Otp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[async_trait]
pub trait OtpVerifier: Send + Sync {
    /// `Ok(true)` when the code is valid for the phone number.
    async fn verify(&self, msisdn: &Msisdn, otp: &Otp) -> CareResult<bool>;
}

/// [`OtpVerifier`] backed by the passcode service's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpOtpVerifier {
    http: reqwest::Client,
    verify_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    msisdn: &'a str,
    otp: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    valid: bool,
}

impl HttpOtpVerifier {
    pub fn new(base_url: &str, timeout: Duration) -> CareResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CareError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            verify_url: format!("{}/otp/verify", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> CareError {
        if err.is_timeout() {
            CareError::Timeout(self.timeout)
        } else {
            CareError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl OtpVerifier for HttpOtpVerifier {
    async fn verify(&self, msisdn: &Msisdn, otp: &Otp) -> CareResult<bool> {
        let response = self
            .http
            .post(&self.verify_url)
            .json(&VerifyRequest {
                msisdn: msisdn.as_str(),
                otp: otp.as_str(),
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.as_u16() > 299 {
            let body = response.text().await.unwrap_or_default();
            return Err(CareError::Remote {
                status: status.as_u16(),
                text: status.canonical_reason().unwrap_or("error").to_owned(),
                diagnostics: String::new(),
                body,
            });
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| CareError::ResponseParse(format!("otp verification: {e}")))?;
        Ok(body.valid)
    }
}
