use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payload of one outbound violation report.
///
/// Field names match the collector's `store-violation-frame` endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationReport {
    pub quiz_id: String,
    pub student_username: String,
    pub violation_type: String,
    /// Base64 JPEG.
    pub frame_data: String,
    /// ISO-8601 UTC.
    pub timestamp: String,
}

/// Remote store for violation evidence.
///
/// `Ok` means the collector acknowledged the report with a 2xx response.
/// Any `Err` sends the record down the local fallback path.
pub trait ViolationReporter: Send {
    fn report(&self, report: &ViolationReport) -> Result<()>;
}

/// Posts reports as JSON over HTTP.
pub struct HttpReporter {
    url: String,
    agent: ureq::Agent,
}

impl HttpReporter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url).with_context(|| format!("parse report url {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("report url must be http(s), got {}", parsed.scheme()));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { url, agent })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ViolationReporter for HttpReporter {
    fn report(&self, report: &ViolationReport) -> Result<()> {
        let body = serde_json::to_string(report)?;
        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) if (200..300).contains(&response.status()) => Ok(()),
            Ok(response) => Err(anyhow!(
                "violation report not acknowledged: status {}",
                response.status()
            )),
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("violation report rejected: status {}", code))
            }
            Err(err) => Err(err).with_context(|| format!("post violation report to {}", self.url)),
        }
    }
}
