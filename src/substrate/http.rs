//! HTTP job substrate client.
//!
//! Talks to a substrate service exposing job records as JSON:
//! `GET {base}/jobs` lists live jobs, `POST {base}/jobs` submits one and
//! echoes the accepted record back.

use crate::types::Job;

use super::{JobSubstrate, SubstrateError};

/// A substrate client over a plain JSON/HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSubstrate {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSubstrate {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }
}

impl JobSubstrate for HttpSubstrate {
    async fn list_jobs(&self) -> Result<Vec<Job>, SubstrateError> {
        let response = self
            .http
            .get(self.jobs_url())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(api_error)?;
        response.json().await.map_err(api_error)
    }

    async fn submit_job(&self, job: Job) -> Result<Job, SubstrateError> {
        let response = self
            .http
            .post(self.jobs_url())
            .json(&job)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(api_error)?;
        response.json().await.map_err(api_error)
    }
}

fn api_error(err: reqwest::Error) -> SubstrateError {
    SubstrateError::Api {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let substrate = HttpSubstrate::new("http://substrate.local/");
        assert_eq!(substrate.jobs_url(), "http://substrate.local/jobs");

        let substrate = HttpSubstrate::new("http://substrate.local");
        assert_eq!(substrate.jobs_url(), "http://substrate.local/jobs");
    }
}
