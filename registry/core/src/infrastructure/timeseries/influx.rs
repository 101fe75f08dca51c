// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! InfluxDB v2 client for alert and energy freshness lookups.
//!
//! Issues a Flux query against `/api/v2/query` and reads the `_time` column
//! of the first data row of the CSV response.

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

use crate::domain::freshness::BackendError;
use crate::domain::registry_config::{resolve_secret, InfluxConfig};

/// How far back a lookup searches
const RANGE_START: &str = "-30d";

#[derive(Clone)]
pub struct InfluxBackend {
    client: reqwest::Client,
    url: String,
    org: String,
    bucket: String,
    token: Option<String>,
}

impl InfluxBackend {
    pub fn new(config: &InfluxConfig, request_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.as_deref().and_then(resolve_secret),
        })
    }

    pub async fn latest_alert(&self, lift_id: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        let filter = format!(
            r#"r._measurement == "alert" and r.lift_id == "{}""#,
            escape_flux(lift_id)
        );
        self.latest_time(&filter).await
    }

    pub async fn latest_energy(&self, site: Option<&str>) -> Result<Option<DateTime<Utc>>, BackendError> {
        let filter = match site {
            Some(site) => format!(r#"r._measurement == "energy" and r.site == "{}""#, escape_flux(site)),
            None => r#"r._measurement == "energy""#.to_string(),
        };
        self.latest_time(&filter).await
    }

    async fn latest_time(&self, filter: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
        let flux = format!(
            r#"from(bucket: "{bucket}")
  |> range(start: {start})
  |> filter(fn: (r) => {filter})
  |> group()
  |> sort(columns: ["_time"], desc: true)
  |> limit(n: 1)
  |> keep(columns: ["_time"])"#,
            bucket = escape_flux(&self.bucket),
            start = RANGE_START,
            filter = filter,
        );
        debug!(query = %flux, "Running Flux query");

        let mut request = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(flux);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Token {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Request(format!(
                "influx returned {}: {}",
                status,
                body.trim()
            )));
        }

        let body = response.text().await?;
        parse_latest_time(&body)
    }
}

fn escape_flux(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Read `_time` from the first data row of an InfluxDB CSV response.
fn parse_latest_time(csv: &str) -> Result<Option<DateTime<Utc>>, BackendError> {
    let mut lines = csv
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let Some(header) = lines.next() else {
        return Ok(None);
    };
    let column = header
        .split(',')
        .position(|c| c == "_time")
        .ok_or_else(|| BackendError::Malformed("no _time column in response".to_string()))?;

    let Some(row) = lines.next() else {
        return Ok(None);
    };
    let raw = row
        .split(',')
        .nth(column)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| BackendError::Malformed(format!("row has no _time value: {}", row)))?;

    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| BackendError::Malformed(format!("bad _time '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config(url: &str) -> InfluxConfig {
        InfluxConfig {
            url: url.to_string(),
            org: "dtp-org".to_string(),
            bucket: "signals".to_string(),
            token: Some("secret".to_string()),
        }
    }

    #[test]
    fn test_parse_latest_time() {
        let csv = ",result,table,_time\r\n,_result,0,2026-03-01T10:15:00Z\r\n\r\n";
        let t = parse_latest_time(csv).unwrap().unwrap();
        assert_eq!(t.to_rfc3339(), "2026-03-01T10:15:00+00:00");

        assert_eq!(parse_latest_time("").unwrap(), None);
        assert_eq!(parse_latest_time(",result,table,_time\r\n").unwrap(), None);
        assert!(matches!(
            parse_latest_time(",result,table,_value\n,_result,0,1\n"),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_escape_flux() {
        assert_eq!(escape_flux(r#"lift"1\"#), r#"lift\"1\\"#);
    }

    #[tokio::test]
    async fn test_latest_alert_queries_by_lift() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/query")
            .match_query(Matcher::UrlEncoded("org".into(), "dtp-org".into()))
            .match_header("authorization", "Token secret")
            .match_body(Matcher::Regex(r#"r.lift_id == "lift-001""#.to_string()))
            .with_status(200)
            .with_body(",result,table,_time\r\n,_result,0,2026-03-01T10:15:00Z\r\n")
            .create_async()
            .await;

        let backend = InfluxBackend::new(&config(&server.url()), Duration::from_secs(2)).unwrap();
        let t = backend.latest_alert("lift-001").await.unwrap();

        mock.assert_async().await;
        assert!(t.is_some());
    }

    #[tokio::test]
    async fn test_error_status_is_request_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v2/query")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let backend = InfluxBackend::new(&config(&server.url()), Duration::from_secs(2)).unwrap();
        let err = backend.latest_energy(None).await.unwrap_err();
        assert!(matches!(err, BackendError::Request(_)));
    }
}
